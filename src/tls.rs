//! TLS setup for both sides of the relay
//!
//! The listener side loads a certificate/key pair for STARTTLS. The upstream
//! side either verifies the relay against a configured CA file or, by default,
//! accepts whatever certificate the relay presents. The default mirrors the
//! deployment this relay is built for: a single known upstream reached over
//! Tor, whose certificate is often self-signed. Operators who can pin a CA
//! should set `upstream.ca_cert`.

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{
    WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::warn;

use crate::{Error, Result};

/// Build the STARTTLS acceptor from PEM files
pub fn load_acceptor<P: AsRef<Path>>(cert_file: P, key_file: P) -> Result<TlsAcceptor> {
    let cert_pem = std::fs::read(cert_file.as_ref())?;
    let key_pem = std::fs::read(key_file.as_ref())?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certificate: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "No certificate found in {}",
            cert_file.as_ref().display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())?
        .ok_or_else(|| Error::Tls("No private key found".into()))?;

    acceptor_from_der(certs, key)
}

/// Build a STARTTLS acceptor from already-decoded material
pub fn acceptor_from_der(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor> {
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the connector used for the upstream STARTTLS upgrade
pub fn upstream_connector(ca_cert: Option<&str>) -> Result<TlsConnector> {
    let config = match ca_cert {
        Some(path) => {
            let pem = std::fs::read(path)?;
            let mut roots = RootCertStore::empty();
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                roots.add(cert?)?;
            }
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
        None => {
            warn!("Upstream certificate verification is disabled");
            insecure_client_config()
        }
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Client configuration that accepts any server certificate. Handshake
/// signatures are still checked so the session keys belong to whoever holds
/// the presented certificate.
pub fn insecure_client_config() -> rustls::ClientConfig {
    let algorithms = rustls::crypto::ring::default_provider().signature_verification_algorithms;
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { algorithms }))
        .with_no_client_auth()
}

/// Parse the name sent in SNI and checked by a verifying connector
pub fn server_name(name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(name)
        .map(|n| n.to_owned())
        .map_err(|_| Error::InvalidConfig(format!("Invalid TLS server name: {name}")))
}

struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl std::fmt::Debug for AcceptAnyCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptAnyCertificate").finish()
    }
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
