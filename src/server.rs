//! Relay listener
//!
//! Accepts SMTP connections and runs one [`Session`] task per client.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::forward::{Forward, Forwarder};
use crate::session::Session;
use crate::tls;

/// Server state
pub struct Server<F = Forwarder> {
    config: Arc<Config>,
    tls_acceptor: Option<TlsAcceptor>,
    forwarder: Arc<F>,
}

impl Server<Forwarder> {
    /// Create a server forwarding to the configured upstream
    pub fn new(config: Config) -> crate::Result<Self> {
        config.validate()?;

        // Load TLS certificates
        let tls_acceptor = if config.listener.starttls {
            Some(tls::load_acceptor(
                &config.listener.cert_file,
                &config.listener.key_file,
            )?)
        } else {
            None
        };

        let forwarder = Forwarder::new(config.upstream.clone())?;
        Ok(Self::with_forwarder(config, tls_acceptor, forwarder))
    }
}

impl<F: Forward> Server<F> {
    pub fn with_forwarder(config: Config, tls_acceptor: Option<TlsAcceptor>, forwarder: F) -> Self {
        Self {
            config: Arc::new(config),
            tls_acceptor,
            forwarder: Arc::new(forwarder),
        }
    }

    /// Run the server
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.listener.bind_addr()?;
        let listener = TcpListener::bind(&addr).await?;
        info!("mail2news relay listening on {}", addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            "Forwarding to {}:{} via SOCKS5 {} (STARTTLS {})",
            self.config.upstream.host,
            self.config.upstream.port,
            self.config.upstream.proxy,
            if self.tls_acceptor.is_some() { "on" } else { "off" }
        );

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    continue;
                }
            };
            trace!("Connection from {}", addr);

            let session = Session::new(
                Arc::clone(&self.config),
                self.tls_acceptor.clone(),
                Arc::clone(&self.forwarder),
                addr,
            );
            tokio::spawn(async move {
                if let Err(e) = session.run(stream).await {
                    debug!("Client error from {}: {}", addr, e);
                }
            });
        }
    }
}

/// Run the server
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let server = Server::new(config)?;
    server.run().await
}
