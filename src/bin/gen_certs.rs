//! Certificate Generation Tool
//!
//! Produces the self-signed pair the listener uses for STARTTLS. Mail clients
//! talking to a localhost relay usually need to be told to trust it once.

use anyhow::Result;
use clap::Parser;
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, SanType};
use std::path::PathBuf;
use std::time::Duration;

/// Generate the STARTTLS certificate for the mail2news relay
#[derive(Parser, Debug)]
#[command(name = "mail2news-gen-certs")]
#[command(about = "Generate a self-signed TLS certificate")]
#[command(version)]
struct Args {
    /// Hostname for the certificate
    #[arg(short = 'n', long, default_value = "localhost")]
    hostname: String,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Validity in days
    #[arg(short, long, default_value = "365")]
    days: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    println!("Generating TLS certificate for: {}", args.hostname);
    println!("Output directory: {}", args.output.display());

    // Create output directory
    std::fs::create_dir_all(&args.output)?;

    let mut params = CertificateParams::new(vec![args.hostname.clone()]);
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::OrganizationName, "mail2news relay");
    params.distinguished_name.push(DnType::CommonName, &args.hostname);
    if args.hostname == "localhost" {
        params
            .subject_alt_names
            .push(SanType::IpAddress("127.0.0.1".parse()?));
    }

    // Set validity
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + Duration::from_secs(args.days * 24 * 60 * 60);

    params.key_usages = vec![
        rcgen::KeyUsagePurpose::DigitalSignature,
        rcgen::KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];

    let cert = Certificate::from_params(params)?;

    let cert_path = args.output.join("cert.pem");
    let key_path = args.output.join("key.pem");

    std::fs::write(&cert_path, cert.serialize_pem()?)?;
    std::fs::write(&key_path, cert.serialize_private_key_pem())?;

    println!();
    println!("Generated:");
    println!("  Certificate: {}", cert_path.display());
    println!("  Key: {}", key_path.display());

    Ok(())
}
