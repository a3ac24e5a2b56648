//! mail2news Relay Binary

use anyhow::Result;
use clap::Parser;
use mail2news_relay::config::{Config, generate_example_config};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// mail2news relay
#[derive(Parser, Debug)]
#[command(name = "mail2news-relay")]
#[command(about = "SMTP relay that forwards mail to a mail2news gateway over SOCKS5")]
#[command(version = mail2news_relay::VERSION)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Local listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// SOCKS5 proxy address
    #[arg(long)]
    proxy: Option<String>,

    /// Do not offer STARTTLS to clients
    #[arg(long)]
    no_starttls: bool,

    /// Print an example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", generate_example_config());
        return Ok(());
    }

    // Initialize logging
    let level = if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load config
    let mut config = if args.config.exists() {
        Config::from_file(&args.config)?
    } else {
        info!("No config file found, using defaults");
        Config::default()
    };

    // Apply command line overrides
    if let Some(port) = args.port {
        config.listener.port = port;
    }
    if let Some(proxy) = args.proxy {
        config.upstream.proxy = proxy;
    }
    if args.no_starttls {
        config.listener.starttls = false;
    }

    // Check TLS certificates
    if config.listener.starttls {
        for file in [&config.listener.cert_file, &config.listener.key_file] {
            if !std::path::Path::new(file).exists() {
                eprintln!("Error: TLS file not found: {}", file);
                eprintln!("Generate one with: mail2news-gen-certs, or run with --no-starttls");
                std::process::exit(1);
            }
        }
    }

    info!("mail2news relay {}", mail2news_relay::VERSION);

    // Run server
    mail2news_relay::server::run_server(config).await?;

    Ok(())
}
