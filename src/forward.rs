//! Message forwarding to the upstream relay

use std::future::Future;
use std::net::SocketAddr;

use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::{debug, info};

use crate::client::SmtpClient;
use crate::config::RelayConfig;
use crate::socks5::Socks5Dialer;
use crate::tls;
use crate::{Message, Result};

/// Something that can take responsibility for a finished message
pub trait Forward: Send + Sync + 'static {
    fn forward(&self, recipient: &str, message: &Message) -> impl Future<Output = Result<()>> + Send;
}

/// Submits each message to the configured relay through the SOCKS5 proxy
pub struct Forwarder {
    config: RelayConfig,
    dialer: Socks5Dialer,
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl Forwarder {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let proxy: SocketAddr = config.proxy_addr()?;
        let connector = tls::upstream_connector(config.ca_cert.as_deref())?;
        let server_name = tls::server_name(&config.server_name)?;
        Ok(Self {
            dialer: Socks5Dialer::new(proxy),
            connector,
            server_name,
            config,
        })
    }

    async fn submit(&self, recipient: &str, message: &Message) -> Result<()> {
        // 1. Proxied connection
        let stream = self.dialer.connect(&self.config.host, self.config.port).await?;

        // 2. Greeting
        let mut smtp = SmtpClient::connect(stream).await?;
        smtp.hello(self.config.helo_name()).await?;

        // 3. Mandatory encryption
        let mut smtp = smtp
            .starttls(&self.connector, self.server_name.clone())
            .await?;
        smtp.hello(self.config.helo_name()).await?;

        // 4. Anonymous envelope
        smtp.mail_from("").await?;
        smtp.rcpt_to(recipient).await?;

        // 5. Body
        smtp.data(message).await?;

        // 6. The relay owns the message now; a failed QUIT changes nothing
        if let Err(e) = smtp.quit().await {
            debug!("Upstream QUIT failed: {}", e);
        }
        Ok(())
    }
}

impl Forward for Forwarder {
    async fn forward(&self, recipient: &str, message: &Message) -> Result<()> {
        tokio::time::timeout(self.config.timeout(), self.submit(recipient, message)).await??;
        info!(
            "Forwarded {} bytes to {} via {}:{}",
            message.len(),
            recipient,
            self.config.host,
            self.config.port
        );
        Ok(())
    }
}
