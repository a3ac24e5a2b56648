//! Configuration management

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Local SMTP listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port (default: 2525)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Hostname announced in the banner and EHLO reply
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Connection deadline in seconds, counted from accept
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// Largest message body accepted, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Offer STARTTLS to clients
    #[serde(default = "default_true")]
    pub starttls: bool,
    /// TLS certificate file
    #[serde(default = "default_cert_file")]
    pub cert_file: String,
    /// TLS key file
    #[serde(default = "default_key_file")]
    pub key_file: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hostname: default_hostname(),
            session_timeout_secs: default_session_timeout(),
            max_message_size: default_max_message_size(),
            starttls: true,
            cert_file: default_cert_file(),
            key_file: default_key_file(),
        }
    }
}

/// Upstream relay target, reached through the SOCKS5 proxy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// SOCKS5 proxy address
    #[serde(default = "default_proxy")]
    pub proxy: String,
    /// Upstream relay hostname
    #[serde(default = "default_relay_host")]
    pub host: String,
    /// Upstream relay port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name presented in the upstream TLS handshake
    #[serde(default = "default_relay_host")]
    pub server_name: String,
    /// Identity sent with EHLO (defaults to the relay host)
    #[serde(default)]
    pub helo_name: Option<String>,
    /// Recipient for every forwarded message
    #[serde(default = "default_recipient")]
    pub recipient: String,
    /// Use the address from the client's RCPT command instead
    #[serde(default)]
    pub recipient_from_client: bool,
    /// CA certificate for upstream verification. Without it any certificate
    /// is accepted.
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// Bound on the whole upstream exchange, in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            proxy: default_proxy(),
            host: default_relay_host(),
            port: default_port(),
            server_name: default_relay_host(),
            helo_name: None,
            recipient: default_recipient(),
            recipient_from_client: false,
            ca_cert: None,
            timeout_secs: default_upstream_timeout(),
        }
    }
}

/// Full configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub upstream: RelayConfig,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    2525
}
fn default_hostname() -> String {
    "localhost".to_string()
}
fn default_session_timeout() -> u64 {
    300
}
fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}
fn default_cert_file() -> String {
    "cert.pem".to_string()
}
fn default_key_file() -> String {
    "key.pem".to_string()
}
fn default_proxy() -> String {
    "127.0.0.1:9050".to_string()
}
fn default_relay_host() -> String {
    "smtp.dizum.com".to_string()
}
fn default_recipient() -> String {
    "mail2news@dizum.com".to_string()
}
fn default_upstream_timeout() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every session or forward fail
    pub fn validate(&self) -> crate::Result<()> {
        if self.upstream.host.is_empty() {
            return Err(crate::Error::InvalidConfig("upstream.host is empty".into()));
        }
        if self.upstream.recipient.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "upstream.recipient is empty".into(),
            ));
        }
        if self.listener.session_timeout_secs == 0 || self.upstream.timeout_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "timeouts must be at least one second".into(),
            ));
        }
        self.upstream.proxy_addr()?;
        Ok(())
    }
}

impl ListenerConfig {
    /// Get socket address to bind to
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port).parse()?;
        Ok(addr)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl RelayConfig {
    /// Get SOCKS5 proxy socket address
    pub fn proxy_addr(&self) -> crate::Result<SocketAddr> {
        self.proxy
            .parse()
            .map_err(|_| crate::Error::InvalidConfig(format!("bad proxy address: {}", self.proxy)))
    }

    /// Identity announced to the upstream relay
    pub fn helo_name(&self) -> &str {
        self.helo_name.as_deref().unwrap_or(&self.host)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Generate example configuration
pub fn generate_example_config() -> String {
    r#"# mail2news relay configuration

# ============================================================================
# Local SMTP listener (point your mail client here)
# ============================================================================
listener:
  # Listen address (127.0.0.1 = localhost only)
  host: "127.0.0.1"
  port: 2525

  # Hostname announced in the greeting
  hostname: "localhost"

  # Connections are closed this many seconds after accept
  session_timeout_secs: 300

  # Largest accepted message body in bytes
  max_message_size: 10485760

  # Offer STARTTLS with the certificate below (see mail2news-gen-certs)
  starttls: true
  cert_file: "cert.pem"
  key_file: "key.pem"

# ============================================================================
# Upstream relay, reached only through the SOCKS5 proxy
# ============================================================================
upstream:
  # Tor SOCKS port
  proxy: "127.0.0.1:9050"

  host: "smtp.dizum.com"
  port: 2525

  # Name sent in the TLS handshake
  server_name: "smtp.dizum.com"

  # Every message goes here unless recipient_from_client is set
  recipient: "mail2news@dizum.com"
  recipient_from_client: false

  # Without a CA file the upstream certificate is NOT verified
  # ca_cert: "upstream-ca.pem"

  # Abort a forward that takes longer than this
  timeout_secs: 120
"#
    .to_string()
}
