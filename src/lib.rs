//! mail2news relay
//!
//! Accepts SMTP submissions from local mail clients and hands each message to
//! a fixed mail2news gateway, reached only through a SOCKS5 proxy (Tor).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      ┌─────────────┐      ┌─────────────┐      ┌──────────────┐
//! │ Mail client │─────▶│   Session   │─────▶│  SOCKS5     │─────▶│ Upstream     │
//! │  (MUA)      │ SMTP │  Port 2525  │ call │  Forwarder  │ SMTP │ relay (TLS)  │
//! │             │◀─────│             │◀─────│             │◀─────│              │
//! └─────────────┘      └─────────────┘      └─────────────┘      └──────────────┘
//! ```

pub mod client;
pub mod config;
pub mod forward;
pub mod proto;
pub mod server;
pub mod session;
pub mod socks5;
pub mod tls;

// Re-export commonly used items
pub use config::{Config, ListenerConfig, RelayConfig};
pub use forward::{Forward, Forwarder};
pub use proto::Message;
pub use server::Server;
pub use session::Session;

use thiserror::Error;

/// Error types for the relay
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("SOCKS5 error: {0}")]
    Socks(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Upstream replied {code}: {message}")]
    Upstream { code: u16, message: String },

    #[error("Operation timed out")]
    Timeout,
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Result type for the relay
pub type Result<T> = std::result::Result<T, Error>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
