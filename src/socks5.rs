//! SOCKS5 Dialer
//!
//! Client side of RFC 1928: opens a TCP connection to a proxy and asks it to
//! CONNECT to a named host. The hostname is sent unresolved so that name
//! resolution happens on the proxy side (required for Tor).

use bytes::{BufMut, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::{Error, Result};

/// SOCKS5 protocol constants
pub const VERSION: u8 = 0x05;
pub const AUTH_NONE: u8 = 0x00;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

/// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;

/// SOCKS5 address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// SOCKS5 reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Success = 0x00,
    GeneralFailure = 0x01,
    NotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressNotSupported = 0x08,
}

impl Reply {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Success),
            0x01 => Some(Self::GeneralFailure),
            0x02 => Some(Self::NotAllowed),
            0x03 => Some(Self::NetworkUnreachable),
            0x04 => Some(Self::HostUnreachable),
            0x05 => Some(Self::ConnectionRefused),
            0x06 => Some(Self::TtlExpired),
            0x07 => Some(Self::CommandNotSupported),
            0x08 => Some(Self::AddressNotSupported),
            _ => None,
        }
    }
}

/// Connects to targets through one SOCKS5 proxy
#[derive(Debug, Clone)]
pub struct Socks5Dialer {
    proxy: SocketAddr,
}

impl Socks5Dialer {
    pub fn new(proxy: SocketAddr) -> Self {
        Self { proxy }
    }

    /// Open a tunnel to `host:port`. The returned stream carries the target
    /// protocol directly.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(self.proxy).await?;
        trace!("Connected to SOCKS5 proxy {}", self.proxy);
        handshake(&mut stream, host, port).await?;
        debug!("SOCKS5 tunnel to {}:{} established", host, port);
        Ok(stream)
    }
}

/// Run the greeting and CONNECT exchange on an open proxy connection
async fn handshake<S>(stream: &mut S, host: &str, port: u16) -> Result<()>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    // 1. Greeting: offer no authentication only
    stream.write_all(&[VERSION, 1, AUTH_NONE]).await?;

    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;
    if buf[0] != VERSION {
        return Err(Error::Socks("Invalid SOCKS version".into()));
    }
    if buf[1] != AUTH_NONE {
        return Err(Error::Socks("No acceptable auth method".into()));
    }

    // 2. Request
    stream.write_all(&connect_request(host, port)?).await?;
    stream.flush().await?;

    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    if buf[0] != VERSION {
        return Err(Error::Socks("Invalid SOCKS version in reply".into()));
    }
    match Reply::from_u8(buf[1]) {
        Some(Reply::Success) => {}
        Some(reply) => return Err(Error::Socks(format!("CONNECT refused: {:?}", reply))),
        None => return Err(Error::Socks(format!("Unknown reply code {:#04x}", buf[1]))),
    }

    // 3. Drain the bound address; it is of no use to us
    let addr_len = match buf[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => stream.read_u8().await? as usize,
        other => {
            return Err(Error::Socks(format!("Unsupported address type {:#04x}", other)));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

/// Encode a CONNECT request for a domain name target
fn connect_request(host: &str, port: u16) -> Result<BytesMut> {
    if host.is_empty() || host.len() > u8::MAX as usize {
        return Err(Error::Socks(format!("Invalid target host: {:?}", host)));
    }

    let mut buf = BytesMut::with_capacity(7 + host.len());
    buf.put_u8(VERSION);
    buf.put_u8(CMD_CONNECT);
    buf.put_u8(0); // Reserved
    buf.put_u8(ATYP_DOMAIN);
    buf.put_u8(host.len() as u8);
    buf.extend_from_slice(host.as_bytes());
    buf.put_u16(port);
    Ok(buf)
}
