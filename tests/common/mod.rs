//! In-process stand-ins for Tor and the mail2news gateway

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use mail2news_relay::config::RelayConfig;
use mail2news_relay::{Error, Forward, Message, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

pub const RELAY_HOST: &str = "relay.test";
pub const RELAY_PORT: u16 = 2525;

/// Forwarder that only remembers what it was given. Clones share the log.
#[derive(Default, Clone)]
pub struct Recorder {
    pub calls: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    pub fail: bool,
}

impl Recorder {
    pub fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Forward for Recorder {
    async fn forward(&self, recipient: &str, message: &Message) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.as_bytes().to_vec()));
        if self.fail {
            return Err(Error::Protocol("upstream down".into()));
        }
        Ok(())
    }
}

pub fn self_signed(name: &str) -> TlsAcceptor {
    let cert = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
    let der = CertificateDer::from(cert.serialize_der().unwrap());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));
    mail2news_relay::tls::acceptor_from_der(vec![der], key).unwrap()
}

/// Minimal SOCKS5 proxy that sends every CONNECT for `RELAY_HOST:RELAY_PORT`
/// to `upstream` and refuses anything else.
pub async fn spawn_proxy(upstream: SocketAddr) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut client, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut greeting = [0u8; 2];
                client.read_exact(&mut greeting).await.unwrap();
                let mut methods = vec![0u8; greeting[1] as usize];
                client.read_exact(&mut methods).await.unwrap();
                client.write_all(&[5, 0]).await.unwrap();

                let mut head = [0u8; 5];
                client.read_exact(&mut head).await.unwrap();
                assert_eq!(head[3], 3, "proxy must receive a domain name");
                let mut host = vec![0u8; head[4] as usize];
                client.read_exact(&mut host).await.unwrap();
                let port = client.read_u16().await.unwrap();

                if host != RELAY_HOST.as_bytes() || port != RELAY_PORT {
                    client.write_all(&[5, 4, 0, 1, 0, 0, 0, 0, 0, 0]).await.unwrap();
                    return;
                }
                let mut target = TcpStream::connect(upstream).await.unwrap();
                client.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 0]).await.unwrap();
                let _ = tokio::io::copy_bidirectional(&mut client, &mut target).await;
            });
        }
    });
    addr
}

/// What the fake gateway saw during one transaction
#[derive(Debug)]
pub struct Transcript {
    pub commands: Vec<String>,
    pub body: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Accept,
    RejectRecipient,
    Silent,
}

/// Fake gateway: one connection, STARTTLS required, transcript reported back
pub async fn spawn_upstream(behaviour: Behaviour) -> (SocketAddr, oneshot::Receiver<Transcript>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    let acceptor = self_signed(RELAY_HOST);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        if behaviour == Behaviour::Silent {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(stream);
            return;
        }
        let mut commands = Vec::new();

        let mut plain = BufReader::new(stream);
        send(&mut plain, "220 relay.test ESMTP\r\n").await;
        commands.push(read(&mut plain).await);
        send(&mut plain, "250-relay.test\r\n250 STARTTLS\r\n").await;
        commands.push(read(&mut plain).await);
        send(&mut plain, "220 go ahead\r\n").await;

        let tls = acceptor.accept(plain.into_inner()).await.unwrap();
        let mut conn = BufReader::new(tls);
        commands.push(read(&mut conn).await);
        send(&mut conn, "250 relay.test\r\n").await;
        commands.push(read(&mut conn).await);
        send(&mut conn, "250 sender ok\r\n").await;
        commands.push(read(&mut conn).await);
        if behaviour == Behaviour::RejectRecipient {
            send(&mut conn, "550 no such newsgroup gateway\r\n").await;
            let _ = tx.send(Transcript { commands, body: Vec::new() });
            return;
        }
        send(&mut conn, "250 recipient ok\r\n").await;
        commands.push(read(&mut conn).await);
        send(&mut conn, "354 end with .\r\n").await;

        let mut body = Vec::new();
        loop {
            let mut line = Vec::new();
            conn.read_until(b'\n', &mut line).await.unwrap();
            if line == b".\r\n" || line.is_empty() {
                break;
            }
            body.extend_from_slice(&line);
        }
        send(&mut conn, "250 queued\r\n").await;
        commands.push(read(&mut conn).await);
        send(&mut conn, "221 bye\r\n").await;

        let _ = tx.send(Transcript { commands, body });
    });

    (addr, rx)
}

async fn send<S: AsyncRead + AsyncWrite + Unpin>(conn: &mut BufReader<S>, text: &str) {
    conn.get_mut().write_all(text.as_bytes()).await.unwrap();
    conn.get_mut().flush().await.unwrap();
}

async fn read<S: AsyncRead + AsyncWrite + Unpin>(conn: &mut BufReader<S>) -> String {
    let mut line = String::new();
    conn.read_line(&mut line).await.unwrap();
    line.trim_end().to_string()
}

pub fn relay_config(proxy: SocketAddr) -> RelayConfig {
    RelayConfig {
        proxy: proxy.to_string(),
        host: RELAY_HOST.to_string(),
        port: RELAY_PORT,
        server_name: RELAY_HOST.to_string(),
        timeout_secs: 5,
        ..RelayConfig::default()
    }
}
