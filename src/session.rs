//! SMTP front-end session
//!
//! One [`Session`] per accepted connection. It speaks the server side of a
//! reduced SMTP dialogue, collects a single DATA block at a time and hands
//! each finished message to a [`Forward`] implementation before replying.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf,
};
use tokio::time::{Instant, timeout_at};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::forward::Forward;
use crate::proto::smtp::{self, Command, Response, State};
use crate::proto::{Message, MessageBuilder, Progress};
use crate::{Error, Result};

/// Longest command line accepted, CRLF included
pub const MAX_COMMAND_LINE: u64 = 4096;

/// Read granularity while collecting DATA
const DATA_CHUNK: u64 = 64 * 1024;

/// The client connection, before or after STARTTLS
enum Transport<S> {
    Plain(S),
    Tls(Box<TlsStream<S>>),
    /// Stand-in while the stream is handed to the TLS handshake
    Closed,
}

fn not_connected() -> io::Error {
    io::Error::from(io::ErrorKind::NotConnected)
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for Transport<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Transport::Closed => Poll::Ready(Err(not_connected())),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for Transport<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Transport::Closed => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Transport::Closed => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Transport::Closed => Poll::Ready(Err(not_connected())),
        }
    }
}

type Conn<S> = BufReader<Transport<S>>;

/// Session state for a connected client
pub struct Session<F> {
    config: Arc<Config>,
    tls: Option<TlsAcceptor>,
    forwarder: Arc<F>,
    peer: SocketAddr,
    state: State,
    encrypted: bool,
    recipient: Option<String>,
    deadline: Instant,
}

impl<F: Forward> Session<F> {
    /// A session offers STARTTLS exactly when `tls` is set
    pub fn new(
        config: Arc<Config>,
        tls: Option<TlsAcceptor>,
        forwarder: Arc<F>,
        peer: SocketAddr,
    ) -> Self {
        let deadline = Instant::now() + config.listener.session_timeout();
        Self {
            config,
            tls,
            forwarder,
            peer,
            state: State::Greeted,
            encrypted: false,
            recipient: None,
            deadline,
        }
    }

    /// Drive the connection until QUIT, disconnect, error or deadline
    pub async fn run<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut conn = BufReader::new(Transport::Plain(stream));

        let result = self.dialogue(&mut conn).await;
        debug!("Client {} session ended in state {:?}", self.peer, self.state);
        result
    }

    async fn dialogue<S>(&mut self, conn: &mut Conn<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.reply(conn, &Response::greeting(&self.config.listener.hostname))
            .await?;

        let mut buf = Vec::new();
        loop {
            let n = self.read_line(conn, &mut buf, MAX_COMMAND_LINE).await?;
            if !buf.ends_with(b"\n") {
                if n as u64 == MAX_COMMAND_LINE {
                    self.reply(conn, &Response::line_too_long()).await?;
                    return Err(Error::Protocol("Command line too long".into()));
                }
                debug!("Client {} disconnected", self.peer);
                return Ok(());
            }

            let line = String::from_utf8_lossy(&buf);
            trace!("Client {} [{:?}]: {}", self.peer, self.state, line.trim_end());

            // Parse command
            let (cmd, arg) = match smtp::parse_line(&line) {
                Some(c) => c,
                None => continue,
            };

            // Handle command
            match cmd {
                Command::Ehlo | Command::Helo => {
                    let starttls = self.tls.is_some() && !self.encrypted;
                    let ehlo = Response::ehlo(
                        &self.config.listener.hostname,
                        starttls,
                        self.config.listener.max_message_size,
                    );
                    self.reply(conn, &ehlo).await?;
                    self.state = State::Ready;
                }

                Command::StartTls if self.tls.is_some() => {
                    if self.encrypted {
                        self.reply(conn, &Response::already_tls()).await?;
                    } else {
                        self.reply(conn, &Response::starttls()).await?;
                        self.upgrade(conn).await?;
                    }
                }

                Command::Mail => {
                    self.recipient = None;
                    self.state = State::InTransaction;
                    self.reply(conn, &Response::ok()).await?;
                }

                Command::Rcpt => {
                    if self.config.upstream.recipient_from_client {
                        self.recipient = smtp::parse_path(&arg, "TO");
                    }
                    self.state = State::RecipientSet;
                    self.reply(conn, &Response::ok()).await?;
                }

                Command::Data => {
                    self.reply(conn, &Response::start_input()).await?;
                    self.state = State::CollectingData;
                    let outcome = self.collect_data(conn).await?;
                    self.state = State::Ready;

                    let reply = match outcome {
                        Some(message) => self.deliver(message).await,
                        None => {
                            debug!("Client {}: oversized message discarded", self.peer);
                            Response::size_exceeded()
                        }
                    };
                    self.recipient = None;
                    self.reply(conn, &reply).await?;
                }

                Command::Quit => {
                    self.reply(conn, &Response::goodbye()).await?;
                    let _ = conn.shutdown().await;
                    self.state = State::Closed;
                    return Ok(());
                }

                _ => {
                    self.reply(conn, &Response::command_unrecognized()).await?;
                }
            }
        }
    }

    /// Swap the plaintext transport for TLS in place. Input the client
    /// pipelined behind STARTTLS is discarded along with the old buffer.
    async fn upgrade<S>(&mut self, conn: &mut Conn<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let acceptor = self
            .tls
            .clone()
            .ok_or_else(|| Error::Tls("STARTTLS not configured".into()))?;

        let stream = match std::mem::replace(conn, BufReader::new(Transport::Closed)).into_inner() {
            Transport::Plain(stream) => stream,
            other => {
                *conn = BufReader::new(other);
                return Err(Error::Tls("Transport already encrypted".into()));
            }
        };

        // A failed handshake leaves the transport closed
        let tls = timeout_at(self.deadline, acceptor.accept(stream)).await??;
        *conn = BufReader::new(Transport::Tls(Box::new(tls)));
        self.encrypted = true;
        self.state = State::Greeted;
        debug!("TLS established with {}", self.peer);
        Ok(())
    }

    /// Read the body up to the terminator line. `None` means it was too large.
    async fn collect_data<S>(&mut self, conn: &mut Conn<S>) -> Result<Option<Message>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut builder = MessageBuilder::new(self.config.listener.max_message_size);
        let mut chunk = Vec::new();
        loop {
            let n = self.read_line(conn, &mut chunk, DATA_CHUNK).await?;
            if n == 0 {
                return Err(Error::Protocol("Connection closed during DATA".into()));
            }
            match builder.push(&chunk) {
                Progress::More => {}
                Progress::Complete(message) => return Ok(Some(message)),
                Progress::TooLarge => return Ok(None),
            }
        }
    }

    /// Hand the message over and choose the reply. Failure detail stays in
    /// the log.
    async fn deliver(&self, message: Message) -> String {
        let recipient = self
            .recipient
            .as_deref()
            .unwrap_or(&self.config.upstream.recipient);

        match self.forwarder.forward(recipient, &message).await {
            Ok(()) => {
                debug!("Client {}: message accepted ({} bytes)", self.peer, message.len());
                Response::accepted()
            }
            Err(e) => {
                warn!("Forward for client {} failed: {}", self.peer, e);
                Response::forward_error()
            }
        }
    }

    async fn read_line<S>(&self, conn: &mut Conn<S>, buf: &mut Vec<u8>, limit: u64) -> Result<usize>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        buf.clear();
        let n = timeout_at(self.deadline, (&mut *conn).take(limit).read_until(b'\n', buf))
            .await
            .inspect_err(|_| debug!("Client {} reached the connection deadline", self.peer))??;
        Ok(n)
    }

    async fn reply<S>(&self, conn: &mut Conn<S>, reply: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        timeout_at(self.deadline, async {
            conn.write_all(reply.as_bytes()).await?;
            conn.flush().await
        })
        .await??;
        Ok(())
    }
}
