//! SMTP client for the upstream relay
//!
//! Just enough of RFC 5321 to push one message: greeting, EHLO/HELO,
//! STARTTLS, a single envelope, DATA and QUIT.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::{debug, trace};

use crate::proto::data::stuff;
use crate::proto::smtp::{ResponseCode, parse_reply_line};
use crate::{Error, Message, Result};

/// Longest reply line we are willing to buffer
const MAX_REPLY_LINE: u64 = 4096;

/// A complete (possibly multi-line) server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ResponseCode,
    pub lines: Vec<String>,
}

impl Reply {
    fn into_error(self) -> Error {
        Error::Upstream {
            code: self.code.0,
            message: self.lines.join(" "),
        }
    }
}

/// SMTP client over any duplex stream
pub struct SmtpClient<S> {
    stream: BufReader<S>,
}

impl<S> SmtpClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream and consume the server greeting
    pub async fn connect(stream: S) -> Result<Self> {
        let mut client = Self {
            stream: BufReader::new(stream),
        };
        let greeting = client.read_reply().await?;
        if greeting.code != ResponseCode::READY {
            return Err(greeting.into_error());
        }
        debug!("Upstream greeting: {:?}", greeting.lines);
        Ok(client)
    }

    /// Introduce ourselves, falling back to HELO for servers without ESMTP
    pub async fn hello(&mut self, name: &str) -> Result<Reply> {
        let reply = self.command(&format!("EHLO {name}")).await?;
        if reply.code == ResponseCode::OK {
            return Ok(reply);
        }
        debug!("EHLO rejected with {}, trying HELO", reply.code);
        self.expect(&format!("HELO {name}"), ResponseCode::OK).await
    }

    /// Upgrade the connection. The caller is expected to say hello again.
    pub async fn starttls(
        mut self,
        connector: &TlsConnector,
        server_name: ServerName<'static>,
    ) -> Result<SmtpClient<TlsStream<S>>> {
        self.expect("STARTTLS", ResponseCode::READY).await?;
        // Anything buffered past the 220 came in before encryption; drop it
        let stream = self.stream.into_inner();
        let tls = connector.connect(server_name, stream).await?;
        debug!("Upstream TLS established");
        Ok(SmtpClient {
            stream: BufReader::new(tls),
        })
    }

    /// MAIL FROM; an empty path gives the null reverse-path `<>`
    pub async fn mail_from(&mut self, from: &str) -> Result<Reply> {
        self.expect(&format!("MAIL FROM:<{from}>"), ResponseCode::OK)
            .await
    }

    pub async fn rcpt_to(&mut self, to: &str) -> Result<Reply> {
        let reply = self.command(&format!("RCPT TO:<{to}>")).await?;
        if !reply.code.is_positive() {
            return Err(reply.into_error());
        }
        Ok(reply)
    }

    /// Send the body and wait for the server to take responsibility for it
    pub async fn data(&mut self, message: &Message) -> Result<Reply> {
        self.expect("DATA", ResponseCode::START_INPUT).await?;

        let writer = self.stream.get_mut();
        writer.write_all(&stuff(message.as_bytes())).await?;
        writer.write_all(b".\r\n").await?;
        writer.flush().await?;
        trace!("Upstream body sent ({} bytes)", message.len());

        let reply = self.read_reply().await?;
        if reply.code != ResponseCode::OK {
            return Err(reply.into_error());
        }
        Ok(reply)
    }

    pub async fn quit(&mut self) -> Result<Reply> {
        self.expect("QUIT", ResponseCode::CLOSING).await
    }

    /// Send a command and return the reply, whatever its code
    pub async fn command(&mut self, line: &str) -> Result<Reply> {
        if line.contains(['\r', '\n']) {
            return Err(Error::Protocol("Line break inside upstream command".into()));
        }
        trace!("Upstream <- {}", line);
        let writer = self.stream.get_mut();
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;
        self.read_reply().await
    }

    async fn expect(&mut self, line: &str, code: ResponseCode) -> Result<Reply> {
        let reply = self.command(line).await?;
        if reply.code != code {
            return Err(reply.into_error());
        }
        Ok(reply)
    }

    /// Read a reply, joining continuation lines
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            trace!("Upstream -> {}", line);
            let (code, more, text) = parse_reply_line(&line)
                .ok_or_else(|| Error::Protocol(format!("Malformed reply: {line}")))?;
            lines.push(text.to_string());
            if !more {
                return Ok(Reply { code, lines });
            }
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let n = (&mut self.stream)
            .take(MAX_REPLY_LINE)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Err(Error::Protocol("Server closed connection".into()));
        }
        if !buf.ends_with(b"\n") {
            return Err(Error::Protocol("Reply line too long".into()));
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}
