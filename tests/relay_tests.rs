//! End-to-end SMTP dialogues against a listening relay

mod common;

use common::{Behaviour, Recorder, relay_config, spawn_proxy, spawn_upstream};
use mail2news_relay::{Config, Forward, Forwarder, Server};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

struct Client {
    io: BufReader<TcpStream>,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            io: BufReader::new(stream),
        }
    }

    async fn send(&mut self, line: &str) {
        self.io
            .get_mut()
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Reply lines, one string per line without CRLF
    async fn reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.io.read_line(&mut line).await.unwrap_or(0) == 0 {
                return lines;
            }
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line.trim_end().to_string());
            if !more {
                return lines;
            }
        }
    }

    async fn command(&mut self, line: &str) -> Vec<String> {
        self.send(line).await;
        self.reply().await
    }
}

async fn start<F: Forward>(config: Config, forwarder: F) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::with_forwarder(config, None, forwarder);
    tokio::spawn(async move { server.serve(listener).await });
    addr
}

fn code(reply: &[String]) -> &str {
    &reply.last().expect("empty reply")[..3]
}

/// The canonical client dialogue; returns the codes of every reply
async fn submit(client: &mut Client) -> Vec<String> {
    let mut codes = Vec::new();
    for cmd in ["EHLO x", "MAIL FROM:<a>", "RCPT TO:<b>", "DATA"] {
        let reply = client.command(cmd).await;
        if cmd.starts_with("EHLO") {
            assert!(reply.len() > 1, "EHLO reply should be multi-line");
        }
        codes.push(code(&reply).to_string());
    }
    client.send("Subject: hi").await;
    client.send("").await;
    client.send("hello").await;
    codes.push(code(&client.command(".").await).to_string());
    codes.push(code(&client.command("QUIT").await).to_string());
    codes
}

#[tokio::test]
async fn test_scenario_with_successful_forward() {
    let recorder = Recorder::default();
    let addr = start(Config::default(), recorder.clone()).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(code(&client.reply().await), "220");
    assert_eq!(submit(&mut client).await, ["250", "250", "250", "354", "250", "221"]);
    assert!(client.reply().await.is_empty(), "connection should be closed");

    assert_eq!(
        recorder.calls(),
        vec![(
            "mail2news@dizum.com".to_string(),
            b"Subject: hi\r\n\r\nhello\r\n".to_vec()
        )]
    );
}

#[tokio::test]
async fn test_scenario_with_failed_forward() {
    let recorder = Recorder {
        fail: true,
        ..Recorder::default()
    };
    let addr = start(Config::default(), recorder.clone()).await;
    let mut client = Client::connect(addr).await;

    client.reply().await;
    assert_eq!(submit(&mut client).await, ["250", "250", "250", "354", "554", "221"]);
    assert_eq!(recorder.calls().len(), 1);
}

#[tokio::test]
async fn test_unknown_command_then_continue() {
    let addr = start(Config::default(), Recorder::default()).await;
    let mut client = Client::connect(addr).await;

    client.reply().await;
    assert_eq!(code(&client.command("FOO").await), "502");
    assert_eq!(code(&client.command("VRFY root").await), "502");
    assert_eq!(code(&client.command("MAIL FROM:<>").await), "250");
    assert_eq!(code(&client.command("QUIT").await), "221");
    assert!(client.reply().await.is_empty());
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let recorder = Recorder::default();
    let addr = start(Config::default(), recorder.clone()).await;

    let mut first = Client::connect(addr).await;
    let mut second = Client::connect(addr).await;
    first.reply().await;
    second.reply().await;

    // Interleave two transactions
    first.command("DATA").await;
    second.command("DATA").await;
    first.send("from first").await;
    second.send("from second").await;
    assert_eq!(code(&second.command(".").await), "250");
    assert_eq!(code(&first.command(".").await), "250");

    let mut bodies: Vec<Vec<u8>> = recorder.calls().into_iter().map(|(_, b)| b).collect();
    bodies.sort();
    assert_eq!(bodies, vec![b"from first\r\n".to_vec(), b"from second\r\n".to_vec()]);
}

#[tokio::test]
async fn test_full_path_to_gateway() {
    let (upstream, transcript) = spawn_upstream(Behaviour::Accept).await;
    let proxy = spawn_proxy(upstream).await;
    let config = Config {
        upstream: relay_config(proxy),
        ..Config::default()
    };
    let forwarder = Forwarder::new(config.upstream.clone()).unwrap();
    let addr = start(config, forwarder).await;
    let mut client = Client::connect(addr).await;

    client.reply().await;
    assert_eq!(submit(&mut client).await, ["250", "250", "250", "354", "250", "221"]);

    let transcript = transcript.await.unwrap();
    assert!(transcript.commands.contains(&"RCPT TO:<mail2news@dizum.com>".to_string()));
    assert_eq!(transcript.body, b"Subject: hi\r\n\r\nhello\r\n");
}
