/// SMTP Protocol Constants and State Machine
use std::fmt;

/// SMTP response codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCode(pub u16);

impl ResponseCode {
    pub const READY: Self = Self(220);
    pub const CLOSING: Self = Self(221);
    pub const OK: Self = Self(250);
    pub const START_INPUT: Self = Self(354);
    pub const SYNTAX_ERROR: Self = Self(500);
    pub const COMMAND_UNRECOGNIZED: Self = Self(502);
    pub const BAD_SEQUENCE: Self = Self(503);
    pub const SIZE_EXCEEDED: Self = Self(552);
    pub const TRANSACTION_FAILED: Self = Self(554);

    /// 2xx
    pub fn is_positive(self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SMTP commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ehlo,
    Helo,
    StartTls,
    Mail,
    Rcpt,
    Data,
    Quit,
    Unknown,
}

impl Command {
    pub fn parse(s: &str) -> (Self, &str) {
        let s = s.trim();
        let (cmd, rest) = s
            .split_once(|c: char| c.is_ascii_whitespace())
            .unwrap_or((s, ""));
        let cmd = cmd.to_uppercase();

        let command = match cmd.as_str() {
            "EHLO" => Self::Ehlo,
            "HELO" => Self::Helo,
            "STARTTLS" => Self::StartTls,
            "MAIL" => Self::Mail,
            "RCPT" => Self::Rcpt,
            "DATA" => Self::Data,
            "QUIT" => Self::Quit,
            _ => Self::Unknown,
        };

        (command, rest.trim())
    }
}

/// SMTP State Machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Banner sent
    Greeted,
    /// HELO/EHLO seen
    Ready,
    /// MAIL accepted
    InTransaction,
    /// RCPT accepted
    RecipientSet,
    /// Reading the message body
    CollectingData,
    Closed,
}

/// SMTP response builder
pub struct Response;

impl Response {
    /// Create a simple response
    pub fn new(code: ResponseCode, message: &str) -> String {
        format!("{} {}\r\n", code, message)
    }

    /// Create a multi-line response (last line has space after code)
    pub fn multi_line(code: ResponseCode, lines: &[&str]) -> String {
        if lines.is_empty() {
            return Self::new(code, "");
        }
        if lines.len() == 1 {
            return Self::new(code, lines[0]);
        }

        let mut result = String::new();
        for (i, line) in lines.iter().enumerate() {
            if i < lines.len() - 1 {
                result.push_str(&format!("{}-{line}\r\n", code));
            } else {
                result.push_str(&format!("{} {line}\r\n", code));
            }
        }
        result
    }

    /// Greeting response
    pub fn greeting(hostname: &str) -> String {
        Self::new(
            ResponseCode::READY,
            &format!("{hostname} ESMTP mail2news proxy"),
        )
    }

    /// EHLO response
    pub fn ehlo(hostname: &str, starttls: bool, max_size: usize) -> String {
        let size = format!("SIZE {max_size}");
        let mut lines = vec![hostname];
        if starttls {
            lines.push("STARTTLS");
        }
        lines.push("PIPELINING");
        lines.push("8BITMIME");
        lines.push(size.as_str());
        Self::multi_line(ResponseCode::OK, &lines)
    }

    /// STARTTLS response
    pub fn starttls() -> String {
        Self::new(ResponseCode::READY, "Ready to start TLS")
    }

    /// STARTTLS on an encrypted channel
    pub fn already_tls() -> String {
        Self::new(ResponseCode::BAD_SEQUENCE, "Already in TLS mode")
    }

    pub fn ok() -> String {
        Self::new(ResponseCode::OK, "OK")
    }

    /// DATA prompt
    pub fn start_input() -> String {
        Self::new(ResponseCode::START_INPUT, "End data with <CR><LF>.<CR><LF>")
    }

    /// Forward succeeded
    pub fn accepted() -> String {
        Self::new(ResponseCode::OK, "Message accepted")
    }

    /// Forward failed
    pub fn forward_error() -> String {
        Self::new(ResponseCode::TRANSACTION_FAILED, "Forward error")
    }

    pub fn size_exceeded() -> String {
        Self::new(
            ResponseCode::SIZE_EXCEEDED,
            "Message size exceeds fixed maximum",
        )
    }

    /// Goodbye
    pub fn goodbye() -> String {
        Self::new(ResponseCode::CLOSING, "Bye")
    }

    pub fn line_too_long() -> String {
        Self::new(ResponseCode::SYNTAX_ERROR, "Line too long")
    }

    /// Command not recognized
    pub fn command_unrecognized() -> String {
        Self::new(ResponseCode::COMMAND_UNRECOGNIZED, "Unsupported command")
    }
}

/// Parse an SMTP line, returning (command, arg) or None if empty
pub fn parse_line(line: &str) -> Option<(Command, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (cmd, arg) = Command::parse(line);
    Some((cmd, arg.to_string()))
}

/// Extract the mailbox from a `TO:<addr>` style argument. Paths holding
/// control characters are refused so they never reach an upstream command.
pub fn parse_path(arg: &str, keyword: &str) -> Option<String> {
    let (head, rest) = arg.split_once(':')?;
    if !head.trim().eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = rest.trim();
    let inner = match rest.strip_prefix('<') {
        Some(r) => &r[..r.find('>')?],
        None => rest.split_whitespace().next()?,
    };
    if inner.is_empty() || inner.chars().any(char::is_control) {
        return None;
    }
    Some(inner.to_string())
}

/// One line of a server reply: code, whether more lines follow, text
pub fn parse_reply_line(line: &str) -> Option<(ResponseCode, bool, &str)> {
    let code = line.get(..3)?.parse::<u16>().ok()?;
    match line.as_bytes().get(3) {
        None => Some((ResponseCode(code), false, "")),
        Some(b' ') => Some((ResponseCode(code), false, &line[4..])),
        Some(b'-') => Some((ResponseCode(code), true, &line[4..])),
        Some(_) => None,
    }
}
