//! DATA body collection and transparency (RFC 5321 §4.5.2)

/// A finished message body, exactly as it will be handed to the upstream
/// relay (terminator removed, leading dots unescaped).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
}

impl Message {
    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Self { body }
    }
}

/// Outcome of feeding one chunk to a [`MessageBuilder`]
#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    /// Keep reading
    More,
    /// Terminator seen, body fits
    Complete(Message),
    /// Terminator seen, body was larger than the limit and has been discarded
    TooLarge,
}

/// Accumulates DATA input.
///
/// Input arrives in chunks that end either at a `\n` or at a read limit, so a
/// long line may span several chunks. Only a chunk starting a line can be the
/// terminator or carry a stuffed dot.
#[derive(Debug)]
pub struct MessageBuilder {
    body: Vec<u8>,
    max_size: usize,
    at_line_start: bool,
    oversized: bool,
}

impl MessageBuilder {
    pub fn new(max_size: usize) -> Self {
        Self {
            body: Vec::new(),
            max_size,
            at_line_start: true,
            oversized: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Progress {
        if self.at_line_start && is_terminator(chunk) {
            if self.oversized {
                return Progress::TooLarge;
            }
            return Progress::Complete(Message::from(std::mem::take(&mut self.body)));
        }

        let data = if self.at_line_start && chunk.starts_with(b"..") {
            &chunk[1..]
        } else {
            chunk
        };
        self.at_line_start = chunk.ends_with(b"\n");

        if !self.oversized {
            if self.body.len() + data.len() > self.max_size {
                self.oversized = true;
                self.body = Vec::new();
            } else {
                self.body.extend_from_slice(data);
            }
        }
        Progress::More
    }
}

fn is_terminator(line: &[u8]) -> bool {
    matches!(line, b".\r\n" | b".\n")
}

/// Prepare a body for transmission: CRLF line endings, leading dots doubled,
/// final line terminated. The closing `.` line is not included.
pub fn stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 64 + 2);
    let mut at_line_start = true;
    let mut prev = 0u8;
    for &b in body {
        if at_line_start && b == b'.' {
            out.push(b'.');
        }
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        at_line_start = b == b'\n';
        prev = b;
    }
    if !out.is_empty() && !out.ends_with(b"\r\n") {
        if out.ends_with(b"\r") {
            out.push(b'\n');
        } else {
            out.extend_from_slice(b"\r\n");
        }
    }
    out
}
