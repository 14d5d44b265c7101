//! Incremental `text/event-stream` decoder.
//!
//! Chunks may split lines anywhere, including inside a UTF-8 sequence, so
//! bytes are buffered until a full line is available.

/// One decoded unit of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseMessage {
    Event { name: Option<String>, data: String },
    /// A `:` line. The server uses these as heartbeats.
    Comment(String),
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    name: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every message it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            self.line(&line, &mut out);
        }
        out
    }

    fn line(&mut self, line: &str, out: &mut Vec<SseMessage>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                out.push(SseMessage::Event {
                    name: self.name.take(),
                    data: self.data.join("\n"),
                });
            }
            self.name = None;
            self.data.clear();
            return;
        }
        if let Some(comment) = line.strip_prefix(':') {
            out.push(SseMessage::Comment(comment.trim_start().to_string()));
            return;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.name = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry carry nothing this client uses
            _ => tracing::trace!(field, "Ignoring SSE field"),
        }
    }
}
