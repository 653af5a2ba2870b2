//! Incremental Server-Sent Events parsing and frame encoding.
//!
//! [`SseParser`] is fed raw upstream bytes in whatever chunks the transport
//! delivers and hands back complete `(event, data)` pairs. Partial lines stay
//! buffered between calls.

use bytes::Bytes;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Name from the most recent `event:` line; empty when none was sent.
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    /// First byte of `buffer` not yet consumed as a line.
    start: usize,
    /// Bytes before this offset are known to hold no further newline.
    scanned: usize,
    current_event: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete event, or `None` once the buffered lines are exhausted.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            let from = self.scanned.max(self.start);
            let Some(offset) = self.buffer[from..].iter().position(|&b| b == b'\n') else {
                // Compact once per exhausted batch, not once per line.
                self.buffer.drain(..self.start);
                self.start = 0;
                self.scanned = self.buffer.len();
                return None;
            };
            let end = from + offset;
            let line_start = self.start;
            self.start = end + 1;
            self.scanned = self.start;
            let line = trim_line_ending(&self.buffer[line_start..=end]);

            if line.is_empty() {
                self.current_event.clear();
                continue;
            }
            if let Some(rest) = line.strip_prefix(b"event:") {
                self.current_event = String::from_utf8_lossy(rest).trim().to_string();
                continue;
            }
            if let Some(rest) = line.strip_prefix(b"data:") {
                let data = String::from_utf8_lossy(rest).trim().to_string();
                if !data.is_empty() {
                    return Some(SseEvent {
                        event: self.current_event.clone(),
                        data,
                    });
                }
            }
            // id:, retry:, comments
        }
    }

    /// Flush a trailing unterminated `data:` line at end of stream.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let mut rest = std::mem::take(&mut self.buffer);
        rest.drain(..self.start);
        self.start = 0;
        self.scanned = 0;
        let line = trim_line_ending(&rest);
        let data = line.strip_prefix(b"data:")?;
        let data = String::from_utf8_lossy(data).trim().to_string();
        if data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: self.current_event.clone(),
            data,
        })
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// `data: <json>\n\n`
pub fn encode_sse<T: Serialize>(payload: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(payload)?;
    let mut out = Vec::with_capacity(json.len() + 8);
    out.extend_from_slice(b"data: ");
    out.extend_from_slice(&json);
    out.extend_from_slice(b"\n\n");
    Ok(Bytes::from(out))
}

pub fn encode_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}
