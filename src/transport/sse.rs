//! SSE (Server-Sent Events) body decoding
//!
//! Collects the JSON payload of every `data:` line. Chunks may split lines
//! (and multi-byte characters) anywhere, so undecoded bytes are carried over.

use serde_json::Value;
use tracing::{debug, warn};

/// Incremental decoder for a `text/event-stream` body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes after the last newline seen so far
    partial_line: Vec<u8>,
    events: Vec<Value>,
    bytes_received: usize,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of the body.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.bytes_received += chunk.len();
        self.partial_line.extend_from_slice(chunk);

        while let Some(pos) = self.partial_line.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial_line.drain(..=pos).collect();
            self.process_line(&line);
        }
    }

    fn process_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);

        // Skip empty lines, comments and non-data fields
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data == "[DONE]" {
            self.done = true;
            return;
        }

        match serde_json::from_str::<Value>(data) {
            Ok(json) => {
                debug!(
                    event = self.events.len() + 1,
                    kind = json.get("type").and_then(|v| v.as_str()).unwrap_or("data"),
                    "SSE event"
                );
                self.events.push(json);
            }
            Err(e) => warn!("Skipping unparseable SSE data ({} bytes): {}", data.len(), e),
        }
    }

    /// Flush any trailing line and return the collected events.
    pub fn finish(mut self) -> Vec<Value> {
        if !self.partial_line.is_empty() {
            let line = std::mem::take(&mut self.partial_line);
            self.process_line(&line);
        }
        debug!(
            events = self.events.len(),
            bytes = self.bytes_received,
            done_marker = self.done,
            "SSE stream finished"
        );
        self.events
    }
}

/// Decode a complete SSE body in one go.
pub fn decode(body: &str) -> Vec<Value> {
    let mut decoder = SseDecoder::new();
    decoder.feed(body.as_bytes());
    decoder.finish()
}
