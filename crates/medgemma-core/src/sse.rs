//! Server-sent event framing
//!
//! The handler writes `data: <json>\n\n` frames followed by a single
//! `data: [DONE]\n\n`. Clients receive these frames split arbitrarily across
//! transport chunks, so [`SseDecoder`] buffers until an event is complete.

/// Payload of the terminal event
pub const DONE_MARKER: &str = "[DONE]";

/// Incremental event-stream decoder yielding the data of each complete event
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns the data payloads of events completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut events = Vec::new();

        for &byte in bytes {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }

            let mut line = std::mem::take(&mut self.line);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                self.data.push(value.to_string());
            }
            // event:, id:, retry: and comment lines carry nothing we use
        }

        events
    }

    /// Flush an event left unterminated at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if !self.line.is_empty() {
            let rest = std::mem::take(&mut self.line);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r');
            if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                self.data.push(value.to_string());
            }
        }

        if self.data.is_empty() {
            None
        } else {
            let event = self.data.join("\n");
            self.data.clear();
            Some(event)
        }
    }
}
