//! Incremental event-stream decoder for the consuming side
//!
//! Bytes arrive in arbitrary chunks; the decoder buffers partial lines and
//! yields a [`Frame`] each time a blank line terminates an event. Comment
//! lines (heartbeats) and events without any `data:` field yield nothing.
//!
//! Lines are decoded as UTF-8 only once complete, so a character split
//! across chunks survives.

use bytes::{Buf, BytesMut};

/// One decoded event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub id: Option<String>,
    /// `None` means the default "message" type
    pub event: Option<String>,
    /// `data:` lines joined with '\n'
    pub data: String,
}

/// Stateful decoder; feed it chunks as they arrive
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
    id: Option<String>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text chunk and return every frame it completes
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        self.feed_bytes(chunk.as_bytes())
    }

    /// Feed raw bytes; invalid UTF-8 within a line is replaced rather than
    /// rejected
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(pos);
            self.buffer.advance(1);

            let line = raw.strip_suffix(b"\r").unwrap_or(&raw[..]);
            let line = String::from_utf8_lossy(line);

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "id" => self.id = Some(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // "retry" and unknown fields are ignored
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let id = self.id.take();

        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(Frame { id, event, data })
    }
}
