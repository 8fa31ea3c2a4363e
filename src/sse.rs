//! Incremental `text/event-stream` decoder.
//!
//! The backend pushes named events (`connected`, `initial_data`,
//! `deployment_update`, `heartbeat`, `error`) with JSON payloads. The decoder
//! is fed raw body chunks and yields complete frames; partial lines are kept
//! across chunk boundaries so the stream can be split anywhere.

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name, `message` when the server sends none
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
    /// Last seen event id, if any
    pub id: Option<String>,
}

#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one body chunk and returns any frames it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop(); // trailing \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comment lines keep the connection alive, nothing else
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // `retry` and unknown fields are ignored, reconnect timing is
            // owned by the stream client
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: self.data.drain(..).collect::<Vec<_>>().join("\n"),
            id: self.id.clone(),
        })
    }
}
