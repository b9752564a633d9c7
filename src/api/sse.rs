//! Incremental server-sent-events parser.
//!
//! Accepts arbitrary byte chunks (a network read may split a line, or even a
//! multi-byte UTF-8 character, anywhere) and emits complete frames whenever a
//! blank line terminates one. Only the `data` field matters to the progress
//! endpoints; `event`, `id` and `retry` are kept for logging.

/// One dispatched SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Streaming SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    pending_cr: bool,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed a chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        for &b in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if b == b'\n' {
                    continue;
                }
            }
            match b {
                b'\n' => self.finish_line(&mut frames),
                b'\r' => {
                    self.pending_cr = true;
                    self.finish_line(&mut frames);
                }
                _ => self.line.push(b),
            }
        }
        frames
    }

    /// Flush a trailing frame when the connection closes without a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.line.is_empty() {
            let mut ignored = Vec::new();
            self.finish_line(&mut ignored);
        }
        self.take_frame()
    }

    fn finish_line(&mut self, frames: &mut Vec<SseFrame>) {
        let raw = std::mem::take(&mut self.line);
        if raw.is_empty() {
            if let Some(frame) = self.take_frame() {
                frames.push(frame);
            }
            return;
        }
        let line = String::from_utf8_lossy(&raw);
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line.as_ref(), ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event.is_none() && self.id.is_none() {
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            id: self.id.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}
