//! Incremental `text/event-stream` parser.
//!
//! Bytes are buffered until a full line is available, so chunk boundaries may
//! fall anywhere, including inside a multi-byte UTF-8 sequence. Lines end in
//! `\n` or `\r\n`. A blank line dispatches the event being assembled.
//!
//! Neither an unterminated line nor an event's joined data may grow past
//! the configured size limit; exceeding it is an error the caller should
//! treat as fatal for the stream.

use bytes::BytesMut;

use crate::error::{RealtimeLinkError, Result};

/// Event type used when a block carries no `event:` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Default cap on a pending line and on one event's data.
pub const MAX_EVENT_BYTES: usize = 64 << 20; // 64 MiB

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Last event id seen on the stream, carried across events.
    pub id: Option<String>,
}

#[derive(Debug)]
pub struct EventStreamParser {
    buffer: BytesMut,
    event_type: Option<String>,
    data: Option<String>,
    last_event_id: Option<String>,
    max_event_bytes: usize,
}

impl Default for EventStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::with_max_event_bytes(MAX_EVENT_BYTES)
    }

    pub fn with_max_event_bytes(max_event_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            event_type: None,
            data: None,
            last_event_id: None,
            max_event_bytes,
        }
    }

    /// Feed a chunk and collect every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            let mut line = &raw[..pos];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line);
            if let Some(event) = self.process_line(&line)? {
                events.push(event);
            }
        }

        if self.buffer.len() > self.max_event_bytes {
            return Err(RealtimeLinkError::MalformedPayload(format!(
                "Event stream line exceeds {} bytes",
                self.max_event_bytes
            )));
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Result<Option<SseEvent>> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => {
                let pending = self.data.as_ref().map_or(0, |data| data.len() + 1);
                if pending + value.len() > self.max_event_bytes {
                    self.data = None;
                    return Err(RealtimeLinkError::MalformedPayload(format!(
                        "Event stream data exceeds {} bytes",
                        self.max_event_bytes
                    )));
                }
                match self.data.as_mut() {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    },
                    None => self.data = Some(value.to_string()),
                }
            },
            "id" => {
                // ids containing NUL are ignored by the standard
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            },
            "retry" => {},
            other => log::debug!("[realtime-link] Ignoring unknown SSE field '{}'", other),
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event_type = self.event_type.take();
        let data = self.data.take()?;
        Some(SseEvent {
            event: event_type
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            data,
            id: self.last_event_id.clone(),
        })
    }
}
