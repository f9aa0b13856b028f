//! Newline-delimited `data:` event streams from the generation and repair
//! services.
//!
//! Chunk boundaries can fall anywhere, including inside a UTF-8 sequence, so
//! the decoder buffers raw bytes until a full line is available. Blank lines,
//! `:` comments, `[DONE]`, unknown event types and malformed JSON are skipped.

use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        data: Option<Value>,
    },
    Log {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        data: Option<Value>,
    },
    Plan {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        data: Option<Value>,
    },
    CodeChunk {
        chunk: String,
    },
    Code {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        summary: Option<String>,
        /// Repair responses nest the payload under `data`.
        #[serde(default)]
        data: Option<CodePayload>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodePayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

const KNOWN_TYPES: &[&str] = &["status", "log", "plan", "code_chunk", "code", "error"];

impl StreamEvent {
    /// Final code carried by a `code` event, preferring the nested payload.
    pub fn code_text(&self) -> Option<&str> {
        match self {
            StreamEvent::Code { code, data, .. } => data
                .as_ref()
                .and_then(|d| d.code.as_deref())
                .or(code.as_deref()),
            _ => None,
        }
    }

    pub fn summary_text(&self) -> Option<&str> {
        match self {
            StreamEvent::Code { summary, data, .. } => data
                .as_ref()
                .and_then(|d| d.summary.as_deref())
                .or(summary.as_deref()),
            _ => None,
        }
    }

    pub fn message_text(&self) -> Option<&str> {
        match self {
            StreamEvent::Status { message, .. }
            | StreamEvent::Log { message, .. }
            | StreamEvent::Plan { message, .. }
            | StreamEvent::Error { message } => message.as_deref(),
            _ => None,
        }
    }
}

/// Parse one line of an event stream.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim_end_matches('\r').trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() || payload == DONE_MARKER {
        return None;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Skipping malformed stream event");
            return None;
        }
    };
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if !KNOWN_TYPES.contains(&event_type.as_str()) {
        debug!(event_type = %event_type, "Skipping unknown stream event type");
        return None;
    }
    let value = lift_nested_payload(&event_type, value);
    match serde_json::from_value(value) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(event_type = %event_type, error = %e, "Skipping stream event with unexpected shape");
            None
        }
    }
}

/// `code_chunk` and `error` carry their field under `data`; a top-level
/// field is used only when the nested one is absent.
fn lift_nested_payload(event_type: &str, mut value: Value) -> Value {
    let field = match event_type {
        "code_chunk" => "chunk",
        "error" => "message",
        _ => return value,
    };
    let nested = value
        .get("data")
        .and_then(|data| data.get(field))
        .filter(|v| !v.is_null())
        .cloned();
    if let (Some(nested), Some(object)) = (nested, value.as_object_mut()) {
        object.insert(field.to_string(), nested);
        object.remove("data");
    }
    value
}

#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&rest))
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Everything a consumer keeps from one event stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    /// Concatenated `code_chunk` payloads.
    pub draft: String,
    /// Last `code` event's code.
    pub code: Option<String>,
    pub summary: Option<String>,
    /// First `error` event's message.
    pub error: Option<String>,
    pub events: usize,
}

impl StreamSummary {
    pub fn apply(&mut self, event: &StreamEvent) {
        self.events += 1;
        match event {
            StreamEvent::CodeChunk { chunk } => self.draft.push_str(chunk),
            StreamEvent::Code { .. } => {
                if let Some(code) = event.code_text() {
                    self.code = Some(code.to_string());
                }
                if let Some(summary) = event.summary_text() {
                    self.summary = Some(summary.to_string());
                }
            }
            StreamEvent::Error { message } => {
                if self.error.is_none() {
                    self.error = Some(
                        message
                            .clone()
                            .unwrap_or_else(|| "Unknown stream error".to_string()),
                    );
                }
            }
            StreamEvent::Status { .. } | StreamEvent::Log { .. } | StreamEvent::Plan { .. } => {}
        }
    }
}

/// Drain a byte stream through the decoder, handing each event to `on_event`.
///
/// Transport errors abort the read and are returned unchanged.
pub async fn collect_events<S, B, E, F>(stream: S, mut on_event: F) -> Result<StreamSummary, E>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    F: FnMut(&StreamEvent),
{
    let mut decoder = EventStreamDecoder::new();
    let mut summary = StreamSummary::default();
    futures::pin_mut!(stream);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in decoder.feed(chunk.as_ref()) {
            on_event(&event);
            summary.apply(&event);
        }
    }
    if let Some(event) = decoder.finish() {
        on_event(&event);
        summary.apply(&event);
    }
    Ok(summary)
}

/// Turn a byte stream into a stream of decoded events.
///
/// The first transport error is yielded and ends the stream.
pub fn decode_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamEvent, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    struct State<S> {
        bytes: Pin<Box<S>>,
        decoder: EventStreamDecoder,
        queue: VecDeque<StreamEvent>,
        done: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        decoder: EventStreamDecoder::new(),
        queue: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.feed(chunk.as_ref());
                    state.queue.extend(events);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    let tail = state.decoder.finish();
                    state.queue.extend(tail);
                }
            }
        }
    })
}
