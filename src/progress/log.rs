//! Append-only progress log with live fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::progress::event::{ProgressEvent, ProgressKind};

const SUBSCRIBER_CAPACITY: usize = 128;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct LogState {
    events: Vec<ProgressEvent>,
    next_seq: u64,
}

pub struct ProgressLog {
    session: Mutex<String>,
    state: Mutex<LogState>,
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressLog {
    pub fn new(session: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            session: Mutex::new(session.into()),
            state: Mutex::new(LogState::default()),
            tx,
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new(new_session_id()))
    }

    pub fn session(&self) -> String {
        self.session.lock().clone()
    }

    pub fn push(&self, kind: ProgressKind, message: impl Into<String>) -> ProgressEvent {
        self.record(kind, message.into(), Value::Null)
    }

    /// Append a line with a structured payload. Unserializable payloads are dropped.
    pub fn push_with<T: Serialize>(
        &self,
        kind: ProgressKind,
        message: impl Into<String>,
        data: &T,
    ) -> ProgressEvent {
        let data = serde_json::to_value(data).unwrap_or_else(|e| {
            warn!(error = %e, kind = kind.as_str(), "Dropping progress payload");
            Value::Null
        });
        self.record(kind, message.into(), data)
    }

    fn record(&self, kind: ProgressKind, message: String, data: Value) -> ProgressEvent {
        let session = self.session();
        let event = {
            let mut state = self.state.lock();
            let event = ProgressEvent {
                ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                session,
                seq: state.next_seq,
                kind,
                message,
                data,
            };
            state.next_seq += 1;
            state.events.push(event.clone());
            event
        };
        debug!(seq = event.seq, kind = kind.as_str(), "{}", event.message);
        // No receivers is fine.
        let _ = self.tx.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.state.lock().events.clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn last_line(&self) -> Option<String> {
        self.state.lock().events.last().map(|e| e.message.clone())
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all lines and start a new session id.
    pub fn reset(&self) {
        *self.state.lock() = LogState::default();
        *self.session.lock() = new_session_id();
    }
}

impl Default for ProgressLog {
    fn default() -> Self {
        Self::new(new_session_id())
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn new_session_id() -> String {
    let ts = now_millis();
    let pid = std::process::id();
    let seq = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sess-{ts}-{pid}-{seq}")
}
