//! Human-readable progress for one generation request.
//!
//! Every orchestrator step appends one line. Subscribers receive the same
//! events live; late subscribers can read the accumulated log.

pub mod event;
pub mod log;

pub use event::{AttemptEventData, ProgressEvent, ProgressKind, VerdictEventData};
pub use log::{new_session_id, now_millis, ProgressLog};
