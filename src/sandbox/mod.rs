//! Sandboxed Executor
//!
//! Builds a self-contained document around sanitized component source, runs it
//! in an isolated [`ExecutionHost`], and awaits the first outcome message that
//! carries the run's correlation token. Late or foreign messages are dropped by
//! the [`RunRegistry`].

pub mod document;
pub mod entry;
pub mod executor;
pub mod host;
pub mod message;
pub mod precheck;
pub mod registry;

pub use document::{DocumentOptions, SandboxDocument, ShimSet};
pub use entry::{resolve_entry, EntryPoint, MissingEntryPoint, Resolution, SymbolTable};
pub use executor::{ExecutionOutcome, ExecutorOptions, PreparedSource, SandboxExecutor};
pub use host::{ExecutionHost, HostError, HostHandle, MessagePort, ProcessHost};
pub use message::{MessageKind, SandboxMessage};
pub use precheck::{check_balance, Imbalance};
pub use registry::{Dispatch, PendingRun, RunRegistry, RunSignal, RunWait};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation token for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Shadow runs are invisible and disposable; visible runs are shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Shadow,
    Visible,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Shadow => "shadow",
            RunMode::Visible => "visible",
        }
    }
}

/// An execution surface. At most one run per surface is live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(String);

impl SurfaceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn shadow(scope: &str) -> Self {
        Self(format!("shadow:{}", scope))
    }

    pub fn preview(scope: &str) -> Self {
        Self(format!("preview:{}", scope))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bracket imbalance found before any execution context was built.
    MalformedSource,
    /// Thrown exception or rejected promise inside the sandbox.
    Runtime,
    /// No recognizable component to mount.
    MissingEntryPoint,
    /// No outcome before the shadow timeout.
    Timeout,
    /// The execution host could not be started.
    Host,
    /// A newer run took over the surface before this one settled.
    Superseded,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::MalformedSource => "malformed_source",
            FailureKind::Runtime => "runtime",
            FailureKind::MissingEntryPoint => "missing_entry_point",
            FailureKind::Timeout => "timeout",
            FailureKind::Host => "host",
            FailureKind::Superseded => "superseded",
        }
    }
}

/// Structured failure captured from, or in front of, a sandboxed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col: Option<u32>,
}

impl SandboxFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: None,
            source: None,
            line: None,
            col: None,
        }
    }

    pub fn from_message(message: SandboxMessage) -> Self {
        Self {
            kind: FailureKind::Runtime,
            message: message
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "Unknown runtime error".to_string()),
            stack: message.stack,
            source: message.source,
            line: message.line,
            col: message.col,
        }
    }
}
