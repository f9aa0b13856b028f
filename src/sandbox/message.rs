//! Messages posted by a sandboxed document to its host.
//!
//! Wire shape: `{ "type": "shadow-test-error", "runId": "...", "message": "...",
//! "stack": "...", "source": "mount", "line": 3, "col": 9 }`.

use crate::sandbox::{RunId, RunMode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "preview-ready")]
    PreviewReady,
    #[serde(rename = "preview-error")]
    PreviewError,
    #[serde(rename = "shadow-test-ready")]
    ShadowTestReady,
    #[serde(rename = "shadow-test-error")]
    ShadowTestError,
}

impl MessageKind {
    pub fn ready(mode: RunMode) -> Self {
        match mode {
            RunMode::Shadow => MessageKind::ShadowTestReady,
            RunMode::Visible => MessageKind::PreviewReady,
        }
    }

    pub fn error(mode: RunMode) -> Self {
        match mode {
            RunMode::Shadow => MessageKind::ShadowTestError,
            RunMode::Visible => MessageKind::PreviewError,
        }
    }

    pub fn mode(self) -> RunMode {
        match self {
            MessageKind::PreviewReady | MessageKind::PreviewError => RunMode::Visible,
            MessageKind::ShadowTestReady | MessageKind::ShadowTestError => RunMode::Shadow,
        }
    }

    pub fn is_ready(self) -> bool {
        matches!(self, MessageKind::PreviewReady | MessageKind::ShadowTestReady)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::PreviewReady => "preview-ready",
            MessageKind::PreviewError => "preview-error",
            MessageKind::ShadowTestReady => "shadow-test-ready",
            MessageKind::ShadowTestError => "shadow-test-error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Phase that captured the error: `window.onerror`, `unhandledrejection`,
    /// `transform` or `mount`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col: Option<u32>,
}

impl SandboxMessage {
    pub fn ready(run_id: RunId, mode: RunMode) -> Self {
        Self {
            kind: MessageKind::ready(mode),
            run_id,
            message: None,
            stack: None,
            source: None,
            line: None,
            col: None,
        }
    }

    pub fn error(run_id: RunId, mode: RunMode, message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::error(mode),
            run_id,
            message: Some(message.into()),
            stack: None,
            source: None,
            line: None,
            col: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn at(mut self, line: u32, col: u32) -> Self {
        self.line = Some(line);
        self.col = Some(col);
        self
    }
}
