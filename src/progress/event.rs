//! Event schema for progress lines.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    ShadowStarted,
    ShadowPassed,
    ShadowFailed,
    HealAttempt,
    FixApplied,
    RepairUnusable,
    Persisted,
    Exhausted,
    HostUnavailable,
    Generation,
    Preview,
}

impl ProgressKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressKind::ShadowStarted => "shadow_started",
            ProgressKind::ShadowPassed => "shadow_passed",
            ProgressKind::ShadowFailed => "shadow_failed",
            ProgressKind::HealAttempt => "heal_attempt",
            ProgressKind::FixApplied => "fix_applied",
            ProgressKind::RepairUnusable => "repair_unusable",
            ProgressKind::Persisted => "persisted",
            ProgressKind::Exhausted => "exhausted",
            ProgressKind::HostUnavailable => "host_unavailable",
            ProgressKind::Generation => "generation",
            ProgressKind::Preview => "preview",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// RFC 3339, UTC.
    pub ts: String,
    pub session: String,
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptEventData {
    pub attempt: usize,
    pub max_attempts: usize,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictEventData {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u128>,
}
