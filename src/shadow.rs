//! Shadow Validator: an invisible, disposable test run of a candidate.
//!
//! A verdict is always produced. Host failures, timeouts and supersession are
//! reported as unsuccessful verdicts, never as errors.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::sandbox::{ExecutionOutcome, FailureKind, RunId, RunMode, SandboxExecutor, SurfaceId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
}

impl ValidationVerdict {
    pub fn passed(run_id: RunId) -> Self {
        Self {
            success: true,
            error: None,
            stack: None,
            kind: None,
            run_id: Some(run_id),
        }
    }

    /// Error message, or a placeholder for failures that carried none.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown runtime error")
    }

    fn from_outcome(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Ready { run_id, .. } => Self::passed(run_id),
            ExecutionOutcome::Failed { run_id, failure } => Self {
                success: false,
                error: Some(failure.message),
                stack: failure.stack,
                kind: Some(failure.kind),
                run_id,
            },
        }
    }
}

pub struct ShadowValidator {
    executor: Arc<SandboxExecutor>,
    surface: SurfaceId,
}

impl ShadowValidator {
    pub fn new(executor: Arc<SandboxExecutor>, scope: &str) -> Self {
        Self {
            executor,
            surface: SurfaceId::shadow(scope),
        }
    }

    pub fn surface(&self) -> &SurfaceId {
        &self.surface
    }

    pub fn executor(&self) -> &Arc<SandboxExecutor> {
        &self.executor
    }

    /// Test `code` in shadow mode. Resolves exactly once.
    pub async fn validate(&self, code: &str) -> ValidationVerdict {
        let started = Instant::now();
        let outcome = self
            .executor
            .execute(code, RunMode::Shadow, &self.surface)
            .await;
        let verdict = ValidationVerdict::from_outcome(outcome);

        let elapsed_ms = started.elapsed().as_millis();
        if verdict.success {
            info!(surface = %self.surface, elapsed_ms, "Shadow test passed");
        } else {
            debug!(
                surface = %self.surface,
                elapsed_ms,
                kind = verdict.kind.map(FailureKind::as_str).unwrap_or("unknown"),
                error = verdict.error_message(),
                "Shadow test failed"
            );
        }
        verdict
    }

    /// Abandon any in-flight shadow run on this surface.
    pub fn cancel(&self) -> Option<RunId> {
        self.executor.registry().invalidate(&self.surface)
    }
}
