//! Visible Preview: the surface the user actually sees.
//!
//! Each render supersedes the previous one on the same surface. Silence past
//! the soft timeout counts as rendered. While a heal is running, errors from
//! the preview are logged and dropped so they cannot start a second heal.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::heal::{HealGate, HealOrchestrator, HealReport};
use crate::sandbox::{
    ExecutionOutcome, FailureKind, HostHandle, RunId, RunMode, SandboxExecutor, SandboxFailure,
    SurfaceId,
};
use crate::shadow::ValidationVerdict;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PreviewState {
    Idle,
    Loading,
    Ready { run_id: RunId, assumed: bool },
    Failed { run_id: Option<RunId>, failure: SandboxFailure },
}

impl PreviewState {
    pub fn is_ready(&self) -> bool {
        matches!(self, PreviewState::Ready { .. })
    }

    pub fn failure(&self) -> Option<&SandboxFailure> {
        match self {
            PreviewState::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

pub struct VisiblePreview {
    executor: Arc<SandboxExecutor>,
    surface: SurfaceId,
    gate: HealGate,
    state: Mutex<PreviewState>,
    code: Mutex<Option<String>>,
    /// Keeps the mounted context alive while it is shown.
    mounted: Mutex<Option<HostHandle>>,
}

impl VisiblePreview {
    pub fn new(executor: Arc<SandboxExecutor>, scope: &str, gate: HealGate) -> Self {
        Self {
            executor,
            surface: SurfaceId::preview(scope),
            gate,
            state: Mutex::new(PreviewState::Idle),
            code: Mutex::new(None),
            mounted: Mutex::new(None),
        }
    }

    pub fn surface(&self) -> &SurfaceId {
        &self.surface
    }

    pub fn state(&self) -> PreviewState {
        self.state.lock().clone()
    }

    pub fn code(&self) -> Option<String> {
        self.code.lock().clone()
    }

    /// Show `code`, replacing whatever the surface was running.
    pub async fn render(&self, code: &str) -> PreviewState {
        self.executor.registry().invalidate(&self.surface);
        self.mounted.lock().take();

        let previous = std::mem::replace(&mut *self.state.lock(), PreviewState::Loading);
        *self.code.lock() = Some(code.to_string());

        let (outcome, handle) = self
            .executor
            .execute_retained(code, RunMode::Visible, &self.surface)
            .await;

        let mut state = self.state.lock();
        if let Some(run_id) = outcome.run_id() {
            // Checked under the state lock: `reset` invalidates before it
            // writes, so a render that lost the surface cannot overwrite it.
            if !self.executor.registry().is_active(&self.surface, run_id) {
                debug!(surface = %self.surface, run_id = %run_id, "Dropping result of replaced render");
                return state.clone();
            }
        }

        let next = match outcome {
            ExecutionOutcome::Ready { run_id, assumed } => {
                if assumed {
                    debug!(surface = %self.surface, run_id = %run_id, "Preview assumed ready");
                }
                *self.mounted.lock() = handle;
                PreviewState::Ready { run_id, assumed }
            }
            ExecutionOutcome::Failed { failure, .. } if failure.kind == FailureKind::Superseded => {
                // A newer render owns the surface and its state.
                return state.clone();
            }
            ExecutionOutcome::Failed { run_id, failure } => {
                if self.gate.is_healing() {
                    info!(
                        surface = %self.surface,
                        error = %failure.message,
                        "Suppressing preview error while healing"
                    );
                    previous
                } else {
                    PreviewState::Failed { run_id, failure }
                }
            }
        };
        *state = next.clone();
        next
    }

    /// Wait for an error raised after the preview became ready (for example
    /// from an event handler). Returns `None` on timeout, supersession or
    /// when the error was suppressed.
    pub async fn watch_errors(&self, timeout: Duration) -> Option<SandboxFailure> {
        let run_id = match self.state() {
            PreviewState::Ready { run_id, .. } => run_id,
            _ => return None,
        };
        let message = self
            .executor
            .next_message(&self.surface, run_id, timeout)
            .await?;
        if message.kind.is_ready() {
            return None;
        }
        let failure = SandboxFailure::from_message(message);
        if self.gate.is_healing() {
            info!(surface = %self.surface, error = %failure.message, "Suppressing preview error while healing");
            return None;
        }
        self.set_state(PreviewState::Failed {
            run_id: Some(run_id),
            failure: failure.clone(),
        });
        Some(failure)
    }

    /// Send the preview's failure through `orchestrator` and show the result
    /// when healing succeeds.
    pub async fn heal_and_render(
        &self,
        orchestrator: &HealOrchestrator,
    ) -> Result<Option<HealReport>, ApiError> {
        let (Some(code), Some(failure)) = (self.code(), self.state().failure().cloned()) else {
            return Ok(None);
        };
        let verdict = ValidationVerdict {
            success: false,
            error: Some(failure.message),
            stack: failure.stack,
            kind: Some(failure.kind),
            run_id: None,
        };

        let report = orchestrator.heal_failure(&code, verdict).await?;
        if report.is_success() {
            self.render(&report.artifact.code).await;
        }
        Ok(Some(report))
    }

    /// Forget the current render (project switch).
    pub fn reset(&self) {
        self.executor.registry().invalidate(&self.surface);
        self.mounted.lock().take();
        *self.code.lock() = None;
        self.set_state(PreviewState::Idle);
    }

    fn set_state(&self, next: PreviewState) -> PreviewState {
        *self.state.lock() = next.clone();
        next
    }
}
