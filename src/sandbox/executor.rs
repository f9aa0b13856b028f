//! Sandboxed execution of one candidate on one surface.

use crate::sandbox::document::{DocumentOptions, SandboxDocument};
use crate::sandbox::entry::{EntryPoint, SymbolTable};
use crate::sandbox::host::{ExecutionHost, HostHandle, MessagePort};
use crate::sandbox::precheck::{check_balance, DEFAULT_BRACKET_TOLERANCE};
use crate::sandbox::registry::{RunRegistry, RunSignal, RunWait};
use crate::sandbox::{FailureKind, RunId, RunMode, SandboxFailure, SandboxMessage, SurfaceId};
use crate::sanitize::sanitize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_SHADOW_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PREVIEW_SOFT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub document: DocumentOptions,
    pub bracket_tolerance: usize,
    /// Silence past this window fails a shadow run.
    pub shadow_timeout: Duration,
    /// Silence past this window is treated as a successful visible render.
    pub preview_soft_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            document: DocumentOptions::default(),
            bracket_tolerance: DEFAULT_BRACKET_TOLERANCE,
            shadow_timeout: DEFAULT_SHADOW_TIMEOUT,
            preview_soft_timeout: DEFAULT_PREVIEW_SOFT_TIMEOUT,
        }
    }
}

impl ExecutorOptions {
    pub fn timeout_for(&self, mode: RunMode) -> Duration {
        match mode {
            RunMode::Shadow => self.shadow_timeout,
            RunMode::Visible => self.preview_soft_timeout,
        }
    }
}

/// Sanitized code plus the entry component it will mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub code: String,
    pub entry: EntryPoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Ready {
        run_id: RunId,
        /// True when no signal arrived and the visible soft timeout applied.
        assumed: bool,
    },
    Failed {
        /// `None` when the failure was found before a run was registered.
        run_id: Option<RunId>,
        failure: SandboxFailure,
    },
}

impl ExecutionOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ExecutionOutcome::Ready { .. })
    }

    pub fn run_id(&self) -> Option<RunId> {
        match self {
            ExecutionOutcome::Ready { run_id, .. } => Some(*run_id),
            ExecutionOutcome::Failed { run_id, .. } => *run_id,
        }
    }

    pub fn failure(&self) -> Option<&SandboxFailure> {
        match self {
            ExecutionOutcome::Failed { failure, .. } => Some(failure),
            ExecutionOutcome::Ready { .. } => None,
        }
    }

    fn failed(run_id: Option<RunId>, failure: SandboxFailure) -> Self {
        ExecutionOutcome::Failed { run_id, failure }
    }
}

pub struct SandboxExecutor {
    host: Arc<dyn ExecutionHost>,
    registry: Arc<RunRegistry>,
    options: ExecutorOptions,
}

impl SandboxExecutor {
    pub fn new(
        host: Arc<dyn ExecutionHost>,
        registry: Arc<RunRegistry>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            host,
            registry,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Sanitize, bracket-check and resolve the entry. No execution context is built.
    pub fn prepare(&self, source: &str) -> Result<PreparedSource, SandboxFailure> {
        let code = sanitize(source);

        if let Err(imbalance) = check_balance(&code, self.options.bracket_tolerance) {
            return Err(SandboxFailure::new(
                FailureKind::MalformedSource,
                imbalance.message(),
            ));
        }

        match SymbolTable::scan(&code).resolve_entry() {
            Ok(entry) => Ok(PreparedSource { code, entry }),
            Err(missing) => Err(SandboxFailure::new(
                FailureKind::MissingEntryPoint,
                missing.message(),
            )),
        }
    }

    /// Run `source` on `surface` and tear the context down once it settles.
    pub async fn execute(&self, source: &str, mode: RunMode, surface: &SurfaceId) -> ExecutionOutcome {
        let (outcome, _handle) = self.execute_retained(source, mode, surface).await;
        outcome
    }

    /// Run `source` on `surface`, keeping the context alive through the
    /// returned handle (visible surfaces stay mounted while shown).
    pub async fn execute_retained(
        &self,
        source: &str,
        mode: RunMode,
        surface: &SurfaceId,
    ) -> (ExecutionOutcome, Option<HostHandle>) {
        let prepared = match self.prepare(source) {
            Ok(prepared) => prepared,
            Err(failure) => {
                debug!(surface = %surface, kind = failure.kind.as_str(), "Rejected before execution");
                return (ExecutionOutcome::failed(None, failure), None);
            }
        };

        let pending = self.registry.register(surface.clone(), mode);
        let run_id = pending.run_id();
        let document = SandboxDocument::build(
            &prepared.code,
            &prepared.entry,
            run_id,
            mode,
            &self.options.document,
        );

        let handle = match self
            .host
            .launch(document, MessagePort::new(Arc::clone(&self.registry)))
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(run_id = %run_id, host = self.host.name(), error = %e, "Sandbox host launch failed");
                return (
                    ExecutionOutcome::failed(
                        Some(run_id),
                        SandboxFailure::new(FailureKind::Host, e.to_string()),
                    ),
                    None,
                );
            }
        };

        let timeout = self.options.timeout_for(mode);
        let outcome = match pending.wait(timeout).await {
            RunWait::Signal(RunSignal::Message(message)) => settle(run_id, message),
            RunWait::Signal(RunSignal::Superseded) => ExecutionOutcome::failed(
                Some(run_id),
                SandboxFailure::new(
                    FailureKind::Superseded,
                    "Run superseded by a newer execution",
                ),
            ),
            RunWait::TimedOut => match mode {
                RunMode::Shadow => ExecutionOutcome::failed(
                    Some(run_id),
                    SandboxFailure::new(
                        FailureKind::Timeout,
                        format!("Shadow test timed out after {}ms", timeout.as_millis()),
                    ),
                ),
                RunMode::Visible => {
                    info!(run_id = %run_id, "No ready signal from preview; assuming it rendered");
                    ExecutionOutcome::Ready {
                        run_id,
                        assumed: true,
                    }
                }
            },
        };

        debug!(
            run_id = %run_id,
            surface = %surface,
            mode = mode.as_str(),
            ready = outcome.is_ready(),
            "Sandbox run settled"
        );

        if mode == RunMode::Visible && self.registry.is_active(surface, run_id) {
            (outcome, Some(handle))
        } else {
            (outcome, None)
        }
    }

    /// Wait for the next message from a surface's live run (errors raised
    /// after the first outcome, e.g. from an event handler).
    pub async fn next_message(
        &self,
        surface: &SurfaceId,
        run_id: RunId,
        timeout: Duration,
    ) -> Option<SandboxMessage> {
        let pending = self.registry.rearm(surface, run_id)?;
        match pending.wait(timeout).await {
            RunWait::Signal(RunSignal::Message(message)) => Some(message),
            _ => None,
        }
    }
}

fn settle(run_id: RunId, message: SandboxMessage) -> ExecutionOutcome {
    if message.kind.is_ready() {
        ExecutionOutcome::Ready {
            run_id,
            assumed: false,
        }
    } else {
        ExecutionOutcome::failed(Some(run_id), SandboxFailure::from_message(message))
    }
}
