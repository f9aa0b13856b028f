//! Heal-and-Retry Orchestrator
//!
//! Drives one candidate through shadow testing and, on failure, through a
//! bounded number of repair round-trips. Attempts are strictly sequential.
//! The terminal outcome is persisted before it is reported: a caller that
//! sees success can rely on the store already holding the healed source.
//!
//! ```text
//! Testing(k) --pass--> Succeeded
//! Testing(k) --fail, k < max--> Healing(k)
//! Testing(max) --fail--> ExhaustedFailed
//! Healing(k) --usable candidate--> Testing(k + 1)
//! Healing(k) --empty or failed repair--> ExhaustedFailed
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::progress::{AttemptEventData, ProgressKind, ProgressLog, VerdictEventData};
use crate::provider::{RepairClient, RepairRequest};
use crate::sandbox::FailureKind;
use crate::shadow::{ShadowValidator, ValidationVerdict};
use crate::store::{ProjectBuildStatus, ProjectStore, StatusPatch};

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_MIN_CANDIDATE_LEN: usize = 50;
pub const DEFAULT_ERROR_CONTEXT_CHARS: usize = 2000;
pub const DEFAULT_STACK_EXCERPT_LINES: usize = 5;
pub const DEFAULT_ENTRY_PATH: &str = "src/App.tsx";

const NO_USABLE_CODE: &str = "Repair returned no usable code";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    /// Repair round-trips allowed per request.
    pub max_attempts: usize,
    /// Trimmed repair output shorter than this is not a candidate.
    pub min_candidate_len: usize,
    /// Upper bound on the error text sent to the repair service.
    pub error_context_chars: usize,
    pub stack_excerpt_lines: usize,
    /// Where the validated source is stored within the project.
    pub entry_path: String,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_candidate_len: DEFAULT_MIN_CANDIDATE_LEN,
            error_context_chars: DEFAULT_ERROR_CONTEXT_CHARS,
            stack_excerpt_lines: DEFAULT_STACK_EXCERPT_LINES,
            entry_path: DEFAULT_ENTRY_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "attempt")]
pub enum HealState {
    Testing(usize),
    Healing(usize),
    Succeeded,
    ExhaustedFailed,
}

impl HealState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HealState::Succeeded | HealState::ExhaustedFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureReason {
    /// Every repaired candidate still failed its shadow test.
    ValidationExhausted { attempts: usize },
    /// The repair service gave nothing to test.
    RepairUnavailable { reason: String },
}

impl FailureReason {
    pub fn user_message(&self) -> String {
        match self {
            FailureReason::ValidationExhausted { attempts } => format!(
                "Could not validate the generated code after {} auto-heal attempts",
                attempts
            ),
            FailureReason::RepairUnavailable { reason } => {
                format!("Auto-heal stopped: {}", reason)
            }
        }
    }
}

/// Source under validation. Each heal attempt replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateArtifact {
    pub code: String,
    /// blake3 of `code`, hex.
    pub fingerprint: String,
    /// 0 for the generated source, k for the k-th repair.
    pub revision: usize,
}

impl CandidateArtifact {
    pub fn new(code: impl Into<String>, revision: usize) -> Self {
        let code = code.into();
        let fingerprint = hex::encode(blake3::hash(code.as_bytes()).as_bytes());
        Self {
            code,
            fingerprint,
            revision,
        }
    }

    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..12]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    Succeeded { status: ProjectBuildStatus },
    Failed {
        reason: FailureReason,
        status: ProjectBuildStatus,
    },
    /// A project switch abandoned the request. Nothing was persisted.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct HealReport {
    pub outcome: HealOutcome,
    /// The last candidate tested (the persisted one on success).
    pub artifact: CandidateArtifact,
    pub last_verdict: ValidationVerdict,
    /// Repair round-trips made.
    pub heal_attempts: usize,
    /// Shadow tests run.
    pub validations: usize,
    pub trace: Vec<HealState>,
}

impl HealReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, HealOutcome::Succeeded { .. })
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match &self.outcome {
            HealOutcome::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

#[derive(Default)]
struct GateState {
    active: AtomicUsize,
    epoch: AtomicU64,
}

/// Shared between a session's orchestrators and its preview.
///
/// `is_healing` suppresses preview error reports while a heal is running.
/// The epoch advances on project switch; work started under an older epoch
/// must not persist.
#[derive(Clone, Default)]
pub struct HealGate {
    state: Arc<GateState>,
}

impl HealGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_healing(&self) -> bool {
        self.state.active.load(Ordering::SeqCst) > 0
    }

    pub fn epoch(&self) -> u64 {
        self.state.epoch.load(Ordering::SeqCst)
    }

    pub fn advance(&self) -> u64 {
        self.state.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn enter(&self) -> HealGuard {
        self.enter_at(self.epoch())
    }

    /// Enter on behalf of work that began under `epoch`. The guard is stale
    /// from the start if the gate has moved on since.
    pub fn enter_at(&self, epoch: u64) -> HealGuard {
        self.state.active.fetch_add(1, Ordering::SeqCst);
        HealGuard {
            gate: self.clone(),
            epoch,
        }
    }
}

pub struct HealGuard {
    gate: HealGate,
    epoch: u64,
}

impl HealGuard {
    pub fn is_current(&self) -> bool {
        self.gate.epoch() == self.epoch
    }
}

impl Drop for HealGuard {
    fn drop(&mut self) {
        self.gate.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Long-lived collaborators shared by every request in a session.
#[derive(Clone)]
pub struct HealServices {
    pub validator: Arc<ShadowValidator>,
    pub repair: Arc<dyn RepairClient>,
    pub store: Arc<dyn ProjectStore>,
    pub progress: Arc<ProgressLog>,
    pub gate: HealGate,
}

/// Where a request's result goes and on whose behalf repairs are made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealTarget {
    pub project_id: String,
    pub user_id: Option<String>,
}

/// One request's orchestrator. Build a new one per request.
pub struct HealOrchestrator {
    services: HealServices,
    target: HealTarget,
    config: HealConfig,
    epoch: Option<u64>,
    state: Mutex<HealState>,
}

impl HealOrchestrator {
    pub fn new(services: HealServices, target: HealTarget, config: HealConfig) -> Self {
        Self {
            services,
            target,
            config,
            epoch: None,
            state: Mutex::new(HealState::Testing(0)),
        }
    }

    /// Bind this request to the gate epoch its inputs were read under.
    pub fn pinned_to(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn state(&self) -> HealState {
        *self.state.lock()
    }

    pub fn is_healing(&self) -> bool {
        matches!(self.state(), HealState::Healing(_))
    }

    pub fn config(&self) -> &HealConfig {
        &self.config
    }

    fn transition(&self, next: HealState, trace: &mut Vec<HealState>) {
        debug!(project = %self.target.project_id, state = ?next, "Heal state");
        *self.state.lock() = next;
        trace.push(next);
    }

    /// Validate `code`, healing it if needed, and persist the outcome.
    ///
    /// Validation failures are reported in the returned [`HealReport`]. Store
    /// failures and an unusable sandbox host are errors.
    pub async fn run(&self, code: &str) -> Result<HealReport, ApiError> {
        self.drive(
            CandidateArtifact::new(code, 0),
            HealState::Testing(0),
            ValidationVerdict::default(),
        )
        .await
    }

    /// Heal code whose failure was already observed elsewhere (the visible
    /// preview), skipping the initial shadow test.
    pub async fn heal_failure(
        &self,
        code: &str,
        verdict: ValidationVerdict,
    ) -> Result<HealReport, ApiError> {
        if verdict.kind == Some(FailureKind::Host) {
            return Err(self.host_unavailable(&verdict));
        }
        let initial = if self.config.max_attempts > 0 {
            HealState::Healing(0)
        } else {
            HealState::ExhaustedFailed
        };
        self.drive(CandidateArtifact::new(code, 0), initial, verdict)
            .await
    }

    async fn drive(
        &self,
        artifact: CandidateArtifact,
        initial: HealState,
        verdict: ValidationVerdict,
    ) -> Result<HealReport, ApiError> {
        let gate = &self.services.gate;
        let guard = match self.epoch {
            Some(epoch) => gate.enter_at(epoch),
            None => gate.enter(),
        };
        let progress = &self.services.progress;
        let max = self.config.max_attempts;

        let mut artifact = artifact;
        let mut last_verdict = verdict;
        let mut heal_attempts = 0;
        let mut validations = 0;
        let mut failure: Option<FailureReason> = None;
        let mut trace = Vec::new();
        self.transition(initial, &mut trace);

        loop {
            match self.state() {
                HealState::Testing(k) => {
                    progress.push(ProgressKind::ShadowStarted, "Shadow testing...");
                    let verdict = self.services.validator.validate(&artifact.code).await;
                    validations += 1;

                    if verdict.kind == Some(FailureKind::Host) && guard.is_current() {
                        return Err(self.host_unavailable(&verdict));
                    }
                    if !guard.is_current() || verdict.kind == Some(FailureKind::Superseded) {
                        return Ok(self.cancelled(
                            artifact,
                            verdict,
                            heal_attempts,
                            validations,
                            trace,
                        ));
                    }

                    if verdict.success {
                        progress.push_with(
                            ProgressKind::ShadowPassed,
                            "Shadow test passed",
                            &VerdictEventData {
                                success: true,
                                kind: None,
                                error: None,
                                duration_ms: None,
                            },
                        );
                        last_verdict = verdict;
                        self.transition(HealState::Succeeded, &mut trace);
                        continue;
                    }

                    progress.push_with(
                        ProgressKind::ShadowFailed,
                        format!("Shadow test failed: {}", verdict.error_message()),
                        &VerdictEventData {
                            success: false,
                            kind: verdict.kind.map(|k| k.as_str().to_string()),
                            error: verdict.error.clone(),
                            duration_ms: None,
                        },
                    );
                    last_verdict = verdict;

                    if k < max {
                        self.transition(HealState::Healing(k), &mut trace);
                    } else {
                        failure = Some(FailureReason::ValidationExhausted { attempts: k });
                        self.transition(HealState::ExhaustedFailed, &mut trace);
                    }
                }
                HealState::Healing(k) => {
                    heal_attempts += 1;
                    progress.push_with(
                        ProgressKind::HealAttempt,
                        format!("Auto-healing attempt {}/{}...", k + 1, max),
                        &AttemptEventData {
                            attempt: k + 1,
                            max_attempts: max,
                            fingerprint: artifact.fingerprint.clone(),
                        },
                    );

                    let request = RepairRequest {
                        runtime_error: error_context(&last_verdict, &self.config),
                        failed_code: artifact.code.clone(),
                        user_id: self.target.user_id.clone(),
                    };
                    let repaired = self.services.repair.repair(request).await;

                    if !guard.is_current() {
                        return Ok(self.cancelled(
                            artifact,
                            last_verdict,
                            heal_attempts,
                            validations,
                            trace,
                        ));
                    }

                    match repaired {
                        Ok(candidate) if candidate.trim().len() >= self.config.min_candidate_len => {
                            artifact = CandidateArtifact::new(candidate.trim(), k + 1);
                            info!(
                                project = %self.target.project_id,
                                attempt = k + 1,
                                fingerprint = artifact.short_fingerprint(),
                                "Repair produced a new candidate"
                            );
                            progress.push(ProgressKind::FixApplied, "Fix applied, re-testing...");
                            self.transition(HealState::Testing(k + 1), &mut trace);
                        }
                        Ok(candidate) => {
                            warn!(
                                project = %self.target.project_id,
                                len = candidate.trim().len(),
                                "Repair candidate too short"
                            );
                            progress.push(ProgressKind::RepairUnusable, NO_USABLE_CODE);
                            failure = Some(FailureReason::RepairUnavailable {
                                reason: NO_USABLE_CODE.to_string(),
                            });
                            self.transition(HealState::ExhaustedFailed, &mut trace);
                        }
                        Err(e) => {
                            warn!(
                                project = %self.target.project_id,
                                repair = self.services.repair.name(),
                                error = %e,
                                "Repair request failed"
                            );
                            progress.push(ProgressKind::RepairUnusable, NO_USABLE_CODE);
                            failure = Some(FailureReason::RepairUnavailable {
                                reason: e.to_string(),
                            });
                            self.transition(HealState::ExhaustedFailed, &mut trace);
                        }
                    }
                }
                HealState::Succeeded => {
                    if !guard.is_current() {
                        return Ok(self.cancelled(
                            artifact,
                            last_verdict,
                            heal_attempts,
                            validations,
                            trace,
                        ));
                    }
                    let status = self.persist_success(&artifact).await?;
                    progress.push(ProgressKind::Persisted, "Saved validated code");
                    return Ok(HealReport {
                        outcome: HealOutcome::Succeeded { status },
                        artifact,
                        last_verdict,
                        heal_attempts,
                        validations,
                        trace,
                    });
                }
                HealState::ExhaustedFailed => {
                    if !guard.is_current() {
                        return Ok(self.cancelled(
                            artifact,
                            last_verdict,
                            heal_attempts,
                            validations,
                            trace,
                        ));
                    }
                    let reason = failure.take().unwrap_or(FailureReason::ValidationExhausted {
                        attempts: heal_attempts,
                    });
                    let status = self
                        .services
                        .store
                        .update_status(&self.target.project_id, StatusPatch::broken())
                        .await?;
                    progress.push(ProgressKind::Exhausted, reason.user_message());
                    warn!(
                        project = %self.target.project_id,
                        heal_attempts,
                        reason = %reason.user_message(),
                        "Heal loop gave up"
                    );
                    return Ok(HealReport {
                        outcome: HealOutcome::Failed { reason, status },
                        artifact,
                        last_verdict,
                        heal_attempts,
                        validations,
                        trace,
                    });
                }
            }
        }
    }

    /// Source first, then status. Success is reported only after both writes.
    async fn persist_success(
        &self,
        artifact: &CandidateArtifact,
    ) -> Result<ProjectBuildStatus, ApiError> {
        let store = &self.services.store;
        store
            .upsert_source(&self.target.project_id, &self.config.entry_path, &artifact.code)
            .await?;
        let status = store
            .update_status(&self.target.project_id, StatusPatch::succeeded(Utc::now()))
            .await?;
        info!(
            project = %self.target.project_id,
            fingerprint = artifact.short_fingerprint(),
            revision = artifact.revision,
            "Persisted validated source"
        );
        Ok(status)
    }

    /// The sandbox could not run at all. Nothing is known about the code, so
    /// no repair is attempted and the stored status is left alone.
    fn host_unavailable(&self, verdict: &ValidationVerdict) -> ApiError {
        let message = verdict.error_message().to_string();
        self.services.progress.push(
            ProgressKind::HostUnavailable,
            format!("Sandbox unavailable: {}", message),
        );
        warn!(
            project = %self.target.project_id,
            error = %message,
            "Sandbox host unavailable; skipping heal"
        );
        ApiError::Sandbox(message)
    }

    fn cancelled(
        &self,
        artifact: CandidateArtifact,
        last_verdict: ValidationVerdict,
        heal_attempts: usize,
        validations: usize,
        trace: Vec<HealState>,
    ) -> HealReport {
        info!(project = %self.target.project_id, "Heal request abandoned");
        HealReport {
            outcome: HealOutcome::Cancelled,
            artifact,
            last_verdict,
            heal_attempts,
            validations,
            trace,
        }
    }
}

/// Error message plus a short stack excerpt, bounded for the repair prompt.
pub fn error_context(verdict: &ValidationVerdict, config: &HealConfig) -> String {
    let mut context = verdict.error_message().to_string();
    if let Some(stack) = verdict.stack.as_deref() {
        let excerpt: Vec<&str> = stack
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .take(config.stack_excerpt_lines)
            .collect();
        if !excerpt.is_empty() {
            context.push_str("\n\nStack:\n");
            context.push_str(&excerpt.join("\n"));
        }
    }
    truncate_chars(&context, config.error_context_chars)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
