//! Shared fixtures for integration tests
//!
//! Scripted sandbox hosts, repair and generation services, and a store that
//! can be slowed down or made to fail. A [`Journal`] shared between the host
//! and the store records the order in which things happened.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use shadowheal::error::{ApiError, RepairError, StorageError};
use shadowheal::heal::{HealConfig, HealGate, HealOrchestrator, HealServices, HealTarget};
use shadowheal::preview::VisiblePreview;
use shadowheal::progress::ProgressLog;
use shadowheal::provider::{
    EventStream, GenerationClient, GenerationRequest, RepairClient, RepairRequest,
};
use shadowheal::sandbox::{
    Dispatch, ExecutionHost, ExecutorOptions, HostError, HostHandle, MessagePort, RunId, RunMode,
    RunRegistry, SandboxDocument, SandboxExecutor, SandboxMessage,
};
use shadowheal::shadow::ShadowValidator;
use shadowheal::store::{MemoryProjectStore, ProjectBuildStatus, ProjectStore, StatusPatch};
use shadowheal::stream::StreamEvent;

pub const PROJECT: &str = "project-1";
pub const USER: &str = "user-1";

pub const SHADOW_TIMEOUT: Duration = Duration::from_millis(200);
pub const PREVIEW_TIMEOUT: Duration = Duration::from_millis(100);

/// Renders cleanly under [`ScriptedHost::with_defaults`].
pub const WORKING_APP: &str = "function App() { return <div>Hi</div> }";

/// One brace short and referencing an undefined value.
pub const BROKEN_APP: &str = "function App() {\n  return <div>{missingValue}</div>;\n";

/// A repaired candidate long enough to be accepted.
pub const FIXED_APP: &str =
    "function App() {\n  const [count] = React.useState(0);\n  return <div>{count}</div>;\n}";

/// Still broken after "repair".
pub const STILL_BROKEN_APP: &str =
    "function App() {\n  const [count] = React.useState(0);\n  return <div>{missingValue}</div>;\n}";

/// Ordered record of launches and writes across fixtures.
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }
}

/// What a scripted host posts back for one launch.
#[derive(Debug, Clone)]
pub enum HostReply {
    Ready,
    Error {
        message: String,
        stack: Option<String>,
    },
    Silent,
    /// Posted from a task that outlives the run's handle.
    Late {
        delay: Duration,
        reply: Box<HostReply>,
    },
}

impl HostReply {
    pub fn error(message: &str) -> Self {
        HostReply::Error {
            message: message.to_string(),
            stack: None,
        }
    }

    pub fn error_with_stack(message: &str, stack: &str) -> Self {
        HostReply::Error {
            message: message.to_string(),
            stack: Some(stack.to_string()),
        }
    }

    pub fn late(delay: Duration, reply: HostReply) -> Self {
        HostReply::Late {
            delay,
            reply: Box::new(reply),
        }
    }

    fn message(&self, run_id: RunId, mode: RunMode) -> Option<SandboxMessage> {
        match self {
            HostReply::Ready => Some(SandboxMessage::ready(run_id, mode)),
            HostReply::Error { message, stack } => {
                let msg = SandboxMessage::error(run_id, mode, message.clone()).with_source("mount");
                Some(match stack {
                    Some(stack) => msg.with_stack(stack.clone()),
                    None => msg,
                })
            }
            HostReply::Silent | HostReply::Late { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Launch {
    pub run_id: RunId,
    pub mode: RunMode,
    pub entry: String,
}

/// Execution host that answers from a script instead of running anything.
///
/// Marker rules match against the document, then queued replies are used in
/// order, then the fallback.
pub struct ScriptedHost {
    markers: Vec<(String, HostReply)>,
    queue: Mutex<VecDeque<HostReply>>,
    fallback: HostReply,
    launches: Mutex<Vec<Launch>>,
    dispatches: Arc<Mutex<Vec<Dispatch>>>,
    journal: Option<Journal>,
}

impl ScriptedHost {
    pub fn new(fallback: HostReply) -> Self {
        Self {
            markers: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            fallback,
            launches: Mutex::new(Vec::new()),
            dispatches: Arc::new(Mutex::new(Vec::new())),
            journal: None,
        }
    }

    /// Ready for everything except code mentioning `missingValue`.
    pub fn with_defaults() -> Self {
        Self::new(HostReply::Ready).on(
            "missingValue",
            HostReply::error_with_stack(
                "missingValue is not defined",
                "ReferenceError: missingValue is not defined\n    at App (component.js:2:15)\n    at renderWithHooks",
            ),
        )
    }

    pub fn on(mut self, marker: &str, reply: HostReply) -> Self {
        self.markers.push((marker.to_string(), reply));
        self
    }

    pub fn then(self, reply: HostReply) -> Self {
        self.queue.lock().push_back(reply);
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.launches.lock().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().len()
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches.lock().clone()
    }

    fn pick(&self, document: &SandboxDocument) -> HostReply {
        if let Some((_, reply)) = self
            .markers
            .iter()
            .find(|(marker, _)| document.html().contains(marker.as_str()))
        {
            return reply.clone();
        }
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ExecutionHost for ScriptedHost {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn launch(
        &self,
        document: SandboxDocument,
        port: MessagePort,
    ) -> Result<HostHandle, HostError> {
        let run_id = document.run_id();
        let mode = document.mode();
        let reply = self.pick(&document);

        self.launches.lock().push(Launch {
            run_id,
            mode,
            entry: document.entry().to_string(),
        });
        if let Some(journal) = &self.journal {
            journal.record(format!("launch:{}", mode.as_str()));
        }

        match reply {
            HostReply::Late { delay, reply } => {
                let dispatches = Arc::clone(&self.dispatches);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(message) = reply.message(run_id, mode) {
                        dispatches.lock().push(port.post(message));
                    }
                });
            }
            other => {
                if let Some(message) = other.message(run_id, mode) {
                    self.dispatches.lock().push(port.post(message));
                }
            }
        }
        Ok(HostHandle::detached())
    }
}

/// A host that can never start.
pub struct BrokenHost;

#[async_trait]
impl ExecutionHost for BrokenHost {
    fn name(&self) -> &str {
        "broken"
    }

    async fn launch(
        &self,
        _document: SandboxDocument,
        _port: MessagePort,
    ) -> Result<HostHandle, HostError> {
        Err(HostError::NotConfigured("no runner available".to_string()))
    }
}

/// A host that fails to start once its delay has elapsed.
pub struct SlowBrokenHost(pub Duration);

#[async_trait]
impl ExecutionHost for SlowBrokenHost {
    fn name(&self) -> &str {
        "slow-broken"
    }

    async fn launch(
        &self,
        _document: SandboxDocument,
        _port: MessagePort,
    ) -> Result<HostHandle, HostError> {
        tokio::time::sleep(self.0).await;
        Err(HostError::NotConfigured("runner went away".to_string()))
    }
}

#[derive(Debug, Clone)]
pub enum RepairReply {
    Code(String),
    Fail(RepairError),
}

/// Repair service that replays scripted answers and records every request.
pub struct ScriptedRepair {
    replies: Mutex<VecDeque<RepairReply>>,
    fallback: RepairReply,
    delay: Option<Duration>,
    requests: Mutex<Vec<RepairRequest>>,
    gate: Option<HealGate>,
    healing_seen: Mutex<Vec<bool>>,
}

impl ScriptedRepair {
    pub fn new(fallback: RepairReply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            requests: Mutex::new(Vec::new()),
            gate: None,
            healing_seen: Mutex::new(Vec::new()),
        }
    }

    /// Always returns [`FIXED_APP`].
    pub fn fixing() -> Self {
        Self::new(RepairReply::Code(FIXED_APP.to_string()))
    }

    /// Always returns code that still fails.
    pub fn never_fixing() -> Self {
        Self::new(RepairReply::Code(STILL_BROKEN_APP.to_string()))
    }

    pub fn then(self, reply: RepairReply) -> Self {
        self.replies.lock().push_back(reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Record the gate's healing flag on every request.
    pub fn observing(mut self, gate: HealGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn requests(&self) -> Vec<RepairRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn healing_seen(&self) -> Vec<bool> {
        self.healing_seen.lock().clone()
    }
}

#[async_trait]
impl RepairClient for ScriptedRepair {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn repair(&self, request: RepairRequest) -> Result<String, RepairError> {
        self.requests.lock().push(request);
        if let Some(gate) = &self.gate {
            self.healing_seen.lock().push(gate.is_healing());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            RepairReply::Code(code) => Ok(code),
            RepairReply::Fail(e) => Err(e),
        }
    }
}

/// Generation service that replays a fixed event list.
pub struct ScriptedGeneration {
    events: Vec<StreamEvent>,
    delay: Duration,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGeneration {
    pub fn new(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Wait `delay` before each event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Streams `code` in two chunks, then the final payload.
    pub fn streaming(code: &str) -> Self {
        let (head, tail) = code.split_at(code.len() / 2);
        Self::new(vec![
            StreamEvent::Status {
                message: Some("Planning component".to_string()),
                data: None,
            },
            StreamEvent::CodeChunk {
                chunk: head.to_string(),
            },
            StreamEvent::CodeChunk {
                chunk: tail.to_string(),
            },
            StreamEvent::Code {
                code: Some(code.to_string()),
                summary: Some("Built a greeting".to_string()),
                data: None,
            },
        ])
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGeneration {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<EventStream, ApiError> {
        self.requests.lock().push(request);
        let events: Vec<Result<StreamEvent, ApiError>> =
            self.events.iter().cloned().map(Ok).collect();
        let delay = self.delay;
        Ok(Box::pin(stream::iter(events).then(move |event| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            event
        })))
    }
}

/// Memory store with optional write latency, write failures and a journal.
#[derive(Default)]
pub struct DelayedStore {
    inner: MemoryProjectStore,
    delay: Option<Duration>,
    fail_writes: bool,
    journal: Option<Journal>,
}

impl DelayedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn source_count(&self) -> usize {
        self.inner.source_count()
    }

    async fn before_write(&self, what: &str, project: &str) -> Result<(), StorageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        if let Some(journal) = &self.journal {
            journal.record(format!("write:{}:{}", what, project));
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for DelayedStore {
    async fn upsert_source(
        &self,
        project: &str,
        path: &str,
        content: &str,
    ) -> Result<(), StorageError> {
        self.before_write("source", project).await?;
        self.inner.upsert_source(project, path, content).await
    }

    async fn update_status(
        &self,
        project: &str,
        patch: StatusPatch,
    ) -> Result<ProjectBuildStatus, StorageError> {
        self.before_write("status", project).await?;
        self.inner.update_status(project, patch).await
    }

    async fn load_source(&self, project: &str, path: &str) -> Result<Option<String>, StorageError> {
        self.inner.load_source(project, path).await
    }

    async fn load_status(&self, project: &str) -> Result<Option<ProjectBuildStatus>, StorageError> {
        self.inner.load_status(project).await
    }
}

pub fn test_options() -> ExecutorOptions {
    ExecutorOptions {
        shadow_timeout: SHADOW_TIMEOUT,
        preview_soft_timeout: PREVIEW_TIMEOUT,
        ..ExecutorOptions::default()
    }
}

pub fn executor_with(host: Arc<dyn ExecutionHost>) -> Arc<SandboxExecutor> {
    Arc::new(SandboxExecutor::new(
        host,
        RunRegistry::shared(),
        test_options(),
    ))
}

/// Every collaborator of a heal, wired with short timeouts.
pub struct Harness {
    pub host: Arc<ScriptedHost>,
    pub executor: Arc<SandboxExecutor>,
    pub validator: Arc<ShadowValidator>,
    pub repair: Arc<ScriptedRepair>,
    pub store: Arc<DelayedStore>,
    pub progress: Arc<ProgressLog>,
    pub gate: HealGate,
    pub journal: Journal,
}

impl Harness {
    pub fn new(host: ScriptedHost, repair: ScriptedRepair) -> Self {
        Self::with_store(host, repair, DelayedStore::new())
    }

    pub fn with_store(host: ScriptedHost, repair: ScriptedRepair, store: DelayedStore) -> Self {
        Self::with_gate(host, repair, store, HealGate::new())
    }

    /// Use when the repair fixture must observe the same gate.
    pub fn with_gate(
        host: ScriptedHost,
        repair: ScriptedRepair,
        store: DelayedStore,
        gate: HealGate,
    ) -> Self {
        let journal = Journal::default();
        let host = Arc::new(host.with_journal(journal.clone()));
        let executor = executor_with(host.clone());
        let validator = Arc::new(ShadowValidator::new(executor.clone(), PROJECT));
        Self {
            host,
            executor,
            validator,
            repair: Arc::new(repair),
            store: Arc::new(store.with_journal(journal.clone())),
            progress: ProgressLog::shared(),
            gate,
            journal,
        }
    }

    pub fn services(&self) -> HealServices {
        HealServices {
            validator: self.validator.clone(),
            repair: self.repair.clone(),
            store: self.store.clone(),
            progress: self.progress.clone(),
            gate: self.gate.clone(),
        }
    }

    pub fn orchestrator(&self) -> HealOrchestrator {
        self.orchestrator_with(HealConfig::default())
    }

    pub fn orchestrator_with(&self, config: HealConfig) -> HealOrchestrator {
        HealOrchestrator::new(
            self.services(),
            HealTarget {
                project_id: PROJECT.to_string(),
                user_id: Some(USER.to_string()),
            },
            config,
        )
    }

    pub fn preview(&self) -> VisiblePreview {
        VisiblePreview::new(self.executor.clone(), PROJECT, self.gate.clone())
    }
}
