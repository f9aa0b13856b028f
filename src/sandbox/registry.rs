//! Token-keyed registry of pending sandbox runs.
//!
//! Each surface has at most one active token. Registering a new run on a
//! surface supersedes the previous one; a message is delivered only when its
//! token is both pending and active for its surface, and its kind belongs to
//! the run's mode. Everything else is dropped here, so callers never see
//! results from an abandoned run.

use crate::sandbox::message::SandboxMessage;
use crate::sandbox::{RunId, RunMode, SurfaceId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

const RETIRED_CAPACITY: usize = 256;

/// What a pending run receives.
#[derive(Debug, Clone, PartialEq)]
pub enum RunSignal {
    Message(SandboxMessage),
    /// A newer run took over the surface, or the surface was invalidated.
    Superseded,
}

/// Result of waiting on a [`PendingRun`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunWait {
    Signal(RunSignal),
    TimedOut,
}

/// Outcome of routing one incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// The token belonged to a run that was superseded, expired or dropped.
    Stale,
    /// The token was never issued by this registry.
    Unknown,
}

struct PendingEntry {
    surface: SurfaceId,
    tx: oneshot::Sender<RunSignal>,
}

#[derive(Debug, Clone, Copy)]
struct ActiveRun {
    run_id: RunId,
    mode: RunMode,
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<RunId, PendingEntry>,
    active: HashMap<SurfaceId, ActiveRun>,
    retired: VecDeque<RunId>,
}

impl RegistryState {
    fn retire(&mut self, run_id: RunId) {
        if self.retired.len() == RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(run_id);
    }

    fn supersede(&mut self, run_id: RunId) {
        if let Some(entry) = self.pending.remove(&run_id) {
            let _ = entry.tx.send(RunSignal::Superseded);
        }
        self.retire(run_id);
    }
}

#[derive(Default)]
pub struct RunRegistry {
    state: Mutex<RegistryState>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Issue a fresh token for `surface` and make it the surface's active run.
    /// Only messages of `mode`'s kinds are delivered to it.
    pub fn register(self: &Arc<Self>, surface: SurfaceId, mode: RunMode) -> PendingRun {
        let run_id = RunId::new();
        let (tx, rx) = oneshot::channel();

        let mut state = self.state.lock();
        if let Some(previous) = state.active.insert(surface.clone(), ActiveRun { run_id, mode }) {
            debug!(surface = %surface, previous = %previous.run_id, next = %run_id, "Superseding sandbox run");
            state.supersede(previous.run_id);
        }
        state.pending.insert(
            run_id,
            PendingEntry {
                surface: surface.clone(),
                tx,
            },
        );
        drop(state);

        PendingRun {
            run_id,
            surface,
            rx: Some(rx),
            registry: Arc::clone(self),
        }
    }

    /// Listen again on a run that already delivered its first outcome.
    ///
    /// Only the surface's active run can be re-armed. The previous
    /// [`PendingRun`] for this token must already be dropped.
    pub fn rearm(self: &Arc<Self>, surface: &SurfaceId, run_id: RunId) -> Option<PendingRun> {
        let mut state = self.state.lock();
        let is_active = state.active.get(surface).map(|active| active.run_id) == Some(run_id);
        if !is_active || state.pending.contains_key(&run_id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.pending.insert(
            run_id,
            PendingEntry {
                surface: surface.clone(),
                tx,
            },
        );
        drop(state);

        Some(PendingRun {
            run_id,
            surface: surface.clone(),
            rx: Some(rx),
            registry: Arc::clone(self),
        })
    }

    /// Route a message to its run if that run is still live.
    pub fn dispatch(&self, message: SandboxMessage) -> Dispatch {
        let run_id = message.run_id;
        let mut state = self.state.lock();

        let live = state
            .pending
            .get(&run_id)
            .and_then(|entry| state.active.get(&entry.surface))
            .map(|active| active.run_id == run_id && active.mode == message.kind.mode())
            .unwrap_or(false);

        if live {
            if let Some(entry) = state.pending.remove(&run_id) {
                state.retire(run_id);
                if entry.tx.send(RunSignal::Message(message)).is_ok() {
                    return Dispatch::Delivered;
                }
            }
            return Dispatch::Stale;
        }

        let outcome = if state.retired.contains(&run_id) || state.pending.contains_key(&run_id) {
            Dispatch::Stale
        } else {
            Dispatch::Unknown
        };
        debug!(
            run_id = %run_id,
            kind = message.kind.as_str(),
            ?outcome,
            "Discarding sandbox message"
        );
        outcome
    }

    /// Deregister a run whose timeout elapsed.
    pub fn expire(&self, run_id: RunId) {
        let mut state = self.state.lock();
        if state.pending.remove(&run_id).is_some() {
            state.retire(run_id);
        }
    }

    /// Drop the surface's active token; its in-flight result becomes stale.
    pub fn invalidate(&self, surface: &SurfaceId) -> Option<RunId> {
        let mut state = self.state.lock();
        let previous = state.active.remove(surface).map(|active| active.run_id);
        if let Some(run_id) = previous {
            state.supersede(run_id);
        }
        previous
    }

    pub fn active_run(&self, surface: &SurfaceId) -> Option<RunId> {
        self.state.lock().active.get(surface).map(|active| active.run_id)
    }

    pub fn is_active(&self, surface: &SurfaceId, run_id: RunId) -> bool {
        self.active_run(surface) == Some(run_id)
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn forget(&self, run_id: RunId) {
        self.expire(run_id);
    }
}

/// Completion handle for one registered run. Dropping it deregisters the run.
pub struct PendingRun {
    run_id: RunId,
    surface: SurfaceId,
    rx: Option<oneshot::Receiver<RunSignal>>,
    registry: Arc<RunRegistry>,
}

impl PendingRun {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn surface(&self) -> &SurfaceId {
        &self.surface
    }

    /// Await the first signal for this run, or expire it after `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> RunWait {
        let Some(rx) = self.rx.take() else {
            return RunWait::Signal(RunSignal::Superseded);
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(signal)) => RunWait::Signal(signal),
            // Sender dropped without a signal: the entry was removed.
            Ok(Err(_)) => RunWait::Signal(RunSignal::Superseded),
            Err(_) => {
                self.registry.expire(self.run_id);
                RunWait::TimedOut
            }
        }
    }
}

impl Drop for PendingRun {
    fn drop(&mut self) {
        self.registry.forget(self.run_id);
    }
}
