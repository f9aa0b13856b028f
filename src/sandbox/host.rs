//! Execution hosts: the isolated contexts that actually run sandbox documents.
//!
//! A host receives a finished document and a [`MessagePort`] and must report
//! every outcome through that port. The host owns whatever it spawned; the
//! returned [`HostHandle`] tears it down on drop.

use crate::sandbox::document::SandboxDocument;
use crate::sandbox::message::SandboxMessage;
use crate::sandbox::registry::{Dispatch, RunRegistry};
use crate::sandbox::{RunId, RunMode};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Sandbox host is not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to start sandbox runner `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Sandbox host I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The only path from a sandboxed document back to the host side.
#[derive(Clone)]
pub struct MessagePort {
    registry: Arc<RunRegistry>,
}

impl MessagePort {
    pub fn new(registry: Arc<RunRegistry>) -> Self {
        Self { registry }
    }

    pub fn post(&self, message: SandboxMessage) -> Dispatch {
        self.registry.dispatch(message)
    }

    /// Parse and post one JSON message line. Malformed lines are dropped.
    pub fn post_line(&self, line: &str) -> Option<Dispatch> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<SandboxMessage>(trimmed) {
            Ok(message) => Some(self.post(message)),
            Err(e) => {
                debug!(error = %e, "Ignoring non-message output from sandbox runner");
                None
            }
        }
    }
}

/// Keeps a launched execution context alive. Dropping it tears the context down.
#[derive(Default)]
pub struct HostHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl HostHandle {
    /// A handle with nothing to tear down.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self { tasks: vec![task] }
    }

    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// An isolated context that can run a sandbox document.
#[async_trait]
pub trait ExecutionHost: Send + Sync {
    fn name(&self) -> &str;

    /// Start executing `document`. Outcomes arrive later through `port`.
    async fn launch(
        &self,
        document: SandboxDocument,
        port: MessagePort,
    ) -> Result<HostHandle, HostError>;
}

/// Runs documents through an external headless runner.
///
/// The runner reads the document on stdin and prints one JSON
/// [`SandboxMessage`] per stdout line. It gets an empty environment apart
/// from `PATH`, `SHADOWHEAL_RUN_ID` and `SHADOWHEAL_MODE`, and is killed when
/// the handle is dropped.
pub struct ProcessHost {
    program: String,
    args: Vec<String>,
}

impl ProcessHost {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl ExecutionHost for ProcessHost {
    fn name(&self) -> &str {
        "process"
    }

    async fn launch(
        &self,
        document: SandboxDocument,
        port: MessagePort,
    ) -> Result<HostHandle, HostError> {
        if self.program.trim().is_empty() {
            return Err(HostError::NotConfigured(
                "sandbox.runner_program is empty".to_string(),
            ));
        }

        let run_id = document.run_id();
        let mode = document.mode();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .env("SHADOWHEAL_RUN_ID", run_id.to_string())
            .env("SHADOWHEAL_MODE", mode.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }

        let mut child = command.spawn().map_err(|e| HostError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        debug!(run_id = %run_id, mode = mode.as_str(), program = %self.program, "Sandbox runner started");

        let html = document.into_html();
        let runner = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(html.as_bytes()).await {
                    warn!(run_id = %run_id, error = %e, "Failed to write document to sandbox runner");
                }
                drop(stdin);
            }

            let mut reported = false;
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if port.post_line(&line).is_some() {
                                reported = true;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(run_id = %run_id, error = %e, "Failed reading sandbox runner output");
                            break;
                        }
                    }
                }
            }

            let status = child.wait().await;
            if !reported {
                let detail = match status {
                    Ok(status) => format!("Sandbox runner exited ({}) without reporting", status),
                    Err(e) => format!("Sandbox runner failed: {}", e),
                };
                port.post(runner_failure(run_id, mode, detail));
            }
        });

        let mut handle = HostHandle::from_task(runner);
        if let Some(stderr) = stderr {
            handle = handle.with_task(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(run_id = %run_id, "sandbox runner: {}", line);
                }
            }));
        }
        Ok(handle)
    }
}

fn runner_failure(run_id: RunId, mode: RunMode, detail: String) -> SandboxMessage {
    SandboxMessage::error(run_id, mode, detail).with_source("host")
}
