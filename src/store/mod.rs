//! Project Store
//!
//! Persists the last validated source per `(project, path)` and the build
//! status per project. Writes are last-writer-wins.

pub mod persistence;

pub use persistence::SledProjectStore;

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted health of a project's current source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectBuildStatus {
    pub is_broken: bool,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Partial status update. `None` leaves the stored value unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPatch {
    pub is_broken: bool,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl StatusPatch {
    pub fn succeeded(at: DateTime<Utc>) -> Self {
        Self {
            is_broken: false,
            last_success_at: Some(at),
        }
    }

    pub fn broken() -> Self {
        Self {
            is_broken: true,
            last_success_at: None,
        }
    }

    pub fn apply(&self, current: Option<ProjectBuildStatus>) -> ProjectBuildStatus {
        let previous = current.unwrap_or_default();
        ProjectBuildStatus {
            is_broken: self.is_broken,
            last_success_at: self.last_success_at.or(previous.last_success_at),
        }
    }
}

/// Project Store interface
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert or replace the source stored at `(project, path)`.
    async fn upsert_source(&self, project: &str, path: &str, content: &str)
        -> Result<(), StorageError>;

    async fn update_status(
        &self,
        project: &str,
        patch: StatusPatch,
    ) -> Result<ProjectBuildStatus, StorageError>;

    async fn load_source(&self, project: &str, path: &str) -> Result<Option<String>, StorageError>;

    async fn load_status(&self, project: &str) -> Result<Option<ProjectBuildStatus>, StorageError>;
}

/// In-process store for embedding and tests.
#[derive(Default)]
pub struct MemoryProjectStore {
    sources: Mutex<HashMap<(String, String), String>>,
    statuses: Mutex<HashMap<String, ProjectBuildStatus>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source_count(&self) -> usize {
        self.sources.lock().len()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn upsert_source(
        &self,
        project: &str,
        path: &str,
        content: &str,
    ) -> Result<(), StorageError> {
        self.sources.lock().insert(
            (project.to_string(), path.to_string()),
            content.to_string(),
        );
        Ok(())
    }

    async fn update_status(
        &self,
        project: &str,
        patch: StatusPatch,
    ) -> Result<ProjectBuildStatus, StorageError> {
        let mut statuses = self.statuses.lock();
        let next = patch.apply(statuses.get(project).cloned());
        statuses.insert(project.to_string(), next.clone());
        Ok(next)
    }

    async fn load_source(&self, project: &str, path: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .sources
            .lock()
            .get(&(project.to_string(), path.to_string()))
            .cloned())
    }

    async fn load_status(&self, project: &str) -> Result<Option<ProjectBuildStatus>, StorageError> {
        Ok(self.statuses.lock().get(project).cloned())
    }
}
