//! Persistence layer for the Project Store

use crate::error::StorageError;
use crate::store::{ProjectBuildStatus, ProjectStore, StatusPatch};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

fn source_key(project: &str, path: &str) -> String {
    format!("source:{}:{}", project, path)
}

fn status_key(project: &str) -> String {
    format!("status:{}", project)
}

/// Sled-based implementation of ProjectStore
///
/// Values are bincode-encoded and every write is flushed before it returns,
/// so a successful write survives a crash.
pub struct SledProjectStore {
    db: sled::Db,
}

impl SledProjectStore {
    /// Open (or create) the database directory at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            StorageError::Backend(format!(
                "Failed to open sled database at {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self { db })
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    async fn flush(&self) -> Result<(), StorageError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for SledProjectStore {
    async fn upsert_source(
        &self,
        project: &str,
        path: &str,
        content: &str,
    ) -> Result<(), StorageError> {
        let value =
            bincode::serialize(content).map_err(|e| StorageError::Encode(e.to_string()))?;
        self.db.insert(source_key(project, path).as_bytes(), value)?;
        self.flush().await?;
        debug!(project, path, bytes = content.len(), "Stored project source");
        Ok(())
    }

    async fn update_status(
        &self,
        project: &str,
        patch: StatusPatch,
    ) -> Result<ProjectBuildStatus, StorageError> {
        let key = status_key(project);
        let current = self.load_status(project).await?;
        let next = patch.apply(current);
        let value = bincode::serialize(&next).map_err(|e| StorageError::Encode(e.to_string()))?;
        self.db.insert(key.as_bytes(), value)?;
        self.flush().await?;
        debug!(project, is_broken = next.is_broken, "Stored project status");
        Ok(next)
    }

    async fn load_source(&self, project: &str, path: &str) -> Result<Option<String>, StorageError> {
        match self.db.get(source_key(project, path).as_bytes())? {
            Some(raw) => {
                let content: String =
                    bincode::deserialize(&raw).map_err(|e| StorageError::Decode(e.to_string()))?;
                Ok(Some(content))
            }
            None => Ok(None),
        }
    }

    async fn load_status(&self, project: &str) -> Result<Option<ProjectBuildStatus>, StorageError> {
        match self.db.get(status_key(project).as_bytes())? {
            Some(raw) => {
                let status: ProjectBuildStatus =
                    bincode::deserialize(&raw).map_err(|e| StorageError::Decode(e.to_string()))?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }
}
