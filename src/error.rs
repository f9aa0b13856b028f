//! Error types for the shadow-test and heal pipeline.
//!
//! Validation failures are never errors: they travel as data
//! (`ValidationVerdict`, `SandboxFailure`). The types here cover
//! infrastructure only: storage, transport, configuration.

use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Source not found for project {project} at {path}")]
    SourceNotFound { project: String, path: String },

    #[error("Status not found for project {0}")]
    StatusNotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Failed to decode record: {0}")]
    Decode(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Failures of the repair collaborator.
///
/// None of these count as a code failure: the heal loop stops without
/// spending a retry because there is no new candidate to test.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepairError {
    #[error("Repair request is not authorized: {0}")]
    Unauthorized(String),

    #[error("Repair service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Repair service returned an empty body")]
    EmptyBody,

    #[error("Repair transport failed: {0}")]
    Transport(String),

    #[error("Repair stream reported an error: {0}")]
    Stream(String),
}

/// Top-level errors surfaced to request handlers and the CLI
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Sandbox host error: {0}")]
    Sandbox(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
