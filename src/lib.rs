//! shadowheal: shadow-test and self-heal pipeline for generated UI components
//!
//! Generated single-file component source is sanitized, executed in an
//! isolated sandbox before anyone sees it, and repaired through an external
//! service when it fails. The outcome is persisted before it is reported,
//! and only validated code reaches the visible preview.

pub mod cli;
pub mod config;
pub mod error;
pub mod heal;
pub mod logging;
pub mod preview;
pub mod progress;
pub mod provider;
pub mod sandbox;
pub mod sanitize;
pub mod session;
pub mod shadow;
pub mod store;
pub mod stream;

pub use error::{ApiError, RepairError, StorageError};
pub use heal::{FailureReason, HealConfig, HealOrchestrator, HealOutcome, HealReport, HealState};
pub use shadow::{ShadowValidator, ValidationVerdict};
