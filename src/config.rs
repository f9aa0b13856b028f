//! Configuration
//!
//! Layered, lowest to highest precedence:
//! 1. built-in defaults
//! 2. `$XDG_CONFIG_HOME/shadowheal/config.toml`
//! 3. `config/config.toml`, then `config/{SHADOWHEAL_ENV}.toml` in the workspace
//! 4. `SHADOWHEAL__SECTION__KEY` environment variables

use crate::error::ApiError;
use crate::heal::HealConfig;
use crate::logging::{validate_logging_config, LoggingConfig};
use crate::provider::HttpTimeouts;
use crate::sandbox::document::{DocumentOptions, DEFAULT_RUNTIME_SCRIPTS};
use crate::sandbox::executor::{DEFAULT_PREVIEW_SOFT_TIMEOUT, DEFAULT_SHADOW_TIMEOUT};
use crate::sandbox::precheck::DEFAULT_BRACKET_TOLERANCE;
use crate::sandbox::ExecutorOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod merge_policy;
mod sources;

pub use sources::global_file::global_config_path;

pub const ENV_PREFIX: &str = "SHADOWHEAL";
pub const ENV_NAME_VAR: &str = "SHADOWHEAL_ENV";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShadowhealConfig {
    #[serde(default)]
    pub heal: HealConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub endpoints: EndpointConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Headless runner that executes sandbox documents.
    pub runner_program: String,
    pub runner_args: Vec<String>,
    pub shadow_timeout_ms: u64,
    pub preview_soft_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub bracket_tolerance: usize,
    /// Scripts every document loads before the user code.
    pub runtime_scripts: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let document = DocumentOptions::default();
        Self {
            runner_program: "shadowheal-runner".to_string(),
            runner_args: Vec::new(),
            shadow_timeout_ms: DEFAULT_SHADOW_TIMEOUT.as_millis() as u64,
            preview_soft_timeout_ms: DEFAULT_PREVIEW_SOFT_TIMEOUT.as_millis() as u64,
            settle_delay_ms: document.settle_delay.as_millis() as u64,
            bracket_tolerance: DEFAULT_BRACKET_TOLERANCE,
            runtime_scripts: DEFAULT_RUNTIME_SCRIPTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SandboxConfig {
    pub fn executor_options(&self) -> ExecutorOptions {
        let document = DocumentOptions {
            runtime_scripts: self.runtime_scripts.clone(),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            ..DocumentOptions::default()
        };
        ExecutorOptions {
            document,
            bracket_tolerance: self.bracket_tolerance,
            shadow_timeout: Duration::from_millis(self.shadow_timeout_ms),
            preview_soft_timeout: Duration::from_millis(self.preview_soft_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub generate_url: Option<String>,
    pub repair_url: Option<String>,
    /// Sent as a bearer token to both services.
    pub api_key: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        let timeouts = HttpTimeouts::default();
        Self {
            generate_url: None,
            repair_url: None,
            api_key: None,
            connect_timeout_secs: timeouts.connect.as_secs(),
            request_timeout_secs: timeouts.request.as_secs(),
        }
    }
}

impl EndpointConfig {
    pub fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            request: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Sled database directory, relative to the workspace root unless absolute.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".shadowheal/store"),
        }
    }
}

impl StoreConfig {
    pub fn resolve(&self, workspace_root: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            workspace_root.join(&self.path)
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Heal(String),
    Sandbox(String),
    Endpoint(String),
    Store(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Heal(msg) => write!(f, "Heal: {}", msg),
            ValidationError::Sandbox(msg) => write!(f, "Sandbox: {}", msg),
            ValidationError::Endpoint(msg) => write!(f, "Endpoint: {}", msg),
            ValidationError::Store(msg) => write!(f, "Store: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl ShadowhealConfig {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.heal.min_candidate_len == 0 {
            errors.push(ValidationError::Heal(
                "min_candidate_len must be greater than 0".to_string(),
            ));
        }
        if self.heal.error_context_chars == 0 {
            errors.push(ValidationError::Heal(
                "error_context_chars must be greater than 0".to_string(),
            ));
        }
        if self.heal.entry_path.trim().is_empty() {
            errors.push(ValidationError::Heal("entry_path cannot be empty".to_string()));
        }

        if self.sandbox.shadow_timeout_ms == 0 {
            errors.push(ValidationError::Sandbox(
                "shadow_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.sandbox.preview_soft_timeout_ms == 0 {
            errors.push(ValidationError::Sandbox(
                "preview_soft_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.sandbox.settle_delay_ms >= self.sandbox.shadow_timeout_ms {
            errors.push(ValidationError::Sandbox(format!(
                "settle_delay_ms ({}) must be shorter than shadow_timeout_ms ({})",
                self.sandbox.settle_delay_ms, self.sandbox.shadow_timeout_ms
            )));
        }
        for script in &self.sandbox.runtime_scripts {
            if !script.starts_with("https://") {
                errors.push(ValidationError::Sandbox(format!(
                    "runtime script must be an https URL: {}",
                    script
                )));
            }
        }

        for (name, url) in [
            ("generate_url", &self.endpoints.generate_url),
            ("repair_url", &self.endpoints.repair_url),
        ] {
            if let Some(url) = url {
                if !is_http_url(url) {
                    errors.push(ValidationError::Endpoint(format!(
                        "{} must be an http(s) URL: {}",
                        name, url
                    )));
                }
            }
        }
        if self.endpoints.request_timeout_secs == 0 {
            errors.push(ValidationError::Endpoint(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.store.path.as_os_str().is_empty() {
            errors.push(ValidationError::Store("Store path cannot be empty".to_string()));
        }

        errors.extend(
            validate_logging_config(&self.logging)
                .into_iter()
                .map(ValidationError::Logging),
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Render as TOML (the `config` command).
    pub fn to_toml(&self) -> Result<String, ApiError> {
        toml::to_string_pretty(self)
            .map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e)))
    }
}

fn validation_failed(errors: Vec<ValidationError>) -> ApiError {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    ApiError::ConfigError(format!(
        "Configuration validation failed:\n{}",
        messages.join("\n")
    ))
}

/// Loads [`ShadowhealConfig`] from its layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate the configuration for `workspace_root`.
    pub fn load(workspace_root: &Path) -> Result<ShadowhealConfig, ApiError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(sources::environment());

        let config: ShadowhealConfig = builder.build()?.try_deserialize()?;
        config.validate().map_err(validation_failed)?;
        Ok(config)
    }

    /// Load a single file on top of the defaults. Ignores every other source.
    pub fn load_from_file(path: &Path) -> Result<ShadowhealConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config: ShadowhealConfig = merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        config.validate().map_err(validation_failed)?;
        Ok(config)
    }

    pub fn default() -> ShadowhealConfig {
        ShadowhealConfig::default()
    }
}
