//! CLI route: single route table and run context.

use crate::cli::output::{
    format_check_json, format_check_text, format_report_json, format_report_text,
    format_status_json, format_status_text, format_verdict_json, format_verdict_text,
    CommandOutput,
};
use crate::cli::parse::{Commands, OutputFormat};
use crate::config::{ConfigLoader, ShadowhealConfig};
use crate::error::ApiError;
use crate::heal::{HealGate, HealOrchestrator, HealServices, HealTarget};
use crate::preview::VisiblePreview;
use crate::progress::ProgressLog;
use crate::provider::{HttpGenerationClient, HttpRepairClient};
use crate::sandbox::{ProcessHost, RunRegistry, SandboxExecutor};
use crate::sanitize::sanitize;
use crate::session::GenerationSession;
use crate::shadow::ShadowValidator;
use crate::store::{ProjectStore, SledProjectStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Runtime context for CLI execution: workspace and loaded configuration.
pub struct RunContext {
    workspace_root: PathBuf,
    config: ShadowhealConfig,
}

impl RunContext {
    /// Load configuration from `config_path` if given, otherwise from the
    /// layered sources for `workspace_root`.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(&path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self {
            workspace_root,
            config,
        })
    }

    pub fn with_config(workspace_root: PathBuf, config: ShadowhealConfig) -> Self {
        Self {
            workspace_root,
            config,
        }
    }

    pub fn config(&self) -> &ShadowhealConfig {
        &self.config
    }

    pub async fn execute(&self, command: &Commands) -> Result<CommandOutput, ApiError> {
        match command {
            Commands::Sanitize { file } => {
                let source = read_source(file).await?;
                Ok(CommandOutput::ok(sanitize(&source)))
            }
            Commands::Check { file, format } => {
                let source = read_source(file).await?;
                let result = self.executor().prepare(&source);
                let text = match format {
                    OutputFormat::Text => format_check_text(&result),
                    OutputFormat::Json => format_check_json(&result),
                };
                Ok(if result.is_ok() {
                    CommandOutput::ok(text)
                } else {
                    CommandOutput::failed(text)
                })
            }
            Commands::Validate { file, format } => {
                let source = read_source(file).await?;
                let validator = ShadowValidator::new(Arc::new(self.executor()), "cli");
                let verdict = validator.validate(&source).await;
                let text = match format {
                    OutputFormat::Text => format_verdict_text(&verdict),
                    OutputFormat::Json => format_verdict_json(&verdict),
                };
                Ok(if verdict.success {
                    CommandOutput::ok(text)
                } else {
                    CommandOutput::failed(text)
                })
            }
            Commands::Heal {
                file,
                project,
                user,
                format,
            } => {
                let source = read_source(file).await?;
                let services = self.services(project)?;
                let progress = Arc::clone(&services.progress);
                let orchestrator = HealOrchestrator::new(
                    services,
                    HealTarget {
                        project_id: project.clone(),
                        user_id: user.clone(),
                    },
                    self.config.heal.clone(),
                );
                let report = orchestrator.run(&source).await?;
                let lines = progress.lines();
                let text = match format {
                    OutputFormat::Text => format_report_text(&report, &lines),
                    OutputFormat::Json => format_report_json(&report, &lines),
                };
                Ok(if report.is_success() {
                    CommandOutput::ok(text)
                } else {
                    CommandOutput::failed(text)
                })
            }
            Commands::Generate {
                prompt,
                project,
                user,
                format,
            } => {
                let url = self.config.endpoints.generate_url.clone().ok_or_else(|| {
                    ApiError::ConfigError("endpoints.generate_url is not set".to_string())
                })?;
                let generation = HttpGenerationClient::new(
                    url,
                    self.config.endpoints.api_key.clone(),
                    self.config.endpoints.timeouts(),
                )?;
                let services = self.services(project)?;
                let progress = Arc::clone(&services.progress);
                let preview = VisiblePreview::new(
                    Arc::clone(services.validator.executor()),
                    project,
                    services.gate.clone(),
                );
                let session = GenerationSession::new(
                    project.clone(),
                    user.clone(),
                    Arc::new(generation),
                    services,
                    preview,
                    self.config.heal.clone(),
                );
                let result = session.generate(prompt).await?;
                let lines = progress.lines();
                let text = match format {
                    OutputFormat::Text => format_report_text(&result.report, &lines),
                    OutputFormat::Json => format_report_json(&result.report, &lines),
                };
                Ok(if result.report.is_success() {
                    CommandOutput::ok(text)
                } else {
                    CommandOutput::failed(text)
                })
            }
            Commands::Status { project, format } => {
                let store = self.store()?;
                let status = store.load_status(project).await?;
                let has_source = store
                    .load_source(project, &self.config.heal.entry_path)
                    .await?
                    .is_some();
                let text = match format {
                    OutputFormat::Text => format_status_text(project, status.as_ref(), has_source),
                    OutputFormat::Json => format_status_json(project, status.as_ref(), has_source),
                };
                Ok(CommandOutput::ok(text))
            }
            Commands::Config => Ok(CommandOutput::ok(self.config.to_toml()?)),
        }
    }

    fn executor(&self) -> SandboxExecutor {
        let sandbox = &self.config.sandbox;
        let host = ProcessHost::new(sandbox.runner_program.clone(), sandbox.runner_args.clone());
        SandboxExecutor::new(Arc::new(host), RunRegistry::shared(), sandbox.executor_options())
    }

    fn store(&self) -> Result<SledProjectStore, ApiError> {
        let path = self.config.store.resolve(&self.workspace_root);
        debug!(path = %path.display(), "Opening project store");
        Ok(SledProjectStore::open(path)?)
    }

    fn services(&self, scope: &str) -> Result<HealServices, ApiError> {
        let repair_url = self.config.endpoints.repair_url.clone().ok_or_else(|| {
            ApiError::ConfigError("endpoints.repair_url is not set".to_string())
        })?;
        let repair = HttpRepairClient::new(
            repair_url,
            self.config.endpoints.api_key.clone(),
            self.config.endpoints.timeouts(),
        )?;
        info!(scope, repair = %repair.url(), "Heal services ready");
        Ok(HealServices {
            validator: Arc::new(ShadowValidator::new(Arc::new(self.executor()), scope)),
            repair: Arc::new(repair),
            store: Arc::new(self.store()?),
            progress: ProgressLog::shared(),
            gate: HealGate::new(),
        })
    }
}

async fn read_source(path: &Path) -> Result<String, ApiError> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        ApiError::InvalidInput(format!("Failed to read {}: {}", path.display(), e))
    })
}
