//! Generation request handler
//!
//! One session per open project view. A request streams fresh source from
//! the generation service, runs it through a request-scoped heal
//! orchestrator and, once the outcome is persisted, shows it in the preview.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::heal::{HealConfig, HealOrchestrator, HealReport, HealServices, HealTarget};
use crate::preview::{PreviewState, VisiblePreview};
use crate::progress::ProgressKind;
use crate::provider::{GenerationClient, GenerationRequest};
use crate::stream::{StreamEvent, StreamSummary};

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub report: HealReport,
    pub summary: Option<String>,
    /// Preview state after rendering; `None` when nothing was shown.
    pub preview: Option<PreviewState>,
}

pub struct GenerationSession {
    project_id: Mutex<String>,
    user_id: Option<String>,
    generation: Arc<dyn GenerationClient>,
    services: HealServices,
    preview: VisiblePreview,
    config: HealConfig,
    draft: Mutex<String>,
}

impl GenerationSession {
    pub fn new(
        project_id: impl Into<String>,
        user_id: Option<String>,
        generation: Arc<dyn GenerationClient>,
        services: HealServices,
        preview: VisiblePreview,
        config: HealConfig,
    ) -> Self {
        Self {
            project_id: Mutex::new(project_id.into()),
            user_id,
            generation,
            services,
            preview,
            config,
            draft: Mutex::new(String::new()),
        }
    }

    pub fn project_id(&self) -> String {
        self.project_id.lock().clone()
    }

    pub fn preview(&self) -> &VisiblePreview {
        &self.preview
    }

    pub fn services(&self) -> &HealServices {
        &self.services
    }

    /// Code streamed so far for the current request.
    pub fn draft(&self) -> String {
        self.draft.lock().clone()
    }

    pub fn is_healing(&self) -> bool {
        self.services.gate.is_healing()
    }

    fn orchestrator(&self) -> HealOrchestrator {
        self.orchestrator_for(self.project_id())
    }

    fn orchestrator_for(&self, project_id: String) -> HealOrchestrator {
        HealOrchestrator::new(
            self.services.clone(),
            HealTarget {
                project_id,
                user_id: self.user_id.clone(),
            },
            self.config.clone(),
        )
    }

    /// Generate, validate, heal, persist, then show.
    pub async fn generate(&self, prompt: &str) -> Result<GenerationResult, ApiError> {
        let epoch = self.services.gate.epoch();
        let project_id = self.project_id();
        let progress = &self.services.progress;
        self.draft.lock().clear();

        let current_code = self
            .services
            .store
            .load_source(&project_id, &self.config.entry_path)
            .await?;
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            project_id: project_id.clone(),
            user_id: self.user_id.clone(),
            current_code,
        };

        info!(project = %project_id, generator = self.generation.name(), "Generation started");
        let mut events = self.generation.generate(request).await?;
        let mut summary = StreamSummary::default();

        while let Some(event) = events.next().await {
            let event = event?;
            match &event {
                StreamEvent::CodeChunk { chunk } if self.services.gate.epoch() == epoch => {
                    self.draft.lock().push_str(chunk)
                }
                StreamEvent::CodeChunk { .. } => {}
                StreamEvent::Error { message } => {
                    let message = message
                        .clone()
                        .unwrap_or_else(|| "Generation service reported an error".to_string());
                    return Err(ApiError::GenerationFailed(message));
                }
                StreamEvent::Status { .. } | StreamEvent::Log { .. } | StreamEvent::Plan { .. } => {
                    if let Some(message) = event.message_text() {
                        progress.push(ProgressKind::Generation, message);
                    }
                }
                StreamEvent::Code { .. } => {}
            }
            summary.apply(&event);
        }

        let code = summary
            .code
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ApiError::GenerationFailed("Generation stream ended without code".to_string())
            })?;
        debug!(project = %project_id, bytes = code.len(), "Generation complete");

        let report = self
            .orchestrator_for(project_id.clone())
            .pinned_to(epoch)
            .run(&code)
            .await?;
        let preview = if report.is_success() && self.services.gate.epoch() == epoch {
            Some(self.preview.render(&report.artifact.code).await)
        } else {
            None
        };

        Ok(GenerationResult {
            report,
            summary: summary.summary,
            preview,
        })
    }

    /// Heal the failure currently shown in the preview, if any.
    pub async fn heal_preview(&self) -> Result<Option<HealReport>, ApiError> {
        self.preview.heal_and_render(&self.orchestrator()).await
    }

    /// Abandon everything in flight for the current project and start clean.
    pub fn switch_project(&self, project_id: impl Into<String>) {
        let project_id = project_id.into();
        let epoch = self.services.gate.advance();
        self.services.validator.cancel();
        self.preview.reset();
        self.services.progress.reset();
        self.draft.lock().clear();
        info!(from = %self.project_id(), to = %project_id, epoch, "Switched project");
        *self.project_id.lock() = project_id;
    }
}
