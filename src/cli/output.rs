//! CLI output: result rendering and error mapping.

use crate::error::ApiError;
use crate::heal::{HealOutcome, HealReport};
use crate::sandbox::{PreparedSource, Resolution, SandboxFailure};
use crate::shadow::ValidationVerdict;
use crate::store::ProjectBuildStatus;
use serde_json::json;

/// What a command printed and whether it should exit successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: false,
        }
    }
}

/// Map domain errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::ConfigError(msg) => format!("Configuration error: {}", msg),
        other => other.to_string(),
    }
}

fn pretty(value: serde_json::Value) -> String {
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

pub(crate) fn format_check_text(result: &Result<PreparedSource, SandboxFailure>) -> String {
    match result {
        Ok(prepared) => {
            let how = match prepared.entry.resolution {
                Resolution::Conventional => "conventional",
                Resolution::Fallback => "fallback",
            };
            format!(
                "OK: entry component `{}` ({}), {} lines after sanitizing",
                prepared.entry.name,
                how,
                prepared.code.lines().count()
            )
        }
        Err(failure) => format!("FAILED [{}]: {}", failure.kind.as_str(), failure.message),
    }
}

pub(crate) fn format_check_json(result: &Result<PreparedSource, SandboxFailure>) -> String {
    match result {
        Ok(prepared) => pretty(json!({
            "ok": true,
            "entry": prepared.entry.name,
            "code": prepared.code,
        })),
        Err(failure) => pretty(json!({ "ok": false, "failure": failure })),
    }
}

pub(crate) fn format_verdict_text(verdict: &ValidationVerdict) -> String {
    if verdict.success {
        return "Shadow test passed".to_string();
    }
    let mut text = format!(
        "Shadow test failed [{}]: {}",
        verdict.kind.map(|k| k.as_str()).unwrap_or("unknown"),
        verdict.error_message()
    );
    if let Some(stack) = &verdict.stack {
        text.push('\n');
        text.push_str(stack);
    }
    text
}

pub(crate) fn format_verdict_json(verdict: &ValidationVerdict) -> String {
    pretty(json!(verdict))
}

pub(crate) fn format_report_text(report: &HealReport, progress: &[String]) -> String {
    let mut lines: Vec<String> = progress.to_vec();
    let summary = match &report.outcome {
        HealOutcome::Succeeded { .. } => format!(
            "Succeeded after {} heal attempt(s) (fingerprint {})",
            report.heal_attempts,
            report.artifact.short_fingerprint()
        ),
        HealOutcome::Failed { reason, .. } => format!("Failed: {}", reason.user_message()),
        HealOutcome::Cancelled => "Cancelled".to_string(),
    };
    lines.push(summary);
    lines.join("\n")
}

pub(crate) fn format_report_json(report: &HealReport, progress: &[String]) -> String {
    let (outcome, status, reason) = match &report.outcome {
        HealOutcome::Succeeded { status } => ("succeeded", Some(status), None),
        HealOutcome::Failed { reason, status } => ("failed", Some(status), Some(reason)),
        HealOutcome::Cancelled => ("cancelled", None, None),
    };
    pretty(json!({
        "outcome": outcome,
        "reason": reason,
        "status": status,
        "heal_attempts": report.heal_attempts,
        "validations": report.validations,
        "fingerprint": report.artifact.fingerprint,
        "last_verdict": report.last_verdict,
        "trace": report.trace,
        "progress": progress,
    }))
}

pub(crate) fn format_status_text(project: &str, status: Option<&ProjectBuildStatus>, has_source: bool) -> String {
    match status {
        None => format!("{}: no build recorded", project),
        Some(status) => {
            let health = if status.is_broken { "broken" } else { "healthy" };
            let last = status
                .last_success_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            format!(
                "{}: {}\nLast success: {}\nStored source: {}",
                project,
                health,
                last,
                if has_source { "yes" } else { "no" }
            )
        }
    }
}

pub(crate) fn format_status_json(project: &str, status: Option<&ProjectBuildStatus>, has_source: bool) -> String {
    pretty(json!({
        "project": project,
        "status": status,
        "has_source": has_source,
    }))
}
