//! Plain-language explanations of findings.
//!
//! The explainer is an external, possibly slow and unreliable collaborator.
//! Callers go through [`crate::engine::query::explain_risk`], which turns any
//! provider failure into a readable message instead of an error.

mod llm;
mod prompt;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::{ExplainConfig, Provider};
use crate::models::FindingRecord;

pub use llm::LlmExplainer;
pub use prompt::build_prompt;

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("missing API key: {0} not set")]
    MissingApiKey(&'static str),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("failed to parse API response: {0}")]
    ParseError(String),

    #[error("{0}")]
    Other(String),
}

pub trait Explainer: Send + Sync {
    /// Provider name, as used in degraded messages.
    fn provider(&self) -> &str;

    /// Blocking; run it off the async executor.
    fn explain(&self, finding: &FindingRecord) -> Result<String, ExplainError>;
}

/// Offline explainer that never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubExplainer;

impl Explainer for StubExplainer {
    fn provider(&self) -> &str {
        Provider::Stub.as_str()
    }

    fn explain(&self, finding: &FindingRecord) -> Result<String, ExplainError> {
        Ok(format!(
            "This is a stub explanation for a finding of type '{}' in file '{}'.",
            finding.check_id, finding.path
        ))
    }
}

/// Text returned in place of an explanation when the provider fails.
pub fn degraded_message(provider: &str, error: &dyn std::fmt::Display) -> String {
    format!("Failed to get explanation from LLM provider '{provider}'. Error: {error}")
}

/// Build the configured explainer.
///
/// A provider that cannot be constructed (e.g. no API key) still yields an
/// explainer; it reports the setup problem on each call.
pub fn from_config(config: &ExplainConfig) -> Arc<dyn Explainer> {
    match config.provider {
        Provider::Stub => Arc::new(StubExplainer),
        Provider::Ollama | Provider::OpenAi => match LlmExplainer::from_env(config) {
            Ok(explainer) => Arc::new(explainer),
            Err(e) => {
                tracing::warn!(provider = config.provider.as_str(), "explainer unavailable: {e}");
                Arc::new(Unavailable {
                    provider: config.provider,
                    reason: e.to_string(),
                })
            }
        },
    }
}

struct Unavailable {
    provider: Provider,
    reason: String,
}

impl Explainer for Unavailable {
    fn provider(&self) -> &str {
        self.provider.as_str()
    }

    fn explain(&self, _finding: &FindingRecord) -> Result<String, ExplainError> {
        Err(ExplainError::Other(self.reason.clone()))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelInfo {
    pub provider: String,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    /// Ollama only: `/api/show` output, or `{"error": ...}`.
    pub details: Option<serde_json::Value>,
}

/// Describe the configured provider. Blocking for Ollama, which is asked
/// for the local model's details.
pub fn model_info(config: &ExplainConfig) -> ModelInfo {
    let details = match config.provider {
        Provider::Ollama => Some(llm::ollama_show(config)),
        Provider::Stub | Provider::OpenAi => None,
    };

    ModelInfo {
        provider: config.provider.as_str().to_string(),
        model: config.model().map(str::to_string),
        endpoint: config.endpoint().map(str::to_string),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_message_names_provider_and_cause() {
        let msg = degraded_message("ollama", &ExplainError::RequestFailed("connection refused".into()));
        assert_eq!(
            msg,
            "Failed to get explanation from LLM provider 'ollama'. Error: request failed: connection refused"
        );
    }

    #[test]
    fn stub_model_info_has_no_model() {
        let info = model_info(&ExplainConfig::default());
        assert_eq!(info.provider, "stub");
        assert_eq!(info.model, None);
        assert_eq!(info.endpoint, None);
        assert_eq!(info.details, None);
    }

    #[test]
    fn ollama_model_info_reports_details_even_when_down() {
        let config = ExplainConfig {
            provider: Provider::Ollama,
            endpoint: Some("http://127.0.0.1:1/v1/chat/completions".into()),
            timeout_secs: 2,
            ..ExplainConfig::default()
        };

        let info = model_info(&config);
        assert_eq!(info.provider, "ollama");
        assert_eq!(info.model.as_deref(), Some("llama3"));
        let details = info.details.unwrap();
        assert!(details.get("error").is_some());
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = ExplainConfig {
            provider: Provider::Ollama,
            ..ExplainConfig::default()
        };
        let explainer = from_config(&config);
        assert_eq!(explainer.provider(), "ollama");
    }
}
