//! OpenAI-compatible chat completions over sync HTTP (ureq).
//! Ollama serves the same API under `/v1/chat/completions`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::prompt::{build_prompt, SYSTEM_PROMPT};
use super::{ExplainError, Explainer};
use crate::config::{ExplainConfig, Provider};
use crate::models::FindingRecord;

const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";

pub struct LlmExplainer {
    provider: Provider,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    max_tokens: u32,
    agent: ureq::Agent,
}

impl std::fmt::Debug for LlmExplainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmExplainer")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl LlmExplainer {
    pub fn from_env(config: &ExplainConfig) -> Result<Self, ExplainError> {
        let api_key = match config.provider {
            Provider::OpenAi => Some(
                std::env::var(OPENAI_KEY_VAR).map_err(|_| ExplainError::MissingApiKey(OPENAI_KEY_VAR))?,
            ),
            _ => None,
        };
        Self::new(config, api_key)
    }

    pub fn new(config: &ExplainConfig, api_key: Option<String>) -> Result<Self, ExplainError> {
        let model = config
            .model()
            .ok_or_else(|| ExplainError::Other(format!("no model configured for {}", config.provider.as_str())))?;
        let endpoint = config
            .endpoint()
            .ok_or_else(|| ExplainError::Other(format!("no endpoint configured for {}", config.provider.as_str())))?;

        let agent = ureq::config::Config::builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .new_agent();

        Ok(Self {
            provider: config.provider,
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            api_key,
            max_tokens: config.max_tokens,
            agent,
        })
    }
}

impl Explainer for LlmExplainer {
    fn provider(&self) -> &str {
        self.provider.as_str()
    }

    fn explain(&self, finding: &FindingRecord) -> Result<String, ExplainError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(finding),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.2,
        };

        let mut req = self
            .agent
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", &format!("Bearer {key}"));
        }

        let response = req
            .send_json(&body)
            .map_err(|e| ExplainError::RequestFailed(e.to_string()))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let message = response.into_body().read_to_string().unwrap_or_default();
            return Err(ExplainError::ApiError { status, message });
        }

        let parsed: ChatResponse = response
            .into_body()
            .read_json()
            .map_err(|e| ExplainError::ParseError(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ExplainError::ParseError("no response choices".to_string()))
    }
}

/// Local model details from Ollama's `/api/show`.
///
/// Never fails: a missing model or an unreachable server comes back as an
/// `{"error": ...}` object.
pub fn ollama_show(config: &ExplainConfig) -> serde_json::Value {
    let model = config.model().unwrap_or_default();
    let Some(url) = config.endpoint().map(ollama_show_url) else {
        return serde_json::json!({ "error": "no Ollama endpoint configured" });
    };

    let agent = ureq::config::Config::builder()
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
        .build()
        .new_agent();

    let response = match agent.post(&url).send_json(&ShowRequest { model }) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(url = %url, "ollama show failed: {e}");
            return serde_json::json!({ "error": format!("Failed to reach Ollama at {url}: {e}") });
        }
    };

    let status = response.status().as_u16();
    if status == 404 {
        return serde_json::json!({ "error": format!("Model '{model}' not found locally.") });
    }
    if status >= 400 {
        let message = response.into_body().read_to_string().unwrap_or_default();
        return serde_json::json!({ "error": format!("Ollama returned {status}: {message}") });
    }

    response
        .into_body()
        .read_json()
        .unwrap_or_else(|e| serde_json::json!({ "error": format!("failed to parse Ollama response: {e}") }))
}

/// `http://host:11434/v1/chat/completions` -> `http://host:11434/api/show`
fn ollama_show_url(endpoint: &str) -> String {
    let host = endpoint
        .trim_end_matches('/')
        .trim_end_matches("/v1/chat/completions")
        .trim_end_matches('/');
    format!("{host}/api/show")
}

#[derive(Serialize)]
struct ShowRequest<'a> {
    model: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_provider_defaults() {
        let config = ExplainConfig {
            provider: Provider::OpenAi,
            ..ExplainConfig::default()
        };
        let explainer = LlmExplainer::new(&config, Some("sk-test".into())).unwrap();
        assert_eq!(explainer.model, "gpt-4o-mini");
        assert_eq!(explainer.endpoint, "https://api.openai.com/v1/chat/completions");
        assert_eq!(explainer.provider(), "openai");
    }

    #[test]
    fn show_url_is_derived_from_chat_endpoint() {
        assert_eq!(
            ollama_show_url("http://gpu-box:11434/v1/chat/completions"),
            "http://gpu-box:11434/api/show"
        );
        assert_eq!(ollama_show_url("http://localhost:11434/"), "http://localhost:11434/api/show");
    }

    #[test]
    fn unreachable_ollama_details_are_an_error_object() {
        let config = ExplainConfig {
            provider: Provider::Ollama,
            model: Some("llama3".into()),
            endpoint: Some("http://127.0.0.1:1/v1/chat/completions".into()),
            timeout_secs: 2,
            ..ExplainConfig::default()
        };

        let details = ollama_show(&config);
        let error = details["error"].as_str().unwrap();
        assert!(error.contains("127.0.0.1:1/api/show"));
    }

    #[test]
    fn unreachable_endpoint_is_a_request_error() {
        let config = ExplainConfig {
            provider: Provider::Ollama,
            endpoint: Some("http://127.0.0.1:1/v1/chat/completions".into()),
            timeout_secs: 2,
            ..ExplainConfig::default()
        };
        let explainer = LlmExplainer::new(&config, None).unwrap();
        let now = chrono::Utc::now();
        let finding = FindingRecord {
            fingerprint: "f1".into(),
            check_id: "rule".into(),
            path: "a.py".into(),
            line: 1,
            message: String::new(),
            severity: "low".into(),
            code_snippet: String::new(),
            status: "open".into(),
            created_at: now,
            updated_at: now,
            repo_name: None,
            commit: None,
        };

        let err = explainer.explain(&finding).unwrap_err();
        assert!(matches!(err, ExplainError::RequestFailed(_)));
    }
}
