use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("unknown {what}: {value}")]
    UnknownValue { what: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub explain: ExplainConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Memory,
    #[default]
    #[serde(rename = "surrealkv")]
    SurrealKv,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine: Engine,
    /// Defaults to `<data_dir>/aspm/aspm.db`.
    pub path: Option<PathBuf>,
    pub namespace: String,
    pub database: String,
    /// Attempts per transaction when the store reports a retryable conflict.
    pub max_retries: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            path: None,
            namespace: "aspm".into(),
            database: "aspm".into(),
            max_retries: 16,
        }
    }
}

impl DatabaseConfig {
    /// In-memory store, mostly for tests.
    pub fn memory() -> Self {
        Self {
            engine: Engine::Memory,
            ..Self::default()
        }
    }

    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_db_path)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Stub,
    Ollama,
    OpenAi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Stub => "stub",
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
        }
    }

    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            Provider::Stub => None,
            Provider::Ollama => Some("llama3"),
            Provider::OpenAi => Some("gpt-4o-mini"),
        }
    }

    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            Provider::Stub => None,
            Provider::Ollama => Some("http://localhost:11434/v1/chat/completions"),
            Provider::OpenAi => Some("https://api.openai.com/v1/chat/completions"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Provider::Stub),
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAi),
            other => Err(ConfigError::UnknownValue {
                what: "LLM provider",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExplainConfig {
    pub provider: Provider,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            endpoint: None,
            timeout_secs: 120,
            max_tokens: 1024,
        }
    }
}

impl ExplainConfig {
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().or_else(|| self.provider.default_model())
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().or_else(|| self.provider.default_endpoint())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Stop a batch at its first failing item instead of continuing.
    pub fail_fast: bool,
    /// Batches the background worker ingests at once.
    pub concurrency: usize,
    /// Queued batches before `submit` waits.
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fail_fast: false,
            concurrency: 4,
            queue_capacity: 64,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location if it exists.
    /// A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(path) = var("ASPM_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(provider) = var("LLM_PROVIDER") {
            self.explain.provider = provider.parse()?;
        }
        let model_var = match self.explain.provider {
            Provider::Stub => None,
            Provider::Ollama => Some("OLLAMA_MODEL"),
            Provider::OpenAi => Some("OPENAI_MODEL"),
        };
        if let Some(model) = model_var.and_then(&var) {
            self.explain.model = Some(model);
        }
        if self.explain.provider == Provider::Ollama {
            if let Some(host) = var("OLLAMA_HOST") {
                let host = host.trim_end_matches('/');
                self.explain.endpoint = Some(format!("{host}/v1/chat/completions"));
            }
        }
        Ok(())
    }
}

/// `<config_dir>/aspm/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("aspm").join("config.toml"))
}

/// `<data_dir>/aspm/aspm.db`, falling back to the working directory.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aspm")
        .join("aspm.db")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn parses_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [database]
            engine = "memory"

            [explain]
            provider = "ollama"
            model = "codellama"
            "#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.database.engine, Engine::Memory);
        assert_eq!(config.database.namespace, "aspm");
        assert_eq!(config.explain.provider, Provider::Ollama);
        assert_eq!(config.explain.model(), Some("codellama"));
        assert!(!config.ingest.fail_fast);
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[database\nengine = 1").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_provider_and_model() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LLM_PROVIDER", "OpenAI"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("OLLAMA_MODEL", "ignored"),
            ("ASPM_DB_PATH", "/tmp/aspm-test.db"),
        ]);
        let mut config = Config::default();
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.explain.provider, Provider::OpenAi);
        assert_eq!(config.explain.model(), Some("gpt-4o"));
        assert_eq!(
            config.database.resolved_path(),
            PathBuf::from("/tmp/aspm-test.db")
        );
    }

    #[test]
    fn ollama_host_rewrites_endpoint() {
        let vars: HashMap<&str, &str> =
            HashMap::from([("LLM_PROVIDER", "ollama"), ("OLLAMA_HOST", "http://gpu-box:11434/")]);
        let mut config = Config::default();
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            config.explain.endpoint(),
            Some("http://gpu-box:11434/v1/chat/completions")
        );
        assert_eq!(config.explain.model(), Some("llama3"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_vars(|k| (k == "LLM_PROVIDER").then(|| "bard".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownValue { .. }));
    }
}
