use serde::{Deserialize, Serialize};

pub const DEFAULT_REPO_NAME: &str = "default/repo";
pub const DEFAULT_COMMIT: &str = "HEAD";

/// One scanner result in the flat form the ingestion pipeline consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanResult {
    pub check_id: String,
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub message: String,
    pub severity: String,
    #[serde(default)]
    pub code_snippet: String,
    pub fingerprint: String,
}

/// One webhook delivery: many results attributed to one repo and commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestBatch {
    pub results: Vec<ScanResult>,
    #[serde(default = "default_repo_name")]
    pub repo_name: String,
    #[serde(default = "default_commit")]
    pub commit: String,
}

/// Semgrep's JSON output as posted by the CI webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct SemgrepWebhook {
    pub results: Vec<SemgrepResult>,
    #[serde(default)]
    pub repo_name: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SemgrepResult {
    pub check_id: String,
    pub path: String,
    pub start: SemgrepLocation,
    pub extra: SemgrepExtra,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SemgrepLocation {
    pub line: u32,
    #[serde(default)]
    pub col: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SemgrepExtra {
    pub fingerprint: String,
    #[serde(default)]
    pub lines: String,
    #[serde(default)]
    pub message: String,
    pub severity: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl From<SemgrepWebhook> for IngestBatch {
    fn from(hook: SemgrepWebhook) -> Self {
        let results = hook
            .results
            .into_iter()
            .map(|r| ScanResult {
                check_id: r.check_id,
                path: r.path,
                line: r.start.line,
                message: r.extra.message,
                severity: r.extra.severity,
                code_snippet: r.extra.lines,
                fingerprint: r.extra.fingerprint,
            })
            .collect();

        IngestBatch {
            results,
            repo_name: hook.repo_name.unwrap_or_else(default_repo_name),
            commit: hook.commit.unwrap_or_else(default_commit),
        }
    }
}

fn default_repo_name() -> String {
    DEFAULT_REPO_NAME.to_string()
}

fn default_commit() -> String {
    DEFAULT_COMMIT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_semgrep_output() {
        let raw = r#"{
            "results": [{
                "check_id": "python.lang.security.sql-injection",
                "path": "app/db.py",
                "start": {"line": 42, "col": 5},
                "extra": {
                    "fingerprint": "abc",
                    "lines": "cursor.execute(q % x)",
                    "message": "SQL built from user input",
                    "severity": "ERROR",
                    "metadata": {"cwe": ["CWE-89"]}
                }
            }],
            "repo_name": "acme/app",
            "commit": "abc123"
        }"#;

        let hook: SemgrepWebhook = serde_json::from_str(raw).unwrap();
        let batch = IngestBatch::from(hook);

        assert_eq!(batch.repo_name, "acme/app");
        assert_eq!(batch.commit, "abc123");
        assert_eq!(batch.results.len(), 1);
        let r = &batch.results[0];
        assert_eq!(r.line, 42);
        assert_eq!(r.code_snippet, "cursor.execute(q % x)");
        assert_eq!(r.fingerprint, "abc");
        assert_eq!(r.severity, "ERROR");
    }

    #[test]
    fn missing_context_falls_back_to_defaults() {
        let hook: SemgrepWebhook = serde_json::from_str(r#"{"results": []}"#).unwrap();
        let batch = IngestBatch::from(hook);
        assert_eq!(batch.repo_name, DEFAULT_REPO_NAME);
        assert_eq!(batch.commit, DEFAULT_COMMIT);

        let flat: IngestBatch = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert_eq!(flat.repo_name, DEFAULT_REPO_NAME);
        assert_eq!(flat.commit, DEFAULT_COMMIT);
    }
}
