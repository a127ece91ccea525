use thiserror::Error;

use super::payload::ScanResult;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("line must be 1 or greater, got {0}")]
    InvalidLine(u32),

    #[error("path contains a NUL byte: {0:?}")]
    InvalidPath(String),
}

/// The four identity keys a finding is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphKeys {
    pub repo_name: String,
    pub commit_hash: String,
    pub file_path: String,
    pub fingerprint: String,
}

impl GraphKeys {
    /// Record key of the File node.
    /// Files are scoped per repository, so the key covers both parts.
    pub fn file_key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.repo_name.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.file_path.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Descriptive attributes. Only the first write for a fingerprint sticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingAttributes {
    pub check_id: String,
    pub line: u32,
    pub message: String,
    pub severity: String,
    pub code_snippet: String,
}

/// A validated finding, ready for the graph store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalFinding {
    pub keys: GraphKeys,
    pub attributes: FindingAttributes,
}

impl CanonicalFinding {
    /// Map one scan result plus its batch context onto keys and attributes.
    pub fn from_scan(result: &ScanResult, repo_name: &str, commit: &str) -> Result<Self, ValidationError> {
        let fingerprint = opaque(&result.fingerprint, "fingerprint")?;
        let check_id = required(&result.check_id, "check_id")?;
        let repo_name = required(repo_name, "repo name")?;
        let commit_hash = required(commit, "commit")?;
        let file_path = normalize_path(&result.path)?;

        if result.line == 0 {
            return Err(ValidationError::InvalidLine(result.line));
        }

        Ok(Self {
            keys: GraphKeys {
                repo_name,
                commit_hash,
                file_path,
                fingerprint,
            },
            attributes: FindingAttributes {
                check_id,
                line: result.line,
                message: result.message.clone(),
                severity: result.severity.trim().to_string(),
                code_snippet: result.code_snippet.clone(),
            },
        })
    }
}

/// Non-blank, kept byte for byte.
fn opaque(value: &str, field: &'static str) -> Result<String, ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Missing(field));
    }
    Ok(value.to_string())
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Missing(field));
    }
    Ok(trimmed.to_string())
}

fn normalize_path(path: &str) -> Result<String, ValidationError> {
    if path.contains('\0') {
        return Err(ValidationError::InvalidPath(path.to_string()));
    }
    let mut trimmed = path.trim();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    if trimmed.is_empty() {
        return Err(ValidationError::Missing("path"));
    }
    Ok(trimmed.to_string())
}
