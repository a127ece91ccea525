use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use surrealdb::engine::local::{Db, Mem, SurrealKv};
use surrealdb::Surreal;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, Engine};
use crate::models::{compare_for_listing, CanonicalFinding, FindingRecord, GraphStats};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at {path}: {message}")]
    Open { path: String, message: String },

    #[error("database error: {0}")]
    DbError(String),

    #[error("transaction conflict after {attempts} attempts: {message}")]
    Conflict { attempts: u32, message: String },

    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },
}

/// Wrapper around the SurrealDB handle.
/// Clone is cheap (Arc internally).
#[derive(Clone)]
pub struct DbHandle {
    pub db: Surreal<Db>,
    max_retries: u32,
}

impl std::fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbHandle")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Open the store and select ns/db. Call `ensure_constraints` before use.
pub async fn open(config: &DatabaseConfig) -> Result<DbHandle, StoreError> {
    let db = match config.engine {
        Engine::Memory => Surreal::new::<Mem>(()).await.map_err(|e| StoreError::Open {
            path: "memory".into(),
            message: e.to_string(),
        })?,
        Engine::SurrealKv => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Open {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            }
            Surreal::new::<SurrealKv>(path.clone())
                .await
                .map_err(|e| StoreError::Open {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?
        }
    };

    db.use_ns(config.namespace.clone())
        .use_db(config.database.clone())
        .await
        .map_err(|e| StoreError::DbError(e.to_string()))?;

    info!(engine = ?config.engine, ns = %config.namespace, db = %config.database, "store opened");

    Ok(DbHandle {
        db,
        max_retries: config.max_retries.max(1),
    })
}

/// Shorthand for a fresh, schema-initialized in-memory store.
pub async fn open_in_memory() -> Result<DbHandle, StoreError> {
    let handle = open(&DatabaseConfig::memory()).await?;
    handle.ensure_constraints().await?;
    Ok(handle)
}

impl DbHandle {
    /// Define tables, fields and unique indexes. Safe to run on every start.
    pub async fn ensure_constraints(&self) -> Result<(), StoreError> {
        self.db
            .query(SCHEMA_V1)
            .await
            .map_err(|e| StoreError::DbError(e.to_string()))?
            .check()
            .map_err(|e| StoreError::DbError(e.to_string()))?;
        debug!("schema constraints ensured");
        Ok(())
    }

    /// Get-or-create the repo → commit → file → finding path in one transaction.
    ///
    /// Descriptive fields are written only when the finding is created; an
    /// existing finding just gets a newer `updated_at`.
    pub async fn upsert_finding(&self, finding: &CanonicalFinding) -> Result<(), StoreError> {
        self.with_retry("upsert_finding", || self.upsert_once(finding)).await
    }

    async fn upsert_once(&self, finding: &CanonicalFinding) -> Result<(), StoreError> {
        let keys = &finding.keys;
        let attrs = &finding.attributes;

        let mut response = self
            .db
            .query(UPSERT_FINDING)
            .bind(("repo_name", keys.repo_name.clone()))
            .bind(("commit_hash", keys.commit_hash.clone()))
            .bind(("file_key", keys.file_key()))
            .bind(("file_path", keys.file_path.clone()))
            .bind(("fingerprint", keys.fingerprint.clone()))
            .bind(("check_id", attrs.check_id.clone()))
            .bind(("line", i64::from(attrs.line)))
            .bind(("message", attrs.message.clone()))
            .bind(("severity", attrs.severity.clone()))
            .bind(("code_snippet", attrs.code_snippet.clone()))
            .await
            .map_err(|e| StoreError::DbError(e.to_string()))?;

        let errors = response.take_errors();
        if errors.is_empty() {
            return Ok(());
        }
        let errors = errors.into_iter().map(|(i, e)| (i, e.to_string())).collect();
        Err(StoreError::DbError(transaction_cause(errors)))
    }

    /// Every finding joined with its repo and commit, highest severity first.
    pub async fn list_findings(&self) -> Result<Vec<FindingRecord>, StoreError> {
        let mut records = self.fetch_joined(SELECT_ALL, None).await?;
        records.sort_by(compare_for_listing);
        Ok(records)
    }

    pub async fn get_finding(&self, fingerprint: &str) -> Result<Option<FindingRecord>, StoreError> {
        let records = self.fetch_joined(SELECT_ONE, Some(fingerprint)).await?;
        Ok(records.into_iter().next())
    }

    /// Run one of the four-statement join queries and assemble the records.
    async fn fetch_joined(&self, query: &'static str, fingerprint: Option<&str>) -> Result<Vec<FindingRecord>, StoreError> {
        let mut request = self.db.query(query);
        if let Some(fp) = fingerprint {
            request = request.bind(("fingerprint", fp.to_string()));
        }
        let mut response = request.await.map_err(|e| StoreError::DbError(e.to_string()))?;

        let findings: Vec<FindingRow> = decode_rows(
            response.take(0).map_err(|e| StoreError::DbError(e.to_string()))?,
            "finding",
        )?;
        let contains: Vec<ContainsRow> = decode_rows(
            response.take(1).map_err(|e| StoreError::DbError(e.to_string()))?,
            "contains_finding",
        )?;
        let modified: Vec<ModifiedRow> = decode_rows(
            response.take(2).map_err(|e| StoreError::DbError(e.to_string()))?,
            "modified_file",
        )?;
        let has_commit: Vec<HasCommitRow> = decode_rows(
            response.take(3).map_err(|e| StoreError::DbError(e.to_string()))?,
            "has_commit",
        )?;

        Ok(assemble(findings, &contains, &modified, &has_commit))
    }

    /// Set `status` and refresh `updated_at`. `None` if the fingerprint is unknown.
    pub async fn update_status(&self, fingerprint: &str, status: &str) -> Result<Option<FindingRecord>, StoreError> {
        let updated = self
            .with_retry("update_status", || self.update_status_once(fingerprint, status))
            .await?;

        if !updated {
            return Ok(None);
        }
        self.get_finding(fingerprint).await
    }

    async fn update_status_once(&self, fingerprint: &str, status: &str) -> Result<bool, StoreError> {
        let mut response = self
            .db
            .query(UPDATE_STATUS)
            .bind(("fingerprint", fingerprint.to_string()))
            .bind(("status", status.to_string()))
            .await
            .map_err(|e| StoreError::DbError(e.to_string()))?;

        let rows: Vec<serde_json::Value> = response
            .take(0)
            .map_err(|e| StoreError::DbError(e.to_string()))?;

        Ok(!rows.is_empty())
    }

    pub async fn graph_stats(&self) -> Result<GraphStats, StoreError> {
        let mut response = self
            .db
            .query(COUNT_ALL)
            .await
            .map_err(|e| StoreError::DbError(e.to_string()))?;

        let mut counts = [0u64; 7];
        for (i, slot) in counts.iter_mut().enumerate() {
            let row: Option<serde_json::Value> = response
                .take(i)
                .map_err(|e| StoreError::DbError(e.to_string()))?;
            *slot = row.and_then(|r| r["n"].as_u64()).unwrap_or(0);
        }

        Ok(GraphStats {
            repos: counts[0],
            commits: counts[1],
            files: counts[2],
            findings: counts[3],
            has_commit: counts[4],
            modified_file: counts[5],
            contains_finding: counts[6],
        })
    }

    /// Drop the handle. The embedded engine flushes when the last clone goes.
    pub fn close(self) {
        info!("store closed");
    }

    /// Re-run `op` while the store reports a retryable transaction conflict.
    async fn with_retry<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Err(StoreError::DbError(message)) if is_retryable(&message) => {
                    if attempt >= self.max_retries {
                        return Err(StoreError::Conflict {
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = backoff(attempt);
                    warn!(op = what, attempt, delay_ms = delay.as_millis() as u64, "transaction conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// Statements that were cancelled because the transaction failed elsewhere.
const FAILED_TRANSACTION: &str = "failed transaction";

/// Pick the statement error that explains a failed transaction.
///
/// Every statement of a failed `BEGIN ... COMMIT` block reports an error, most
/// of them the generic cancellation. The first specific one is the cause; if
/// there is none the generic text is all we get.
fn transaction_cause(mut errors: Vec<(usize, String)>) -> String {
    errors.sort_by_key(|(index, _)| *index);
    errors
        .iter()
        .find(|(_, message)| !message.contains(FAILED_TRANSACTION))
        .or_else(|| errors.first())
        .map(|(_, message)| message.clone())
        .unwrap_or_default()
}

fn is_retryable(message: &str) -> bool {
    message.contains("can be retried")
        || message.contains("read or write conflict")
        || message.contains(FAILED_TRANSACTION)
}

/// Exponential backoff with full jitter, capped at `MAX_BACKOFF_MS`.
fn backoff(attempt: u32) -> Duration {
    const BASE_MS: u64 = 2;
    const MAX_BACKOFF_MS: u64 = 250;
    let ceiling = (BASE_MS << attempt.min(16)).min(MAX_BACKOFF_MS);
    Duration::from_millis(rand::rng().random_range(1..=ceiling))
}

// ─── Join assembly ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FindingRow {
    fingerprint: String,
    check_id: String,
    path: String,
    line: u32,
    message: String,
    severity: String,
    code_snippet: String,
    status: String,
    created_ns: i64,
    updated_ns: i64,
}

/// file -[contains_finding]-> finding
#[derive(Debug, Deserialize)]
struct ContainsRow {
    fingerprint: String,
    repo_name: String,
    path: String,
    linked_ns: i64,
}

/// commit -[modified_file]-> file
#[derive(Debug, Deserialize)]
struct ModifiedRow {
    commit_hash: String,
    repo_name: String,
    path: String,
    linked_ns: i64,
}

/// repo -[has_commit]-> commit
#[derive(Debug, Deserialize)]
struct HasCommitRow {
    repo_name: String,
    commit_hash: String,
    linked_ns: i64,
}

fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<serde_json::Value>, what: &'static str) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|e| StoreError::Decode {
                what,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Pick the repo and commit for each finding.
///
/// With several paths to a finding, the most recently created edge wins at
/// each hop: file → finding, then commit → file, then repo → commit.
fn assemble(
    findings: Vec<FindingRow>,
    contains: &[ContainsRow],
    modified: &[ModifiedRow],
    has_commit: &[HasCommitRow],
) -> Vec<FindingRecord> {
    let mut file_of: HashMap<&str, &ContainsRow> = HashMap::new();
    for row in contains {
        let slot = file_of.entry(row.fingerprint.as_str()).or_insert(row);
        if (row.linked_ns, &row.path) > (slot.linked_ns, &slot.path) {
            *slot = row;
        }
    }

    let mut commit_of: HashMap<(&str, &str), &ModifiedRow> = HashMap::new();
    for row in modified {
        let slot = commit_of
            .entry((row.repo_name.as_str(), row.path.as_str()))
            .or_insert(row);
        if (row.linked_ns, &row.commit_hash) > (slot.linked_ns, &slot.commit_hash) {
            *slot = row;
        }
    }

    let pairs: HashSet<(&str, &str)> = has_commit
        .iter()
        .map(|r| (r.repo_name.as_str(), r.commit_hash.as_str()))
        .collect();
    let mut repo_of: HashMap<&str, &HasCommitRow> = HashMap::new();
    for row in has_commit {
        let slot = repo_of.entry(row.commit_hash.as_str()).or_insert(row);
        if (row.linked_ns, &row.repo_name) > (slot.linked_ns, &slot.repo_name) {
            *slot = row;
        }
    }

    findings
        .into_iter()
        .map(|f| {
            let file = file_of.get(f.fingerprint.as_str()).copied();
            let commit = file
                .and_then(|c| commit_of.get(&(c.repo_name.as_str(), c.path.as_str())))
                .map(|m| m.commit_hash.clone());
            let repo_name = match (file, commit.as_deref()) {
                (Some(c), Some(hash)) if pairs.contains(&(c.repo_name.as_str(), hash)) => Some(c.repo_name.clone()),
                (_, Some(hash)) => repo_of.get(hash).map(|r| r.repo_name.clone()),
                (_, None) => None,
            };

            FindingRecord {
                fingerprint: f.fingerprint,
                check_id: f.check_id,
                path: f.path,
                line: f.line,
                message: f.message,
                severity: f.severity,
                code_snippet: f.code_snippet,
                status: f.status,
                created_at: DateTime::<Utc>::from_timestamp_nanos(f.created_ns),
                updated_at: DateTime::<Utc>::from_timestamp_nanos(f.updated_ns),
                repo_name,
                commit,
            }
        })
        .collect()
}

// ─── Queries ──────────────────────────────────────────────────

const UPSERT_FINDING: &str = "
    BEGIN TRANSACTION;

    LET $now = time::now();
    LET $repo = type::record('repo', $repo_name);
    LET $commit_node = type::record('git_commit', $commit_hash);
    LET $file = type::record('source_file', $file_key);
    LET $finding = type::record('finding', $fingerprint);

    UPSERT $repo SET name = $repo_name;
    UPSERT $commit_node SET hash = $commit_hash;
    UPSERT $file SET repo_name = $repo_name, path = $file_path;

    UPSERT $finding SET
        fingerprint = $fingerprint,
        check_id = check_id ?? $check_id,
        path = path ?? $file_path,
        line = line ?? $line,
        message = message ?? $message,
        severity = severity ?? $severity,
        code_snippet = code_snippet ?? $code_snippet,
        status = status ?? 'open',
        created_at = created_at ?? $now,
        updated_at = IF updated_at != NONE AND updated_at >= $now THEN updated_at + 1ns ELSE $now END;

    IF array::len((SELECT VALUE id FROM has_commit WHERE in = $repo AND out = $commit_node)) == 0 {
        RELATE $repo->has_commit->$commit_node SET linked_at = $now;
    };
    IF array::len((SELECT VALUE id FROM modified_file WHERE in = $commit_node AND out = $file)) == 0 {
        RELATE $commit_node->modified_file->$file SET linked_at = $now;
    };
    IF array::len((SELECT VALUE id FROM contains_finding WHERE in = $file AND out = $finding)) == 0 {
        RELATE $file->contains_finding->$finding SET linked_at = $now;
    };

    COMMIT TRANSACTION;
";

const UPDATE_STATUS: &str = "
    UPDATE type::record('finding', $fingerprint) SET
        status = $status,
        updated_at = IF updated_at >= time::now() THEN updated_at + 1ns ELSE time::now() END
    RETURN fingerprint;
";

const SELECT_ALL: &str = "
    SELECT fingerprint, check_id, path, line, message, severity, code_snippet, status,
        time::nano(created_at) AS created_ns, time::nano(updated_at) AS updated_ns
    FROM finding;
    SELECT out.fingerprint AS fingerprint, in.repo_name AS repo_name, in.path AS path,
        time::nano(linked_at) AS linked_ns
    FROM contains_finding;
    SELECT in.hash AS commit_hash, out.repo_name AS repo_name, out.path AS path,
        time::nano(linked_at) AS linked_ns
    FROM modified_file;
    SELECT in.name AS repo_name, out.hash AS commit_hash, time::nano(linked_at) AS linked_ns
    FROM has_commit;
";

const SELECT_ONE: &str = "
    SELECT fingerprint, check_id, path, line, message, severity, code_snippet, status,
        time::nano(created_at) AS created_ns, time::nano(updated_at) AS updated_ns
    FROM finding WHERE fingerprint = $fingerprint;
    SELECT out.fingerprint AS fingerprint, in.repo_name AS repo_name, in.path AS path,
        time::nano(linked_at) AS linked_ns
    FROM contains_finding WHERE out = type::record('finding', $fingerprint);
    SELECT in.hash AS commit_hash, out.repo_name AS repo_name, out.path AS path,
        time::nano(linked_at) AS linked_ns
    FROM modified_file
    WHERE out IN (SELECT VALUE in FROM contains_finding WHERE out = type::record('finding', $fingerprint));
    SELECT in.name AS repo_name, out.hash AS commit_hash, time::nano(linked_at) AS linked_ns
    FROM has_commit
    WHERE out IN (
        SELECT VALUE in FROM modified_file
        WHERE out IN (SELECT VALUE in FROM contains_finding WHERE out = type::record('finding', $fingerprint))
    );
";

const COUNT_ALL: &str = "
    SELECT count() AS n FROM repo GROUP ALL;
    SELECT count() AS n FROM git_commit GROUP ALL;
    SELECT count() AS n FROM source_file GROUP ALL;
    SELECT count() AS n FROM finding GROUP ALL;
    SELECT count() AS n FROM has_commit GROUP ALL;
    SELECT count() AS n FROM modified_file GROUP ALL;
    SELECT count() AS n FROM contains_finding GROUP ALL;
";

const SCHEMA_V1: &str = "
    DEFINE TABLE IF NOT EXISTS repo SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS name ON repo TYPE string;
    DEFINE INDEX IF NOT EXISTS idx_repo_name ON repo FIELDS name UNIQUE;

    DEFINE TABLE IF NOT EXISTS git_commit SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS hash ON git_commit TYPE string;
    DEFINE INDEX IF NOT EXISTS idx_commit_hash ON git_commit FIELDS hash UNIQUE;

    DEFINE TABLE IF NOT EXISTS source_file SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS repo_name ON source_file TYPE string;
    DEFINE FIELD IF NOT EXISTS path ON source_file TYPE string;
    DEFINE INDEX IF NOT EXISTS idx_file_repo_path ON source_file FIELDS repo_name, path UNIQUE;

    DEFINE TABLE IF NOT EXISTS finding SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS fingerprint ON finding TYPE string;
    DEFINE FIELD IF NOT EXISTS check_id ON finding TYPE string;
    DEFINE FIELD IF NOT EXISTS path ON finding TYPE string;
    DEFINE FIELD IF NOT EXISTS line ON finding TYPE int;
    DEFINE FIELD IF NOT EXISTS message ON finding TYPE string;
    DEFINE FIELD IF NOT EXISTS severity ON finding TYPE string;
    DEFINE FIELD IF NOT EXISTS code_snippet ON finding TYPE string;
    DEFINE FIELD IF NOT EXISTS status ON finding TYPE string DEFAULT 'open';
    DEFINE FIELD IF NOT EXISTS created_at ON finding TYPE datetime;
    DEFINE FIELD IF NOT EXISTS updated_at ON finding TYPE datetime;
    DEFINE INDEX IF NOT EXISTS idx_finding_fingerprint ON finding FIELDS fingerprint UNIQUE;

    DEFINE TABLE IF NOT EXISTS has_commit TYPE RELATION IN repo OUT git_commit SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS linked_at ON has_commit TYPE datetime;
    DEFINE INDEX IF NOT EXISTS idx_has_commit_pair ON has_commit FIELDS in, out UNIQUE;

    DEFINE TABLE IF NOT EXISTS modified_file TYPE RELATION IN git_commit OUT source_file SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS linked_at ON modified_file TYPE datetime;
    DEFINE INDEX IF NOT EXISTS idx_modified_file_pair ON modified_file FIELDS in, out UNIQUE;

    DEFINE TABLE IF NOT EXISTS contains_finding TYPE RELATION IN source_file OUT finding SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS linked_at ON contains_finding TYPE datetime;
    DEFINE INDEX IF NOT EXISTS idx_contains_finding_pair ON contains_finding FIELDS in, out UNIQUE;
";
