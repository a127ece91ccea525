use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known status labels. Status is an open string; these are just the
/// values the scanner integrations and the CLI use.
pub mod status {
    pub const OPEN: &str = "open";
    pub const FIXED: &str = "fixed";
    pub const FALSE_POSITIVE: &str = "false_positive";
}

/// A finding joined with the repo and commit it was reached through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FindingRecord {
    pub fingerprint: String,
    pub check_id: String,
    pub path: String,
    pub line: u32,
    pub message: String,
    pub severity: String,
    pub code_snippet: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub repo_name: Option<String>,
    pub commit: Option<String>,
}

/// Node and edge counts for the whole graph.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphStats {
    pub repos: u64,
    pub commits: u64,
    pub files: u64,
    pub findings: u64,
    pub has_commit: u64,
    pub modified_file: u64,
    pub contains_finding: u64,
}

/// Rank of a severity label. Unknown labels rank 0.
///
/// Semgrep's `ERROR`/`WARNING`/`INFO` map onto high/medium/info.
pub fn severity_rank(severity: &str) -> u8 {
    match severity.trim().to_ascii_lowercase().as_str() {
        "critical" => 5,
        "high" | "error" => 4,
        "medium" | "moderate" | "warning" => 3,
        "low" => 2,
        "info" | "informational" | "note" => 1,
        _ => 0,
    }
}

/// Listing order: severity rank descending, then the lowercased label
/// descending (so unknown labels still sort deterministically), then
/// `updated_at` descending, then fingerprint.
pub fn compare_for_listing(a: &FindingRecord, b: &FindingRecord) -> Ordering {
    severity_rank(&b.severity)
        .cmp(&severity_rank(&a.severity))
        .then_with(|| {
            b.severity
                .trim()
                .to_ascii_lowercase()
                .cmp(&a.severity.trim().to_ascii_lowercase())
        })
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.fingerprint.cmp(&b.fingerprint))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn record(fp: &str, severity: &str, updated_secs: i64) -> FindingRecord {
        let ts = Utc.timestamp_opt(updated_secs, 0).unwrap();
        FindingRecord {
            fingerprint: fp.into(),
            check_id: "rule".into(),
            path: "a.py".into(),
            line: 1,
            message: "m".into(),
            severity: severity.into(),
            code_snippet: String::new(),
            status: status::OPEN.into(),
            created_at: ts,
            updated_at: ts,
            repo_name: None,
            commit: None,
        }
    }

    fn sorted(mut records: Vec<FindingRecord>) -> Vec<String> {
        records.sort_by(compare_for_listing);
        records.into_iter().map(|r| r.fingerprint).collect()
    }

    #[test]
    fn known_labels_rank_in_order() {
        assert!(severity_rank("critical") > severity_rank("high"));
        assert!(severity_rank("high") > severity_rank("medium"));
        assert!(severity_rank("medium") > severity_rank("low"));
        assert!(severity_rank("low") > severity_rank("info"));
        assert!(severity_rank("info") > severity_rank("whatever"));
    }

    #[test]
    fn semgrep_labels_are_case_insensitive() {
        assert_eq!(severity_rank("ERROR"), severity_rank("high"));
        assert_eq!(severity_rank("Warning"), severity_rank("medium"));
        assert_eq!(severity_rank(" INFO "), severity_rank("info"));
    }

    #[test]
    fn orders_by_severity_not_alphabet() {
        let got = sorted(vec![
            record("low", "low", 10),
            record("crit", "critical", 10),
            record("high", "high", 10),
        ]);
        assert_eq!(got, vec!["crit", "high", "low"]);
    }

    #[test]
    fn same_severity_newest_first() {
        let got = sorted(vec![record("old", "high", 1), record("new", "HIGH", 5)]);
        assert_eq!(got, vec!["new", "old"]);
    }

    #[test]
    fn unknown_labels_fall_back_to_lexicographic_descending() {
        let got = sorted(vec![
            record("a", "alpha", 1),
            record("z", "zulu", 1),
            record("i", "info", 1),
        ]);
        // info is known and outranks both unknown labels
        assert_eq!(got, vec!["i", "z", "a"]);
    }
}
