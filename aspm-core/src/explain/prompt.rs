use crate::models::FindingRecord;

pub const SYSTEM_PROMPT: &str = "You are an expert Application Security assistant.";

/// User prompt for one finding.
pub fn build_prompt(finding: &FindingRecord) -> String {
    format!(
        "Explain the following security finding in simple terms for a developer.\n\
         Focus on the risk and suggest a clear, actionable remediation.\n\
         \n\
         Vulnerability Type: {check_id}\n\
         Severity: {severity}\n\
         File Path: {path}:{line}\n\
         Scanner Message: {message}\n\
         Code Snippet:\n\
         ```\n\
         {snippet}\n\
         ```\n",
        check_id = finding.check_id,
        severity = finding.severity,
        path = finding.path,
        line = finding.line,
        message = finding.message,
        snippet = finding.code_snippet.trim_end(),
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn prompt_quotes_rule_location_and_snippet() {
        let now = Utc::now();
        let finding = FindingRecord {
            fingerprint: "f1".into(),
            check_id: "sql-injection".into(),
            path: "a.py".into(),
            line: 10,
            message: "m1".into(),
            severity: "high".into(),
            code_snippet: "cursor.execute(q)\n".into(),
            status: "open".into(),
            created_at: now,
            updated_at: now,
            repo_name: Some("acme/app".into()),
            commit: Some("abc123".into()),
        };

        let prompt = build_prompt(&finding);
        assert!(prompt.contains("Vulnerability Type: sql-injection"));
        assert!(prompt.contains("File Path: a.py:10"));
        assert!(prompt.contains("```\ncursor.execute(q)\n```"));
    }
}
