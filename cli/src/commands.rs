use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use aspm_core::{
    config::Config,
    db::{self, DbHandle},
    engine::query,
    explain,
    models::{FindingRecord, IngestBatch, SemgrepWebhook},
    IngestMode, IngestReport,
};
use console::style;
use daemon::{IngestWorker, WorkerConfig};
use tracing::info;
use walkdir::WalkDir;

use super::{Command, PayloadFormat};

pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    if let Command::Model = command {
        return model(&config).await;
    }

    // Opened once here, shared by reference, dropped at exit.
    let db = db::open(&config.database).await?;
    db.ensure_constraints().await?;

    let outcome = dispatch(command, &config, &db).await;
    db.close();
    outcome
}

async fn dispatch(command: Command, config: &Config, db: &DbHandle) -> anyhow::Result<()> {
    match command {
        Command::Init => {
            println!("schema ready");
            Ok(())
        }
        Command::Ingest {
            paths,
            format,
            repo,
            commit,
            fail_fast,
        } => {
            let mut worker_config = WorkerConfig::from(&config.ingest);
            if fail_fast {
                worker_config.mode = IngestMode::FailFast;
            }
            ingest(db, worker_config, &paths, format, repo, commit).await
        }
        Command::List { json, status } => {
            let mut findings = query::list_risks(db).await?;
            if let Some(status) = status {
                findings.retain(|f| f.status == status);
            }
            if json {
                return print_json(&findings);
            }
            if findings.is_empty() {
                println!("no findings");
            }
            for finding in &findings {
                print_row(finding);
            }
            Ok(())
        }
        Command::Get { fingerprint, json } => {
            let Some(finding) = query::get_finding(db, &fingerprint).await? else {
                bail!("finding not found: {fingerprint}");
            };
            if json {
                return print_json(&finding);
            }
            print_detail(&finding);
            Ok(())
        }
        Command::Status { fingerprint, status } => {
            let Some(finding) = query::set_status(db, &fingerprint, &status).await? else {
                bail!("finding not found: {fingerprint}");
            };
            print_row(&finding);
            Ok(())
        }
        Command::Explain { fingerprint } => {
            let explainer = explain::from_config(&config.explain);
            let Some(text) = query::explain_risk(db, explainer, &fingerprint).await? else {
                bail!("finding not found: {fingerprint}");
            };
            println!("{text}");
            Ok(())
        }
        Command::Stats => print_json(&db.graph_stats().await?),
        Command::Model => model(config).await,
    }
}

/// Provider description; Ollama is queried over blocking HTTP.
async fn model(config: &Config) -> anyhow::Result<()> {
    let explain_config = config.explain.clone();
    let info = tokio::task::spawn_blocking(move || explain::model_info(&explain_config))
        .await
        .context("model info task failed")?;
    print_json(&info)
}

async fn ingest(
    db: &DbHandle,
    worker_config: WorkerConfig,
    paths: &[PathBuf],
    format: PayloadFormat,
    repo: Option<String>,
    commit: Option<String>,
) -> anyhow::Result<()> {
    let files = collect_payloads(paths)?;
    if files.is_empty() {
        bail!("no .json payloads found");
    }
    info!(payloads = files.len(), "ingesting");

    // parse everything up front so a bad file aborts before anything is written
    let mut batches = Vec::with_capacity(files.len());
    for file in files {
        let mut batch = read_payload(&file, format)?;
        if let Some(repo) = &repo {
            batch.repo_name = repo.clone();
        }
        if let Some(commit) = &commit {
            batch.commit = commit.clone();
        }
        batches.push((file, batch));
    }

    let worker = IngestWorker::spawn(db.clone(), worker_config);
    let mut tickets = Vec::with_capacity(batches.len());
    for (file, batch) in batches {
        tickets.push((file, worker.submit(batch).await?));
    }

    let mut failed = 0usize;
    for (file, ticket) in tickets {
        let report = ticket.wait().await?;
        failed += report.failures.len();
        print_report(&file, &report);
    }
    worker.shutdown().await;

    if failed > 0 {
        bail!("{failed} scan result(s) were not ingested");
    }
    Ok(())
}

/// Files as given; directories are walked for `*.json`.
fn collect_payloads(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("no such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

fn read_payload(path: &Path, format: PayloadFormat) -> anyhow::Result<IngestBatch> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let batch = match format {
        PayloadFormat::Semgrep => serde_json::from_str::<SemgrepWebhook>(&raw)
            .map(IngestBatch::from)
            .with_context(|| format!("parsing Semgrep payload {}", path.display()))?,
        PayloadFormat::Flat => {
            serde_json::from_str(&raw).with_context(|| format!("parsing payload {}", path.display()))?
        }
    };
    Ok(batch)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(file: &Path, report: &IngestReport) {
    println!(
        "{}: {} ingested, {} failed",
        file.display(),
        style(report.ingested.len()).green(),
        if report.is_clean() {
            style(report.failures.len()).dim()
        } else {
            style(report.failures.len()).red()
        }
    );
    for failure in &report.failures {
        println!(
            "  #{} {}: {}",
            failure.index,
            failure.fingerprint.as_deref().unwrap_or("<no fingerprint>"),
            failure.error
        );
    }
}

fn severity_label(severity: &str) -> String {
    let label = format!("{:<8}", severity.to_ascii_uppercase());
    match aspm_core::models::severity_rank(severity) {
        5 => style(label).red().bold().to_string(),
        4 => style(label).red().to_string(),
        3 => style(label).yellow().to_string(),
        2 => style(label).cyan().to_string(),
        _ => style(label).dim().to_string(),
    }
}

fn print_row(finding: &FindingRecord) {
    println!(
        "{} {:<14} {}:{} {} [{}] {}",
        severity_label(&finding.severity),
        finding.status,
        finding.path,
        finding.line,
        finding.check_id,
        style(&finding.fingerprint).dim(),
        finding.repo_name.as_deref().unwrap_or("-"),
    );
}

fn print_detail(finding: &FindingRecord) {
    println!("{} {}", severity_label(&finding.severity), style(&finding.check_id).bold());
    println!("  fingerprint: {}", finding.fingerprint);
    println!("  status:      {}", finding.status);
    println!("  location:    {}:{}", finding.path, finding.line);
    println!("  repo:        {}", finding.repo_name.as_deref().unwrap_or("-"));
    println!("  commit:      {}", finding.commit.as_deref().unwrap_or("-"));
    println!("  created:     {}", finding.created_at.to_rfc3339());
    println!("  updated:     {}", finding.updated_at.to_rfc3339());
    println!("  message:     {}", finding.message);
    if !finding.code_snippet.is_empty() {
        println!();
        for line in finding.code_snippet.lines() {
            println!("    {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_json_payloads_from_directories() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("b.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("nested/a.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let files = collect_payloads(&[tmp.path().to_path_buf()]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.json", "nested/a.json"]);
    }

    #[test]
    fn missing_path_is_an_error() {
        let err = collect_payloads(&[PathBuf::from("/definitely/not/here.json")]).unwrap_err();
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn reads_both_payload_formats() {
        let tmp = tempfile::tempdir().unwrap();
        let semgrep = tmp.path().join("semgrep.json");
        std::fs::write(
            &semgrep,
            r#"{"results": [{"check_id": "r", "path": "a.py", "start": {"line": 3},
                "extra": {"fingerprint": "f", "lines": "x", "message": "m", "severity": "WARNING"}}],
                "repo_name": "acme/app", "commit": "abc"}"#,
        )
        .unwrap();
        let flat = tmp.path().join("flat.json");
        std::fs::write(
            &flat,
            r#"{"results": [{"check_id": "r", "path": "a.py", "line": 3, "severity": "low", "fingerprint": "g"}]}"#,
        )
        .unwrap();

        let a = read_payload(&semgrep, PayloadFormat::Semgrep).unwrap();
        assert_eq!(a.results[0].line, 3);
        assert_eq!(a.commit, "abc");

        let b = read_payload(&flat, PayloadFormat::Flat).unwrap();
        assert_eq!(b.results[0].fingerprint, "g");
        assert_eq!(b.repo_name, "default/repo");

        assert!(read_payload(&flat, PayloadFormat::Semgrep).is_err());
    }
}
