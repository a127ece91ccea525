mod commands;

use std::path::{Path, PathBuf};

use anyhow::Context;
use aspm_core::config::{Config, Engine};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "aspm", version, about = "Track security-scan findings as a repo/commit/file graph")]
struct Cli {
    /// Config file (default: <config_dir>/aspm/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overrides config and ASPM_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Use a throwaway in-memory database
    #[arg(long, global = true)]
    memory: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the schema and unique constraints
    Init,
    /// Ingest scan payloads (JSON files, or directories of them)
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, value_enum, default_value_t = PayloadFormat::Semgrep)]
        format: PayloadFormat,
        /// Repository name, overrides the payload's
        #[arg(long)]
        repo: Option<String>,
        /// Commit hash, overrides the payload's
        #[arg(long)]
        commit: Option<String>,
        /// Stop a payload at its first bad result
        #[arg(long)]
        fail_fast: bool,
    },
    /// List findings, most severe first
    List {
        #[arg(long)]
        json: bool,
        /// Only findings with this status
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one finding
    Get {
        fingerprint: String,
        #[arg(long)]
        json: bool,
    },
    /// Set a finding's status (open, fixed, false_positive, ...)
    Status { fingerprint: String, status: String },
    /// Ask the configured LLM provider to explain a finding
    Explain { fingerprint: String },
    /// Node and edge counts
    Stats,
    /// Show the configured explanation provider and model
    Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PayloadFormat {
    /// Semgrep JSON output with optional repo_name / commit
    Semgrep,
    /// {results: [{check_id, path, line, ...}], repo_name, commit}
    Flat,
}

/// Filter used when `RUST_LOG` is unset.
fn default_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn init_tracing(verbose: u8, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().context("--log-file needs a file name")?;
            std::fs::create_dir_all(dir).with_context(|| format!("creating log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::never(dir, name);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_appender))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env()?;
    if let Some(db) = &cli.db {
        config.database.path = Some(db.clone());
    }
    if cli.memory {
        config.database.engine = Engine::Memory;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;
    let config = load_config(&cli)?;

    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    rt.block_on(commands::run(cli.command, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_at_info_unless_verbose() {
        assert_eq!(default_level(0), "info");
        assert_eq!(default_level(1), "debug");
        assert_eq!(default_level(4), "trace");
    }
}
