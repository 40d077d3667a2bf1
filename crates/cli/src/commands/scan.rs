use std::path::PathBuf;
use std::{env, fs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use pqc_core::config::InspectorConfig;
use pqc_core::db::HistoryDb;
use pqc_core::report::{batch_report, render_text, to_json};
use pqc_core::scanner::CancellationToken;
use pqc_core::services::Inspector;
use pqc_core::signatures::SignatureDatabase;
use tracing::info;

use crate::ExitStatus;

/// Output encoding for scan results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

/// Everything `scan` accepts on the command line. Unset fields fall back to the config file.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub paths: Vec<PathBuf>,
    pub threshold: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub format: OutputFormat,
    pub threads: Option<usize>,
    pub signatures: Vec<PathBuf>,
    pub no_builtin: bool,
    pub config: Option<PathBuf>,
    pub history: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// Scan every path and emit one batch report. Target failures do not abort the
/// run; they raise the exit status instead.
pub fn scan_command(request: &ScanRequest) -> Result<ExitStatus> {
    if request.paths.is_empty() {
        return Err(anyhow!("No targets given"));
    }

    let cwd = env::current_dir().context("Failed to get current directory")?;
    let (config, config_path) = InspectorConfig::resolve(request.config.as_deref(), &cwd)
        .context("Failed to load config")?;
    if let Some(path) = &config_path {
        info!(path = %path.display(), "using config file");
    }

    let mut signature_files = config.signature_files.clone();
    signature_files.extend(request.signatures.iter().cloned());
    let include_builtin = config.include_builtin && !request.no_builtin;
    let db = SignatureDatabase::load(include_builtin, &signature_files)
        .context("Failed to load signature database")?;
    if db.is_empty() {
        return Err(anyhow!("Signature database is empty; drop --no-builtin or add --signatures"));
    }

    let mut options = config.scan_options();
    if let Some(threshold) = request.threshold {
        options.threshold = threshold;
    }
    if let Some(secs) = request.timeout_secs {
        options.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    let threads = request.threads.or(config.threads);

    let history = match request.history.as_ref().or(config.history_db.as_ref()) {
        Some(path) => Some(
            HistoryDb::open(path)
                .with_context(|| format!("Failed to open history database at {}", path.display()))?,
        ),
        None => None,
    };

    let inspector = Inspector::new(Arc::new(db), options).with_threads(threads);
    let inspected = inspector
        .inspect_batch_timed(&request.paths, &CancellationToken::new())
        .context("Failed to run scan")?;

    if let Some(db) = &history {
        for target in &inspected {
            db.record_report(&target.report, target.started_at, target.finished_at)
                .context("Failed to record scan history")?;
        }
    }
    let batch = batch_report(inspected.into_iter().map(|t| t.report).collect());

    let rendered = match request.format {
        OutputFormat::Json => to_json(&batch).context("Failed to serialize report")?,
        OutputFormat::Text => render_text(&batch),
    };
    match &request.output {
        Some(path) => fs::write(path, rendered.as_bytes())
            .with_context(|| format!("Failed to write report to {}", path.display()))?,
        None => println!("{}", rendered.trim_end()),
    }

    Ok(ExitStatus::for_batch(&batch))
}
