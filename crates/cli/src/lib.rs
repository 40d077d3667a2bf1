use pqc_core::model::BatchReport;
use tracing_subscriber::EnvFilter;

pub mod commands;

/// Process exit status of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every target scanned; no classical-vulnerable verdicts.
    Clean,
    /// At least one classical-vulnerable verdict.
    Vulnerable,
    /// A target failed to load or scan, or the run itself failed.
    Error,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::Vulnerable => 1,
            ExitStatus::Error => 2,
        }
    }

    /// Errors outrank findings.
    pub fn for_batch(batch: &BatchReport) -> Self {
        if batch.any_failed() {
            ExitStatus::Error
        } else if batch.any_vulnerable() {
            ExitStatus::Vulnerable
        } else {
            ExitStatus::Clean
        }
    }
}

/// Map `-v` occurrences to a default filter; `RUST_LOG` wins when set.
pub fn default_log_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the stderr log subscriber. Safe to call more than once.
pub fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_level(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
