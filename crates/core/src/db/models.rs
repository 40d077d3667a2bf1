use serde::{Deserialize, Serialize};

use crate::model::Report;

/// Outcome of one recorded scan run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Scanned; no classical-vulnerable verdicts.
    Clean,
    /// Scanned; at least one classical-vulnerable verdict.
    Vulnerable,
    /// The target could not be scanned.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Clean => "clean",
            RunStatus::Vulnerable => "vulnerable",
            RunStatus::Failed => "failed",
        }
    }

    pub fn of(report: &Report) -> Self {
        if report.is_failed() {
            RunStatus::Failed
        } else if report.is_vulnerable() {
            RunStatus::Vulnerable
        } else {
            RunStatus::Clean
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clean" => Ok(RunStatus::Clean),
            "vulnerable" => Ok(RunStatus::Vulnerable),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// One row of `scan_runs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanRunRecord {
    pub id: i64,
    pub target: String,
    pub sha256: Option<String>,
    pub format: Option<String>,
    pub status: RunStatus,
    pub verdicts: i64,
    pub vulnerable: i64,
    /// `kind: message` of the target error, for failed runs.
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

/// One row of `run_verdicts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunVerdictRecord {
    pub run_id: i64,
    pub family: String,
    pub status: String,
    pub confidence: f64,
    pub hits: i64,
    pub key_bits: Option<String>,
}

/// Filter for [`crate::db::HistoryDb::list_runs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    /// Substring match on the target path.
    pub target: Option<String>,
    pub status: Option<RunStatus>,
    /// Keep only the newest `limit` runs.
    pub limit: Option<usize>,
}
