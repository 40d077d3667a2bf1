//! Scan history database.
//!
//! An optional SQLite store of past scan runs:
//! - `scan_runs`: one row per inspected target (identity, outcome, timestamps).
//! - `run_verdicts`: the per-family verdicts of each run.
//!
//! Reports themselves never carry timestamps; the history is where time lives.

mod history_db;
mod models;

pub use history_db::{DbError, DbResult, HistoryDb, CURRENT_SCHEMA_VERSION};
pub use models::{RunFilter, RunStatus, RunVerdictRecord, ScanRunRecord};
