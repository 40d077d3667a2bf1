use std::path::Path;

use anyhow::{anyhow, Context, Result};
use pqc_core::db::{HistoryDb, RunFilter, RunVerdictRecord, ScanRunRecord};
use serde::Serialize;

#[derive(Serialize)]
struct RunWithVerdicts {
    #[serde(flatten)]
    run: ScanRunRecord,
    verdicts: Vec<RunVerdictRecord>,
}

/// List recorded scan runs matching `filter`, newest last.
pub fn history_command(db_path: &Path, filter: &RunFilter, json: bool) -> Result<()> {
    if !db_path.is_file() {
        return Err(anyhow!("History database not found at {}", db_path.display()));
    }
    let db = HistoryDb::open(db_path)
        .with_context(|| format!("Failed to open history database at {}", db_path.display()))?;
    let runs = db.list_runs(filter).context("Failed to list scan runs")?;

    if json {
        let mut out = Vec::with_capacity(runs.len());
        for run in runs {
            let verdicts = db.list_verdicts(run.id).context("Failed to list run verdicts")?;
            out.push(RunWithVerdicts { run, verdicts });
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("Scan runs: (none)");
        return Ok(());
    }

    println!("Scan runs:");
    for run in runs {
        println!(
            "- #{} {} [{}] verdicts={} vulnerable={} at {}",
            run.id,
            run.target,
            run.status.as_str(),
            run.verdicts,
            run.vulnerable,
            run.finished_at
        );
        if let Some(err) = &run.error {
            println!("    error: {err}");
        }
        for v in db.list_verdicts(run.id).context("Failed to list run verdicts")? {
            let bits = v.key_bits.map(|b| format!(" {b}-bit")).unwrap_or_default();
            println!("    {} {} {:.2}{bits} ({} hits)", v.family, v.status, v.confidence, v.hits);
        }
    }
    Ok(())
}
