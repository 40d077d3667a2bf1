//! Report generation: a deterministic transform from verdicts to a serializable report.

use std::fmt::Write as _;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::model::{
    BatchReport, BatchSummary, QuantumSafety, Report, ReportSummary, TargetError, TargetIdentity,
    Verdict,
};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("report parse failed: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Build the report for a scanned target. Pure: identical input gives identical output.
pub fn build_report(target: TargetIdentity, mut verdicts: Vec<Verdict>) -> Report {
    verdicts.sort_by(|a, b| {
        a.family
            .as_str()
            .cmp(b.family.as_str())
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
    let summary = summarize(&verdicts);
    Report { target, verdicts, summary, error: None }
}

/// Report for a target that could not be scanned.
pub fn failed_report(target: TargetIdentity, error: TargetError) -> Report {
    Report { target, verdicts: Vec::new(), summary: ReportSummary::default(), error: Some(error) }
}

pub fn summarize(verdicts: &[Verdict]) -> ReportSummary {
    let count = |status: QuantumSafety| verdicts.iter().filter(|v| v.status == status).count();
    ReportSummary {
        verdicts: verdicts.len(),
        classical_vulnerable: count(QuantumSafety::ClassicalVulnerable),
        quantum_safe: count(QuantumSafety::QuantumSafe),
        unknown: count(QuantumSafety::Unknown),
        hits: verdicts.iter().map(|v| v.evidence.len()).sum(),
    }
}

/// Combine per-target reports, keeping their order.
pub fn batch_report(reports: Vec<Report>) -> BatchReport {
    let summary = BatchSummary {
        targets: reports.len(),
        failed: reports.iter().filter(|r| r.is_failed()).count(),
        vulnerable_targets: reports.iter().filter(|r| r.is_vulnerable()).count(),
        verdicts: reports.iter().map(|r| r.verdicts.len()).sum(),
    };
    BatchReport { reports, summary }
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String, ReportError> {
    serde_json::to_string_pretty(value).map_err(ReportError::Serialize)
}

pub fn from_json<T: DeserializeOwned>(body: &str) -> Result<T, ReportError> {
    serde_json::from_str(body).map_err(ReportError::Parse)
}

/// Plain-text listing, one block per target.
pub fn render_text(batch: &BatchReport) -> String {
    let mut out = String::new();
    for report in &batch.reports {
        let t = &report.target;
        let format = t.format.map(|f| f.as_str()).unwrap_or("?");
        let arch = t.arch.as_deref().unwrap_or("?");
        let _ = writeln!(out, "{} [{format}/{arch}, {} bytes]", t.path, t.size);
        if let Some(err) = &report.error {
            let _ = writeln!(out, "  error ({}): {}", err.kind.as_str(), err.message);
            continue;
        }
        if report.verdicts.is_empty() {
            let _ = writeln!(out, "  no cryptographic primitives detected");
            continue;
        }
        for v in &report.verdicts {
            let bits = v.key_bits.map(|k| format!(" {k}-bit")).unwrap_or_default();
            let _ = writeln!(
                out,
                "  {:<8} {:<21} confidence {:.2}{bits} ({} hits)",
                v.family.as_str(),
                v.status.as_str(),
                v.confidence,
                v.evidence.len()
            );
            let _ = writeln!(out, "           -> {}", v.recommendation);
        }
    }
    let s = &batch.summary;
    let _ = writeln!(
        out,
        "{} targets, {} failed, {} with classical-vulnerable crypto, {} verdicts",
        s.targets, s.failed, s.vulnerable_targets, s.verdicts
    );
    out
}
