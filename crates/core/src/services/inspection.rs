use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classifier::classify;
use crate::loader::{load_target_with, LoadError};
use crate::model::{BatchReport, Report, ScanTarget, TargetError, TargetIdentity};
use crate::report::{batch_report, build_report, failed_report};
use crate::scanner::{CancellationToken, ScanContext, ScanError, ScanOptions, Scanner};
use crate::signatures::SignatureDatabase;

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// One target's report with the wall-clock span it took.
#[derive(Debug, Clone)]
pub struct InspectedTarget {
    pub report: Report,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Loader → Scanner → Classifier → Report, for one target or a batch.
#[derive(Debug, Clone)]
pub struct Inspector {
    db: Arc<SignatureDatabase>,
    options: ScanOptions,
    threads: Option<usize>,
}

impl Inspector {
    pub fn new(db: Arc<SignatureDatabase>, options: ScanOptions) -> Self {
        Self { db, options, threads: None }
    }

    /// Worker count for batches; `None` uses one thread per CPU.
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads.filter(|n| *n > 0);
        self
    }

    pub fn database(&self) -> &SignatureDatabase {
        &self.db
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Fresh per-target context whose deadline starts now.
    pub fn context(&self, cancel: &CancellationToken) -> ScanContext {
        ScanContext::new(cancel.clone()).with_budget(self.options.timeout)
    }

    /// Inspect one file. Failures become the report's error entry.
    pub fn inspect(&self, path: &Path, ctx: &ScanContext) -> Report {
        let started = Instant::now();
        if let Err(err) = ctx.check() {
            return self.failed(unloaded_identity(path), scan_error(&err), path);
        }
        let target = match load_target_with(path, ctx) {
            Ok(target) => target,
            Err(err) => return self.failed(unloaded_identity(path), load_error(&err), path),
        };
        match self.inspect_target(&target, ctx) {
            Ok(report) => {
                info!(
                    path = %path.display(),
                    verdicts = report.summary.verdicts,
                    vulnerable = report.summary.classical_vulnerable,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "inspected target"
                );
                report
            }
            Err(err) => self.failed(target.identity(), scan_error(&err), path),
        }
    }

    /// [`Inspector::inspect`] plus the start and finish times of this target alone.
    pub fn inspect_timed(&self, path: &Path, ctx: &ScanContext) -> InspectedTarget {
        let started_at = Utc::now();
        let report = self.inspect(path, ctx);
        InspectedTarget { report, started_at, finished_at: Utc::now() }
    }

    /// Scan and classify an already-loaded target.
    pub fn inspect_target(&self, target: &ScanTarget, ctx: &ScanContext) -> Result<Report, ScanError> {
        let scanner = Scanner::new(&self.db, self.options.clone());
        let hits = scanner.scan(target, ctx)?;
        debug!(path = %target.path.display(), hits = hits.len(), "scan complete");
        let verdicts = classify(&hits, &self.db);
        Ok(build_report(target.identity(), verdicts))
    }

    /// Inspect every path on the worker pool. Reports keep input order, and
    /// the batch returns only after every target has finished.
    pub fn inspect_batch(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<BatchReport, InspectError> {
        let inspected = self.inspect_batch_timed(paths, cancel)?;
        Ok(batch_report(inspected.into_iter().map(|t| t.report).collect()))
    }

    /// Same as [`Inspector::inspect_batch`], keeping each target's own timing.
    pub fn inspect_batch_timed(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<Vec<InspectedTarget>, InspectError> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = self.threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build()?;
        debug!(targets = paths.len(), threads = pool.current_num_threads(), "starting batch");

        Ok(pool.install(|| {
            paths
                .par_iter()
                .map(|path| {
                    let ctx = self.context(cancel);
                    self.inspect_timed(path, &ctx)
                })
                .collect()
        }))
    }

    fn failed(&self, identity: TargetIdentity, error: TargetError, path: &Path) -> Report {
        warn!(path = %path.display(), kind = error.kind.as_str(), "{}", error.message);
        failed_report(identity, error)
    }
}

fn unloaded_identity(path: &Path) -> TargetIdentity {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    TargetIdentity::unloaded(path.display().to_string(), size)
}

fn load_error(err: &LoadError) -> TargetError {
    TargetError { kind: err.kind(), message: err.to_string() }
}

fn scan_error(err: &ScanError) -> TargetError {
    TargetError { kind: err.kind(), message: err.to_string() }
}
