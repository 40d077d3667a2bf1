//! pqc-core
//!
//! Core library for finding cryptographic primitives in native binaries and
//! classifying them as classical (quantum-vulnerable) or quantum-safe.
//!
//! Pipeline: [`loader`] parses an ELF/PE/Mach-O file, [`scanner`] matches it
//! against the [`signatures`] database, [`classifier`] aggregates hits into
//! per-family verdicts, and [`report`] turns those into a deterministic report.
//! [`services::Inspector`] runs the pipeline for one target or a parallel batch.
//!
//! All substantive logic lives here so frontends stay thin.

pub mod classifier;
pub mod config;
pub mod db;
pub mod loader;
pub mod model;
pub mod report;
pub mod scanner;
pub mod services;
pub mod signatures;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
