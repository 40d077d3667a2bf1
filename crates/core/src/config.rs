//! Inspector settings loaded from `pqc-inspect.{yaml,yml,json}`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scanner::{ScanOptions, DEFAULT_MIN_STRING_LEN};

/// File names looked for in the working directory, in order.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["pqc-inspect.yaml", "pqc-inspect.yml", "pqc-inspect.json"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("Invalid config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

fn default_include_builtin() -> bool {
    true
}

fn default_min_string_len() -> usize {
    DEFAULT_MIN_STRING_LEN
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InspectorConfig {
    #[serde(default)]
    pub threshold: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub threads: Option<usize>,
    /// Extra signature files; relative entries resolve against the config file's directory.
    #[serde(default)]
    pub signature_files: Vec<PathBuf>,
    #[serde(default = "default_include_builtin")]
    pub include_builtin: bool,
    #[serde(default = "default_min_string_len")]
    pub min_string_len: usize,
    #[serde(default)]
    pub max_instructions: Option<usize>,
    #[serde(default)]
    pub history_db: Option<PathBuf>,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            timeout_secs: None,
            threads: None,
            signature_files: Vec::new(),
            include_builtin: default_include_builtin(),
            min_string_len: default_min_string_len(),
            max_instructions: None,
            history_db: None,
        }
    }
}

impl InspectorConfig {
    /// Read a config file, choosing YAML or JSON by extension. Relative paths
    /// inside it are rebased onto the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let is_json = path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("json"));
        let parsed: Result<Self, String> = if is_json == Some(true) {
            serde_json::from_str(&body).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&body).map_err(|e| e.to_string())
        };
        let mut config =
            parsed.map_err(|reason| ConfigError::Parse { path: path.to_path_buf(), reason })?;
        config.validate(path)?;

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for file in config.signature_files.iter_mut() {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
        if let Some(db) = config.history_db.as_mut() {
            if db.is_relative() {
                *db = base.join(&*db);
            }
        }
        Ok(config)
    }

    /// Resolve the effective config: an explicit file, else a well-known file in
    /// `dir`, else defaults. Returns the file used, if any.
    pub fn resolve(explicit: Option<&Path>, dir: &Path) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok((Self::load(&candidate)?, Some(candidate)));
            }
        }
        Ok((Self::default(), None))
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid { path: path.to_path_buf(), reason: reason.to_string() };
        if self.threads == Some(0) {
            return Err(invalid("threads must be at least 1"));
        }
        if self.min_string_len == 0 {
            return Err(invalid("min_string_len must be at least 1"));
        }
        if self.timeout_secs == Some(0) {
            return Err(invalid("timeout_secs must be at least 1; omit it for no limit"));
        }
        Ok(())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            threshold: self.threshold.unwrap_or(0),
            timeout: self.timeout_secs.map(Duration::from_secs),
            min_string_len: self.min_string_len,
            max_instructions: self.max_instructions,
        }
    }
}
