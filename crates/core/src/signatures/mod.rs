//! Signature database: curated detection patterns and their classification.
//!
//! The database is built once at startup (built-in table plus optional YAML/JSON
//! files), validated eagerly, and then shared read-only between scan workers.
//! Any malformed entry is fatal to the load so scanning never starts against a
//! half-valid table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::model::{AlgorithmFamily, KeySizeHint, PatternSpec, QuantumSafety, Signature};

const BUILTIN_SIGNATURES: &str = include_str!("builtin.yaml");

/// Default per-hit weight when an entry does not specify one.
const DEFAULT_WEIGHT: f64 = 0.8;

#[derive(Debug, Error)]
pub enum SignatureDbError {
    #[error("Malformed signature '{id}': {reason}")]
    Malformed { id: String, reason: String },
    #[error("Duplicate signature id '{0}'")]
    Duplicate(String),
    #[error("Failed to read signature file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse signature file {origin}: {reason}")]
    Parse { origin: String, reason: String },
}

/// One entry as written in a signature file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureEntry {
    pub id: String,
    pub family: AlgorithmFamily,
    pub pattern: PatternSpec,
    #[serde(default)]
    pub key_bits: Option<KeySizeHint>,
    pub safety: QuantumSafety,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Top-level document of a signature file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureFile {
    pub signatures: Vec<SignatureEntry>,
}

/// Matcher compiled from a [`PatternSpec`].
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    Symbol(Regex),
    String(Regex),
    /// Raw bytes; OIDs compile to their DER encoding.
    Bytes(Vec<u8>),
    Instruction(Regex),
}

/// Immutable, validated signature table.
#[derive(Debug, Clone, Default)]
pub struct SignatureDatabase {
    signatures: Vec<Signature>,
    compiled: Vec<CompiledPattern>,
    index: HashMap<String, usize>,
}

impl SignatureDatabase {
    /// The built-in table shipped with the crate.
    pub fn builtin() -> Result<Self, SignatureDbError> {
        let file = parse_yaml(BUILTIN_SIGNATURES, "<builtin>")?;
        Self::from_entries(file.signatures)
    }

    /// Build the database from the built-in table (optional) plus extra files.
    pub fn load(include_builtin: bool, files: &[PathBuf]) -> Result<Self, SignatureDbError> {
        let mut entries = Vec::new();
        if include_builtin {
            entries.extend(parse_yaml(BUILTIN_SIGNATURES, "<builtin>")?.signatures);
        }
        for path in files {
            let file = read_signature_file(path)?;
            debug!(path = %path.display(), count = file.signatures.len(), "loaded signature file");
            entries.extend(file.signatures);
        }
        Self::from_entries(entries)
    }

    pub fn from_yaml_str(body: &str) -> Result<Self, SignatureDbError> {
        Self::from_entries(parse_yaml(body, "<inline>")?.signatures)
    }

    pub fn from_json_str(body: &str) -> Result<Self, SignatureDbError> {
        Self::from_entries(parse_json(body, "<inline>")?.signatures)
    }

    /// Validate and compile entries. Fails on the first malformed or duplicate entry.
    pub fn from_entries(entries: Vec<SignatureEntry>) -> Result<Self, SignatureDbError> {
        let mut db = SignatureDatabase::default();
        for entry in entries {
            let (signature, compiled) = compile_entry(entry)?;
            if db.index.contains_key(&signature.id) {
                return Err(SignatureDbError::Duplicate(signature.id));
            }
            db.index.insert(signature.id.clone(), db.signatures.len());
            db.signatures.push(signature);
            db.compiled.push(compiled);
        }
        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Signature> {
        self.index.get(id).map(|&idx| &self.signatures[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Signatures paired with their compiled matchers, in load order.
    pub fn entries(&self) -> impl Iterator<Item = (&Signature, &CompiledPattern)> {
        self.signatures.iter().zip(self.compiled.iter())
    }

    /// Length of the longest byte pattern; sizes the scanner's sliding window.
    pub fn longest_byte_pattern(&self) -> usize {
        self.compiled
            .iter()
            .filter_map(|c| match c {
                CompiledPattern::Bytes(bytes) => Some(bytes.len()),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }
}

fn parse_yaml(body: &str, origin: &str) -> Result<SignatureFile, SignatureDbError> {
    serde_yaml::from_str(body)
        .map_err(|e| SignatureDbError::Parse { origin: origin.to_string(), reason: e.to_string() })
}

fn parse_json(body: &str, origin: &str) -> Result<SignatureFile, SignatureDbError> {
    serde_json::from_str(body)
        .map_err(|e| SignatureDbError::Parse { origin: origin.to_string(), reason: e.to_string() })
}

/// Read a signature file, choosing the parser by extension (yaml/yml/json).
pub fn read_signature_file(path: &Path) -> Result<SignatureFile, SignatureDbError> {
    let body = std::fs::read_to_string(path)
        .map_err(|source| SignatureDbError::Io { path: path.to_path_buf(), source })?;
    let origin = path.display().to_string();
    match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "json" => parse_json(&body, &origin),
        "yaml" | "yml" => parse_yaml(&body, &origin),
        other => Err(SignatureDbError::Parse {
            origin,
            reason: format!("unsupported extension '{other}' (expected yaml, yml or json)"),
        }),
    }
}

fn compile_entry(entry: SignatureEntry) -> Result<(Signature, CompiledPattern), SignatureDbError> {
    let malformed = |reason: String| SignatureDbError::Malformed { id: entry.id.clone(), reason };

    if entry.id.trim().is_empty() {
        return Err(malformed("id must not be empty".into()));
    }
    let weight = entry.weight.unwrap_or(DEFAULT_WEIGHT);
    if !(weight > 0.0 && weight <= 1.0) {
        return Err(malformed(format!("weight {weight} outside (0, 1]")));
    }
    if let Some(hint) = entry.key_bits {
        if hint.min == 0 || hint.min > hint.max {
            return Err(malformed(format!("invalid key_bits range {}..={}", hint.min, hint.max)));
        }
    }

    let compiled = match &entry.pattern {
        PatternSpec::Symbol { regex } => CompiledPattern::Symbol(compile_regex(regex).map_err(malformed)?),
        PatternSpec::String { regex } => CompiledPattern::String(compile_regex(regex).map_err(malformed)?),
        PatternSpec::Instruction { regex } => {
            CompiledPattern::Instruction(compile_regex(regex).map_err(malformed)?)
        }
        PatternSpec::Bytes { hex } => CompiledPattern::Bytes(parse_hex(hex).map_err(malformed)?),
        PatternSpec::Oid { dotted } => CompiledPattern::Bytes(encode_oid(dotted).map_err(malformed)?),
    };

    let fingerprint = fingerprint(&entry.id, &entry.pattern);
    let signature = Signature {
        id: entry.id,
        family: entry.family,
        pattern: entry.pattern,
        key_bits: entry.key_bits,
        safety: entry.safety,
        weight,
        description: entry.description,
        fingerprint,
    };
    Ok((signature, compiled))
}

fn compile_regex(source: &str) -> Result<Regex, String> {
    if source.is_empty() {
        return Err("regex must not be empty".into());
    }
    Regex::new(source).map_err(|e| format!("invalid regex: {e}"))
}

/// SHA-256 over the id, pattern kind and pattern source.
pub fn fingerprint(id: &str, pattern: &PatternSpec) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update([0u8]);
    hasher.update(pattern.kind_name().as_bytes());
    hasher.update([0u8]);
    hasher.update(pattern.source().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse a hex string (whitespace ignored) into bytes.
pub fn parse_hex(hex: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.is_empty() {
        return Err("byte pattern must not be empty".into());
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", digits.len()));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).map_err(|_| "non-ASCII hex digit".to_string())?;
            u8::from_str_radix(s, 16).map_err(|_| format!("invalid hex byte '{s}'"))
        })
        .collect()
}

/// DER-encode a dotted OID as a full TLV (tag 0x06, length, body).
pub fn encode_oid(dotted: &str) -> Result<Vec<u8>, String> {
    let arcs = dotted
        .split('.')
        .map(|arc| arc.parse::<u64>().map_err(|_| format!("invalid OID arc '{arc}' in {dotted}")))
        .collect::<Result<Vec<u64>, String>>()?;
    if arcs.len() < 2 {
        return Err(format!("OID {dotted} needs at least two arcs"));
    }
    if arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(format!("OID {dotted} has an invalid leading arc pair"));
    }

    let mut body = Vec::new();
    push_base128(&mut body, arcs[0] * 40 + arcs[1]);
    for &arc in &arcs[2..] {
        push_base128(&mut body, arc);
    }
    if body.len() > 127 {
        return Err(format!("OID {dotted} is too long"));
    }

    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(0x06);
    out.push(body.len() as u8);
    out.extend(body);
    Ok(out)
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut stack = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        stack.push(((value & 0x7f) as u8) | 0x80);
        value >>= 7;
    }
    out.extend(stack.into_iter().rev());
}
