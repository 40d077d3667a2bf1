//! Core data model: signatures, scan targets, hits, verdicts, and reports.
//!
//! Everything that crosses a component boundary (scanner -> classifier ->
//! report generator) lives here so each stage can be tested in isolation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Cryptographic algorithm family a signature (and therefore a verdict) belongs to.
///
/// Serialized by display name so reports read naturally (`"RSA"`, `"ML-KEM"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmFamily {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "ECC")]
    Ecc,
    #[serde(rename = "DSA")]
    Dsa,
    #[serde(rename = "DH")]
    Dh,
    #[serde(rename = "AES")]
    Aes,
    #[serde(rename = "DES")]
    Des,
    #[serde(rename = "SEED")]
    Seed,
    #[serde(rename = "ChaCha20")]
    ChaCha20,
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "SHA-1")]
    Sha1,
    #[serde(rename = "SHA-2")]
    Sha2,
    #[serde(rename = "SHA-3")]
    Sha3,
    #[serde(rename = "ML-KEM")]
    MlKem,
    #[serde(rename = "ML-DSA")]
    MlDsa,
    #[serde(rename = "SLH-DSA")]
    SlhDsa,
    #[serde(rename = "Falcon")]
    Falcon,
}

impl AlgorithmFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmFamily::Rsa => "RSA",
            AlgorithmFamily::Ecc => "ECC",
            AlgorithmFamily::Dsa => "DSA",
            AlgorithmFamily::Dh => "DH",
            AlgorithmFamily::Aes => "AES",
            AlgorithmFamily::Des => "DES",
            AlgorithmFamily::Seed => "SEED",
            AlgorithmFamily::ChaCha20 => "ChaCha20",
            AlgorithmFamily::Md5 => "MD5",
            AlgorithmFamily::Sha1 => "SHA-1",
            AlgorithmFamily::Sha2 => "SHA-2",
            AlgorithmFamily::Sha3 => "SHA-3",
            AlgorithmFamily::MlKem => "ML-KEM",
            AlgorithmFamily::MlDsa => "ML-DSA",
            AlgorithmFamily::SlhDsa => "SLH-DSA",
            AlgorithmFamily::Falcon => "Falcon",
        }
    }

    /// Suggested migration path surfaced alongside each verdict.
    pub fn recommendation(&self) -> &'static str {
        match self {
            AlgorithmFamily::Rsa | AlgorithmFamily::Dh => {
                "Replace key establishment with ML-KEM (FIPS 203) and signatures with ML-DSA (FIPS 204); consider hybrid modes during transition."
            }
            AlgorithmFamily::Ecc => {
                "Replace ECDH with ML-KEM (FIPS 203) and ECDSA/EdDSA with ML-DSA (FIPS 204) or SLH-DSA (FIPS 205); hybrid X25519+ML-KEM is a common interim step."
            }
            AlgorithmFamily::Dsa => "Replace DSA signatures with ML-DSA (FIPS 204) or SLH-DSA (FIPS 205).",
            AlgorithmFamily::Aes => "Use 256-bit AES keys to retain a security margin against Grover's algorithm.",
            AlgorithmFamily::Des | AlgorithmFamily::Seed => {
                "Retire this cipher; migrate to AES-256 or ChaCha20-Poly1305."
            }
            AlgorithmFamily::ChaCha20 => "No change required; 256-bit keys remain adequate.",
            AlgorithmFamily::Md5 | AlgorithmFamily::Sha1 => {
                "Retire this hash; migrate to SHA-384/SHA-512 or SHA-3."
            }
            AlgorithmFamily::Sha2 | AlgorithmFamily::Sha3 => {
                "No change required; prefer 384-bit or larger outputs for long-term collision resistance."
            }
            AlgorithmFamily::MlKem
            | AlgorithmFamily::MlDsa
            | AlgorithmFamily::SlhDsa
            | AlgorithmFamily::Falcon => "Quantum-safe primitive; keep parameter sets current.",
        }
    }
}

impl fmt::Display for AlgorithmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quantum-safety verdict attached to a signature and, in aggregate, to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuantumSafety {
    QuantumSafe,
    ClassicalVulnerable,
    Unknown,
}

impl QuantumSafety {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantumSafety::QuantumSafe => "quantum-safe",
            QuantumSafety::ClassicalVulnerable => "classical-vulnerable",
            QuantumSafety::Unknown => "unknown",
        }
    }
}

impl fmt::Display for QuantumSafety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive key-size range in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySizeHint {
    pub min: u32,
    pub max: u32,
}

impl KeySizeHint {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn exact(bits: u32) -> Self {
        Self { min: bits, max: bits }
    }

    /// Width of the range; `0` means the size is known exactly.
    pub fn width(&self) -> u32 {
        self.max.saturating_sub(self.min)
    }
}

impl fmt::Display for KeySizeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Detection pattern of a signature, as written in a signature file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternSpec {
    /// Regex matched against symbol names (imports, exports, defined symbols).
    Symbol { regex: String },
    /// Regex matched against printable strings embedded in data sections.
    String { regex: String },
    /// Hex-encoded constant byte sequence (whitespace allowed).
    Bytes { hex: String },
    /// Dotted object identifier, matched as its DER encoding.
    Oid { dotted: String },
    /// Regex matched against disassembled instruction mnemonics.
    Instruction { regex: String },
}

impl PatternSpec {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PatternSpec::Symbol { .. } => "symbol",
            PatternSpec::String { .. } => "string",
            PatternSpec::Bytes { .. } => "bytes",
            PatternSpec::Oid { .. } => "oid",
            PatternSpec::Instruction { .. } => "instruction",
        }
    }

    /// Raw pattern text (regex, hex, or dotted OID).
    pub fn source(&self) -> &str {
        match self {
            PatternSpec::Symbol { regex }
            | PatternSpec::String { regex }
            | PatternSpec::Instruction { regex } => regex,
            PatternSpec::Bytes { hex } => hex,
            PatternSpec::Oid { dotted } => dotted,
        }
    }
}

/// A validated detection signature. Immutable once the database is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub id: String,
    pub family: AlgorithmFamily,
    pub pattern: PatternSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_bits: Option<KeySizeHint>,
    pub safety: QuantumSafety,
    /// Base confidence of a single hit, in `(0, 1]`.
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// SHA-256 over id and pattern; stable identity across database revisions.
    pub fingerprint: String,
}

/// Container format of a scanned binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryFormat {
    Elf,
    Pe,
    Macho,
}

impl BinaryFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryFormat::Elf => "elf",
            BinaryFormat::Pe => "pe",
            BinaryFormat::Macho => "macho",
        }
    }
}

impl fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A section with file-backed contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub offset: usize,
    pub size: usize,
    pub address: u64,
    pub executable: bool,
}

impl Section {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Defined,
    Import,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: String,
    pub address: u64,
    pub kind: SymbolKind,
    /// Library the import resolves against, when the format records it (PE).
    pub library: Option<String>,
    /// File range of the symbol's name bytes in a string table.
    pub name_range: Option<(usize, usize)>,
}

/// One analyzed binary. Owned by a single scan run.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub path: PathBuf,
    pub format: BinaryFormat,
    pub arch: Option<String>,
    pub sha256: String,
    pub bytes: Vec<u8>,
    pub sections: Vec<Section>,
    pub symbols: Vec<SymbolEntry>,
    pub libraries: Vec<String>,
}

impl ScanTarget {
    pub fn section_data(&self, section: &Section) -> &[u8] {
        let end = section.end().min(self.bytes.len());
        let start = section.offset.min(end);
        &self.bytes[start..end]
    }

    pub fn identity(&self) -> TargetIdentity {
        TargetIdentity {
            path: self.path.display().to_string(),
            format: Some(self.format),
            arch: self.arch.clone(),
            size: self.bytes.len() as u64,
            sha256: Some(self.sha256.clone()),
        }
    }
}

/// Where a hit's evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Symbol,
    String,
    Bytes,
    Instruction,
}

/// A single signature match inside a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub signature_id: String,
    pub family: AlgorithmFamily,
    pub source: HitSource,
    /// File offset of the matched bytes, when the match has a location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Hamming distance for byte-pattern hits; `0` for everything else.
    #[serde(default)]
    pub distance: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_bits: Option<KeySizeHint>,
    pub confidence: f64,
}

impl Hit {
    /// Half-open file range covered by this hit.
    pub fn range(&self) -> Option<(u64, u64)> {
        self.offset.map(|start| (start, start + self.length))
    }

    /// Deterministic ordering: located hits by `(offset, signature_id)`, then
    /// unlocated hits by `(symbol, signature_id)`.
    pub fn cmp_for_report(&self, other: &Hit) -> std::cmp::Ordering {
        match (self.offset, other.offset) {
            (Some(a), Some(b)) => a
                .cmp(&b)
                .then_with(|| self.signature_id.cmp(&other.signature_id))
                .then_with(|| self.symbol.cmp(&other.symbol)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => self
                .symbol
                .cmp(&other.symbol)
                .then_with(|| self.signature_id.cmp(&other.signature_id)),
        }
    }
}

/// Aggregated classification of one algorithm family within one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub family: AlgorithmFamily,
    pub status: QuantumSafety,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_bits: Option<KeySizeHint>,
    pub evidence: Vec<Hit>,
    pub recommendation: String,
}

/// Identity of a scanned target as it appears in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<BinaryFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl TargetIdentity {
    /// Identity for a target that could not be loaded.
    pub fn unloaded(path: impl Into<String>, size: u64) -> Self {
        Self { path: path.into(), format: None, arch: None, size, sha256: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub verdicts: usize,
    pub classical_vulnerable: usize,
    pub quantum_safe: usize,
    pub unknown: usize,
    pub hits: usize,
}

/// Failure category recorded for a target that could not be inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptInput,
    ScanTimeout,
    Cancelled,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::CorruptInput => "corrupt_input",
            ErrorKind::ScanTimeout => "scan_timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Write-once result for a single target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub target: TargetIdentity,
    pub verdicts: Vec<Verdict>,
    pub summary: ReportSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TargetError>,
}

impl Report {
    pub fn is_vulnerable(&self) -> bool {
        self.summary.classical_vulnerable > 0
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub targets: usize,
    pub failed: usize,
    pub vulnerable_targets: usize,
    pub verdicts: usize,
}

/// Reports for every target of a run, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub reports: Vec<Report>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn any_failed(&self) -> bool {
        self.summary.failed > 0
    }

    pub fn any_vulnerable(&self) -> bool {
        self.summary.vulnerable_targets > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_size_hint_width_and_display() {
        assert_eq!(KeySizeHint::exact(2048).width(), 0);
        assert_eq!(KeySizeHint::new(1024, 4096).width(), 3072);
        assert_eq!(KeySizeHint::exact(2048).to_string(), "2048");
        assert_eq!(KeySizeHint::new(1024, 4096).to_string(), "1024-4096");
    }

    #[test]
    fn families_serialize_by_display_name() {
        let json = serde_json::to_string(&AlgorithmFamily::MlKem).unwrap();
        assert_eq!(json, "\"ML-KEM\"");
        let back: AlgorithmFamily = serde_json::from_str("\"SHA-1\"").unwrap();
        assert_eq!(back, AlgorithmFamily::Sha1);
    }

    #[test]
    fn unlocated_hits_sort_last() {
        let base = Hit {
            signature_id: "a".into(),
            family: AlgorithmFamily::Rsa,
            source: HitSource::Symbol,
            offset: None,
            length: 0,
            section: None,
            symbol: Some("RSA_new".into()),
            distance: 0,
            key_bits: None,
            confidence: 0.5,
        };
        let located = Hit { offset: Some(10), source: HitSource::Bytes, ..base.clone() };
        assert_eq!(located.cmp_for_report(&base), std::cmp::Ordering::Less);
    }

    #[test]
    fn located_ties_break_on_signature_id_before_symbol() {
        let hit = |id: &str, offset: Option<u64>, symbol: &str| Hit {
            signature_id: id.into(),
            family: AlgorithmFamily::Rsa,
            source: HitSource::Symbol,
            offset,
            length: 4,
            section: None,
            symbol: Some(symbol.into()),
            distance: 0,
            key_bits: None,
            confidence: 0.9,
        };
        let mut hits = vec![
            hit("b.sig", Some(10), "aaa"),
            hit("a.sig", Some(10), "zzz"),
            hit("a.sig", None, "zzz"),
            hit("b.sig", None, "aaa"),
        ];
        hits.sort_by(|a, b| a.cmp_for_report(b));
        let order: Vec<(&str, Option<u64>)> =
            hits.iter().map(|h| (h.signature_id.as_str(), h.offset)).collect();
        assert_eq!(order, vec![("a.sig", Some(10)), ("b.sig", Some(10)), ("b.sig", None), ("a.sig", None)]);
    }
}
