//! Pattern scanner: matches a loaded [`ScanTarget`] against the signature database.
//!
//! The scan is a lazy stream of hits produced in a fixed order: symbols first,
//! then each section in file-offset order (strings, byte patterns,
//! instructions). Symbol and string hits claim the file range they matched;
//! byte-pattern hits that overlap a claim are dropped so one region is never
//! counted twice.

mod bytes;
mod instructions;
mod strings;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{ErrorKind, Hit, HitSource, KeySizeHint, ScanTarget, Section, Signature};
use crate::signatures::{CompiledPattern, SignatureDatabase};

use bytes::{BytePattern, ByteMatch};

/// String evidence is weaker than a resolved function symbol.
pub const STRING_CONFIDENCE_FACTOR: f64 = 0.6;
/// Upper bound on instruction hits per signature per target.
pub const MAX_INSTRUCTION_HITS: usize = 16;
pub const DEFAULT_MIN_STRING_LEN: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("scan exceeded its time budget of {0:?}")]
    Timeout(Duration),
    #[error("scan cancelled")]
    Cancelled,
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::Timeout(_) => ErrorKind::ScanTimeout,
            ScanError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Tunables for one scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Maximum Hamming distance for byte patterns; `0` is exact matching.
    pub threshold: u32,
    /// Per-target time budget; `None` is unlimited.
    pub timeout: Option<Duration>,
    pub min_string_len: usize,
    /// Cap on decoded instructions per target; `None` is unlimited.
    pub max_instructions: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { threshold: 0, timeout: None, min_string_len: DEFAULT_MIN_STRING_LEN, max_instructions: None }
    }
}

/// Shared cancellation flag, checked cooperatively by every running scan.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-target runtime context: the cancellation token plus an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl ScanContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel, deadline: None }
    }

    /// Start the clock for one target: the deadline is `now + budget`.
    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.deadline = budget.map(|b| (Instant::now() + b, b));
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn check(&self) -> Result<(), ScanError> {
        if self.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        if let Some((deadline, budget)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ScanError::Timeout(budget));
            }
        }
        Ok(())
    }
}

/// File ranges already accounted for by stronger evidence.
#[derive(Debug, Clone, Default)]
pub(crate) struct Claims {
    symbols: Vec<(usize, usize)>,
    other: Vec<(usize, usize)>,
}

fn overlaps(ranges: &[(usize, usize)], start: usize, end: usize) -> bool {
    ranges.iter().any(|&(s, e)| start < e && s < end)
}

impl Claims {
    pub(crate) fn claim_symbol(&mut self, start: usize, end: usize) {
        self.symbols.push((start, end));
    }

    pub(crate) fn claim(&mut self, start: usize, end: usize) {
        self.other.push((start, end));
    }

    pub(crate) fn overlaps_symbol(&self, start: usize, end: usize) -> bool {
        overlaps(&self.symbols, start, end)
    }

    pub(crate) fn overlaps_any(&self, start: usize, end: usize) -> bool {
        self.overlaps_symbol(start, end) || overlaps(&self.other, start, end)
    }
}

/// Key-size hint from a `bits` capture, falling back to the signature's own hint.
fn key_bits_from(caps: Option<&regex::Captures<'_>>, signature: &Signature) -> Option<KeySizeHint> {
    caps.and_then(|c| c.name("bits"))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|bits| *bits > 0)
        .map(KeySizeHint::exact)
        .or(signature.key_bits)
}

pub struct Scanner<'db> {
    db: &'db SignatureDatabase,
    options: ScanOptions,
    window: usize,
}

impl<'db> Scanner<'db> {
    pub fn new(db: &'db SignatureDatabase, options: ScanOptions) -> Self {
        let window = db.longest_byte_pattern();
        Self { db, options, window }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Lazy hit stream. Every call starts a fresh pass with identical ordering.
    pub fn hits<'s>(&'s self, target: &'s ScanTarget, ctx: &'s ScanContext) -> HitStream<'s> {
        HitStream {
            scanner: self,
            target,
            ctx,
            stage: Stage::Symbols,
            pending: VecDeque::new(),
            claims: Claims::default(),
            insn_budget: self.options.max_instructions,
            insn_counts: HashMap::new(),
        }
    }

    /// Drain the stream and return hits in report order.
    pub fn scan(&self, target: &ScanTarget, ctx: &ScanContext) -> Result<Vec<Hit>, ScanError> {
        let mut hits = self.hits(target, ctx).collect::<Result<Vec<_>, _>>()?;
        hits.sort_by(|a, b| a.cmp_for_report(b));
        Ok(hits)
    }

    fn regexes<'a>(
        &'a self,
        pick: fn(&'a CompiledPattern) -> Option<&'a Regex>,
    ) -> impl Iterator<Item = (&'a Signature, &'a Regex)> + 'a {
        self.db.entries().filter_map(move |(sig, compiled)| pick(compiled).map(|re| (sig, re)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Symbols,
    Section(usize),
    Done,
}

pub struct HitStream<'s> {
    scanner: &'s Scanner<'s>,
    target: &'s ScanTarget,
    ctx: &'s ScanContext,
    stage: Stage,
    pending: VecDeque<Hit>,
    claims: Claims,
    insn_budget: Option<usize>,
    insn_counts: HashMap<&'s str, usize>,
}

impl<'s> Iterator for HitStream<'s> {
    type Item = Result<Hit, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hit) = self.pending.pop_front() {
                return Some(Ok(hit));
            }
            if let Stage::Section(idx) = self.stage {
                if idx >= self.target.sections.len() {
                    self.stage = Stage::Done;
                }
            }
            if self.stage == Stage::Done {
                return None;
            }
            if let Err(err) = self.ctx.check() {
                self.stage = Stage::Done;
                return Some(Err(err));
            }
            match self.stage {
                Stage::Symbols => {
                    self.stage = Stage::Section(0);
                    if let Err(err) = self.scan_symbols() {
                        self.pending.clear();
                        self.stage = Stage::Done;
                        return Some(Err(err));
                    }
                }
                Stage::Section(idx) => {
                    self.stage = Stage::Section(idx + 1);
                    let target = self.target;
                    if let Err(err) = self.scan_section(&target.sections[idx]) {
                        self.pending.clear();
                        self.stage = Stage::Done;
                        return Some(Err(err));
                    }
                }
                Stage::Done => {}
            }
        }
    }
}

impl<'s> HitStream<'s> {
    fn section_at(&self, offset: usize) -> Option<&'s Section> {
        self.target.sections.iter().find(|s| s.offset <= offset && offset < s.end())
    }

    fn scan_symbols(&mut self) -> Result<(), ScanError> {
        let symbol_patterns: Vec<_> = self
            .scanner
            .regexes(|c| match c {
                CompiledPattern::Symbol(re) => Some(re),
                _ => None,
            })
            .collect();
        if symbol_patterns.is_empty() {
            return Ok(());
        }
        for sym in &self.target.symbols {
            self.ctx.check()?;
            for &(sig, re) in &symbol_patterns {
                let Some(caps) = re.captures(&sym.name) else { continue };
                let (offset, length) = match sym.name_range {
                    Some((start, end)) => {
                        self.claims.claim_symbol(start, end);
                        (Some(start as u64), (end - start) as u64)
                    }
                    None => (None, sym.name.len() as u64),
                };
                let section = sym
                    .name_range
                    .and_then(|(start, _)| self.section_at(start))
                    .map(|s| s.name.clone());
                self.pending.push_back(Hit {
                    signature_id: sig.id.clone(),
                    family: sig.family,
                    source: HitSource::Symbol,
                    offset,
                    length,
                    section,
                    symbol: Some(sym.name.clone()),
                    distance: 0,
                    key_bits: key_bits_from(Some(&caps), sig),
                    confidence: sig.weight,
                });
            }
        }
        debug!(path = %self.target.path.display(), hits = self.pending.len(), "symbol phase done");
        Ok(())
    }

    fn scan_section(&mut self, section: &'s Section) -> Result<(), ScanError> {
        let target = self.target;
        let data = target.section_data(section);
        if data.is_empty() {
            return Ok(());
        }
        if !section.executable {
            self.scan_strings(section, data)?;
        }
        self.scan_bytes(section, data)?;
        if section.executable {
            self.scan_instructions(section, data)?;
        }
        Ok(())
    }

    fn scan_strings(&mut self, section: &Section, data: &[u8]) -> Result<(), ScanError> {
        let string_patterns: Vec<_> = self
            .scanner
            .regexes(|c| match c {
                CompiledPattern::String(re) => Some(re),
                _ => None,
            })
            .collect();
        if string_patterns.is_empty() {
            return Ok(());
        }
        let ctx = self.ctx;
        let runs = strings::printable_runs(data, self.scanner.options.min_string_len, || ctx.check())?;
        let mut since_check = 0usize;
        for (run_offset, text) in runs {
            since_check += text.len();
            if since_check >= bytes::CHECK_INTERVAL {
                since_check = 0;
                ctx.check()?;
            }
            for &(sig, re) in &string_patterns {
                for caps in re.captures_iter(text) {
                    let Some(whole) = caps.get(0) else { continue };
                    if whole.as_str().is_empty() {
                        continue;
                    }
                    let start = section.offset + run_offset + whole.start();
                    let end = start + whole.len();
                    if self.claims.overlaps_symbol(start, end) {
                        continue;
                    }
                    self.claims.claim(start, end);
                    self.pending.push_back(Hit {
                        signature_id: sig.id.clone(),
                        family: sig.family,
                        source: HitSource::String,
                        offset: Some(start as u64),
                        length: whole.len() as u64,
                        section: Some(section.name.clone()),
                        symbol: None,
                        distance: 0,
                        key_bits: key_bits_from(Some(&caps), sig),
                        confidence: sig.weight * STRING_CONFIDENCE_FACTOR,
                    });
                }
            }
        }
        Ok(())
    }

    fn scan_bytes(&mut self, section: &Section, data: &[u8]) -> Result<(), ScanError> {
        let signatures = self.scanner.db.signatures();
        let patterns: Vec<BytePattern<'_>> = self
            .scanner
            .db
            .entries()
            .enumerate()
            .filter_map(|(order, (_, compiled))| match compiled {
                CompiledPattern::Bytes(pattern) => Some(BytePattern {
                    order,
                    bytes: pattern,
                    tolerance: bytes::effective_tolerance(self.scanner.options.threshold, pattern.len()),
                }),
                _ => None,
            })
            .collect();
        let ctx = self.ctx;
        let candidates =
            bytes::find_candidates(data, section.offset, &patterns, self.scanner.window, || ctx.check())?;
        for ByteMatch { order, start, len, distance } in bytes::resolve(candidates, &self.claims) {
            let sig = &signatures[order];
            self.claims.claim(start, start + len);
            let closeness = 1.0 - f64::from(distance) / len as f64;
            self.pending.push_back(Hit {
                signature_id: sig.id.clone(),
                family: sig.family,
                source: HitSource::Bytes,
                offset: Some(start as u64),
                length: len as u64,
                section: Some(section.name.clone()),
                symbol: None,
                distance,
                key_bits: sig.key_bits,
                confidence: sig.weight * closeness,
            });
        }
        Ok(())
    }

    fn scan_instructions(&mut self, section: &Section, data: &[u8]) -> Result<(), ScanError> {
        let insn_patterns: Vec<_> = self
            .scanner
            .regexes(|c| match c {
                CompiledPattern::Instruction(re) => Some(re),
                _ => None,
            })
            .collect();
        if insn_patterns.is_empty() || self.insn_budget == Some(0) {
            return Ok(());
        }
        if !instructions::AVAILABLE {
            debug!(section = %section.name, "instruction signatures skipped: disassembler not built in");
            return Ok(());
        }
        let Some(arch) = self.target.arch.as_deref() else {
            debug!(section = %section.name, "instruction scan skipped: unknown architecture");
            return Ok(());
        };
        let ctx = self.ctx;
        let counts = &mut self.insn_counts;
        let pending = &mut self.pending;
        let swept = instructions::sweep(arch, data, section.offset as u64, self.insn_budget, |chunk| {
            for insn in chunk {
                for &(sig, re) in &insn_patterns {
                    if !re.is_match(&insn.mnemonic) {
                        continue;
                    }
                    let count = counts.entry(sig.id.as_str()).or_insert(0);
                    if *count >= MAX_INSTRUCTION_HITS {
                        continue;
                    }
                    *count += 1;
                    pending.push_back(Hit {
                        signature_id: sig.id.clone(),
                        family: sig.family,
                        source: HitSource::Instruction,
                        offset: Some(insn.offset),
                        length: insn.len as u64,
                        section: Some(section.name.clone()),
                        symbol: Some(insn.mnemonic.clone()),
                        distance: 0,
                        key_bits: sig.key_bits,
                        confidence: sig.weight,
                    });
                }
            }
            ctx.check()
        });
        match swept {
            Ok(decoded) => {
                if let Some(budget) = self.insn_budget.as_mut() {
                    *budget = budget.saturating_sub(decoded);
                }
                Ok(())
            }
            Err(instructions::SweepError::Stopped(err)) => Err(err),
            Err(instructions::SweepError::Backend(err)) => {
                warn!(path = %self.target.path.display(), section = %section.name, %err, "instruction scan failed");
                Ok(())
            }
        }
    }
}
