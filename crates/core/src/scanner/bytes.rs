//! Sliding-window byte matching with a Hamming-distance tolerance.

use super::{Claims, ScanError};

/// How many window positions pass between two deadline/cancellation checks.
pub(crate) const CHECK_INTERVAL: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub(crate) struct BytePattern<'a> {
    /// Position of the signature in the database; used as the final tie-breaker.
    pub order: usize,
    pub bytes: &'a [u8],
    pub tolerance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ByteMatch {
    pub order: usize,
    /// Absolute file offset.
    pub start: usize,
    pub len: usize,
    pub distance: u32,
}

impl ByteMatch {
    fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Per-pattern tolerance: the configured threshold, capped at a quarter of the pattern.
pub(crate) fn effective_tolerance(threshold: u32, len: usize) -> u32 {
    threshold.min(u32::try_from(len / 4).unwrap_or(u32::MAX))
}

/// Hamming distance between equal-length slices, or `None` once it exceeds `limit`.
pub(crate) fn hamming_within(a: &[u8], b: &[u8], limit: u32) -> Option<u32> {
    let mut distance = 0u32;
    for (x, y) in a.iter().zip(b) {
        if x != y {
            distance += 1;
            if distance > limit {
                return None;
            }
        }
    }
    Some(distance)
}

/// Slide a window of `window` bytes across `data` and record every pattern that
/// matches at the window start within its tolerance.
pub(crate) fn find_candidates(
    data: &[u8],
    base: usize,
    patterns: &[BytePattern<'_>],
    window: usize,
    mut check: impl FnMut() -> Result<(), ScanError>,
) -> Result<Vec<ByteMatch>, ScanError> {
    let mut out = Vec::new();
    if patterns.is_empty() || window == 0 {
        return Ok(out);
    }
    for pos in 0..data.len() {
        if pos > 0 && pos % CHECK_INTERVAL == 0 {
            check()?;
        }
        let view = &data[pos..data.len().min(pos + window)];
        for pattern in patterns {
            let len = pattern.bytes.len();
            if len > view.len() {
                continue;
            }
            if let Some(distance) = hamming_within(&view[..len], pattern.bytes, pattern.tolerance) {
                out.push(ByteMatch { order: pattern.order, start: base + pos, len, distance });
            }
        }
    }
    Ok(out)
}

/// Pick the non-overlapping subset of candidates, lowest distance first, and
/// drop anything that overlaps an existing claim. Result is in file order.
pub(crate) fn resolve(mut candidates: Vec<ByteMatch>, claims: &Claims) -> Vec<ByteMatch> {
    candidates.sort_by(|a, b| {
        a.distance
            .cmp(&b.distance)
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| a.order.cmp(&b.order))
    });
    let mut accepted: Vec<ByteMatch> = Vec::new();
    for cand in candidates {
        if claims.overlaps_any(cand.start, cand.end()) {
            continue;
        }
        if accepted.iter().any(|a| cand.start < a.end() && a.start < cand.end()) {
            continue;
        }
        accepted.push(cand);
    }
    accepted.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.order.cmp(&b.order)));
    accepted
}
