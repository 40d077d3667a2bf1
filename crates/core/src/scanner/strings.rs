//! Printable string extraction.

use super::bytes::CHECK_INTERVAL;
use super::ScanError;

/// Printable ASCII runs of at least `min_len` bytes, with their offset in `data`.
/// `check` runs every [`CHECK_INTERVAL`] bytes.
pub(crate) fn printable_runs(
    data: &[u8],
    min_len: usize,
    mut check: impl FnMut() -> Result<(), ScanError>,
) -> Result<Vec<(usize, &str)>, ScanError> {
    let min_len = min_len.max(1);
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, byte) in data.iter().enumerate() {
        if idx > 0 && idx % CHECK_INTERVAL == 0 {
            check()?;
        }
        let printable = matches!(byte, 0x20..=0x7e | b'\t');
        match (printable, start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                push_run(data, s, idx, min_len, &mut runs);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        push_run(data, s, data.len(), min_len, &mut runs);
    }
    Ok(runs)
}

fn push_run<'a>(data: &'a [u8], start: usize, end: usize, min_len: usize, out: &mut Vec<(usize, &'a str)>) {
    if end - start < min_len {
        return;
    }
    if let Ok(text) = std::str::from_utf8(&data[start..end]) {
        out.push((start, text));
    }
}
