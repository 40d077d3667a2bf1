//! Instruction mnemonic extraction for executable sections.

use super::ScanError;

/// Instructions decoded per disassembler call; the visitor runs after each chunk.
pub(crate) const CHUNK_INSNS: usize = 4096;

/// A decoded instruction, located by absolute file offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedInsn {
    pub offset: u64,
    pub len: usize,
    pub mnemonic: String,
}

#[derive(Debug)]
pub(crate) enum SweepError {
    /// The visitor asked to stop.
    Stopped(ScanError),
    Backend(String),
}

#[cfg(feature = "capstone-backend")]
mod backend {
    use capstone::{arch, prelude::*, Capstone};

    use super::{DecodedInsn, ScanError, SweepError, CHUNK_INSNS};

    pub(crate) const AVAILABLE: bool = true;

    fn make_cs(arch: &str) -> Result<Option<Capstone>, String> {
        let built = match arch {
            "x86_64" => Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).build(),
            "x86" => Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).build(),
            "arm" => Capstone::new().arm().mode(arch::arm::ArchMode::Arm).build(),
            "arm64" => Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).build(),
            _ => return Ok(None),
        };
        let mut cs = built.map_err(|e| format!("capstone init failed for {arch}: {e}"))?;
        cs.set_skipdata(true).map_err(|e| format!("capstone skipdata failed: {e}"))?;
        Ok(Some(cs))
    }

    /// Linear sweep over `code`, which starts at file offset `base`, handing
    /// each decoded chunk to `visit`. Returns the number of instructions decoded.
    pub(crate) fn sweep(
        arch: &str,
        code: &[u8],
        base: u64,
        limit: Option<usize>,
        mut visit: impl FnMut(Vec<DecodedInsn>) -> Result<(), ScanError>,
    ) -> Result<usize, SweepError> {
        let Some(cs) = make_cs(arch).map_err(SweepError::Backend)? else {
            return Ok(0);
        };
        let mut pos = 0usize;
        let mut decoded = 0usize;
        while pos < code.len() {
            let want = match limit {
                Some(limit) if decoded >= limit => break,
                Some(limit) => (limit - decoded).min(CHUNK_INSNS),
                None => CHUNK_INSNS,
            };
            let insns = cs
                .disasm_count(&code[pos..], base + pos as u64, want)
                .map_err(|e| SweepError::Backend(format!("disassembly failed: {e}")))?;
            if insns.is_empty() {
                break;
            }
            let mut next = pos;
            let mut chunk = Vec::with_capacity(insns.len());
            for insn in insns.iter() {
                next = (insn.address() - base) as usize + insn.bytes().len();
                if let Some(m) = insn.mnemonic() {
                    chunk.push(DecodedInsn { offset: insn.address(), len: insn.bytes().len(), mnemonic: m.to_string() });
                }
            }
            decoded += insns.len();
            visit(chunk).map_err(SweepError::Stopped)?;
            if next <= pos {
                break;
            }
            pos = next;
        }
        Ok(decoded)
    }
}

#[cfg(not(feature = "capstone-backend"))]
mod backend {
    use super::{DecodedInsn, ScanError, SweepError};

    pub(crate) const AVAILABLE: bool = false;

    pub(crate) fn sweep(
        _arch: &str,
        _code: &[u8],
        _base: u64,
        _limit: Option<usize>,
        _visit: impl FnMut(Vec<DecodedInsn>) -> Result<(), ScanError>,
    ) -> Result<usize, SweepError> {
        Ok(0)
    }
}

pub(crate) use backend::{sweep, AVAILABLE};
