//! Binary loader: structural, read-only parsing of ELF/PE/Mach-O containers.
//!
//! The loader never maps or executes the target. It reads the file once,
//! recognizes the container by magic, lets `goblin` parse the headers, and
//! copies out the pieces the scanner needs (sections with file ranges,
//! symbols, needed libraries) into an owned [`ScanTarget`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use goblin::mach::load_command::CommandVariant;
use goblin::{elf, mach, pe, Object};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::model::{BinaryFormat, ErrorKind, ScanTarget, Section, SymbolEntry, SymbolKind};
use crate::scanner::{ScanContext, ScanError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Unsupported format for {path}: {detail}")]
    UnsupportedFormat { path: PathBuf, detail: String },
    #[error("Corrupt input {path}: {detail}")]
    CorruptInput { path: PathBuf, detail: String },
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Loading {path} stopped: {source}")]
    Interrupted {
        path: PathBuf,
        #[source]
        source: ScanError,
    },
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            LoadError::CorruptInput { .. } => ErrorKind::CorruptInput,
            LoadError::Io { .. } => ErrorKind::Io,
            LoadError::Interrupted { source, .. } => source.kind(),
        }
    }
}

const MACHO_MAGICS: [[u8; 4]; 4] = [
    [0xfe, 0xed, 0xfa, 0xce],
    [0xfe, 0xed, 0xfa, 0xcf],
    [0xce, 0xfa, 0xed, 0xfe],
    [0xcf, 0xfa, 0xed, 0xfe],
];

const FAT_MAGICS: [[u8; 4]; 2] = [[0xca, 0xfe, 0xba, 0xbe], [0xca, 0xfe, 0xba, 0xbf]];

/// Bytes hashed between two context checks.
const HASH_CHUNK: usize = 4 * 1024 * 1024;

/// Longest export name read back from a PE name pointer.
const MAX_PE_NAME: usize = 4096;

/// Recognize the container by magic bytes alone.
pub fn sniff_format(bytes: &[u8]) -> Option<BinaryFormat> {
    if bytes.len() < 4 {
        return None;
    }
    let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if &magic == b"\x7fELF" {
        Some(BinaryFormat::Elf)
    } else if magic[..2] == *b"MZ" {
        Some(BinaryFormat::Pe)
    } else if MACHO_MAGICS.contains(&magic) {
        Some(BinaryFormat::Macho)
    } else {
        None
    }
}

/// Universal (fat) Mach-O header. Java class files share `0xcafebabe` but keep
/// a class-file version of 45 or more where the fat header stores its arch count.
pub fn is_fat_macho(bytes: &[u8]) -> bool {
    if bytes.len() < 8 || !FAT_MAGICS.iter().any(|m| bytes[..4] == *m) {
        return false;
    }
    let arches = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    (1..45).contains(&arches)
}

/// Read and parse a binary from disk.
pub fn load_target(path: &Path) -> Result<ScanTarget, LoadError> {
    load_target_with(path, &ScanContext::default())
}

/// Like [`load_target`], but stops with [`LoadError::Interrupted`] once `ctx`
/// is cancelled or past its deadline.
pub fn load_target_with(path: &Path, ctx: &ScanContext) -> Result<ScanTarget, LoadError> {
    let bytes =
        std::fs::read(path).map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
    load_bytes_with(path, bytes, ctx)
}

/// Parse an in-memory binary. `path` is used for identity and error messages only.
pub fn load_bytes(path: &Path, bytes: Vec<u8>) -> Result<ScanTarget, LoadError> {
    load_bytes_with(path, bytes, &ScanContext::default())
}

pub fn load_bytes_with(path: &Path, bytes: Vec<u8>, ctx: &ScanContext) -> Result<ScanTarget, LoadError> {
    let unsupported = |detail: String| LoadError::UnsupportedFormat { path: path.to_path_buf(), detail };
    let corrupt = |detail: String| LoadError::CorruptInput { path: path.to_path_buf(), detail };
    let check = || ctx.check().map_err(|source| LoadError::Interrupted { path: path.to_path_buf(), source });

    if is_fat_macho(&bytes) {
        return Err(unsupported("fat Mach-O archives are not supported; extract a slice first".into()));
    }
    let Some(format) = sniff_format(&bytes) else {
        return Err(unsupported("unrecognized magic".into()));
    };
    check()?;

    let parsed = match Object::parse(&bytes) {
        Ok(obj) => obj,
        Err(e) => return Err(corrupt(format!("{format} header parse failed: {e}"))),
    };
    check()?;

    let layout = match parsed {
        Object::Elf(elf) => elf_layout(&elf, &bytes),
        Object::PE(pe) => pe_layout(&pe, &bytes),
        Object::Mach(mach::Mach::Binary(macho)) => macho_layout(&macho, &bytes),
        _ => return Err(unsupported(format!("{format} magic but unrecognized container"))),
    };

    let mut layout = layout.map_err(corrupt)?;
    validate_sections(&layout.sections, bytes.len()).map_err(corrupt)?;
    check()?;

    layout.sections.sort_by(|a, b| a.offset.cmp(&b.offset).then_with(|| a.name.cmp(&b.name)));

    let mut symbols: Vec<SymbolEntry> = layout
        .symbols
        .into_iter()
        .map(|raw| SymbolEntry {
            name: raw.name,
            address: raw.address,
            kind: raw.kind,
            library: raw.library,
            name_range: raw.name_range,
        })
        .collect();
    symbols.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.address.cmp(&b.address))
            .then_with(|| a.library.cmp(&b.library))
    });
    symbols.dedup_by(|a, b| a.name == b.name && a.address == b.address && a.kind == b.kind);

    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(HASH_CHUNK) {
        check()?;
        hasher.update(chunk);
    }
    let sha256 = format!("{:x}", hasher.finalize());
    debug!(
        path = %path.display(),
        %format,
        sections = layout.sections.len(),
        symbols = symbols.len(),
        "loaded target"
    );

    Ok(ScanTarget {
        path: path.to_path_buf(),
        format,
        arch: layout.arch,
        sha256,
        bytes,
        sections: layout.sections,
        symbols,
        libraries: layout.libraries,
    })
}

struct RawSymbol {
    name: String,
    address: u64,
    kind: SymbolKind,
    library: Option<String>,
    name_range: Option<(usize, usize)>,
}

struct Layout {
    arch: Option<String>,
    sections: Vec<Section>,
    symbols: Vec<RawSymbol>,
    libraries: Vec<String>,
}

fn elf_arch(machine: u16) -> Option<String> {
    match machine {
        elf::header::EM_X86_64 => Some("x86_64".into()),
        elf::header::EM_386 => Some("x86".into()),
        elf::header::EM_AARCH64 => Some("arm64".into()),
        elf::header::EM_ARM => Some("arm".into()),
        _ => None,
    }
}

fn elf_layout(elf: &elf::Elf, bytes: &[u8]) -> Result<Layout, String> {
    let mut sections = Vec::new();
    for (idx, sh) in elf.section_headers.iter().enumerate() {
        if sh.sh_type == elf::section_header::SHT_NOBITS || sh.sh_type == elf::section_header::SHT_NULL
        {
            continue;
        }
        if sh.sh_size == 0 {
            continue;
        }
        let name = elf
            .shdr_strtab
            .get_at(sh.sh_name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("section_{idx}"));
        let offset = usize::try_from(sh.sh_offset)
            .map_err(|_| format!("section {name} offset 0x{:X} does not fit in memory", sh.sh_offset))?;
        let size = usize::try_from(sh.sh_size)
            .map_err(|_| format!("section {name} size 0x{:X} does not fit in memory", sh.sh_size))?;
        sections.push(Section {
            name,
            offset,
            size,
            address: sh.sh_addr,
            executable: sh.sh_flags & u64::from(elf::section_header::SHF_EXECINSTR) != 0,
        });
    }

    // File offsets of the two string tables, the same ones goblin read the names from.
    let symtab_strings = elf
        .section_headers
        .iter()
        .rfind(|sh| sh.sh_type == elf::section_header::SHT_SYMTAB)
        .and_then(|sh| elf.section_headers.get(sh.sh_link as usize))
        .and_then(|strtab| usize::try_from(strtab.sh_offset).ok());
    let dynamic_strings = elf.dynamic.as_ref().map(|d| d.info.strtab).filter(|offset| *offset != 0);

    let mut symbols = Vec::new();
    let tables = [(&elf.syms, &elf.strtab, symtab_strings), (&elf.dynsyms, &elf.dynstrtab, dynamic_strings)];
    for (table, strtab, strings_at) in tables {
        for sym in table.iter() {
            let Some(name) = strtab.get_at(sym.st_name) else { continue };
            if name.is_empty() || sym.st_type() == elf::sym::STT_SECTION || sym.st_type() == elf::sym::STT_FILE
            {
                continue;
            }
            let kind = if sym.st_shndx == elf::section_header::SHN_UNDEF as usize {
                SymbolKind::Import
            } else {
                SymbolKind::Defined
            };
            symbols.push(RawSymbol {
                name: name.to_string(),
                address: sym.st_value,
                kind,
                library: None,
                name_range: strings_at
                    .and_then(|base| base.checked_add(sym.st_name))
                    .and_then(|offset| name_at(bytes, offset, name)),
            });
        }
    }

    // An ELF with no section headers still has bytes worth scanning.
    if sections.is_empty() && !bytes.is_empty() {
        sections.push(Section {
            name: "<file>".into(),
            offset: 0,
            size: bytes.len(),
            address: 0,
            executable: false,
        });
    }

    Ok(Layout {
        arch: elf_arch(elf.header.e_machine),
        sections,
        symbols,
        libraries: elf.libraries.iter().map(|s| s.to_string()).collect(),
    })
}

fn pe_arch(machine: u16) -> Option<String> {
    match machine {
        pe::header::COFF_MACHINE_X86 => Some("x86".into()),
        pe::header::COFF_MACHINE_X86_64 => Some("x86_64".into()),
        pe::header::COFF_MACHINE_ARM => Some("arm".into()),
        pe::header::COFF_MACHINE_ARM64 => Some("arm64".into()),
        _ => None,
    }
}

/// File offset of an RVA that lands in some section's raw data.
fn rva_to_offset(sections: &[pe::section_table::SectionTable], rva: u32) -> Option<usize> {
    sections.iter().find_map(|sec| {
        let delta = rva.checked_sub(sec.virtual_address)?;
        (delta < sec.size_of_raw_data).then(|| sec.pointer_to_raw_data as usize + delta as usize)
    })
}

/// Name ranges of imported names, from the hint/name entries of every import lookup table.
fn pe_import_names(pe: &pe::PE, bytes: &[u8]) -> HashMap<String, (usize, usize)> {
    let mut ranges = HashMap::new();
    let Some(data) = &pe.import_data else { return ranges };
    for entry in &data.import_data {
        for lookup in entry.import_lookup_table.iter().flatten() {
            let pe::import::SyntheticImportLookupTableEntry::HintNameTableRVA((rva, hint)) = lookup else {
                continue;
            };
            // The name follows a two-byte hint.
            let range = rva_to_offset(&pe.sections, *rva)
                .and_then(|offset| offset.checked_add(2))
                .and_then(|offset| name_at(bytes, offset, hint.name));
            if let Some(range) = range {
                ranges.entry(hint.name.to_string()).or_insert(range);
            }
        }
    }
    ranges
}

/// Name ranges of exported names, from the export name pointer table.
fn pe_export_names(pe: &pe::PE, bytes: &[u8]) -> HashMap<String, (usize, usize)> {
    let mut ranges = HashMap::new();
    let Some(export) = &pe.export_data else { return ranges };
    for &rva in &export.export_name_pointer_table {
        let Some(offset) = rva_to_offset(&pe.sections, rva) else { continue };
        let Some(tail) = bytes.get(offset..) else { continue };
        let Some(len) = tail.iter().take(MAX_PE_NAME).position(|b| *b == 0) else { continue };
        if let Ok(name) = std::str::from_utf8(&tail[..len]) {
            ranges.entry(name.to_string()).or_insert((offset, offset + len));
        }
    }
    ranges
}

fn pe_layout(pe: &pe::PE, bytes: &[u8]) -> Result<Layout, String> {
    let mut sections = Vec::new();
    for (idx, sec) in pe.sections.iter().enumerate() {
        if sec.size_of_raw_data == 0 || sec.pointer_to_raw_data == 0 {
            continue;
        }
        let name = sec.name().map(str::to_string).unwrap_or_else(|_| format!("section_{idx}"));
        sections.push(Section {
            name,
            offset: sec.pointer_to_raw_data as usize,
            size: sec.size_of_raw_data as usize,
            address: u64::from(sec.virtual_address),
            executable: sec.characteristics & pe::section_table::IMAGE_SCN_MEM_EXECUTE != 0,
        });
    }

    let import_names = pe_import_names(pe, bytes);
    let export_names = pe_export_names(pe, bytes);

    let mut symbols = Vec::new();
    for imp in &pe.imports {
        let name = imp.name.to_string();
        if name.is_empty() || name.starts_with("ORDINAL ") {
            continue;
        }
        symbols.push(RawSymbol {
            name_range: import_names.get(&name).copied(),
            name,
            address: imp.rva as u64,
            kind: SymbolKind::Import,
            library: Some(imp.dll.to_string()),
        });
    }
    for exp in &pe.exports {
        let Some(name) = exp.name.filter(|n| !n.is_empty()) else { continue };
        symbols.push(RawSymbol {
            name: name.to_string(),
            address: exp.rva as u64,
            kind: SymbolKind::Defined,
            library: None,
            name_range: export_names.get(name).copied(),
        });
    }

    Ok(Layout {
        arch: pe_arch(pe.header.coff_header.machine),
        sections,
        symbols,
        libraries: pe.libraries.iter().map(|s| s.to_string()).collect(),
    })
}

fn macho_arch(cputype: u32) -> Option<String> {
    match cputype {
        mach::cputype::CPU_TYPE_X86 => Some("x86".into()),
        mach::cputype::CPU_TYPE_X86_64 => Some("x86_64".into()),
        mach::cputype::CPU_TYPE_ARM => Some("arm".into()),
        mach::cputype::CPU_TYPE_ARM64 => Some("arm64".into()),
        _ => None,
    }
}

/// Section type bits of a Mach-O section's flags.
const MACHO_SECTION_TYPE: u32 = 0xff;
const MACHO_S_ZEROFILL: u32 = 0x1;
const MACHO_S_GB_ZEROFILL: u32 = 0xc;
const MACHO_S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;
const MACHO_S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
const MACHO_S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;

fn macho_layout(macho: &mach::MachO, bytes: &[u8]) -> Result<Layout, String> {
    let mut sections = Vec::new();
    for group in macho.segments.sections() {
        for entry in group {
            let (sec, _data) = entry.map_err(|e| format!("Mach-O section table: {e}"))?;
            let sec_type = sec.flags & MACHO_SECTION_TYPE;
            if matches!(sec_type, MACHO_S_ZEROFILL | MACHO_S_GB_ZEROFILL | MACHO_S_THREAD_LOCAL_ZEROFILL)
                || sec.size == 0
            {
                continue;
            }
            let segname = sec.segname().unwrap_or("");
            let sectname = sec.name().unwrap_or("");
            let size = usize::try_from(sec.size)
                .map_err(|_| format!("section {segname},{sectname} size does not fit in memory"))?;
            sections.push(Section {
                name: format!("{segname},{sectname}"),
                offset: sec.offset as usize,
                size,
                address: sec.addr,
                executable: sec.flags
                    & (MACHO_S_ATTR_PURE_INSTRUCTIONS | MACHO_S_ATTR_SOME_INSTRUCTIONS)
                    != 0,
            });
        }
    }

    let string_table = macho.load_commands.iter().find_map(|lc| match &lc.command {
        CommandVariant::Symtab(symtab) => Some(symtab.stroff as usize),
        _ => None,
    });

    let mut symbols = Vec::new();
    for sym in macho.symbols() {
        let Ok((raw_name, nlist)) = sym else { continue };
        if nlist.is_stab() {
            continue;
        }
        let name = raw_name.strip_prefix('_').unwrap_or(raw_name);
        if name.is_empty() {
            continue;
        }
        let kind = if nlist.is_undefined() { SymbolKind::Import } else { SymbolKind::Defined };
        // The range covers the name as stored, leading underscore included.
        let name_range = string_table
            .and_then(|base| base.checked_add(nlist.n_strx))
            .and_then(|offset| name_at(bytes, offset, raw_name));
        symbols.push(RawSymbol {
            name: name.to_string(),
            address: nlist.n_value,
            kind,
            library: None,
            name_range,
        });
    }

    Ok(Layout {
        arch: macho_arch(macho.header.cputype),
        sections,
        symbols,
        libraries: macho.libs.iter().filter(|l| **l != "self").map(|s| s.to_string()).collect(),
    })
}

/// Reject section tables that point past the end of the file.
fn validate_sections(sections: &[Section], file_len: usize) -> Result<(), String> {
    for sec in sections {
        let end = sec.offset.checked_add(sec.size).ok_or_else(|| {
            format!("section {} range overflows (offset 0x{:X}, size 0x{:X})", sec.name, sec.offset, sec.size)
        })?;
        if end > file_len {
            return Err(format!(
                "section {} extends past end of file (0x{:X}..0x{:X}, file size 0x{:X})",
                sec.name, sec.offset, end, file_len
            ));
        }
    }
    Ok(())
}

/// Range of `name` at `offset`, when the file really holds it there followed by a NUL.
fn name_at(bytes: &[u8], offset: usize, name: &str) -> Option<(usize, usize)> {
    if name.is_empty() {
        return None;
    }
    let end = offset.checked_add(name.len())?;
    let stored = bytes.get(offset..end)?;
    let terminated = bytes.get(end).map_or(true, |b| *b == 0);
    (stored == name.as_bytes() && terminated).then_some((offset, end))
}
