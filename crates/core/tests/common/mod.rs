#![allow(dead_code)]

use std::path::{Path, PathBuf};

use object::pe as coff;
use object::write::pe::{NtHeaders, Writer};
use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

/// SHA-256 initial hash words H0..H3, little-endian as compiled into most binaries.
pub const SHA256_IV: [u8; 16] = [
    0x67, 0xe6, 0x09, 0x6a, 0x85, 0xae, 0x67, 0xbb, 0x72, 0xf3, 0x6e, 0x3c, 0x3a, 0xf5, 0x4f, 0xa5,
];

/// `aesenc xmm0, xmm1`
pub const AESENC: [u8; 5] = [0x66, 0x0f, 0x38, 0xdc, 0xc1];

/// Declarative description of a small test binary.
#[derive(Debug, Clone, Default)]
pub struct Fixture {
    pub imports: Vec<&'static str>,
    pub functions: Vec<String>,
    pub rodata: Vec<u8>,
    pub text: Vec<u8>,
}

impl Fixture {
    pub fn import(mut self, name: &'static str) -> Self {
        self.imports.push(name);
        self
    }

    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.functions.push(name.into());
        self
    }

    pub fn rodata(mut self, bytes: &[u8]) -> Self {
        self.rodata.extend_from_slice(bytes);
        self
    }

    pub fn text(mut self, bytes: &[u8]) -> Self {
        self.text.extend_from_slice(bytes);
        self
    }

    pub fn elf(&self) -> Vec<u8> {
        self.build(BinaryFormat::Elf)
    }

    pub fn macho(&self) -> Vec<u8> {
        self.build(BinaryFormat::MachO)
    }

    /// A PE32+ DLL: `imports` come from `dll`, `functions` are exported, and
    /// an uninitialized `.bss` section sits between `.rdata` and `.idata`.
    pub fn pe(&self, dll: &str) -> Vec<u8> {
        let mut text = self.text.clone();
        text.push(0xc3);
        let rdata = if self.rodata.is_empty() { vec![0] } else { self.rodata.clone() };
        let exports: Vec<&str> = self.functions.iter().map(String::as_str).collect();
        let idata_len = import_table(0, dll, &self.imports).len() as u32;
        let edata_len = export_table(0, &exports, 0).len() as u32;

        let mut buf = Vec::new();
        let mut writer = Writer::new(true, 0x1000, 0x200, &mut buf);
        writer.reserve_dos_header_and_stub();
        writer.reserve_nt_headers(coff::IMAGE_NUMBEROF_DIRECTORY_ENTRIES);
        writer.reserve_section_headers(5);
        let text_range = writer.reserve_text_section(text.len() as u32);
        let rdata_range = writer.reserve_rdata_section(rdata.len() as u32);
        writer.reserve_bss_section(0x100);
        let idata_range = writer.reserve_idata_section(idata_len);
        let edata_range = writer.reserve_edata_section(edata_len);

        let idata = import_table(idata_range.virtual_address, dll, &self.imports);
        let edata = export_table(edata_range.virtual_address, &exports, text_range.virtual_address);

        writer.write_dos_header_and_stub().expect("dos header");
        writer.write_nt_headers(NtHeaders {
            machine: coff::IMAGE_FILE_MACHINE_AMD64,
            time_date_stamp: 0,
            characteristics: coff::IMAGE_FILE_EXECUTABLE_IMAGE
                | coff::IMAGE_FILE_LARGE_ADDRESS_AWARE
                | coff::IMAGE_FILE_DLL,
            major_linker_version: 14,
            minor_linker_version: 0,
            address_of_entry_point: 0,
            image_base: 0x1_8000_0000,
            major_operating_system_version: 6,
            minor_operating_system_version: 0,
            major_image_version: 0,
            minor_image_version: 0,
            major_subsystem_version: 6,
            minor_subsystem_version: 0,
            subsystem: coff::IMAGE_SUBSYSTEM_WINDOWS_CUI,
            dll_characteristics: 0,
            size_of_stack_reserve: 0x10_0000,
            size_of_stack_commit: 0x1000,
            size_of_heap_reserve: 0x10_0000,
            size_of_heap_commit: 0x1000,
        });
        writer.write_section_headers();
        writer.write_section(text_range.file_offset, &text);
        writer.write_section(rdata_range.file_offset, &rdata);
        writer.write_section(idata_range.file_offset, &idata);
        writer.write_section(edata_range.file_offset, &edata);
        buf
    }

    fn build(&self, format: BinaryFormat) -> Vec<u8> {
        let mut obj = Object::new(format, Architecture::X86_64, Endianness::Little);

        let text_id = obj.section_id(StandardSection::Text);
        let mut text = self.text.clone();
        text.push(0xc3);
        obj.append_section_data(text_id, &text, 16);

        if !self.rodata.is_empty() {
            let ro_id = obj.section_id(StandardSection::ReadOnlyData);
            obj.append_section_data(ro_id, &self.rodata, 16);
        }

        for name in &self.functions {
            obj.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: 0,
                size: 0,
                kind: SymbolKind::Text,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Section(text_id),
                flags: SymbolFlags::None,
            });
        }
        for name in &self.imports {
            obj.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: 0,
                size: 0,
                kind: SymbolKind::Text,
                scope: SymbolScope::Dynamic,
                weak: false,
                section: SymbolSection::Undefined,
                flags: SymbolFlags::None,
            });
        }

        obj.write().expect("write fixture object")
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// `.idata` contents at RVA `base`: one import descriptor for `dll`, its lookup
/// and address tables, then the hint/name entries and the DLL name.
fn import_table(base: u32, dll: &str, names: &[&str]) -> Vec<u8> {
    let thunks = ((names.len() + 1) * 8) as u32;
    let lookup = 40;
    let address = lookup + thunks;
    let hints_at = address + thunks;

    let mut hints = Vec::new();
    let mut name_rvas = Vec::new();
    for name in names {
        name_rvas.push(base + hints_at + hints.len() as u32);
        put_u16(&mut hints, 0);
        hints.extend_from_slice(name.as_bytes());
        hints.push(0);
        if hints.len() % 2 == 1 {
            hints.push(0);
        }
    }
    let dll_rva = base + hints_at + hints.len() as u32;

    let mut out = Vec::new();
    put_u32(&mut out, base + lookup);
    put_u32(&mut out, 0);
    put_u32(&mut out, 0);
    put_u32(&mut out, dll_rva);
    put_u32(&mut out, base + address);
    out.extend_from_slice(&[0; 20]);
    for _ in 0..2 {
        for rva in &name_rvas {
            out.extend_from_slice(&u64::from(*rva).to_le_bytes());
        }
        out.extend_from_slice(&0u64.to_le_bytes());
    }
    out.extend_from_slice(&hints);
    out.extend_from_slice(dll.as_bytes());
    out.push(0);
    out
}

/// `.edata` contents at RVA `base`, exporting every name at `function_rva`.
fn export_table(base: u32, names: &[&str], function_rva: u32) -> Vec<u8> {
    let mut sorted = names.to_vec();
    sorted.sort_unstable();
    let count = sorted.len() as u32;
    let addresses = 40;
    let name_pointers = addresses + 4 * count;
    let ordinals = name_pointers + 4 * count;
    let strings_at = ordinals + 2 * count;

    let mut strings = b"fixture.dll\0".to_vec();
    let mut name_rvas = Vec::new();
    for name in &sorted {
        name_rvas.push(base + strings_at + strings.len() as u32);
        strings.extend_from_slice(name.as_bytes());
        strings.push(0);
    }

    let mut out = Vec::new();
    put_u32(&mut out, 0);
    put_u32(&mut out, 0);
    put_u16(&mut out, 0);
    put_u16(&mut out, 0);
    put_u32(&mut out, base + strings_at);
    put_u32(&mut out, 1);
    put_u32(&mut out, count);
    put_u32(&mut out, count);
    put_u32(&mut out, base + addresses);
    put_u32(&mut out, base + name_pointers);
    put_u32(&mut out, base + ordinals);
    for _ in 0..count {
        put_u32(&mut out, function_rva);
    }
    for rva in &name_rvas {
        put_u32(&mut out, *rva);
    }
    for ordinal in 0..count {
        put_u16(&mut out, ordinal as u16);
    }
    out.extend_from_slice(&strings);
    out
}

/// An object that calls RSA key generation and logs the key size; also uses AES-NI.
pub fn rsa_fixture() -> Fixture {
    Fixture::default()
        .import("RSA_generate_key_ex")
        .function("generate_host_key")
        .rodata(b"RSA 2048-bit key generated successfully!\0")
        .text(&AESENC)
}

/// An object with no cryptographic content.
pub fn clean_fixture() -> Fixture {
    Fixture::default().function("add_numbers").rodata(b"hello from a plain binary\0").text(&[0x90, 0x90])
}

pub fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write fixture");
    path
}
