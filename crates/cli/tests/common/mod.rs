#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

pub fn cli() -> Command {
    assert_cmd::cargo::cargo_bin_cmd!("pqc-inspect")
}

fn elf(import: Option<&str>, rodata: &[u8]) -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text_id = obj.section_id(StandardSection::Text);
    obj.append_section_data(text_id, &[0x90, 0xc3], 16);
    let ro_id = obj.section_id(StandardSection::ReadOnlyData);
    obj.append_section_data(ro_id, rodata, 16);

    obj.add_symbol(Symbol {
        name: b"main_loop".to_vec(),
        value: 0,
        size: 2,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text_id),
        flags: SymbolFlags::None,
    });
    if let Some(name) = import {
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

/// Object importing OpenSSL RSA key generation with a 2048-bit key string.
pub fn write_rsa(dir: &Path) -> PathBuf {
    let path = dir.join("rsa.o");
    std::fs::write(&path, elf(Some("RSA_generate_key_ex"), b"RSA 2048-bit key ready\0")).unwrap();
    path
}

/// Object with no cryptographic content.
pub fn write_clean(dir: &Path) -> PathBuf {
    let path = dir.join("clean.o");
    std::fs::write(&path, elf(None, b"plain old data\0")).unwrap();
    path
}

/// Object importing liboqs ML-KEM only.
pub fn write_kem(dir: &Path) -> PathBuf {
    let path = dir.join("kem.o");
    std::fs::write(&path, elf(Some("OQS_KEM_ml_kem_768_keypair"), b"ML-KEM-768 ready\0")).unwrap();
    path
}

pub fn write_garbage(dir: &Path) -> PathBuf {
    let path = dir.join("notes.txt");
    std::fs::write(&path, b"this is not a binary\n").unwrap();
    path
}
