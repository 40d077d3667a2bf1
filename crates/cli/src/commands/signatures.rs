use std::path::PathBuf;

use anyhow::{Context, Result};
use pqc_core::signatures::SignatureDatabase;
use serde::Serialize;

#[derive(Serialize)]
struct SignatureEntryJson<'a> {
    id: &'a str,
    family: &'a str,
    kind: &'a str,
    pattern: &'a str,
    safety: &'a str,
    weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_bits: Option<String>,
    fingerprint: &'a str,
}

/// List the signatures that a scan with the same flags would use.
pub fn list_signatures_command(files: &[PathBuf], no_builtin: bool, json: bool) -> Result<()> {
    let db = SignatureDatabase::load(!no_builtin, files).context("Failed to load signature database")?;

    let entries: Vec<SignatureEntryJson<'_>> = db
        .signatures()
        .iter()
        .map(|sig| SignatureEntryJson {
            id: &sig.id,
            family: sig.family.as_str(),
            kind: sig.pattern.kind_name(),
            pattern: sig.pattern.source(),
            safety: sig.safety.as_str(),
            weight: sig.weight,
            key_bits: sig.key_bits.map(|k| k.to_string()),
            fingerprint: &sig.fingerprint,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Signatures: (none)");
        return Ok(());
    }

    println!("Signatures ({}):", entries.len());
    for entry in entries {
        let bits = entry.key_bits.map(|b| format!(" [{b}]")).unwrap_or_default();
        println!(
            "- {} ({}, {}, {}){bits}: {}",
            entry.id, entry.family, entry.kind, entry.safety, entry.pattern
        );
    }
    Ok(())
}
