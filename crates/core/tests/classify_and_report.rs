mod common;

use std::path::Path;

use pqc_core::classifier::classify;
use pqc_core::loader::load_bytes;
use pqc_core::model::{
    AlgorithmFamily, BatchReport, ErrorKind, Hit, HitSource, KeySizeHint, QuantumSafety, TargetError,
    TargetIdentity,
};
use pqc_core::report::{batch_report, build_report, failed_report, from_json, render_text, to_json};
use pqc_core::scanner::{ScanContext, ScanOptions, Scanner};
use pqc_core::signatures::SignatureDatabase;

use common::{rsa_fixture, SHA256_IV};

fn hit(id: &str, family: AlgorithmFamily, confidence: f64, key_bits: Option<KeySizeHint>) -> Hit {
    Hit {
        signature_id: id.to_string(),
        family,
        source: HitSource::Symbol,
        offset: None,
        length: 0,
        section: None,
        symbol: Some(id.to_string()),
        distance: 0,
        key_bits,
        confidence,
    }
}

fn rsa_batch() -> BatchReport {
    let db = SignatureDatabase::builtin().unwrap();
    let target = load_bytes(Path::new("rsa.o"), rsa_fixture().rodata(&SHA256_IV).elf()).unwrap();
    let hits = Scanner::new(&db, ScanOptions::default()).scan(&target, &ScanContext::default()).unwrap();
    let report = build_report(target.identity(), classify(&hits, &db));
    batch_report(vec![report])
}

#[test]
fn no_hits_means_no_verdicts() {
    let db = SignatureDatabase::builtin().unwrap();
    assert!(classify(&[], &db).is_empty());
}

#[test]
fn rsa_fixture_is_classical_vulnerable_with_pinned_key_size() {
    let batch = rsa_batch();
    let report = &batch.reports[0];
    let rsa = report.verdicts.iter().find(|v| v.family == AlgorithmFamily::Rsa).expect("RSA verdict");

    assert_eq!(rsa.status, QuantumSafety::ClassicalVulnerable);
    assert_eq!(rsa.key_bits, Some(KeySizeHint::exact(2048)));
    assert_eq!(rsa.evidence.len(), 2);
    assert!((rsa.confidence - (0.9 + 0.42) / 2.0).abs() < 1e-9);
    assert!(rsa.recommendation.contains("ML-KEM"));

    let sha2 = report.verdicts.iter().find(|v| v.family == AlgorithmFamily::Sha2).expect("SHA-2 verdict");
    assert_eq!(sha2.status, QuantumSafety::QuantumSafe);

    assert!(report.is_vulnerable());
    assert_eq!(batch.summary.vulnerable_targets, 1);
    assert_eq!(report.summary.hits, report.verdicts.iter().map(|v| v.evidence.len()).sum::<usize>());
}

#[test]
fn vulnerable_evidence_outranks_safe_evidence() {
    let db = SignatureDatabase::builtin().unwrap();
    let hits = vec![
        hit("openssl.aes.evp_256", AlgorithmFamily::Aes, 0.8, None),
        hit("insn.aes.x86", AlgorithmFamily::Aes, 0.5, None),
    ];
    let verdicts = classify(&hits, &db);
    assert_eq!(verdicts.len(), 1);
    assert_eq!(verdicts[0].status, QuantumSafety::QuantumSafe);

    let only_unknown = classify(&hits[1..], &db);
    assert_eq!(only_unknown[0].status, QuantumSafety::Unknown);

    let mixed = vec![
        hit("openssl.sha2", AlgorithmFamily::Sha2, 0.7, None),
        hit("openssl.rsa.keygen", AlgorithmFamily::Sha2, 0.9, None),
    ];
    assert_eq!(classify(&mixed, &db)[0].status, QuantumSafety::ClassicalVulnerable);
}

#[test]
fn confidence_is_capped_and_monotonic() {
    let db = SignatureDatabase::builtin().unwrap();
    let one = vec![hit("openssl.rsa.ops", AlgorithmFamily::Rsa, 0.8, None)];
    let two = vec![one[0].clone(), hit("openssl.rsa.lifecycle", AlgorithmFamily::Rsa, 0.6, None)];
    let many: Vec<Hit> = (0..5).map(|_| one[0].clone()).collect();

    let c1 = classify(&one, &db)[0].confidence;
    let c2 = classify(&two, &db)[0].confidence;
    let cn = classify(&many, &db)[0].confidence;
    assert!(c1 > 0.0 && c1 < c2);
    assert_eq!(cn, 1.0);
}

#[test]
fn narrowest_key_size_wins() {
    let db = SignatureDatabase::builtin().unwrap();
    let hits = vec![
        hit("openssl.rsa.keygen", AlgorithmFamily::Rsa, 0.9, Some(KeySizeHint::new(512, 16384))),
        hit("string.rsa.keysize", AlgorithmFamily::Rsa, 0.42, Some(KeySizeHint::exact(3072))),
        hit("string.rsa.keysize", AlgorithmFamily::Rsa, 0.3, Some(KeySizeHint::exact(1024))),
    ];
    assert_eq!(classify(&hits, &db)[0].key_bits, Some(KeySizeHint::exact(3072)));
}

#[test]
fn verdicts_are_ordered_by_family_name() {
    let db = SignatureDatabase::builtin().unwrap();
    let hits = vec![
        hit("openssl.sha2", AlgorithmFamily::Sha2, 0.7, None),
        hit("openssl.rsa.ops", AlgorithmFamily::Rsa, 0.8, None),
        hit("openssl.aes.evp_256", AlgorithmFamily::Aes, 0.8, None),
    ];
    let report = build_report(TargetIdentity::unloaded("x", 0), classify(&hits, &db));
    let families: Vec<&str> = report.verdicts.iter().map(|v| v.family.as_str()).collect();
    assert_eq!(families, vec!["AES", "RSA", "SHA-2"]);
    assert_eq!(report.summary.quantum_safe, 2);
    assert_eq!(report.summary.classical_vulnerable, 1);
}

#[test]
fn json_round_trips_and_is_deterministic() {
    let batch = rsa_batch();
    let body = to_json(&batch).expect("serialize");
    assert_eq!(body, to_json(&rsa_batch()).unwrap(), "same input, same bytes");

    let parsed: BatchReport = from_json(&body).expect("parse back");
    assert_eq!(parsed, batch);

    assert!(body.contains("\"family\": \"RSA\""));
    assert!(body.contains("\"status\": \"classical-vulnerable\""));
    assert!(from_json::<BatchReport>("{ not json").is_err());
}

#[test]
fn failed_reports_carry_only_the_error() {
    let error = TargetError { kind: ErrorKind::CorruptInput, message: "bad header".into() };
    let report = failed_report(TargetIdentity::unloaded("broken.bin", 12), error.clone());
    assert!(report.is_failed());
    assert!(report.verdicts.is_empty());

    let batch = batch_report(vec![report]);
    assert!(batch.any_failed());
    assert!(!batch.any_vulnerable());
    let body = to_json(&batch).unwrap();
    assert!(body.contains("\"kind\": \"corrupt_input\""));
}

#[test]
fn text_rendering_lists_verdicts_and_summary() {
    let mut batch = rsa_batch();
    batch.reports.push(failed_report(
        TargetIdentity::unloaded("notes.txt", 5),
        TargetError { kind: ErrorKind::UnsupportedFormat, message: "unrecognized magic".into() },
    ));
    batch = batch_report(batch.reports);

    let text = render_text(&batch);
    assert!(text.starts_with("rsa.o [elf/x86_64, "));
    assert!(text.contains("RSA      classical-vulnerable  confidence 0.66 2048-bit (2 hits)"));
    assert!(text.contains("notes.txt [?/?, 5 bytes]"));
    assert!(text.contains("error (unsupported_format): unrecognized magic"));
    let summary = format!(
        "2 targets, 1 failed, 1 with classical-vulnerable crypto, {} verdicts",
        batch.summary.verdicts
    );
    assert!(text.trim_end().ends_with(&summary));
}
