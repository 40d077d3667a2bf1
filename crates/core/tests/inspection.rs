mod common;

use std::sync::Arc;
use std::time::Duration;

use pqc_core::model::{BinaryFormat, ErrorKind};
use pqc_core::scanner::{CancellationToken, ScanOptions};
use pqc_core::services::{InspectedTarget, Inspector};
use pqc_core::signatures::SignatureDatabase;
use tempfile::tempdir;

use common::{clean_fixture, rsa_fixture, write_fixture, Fixture};

fn inspector(options: ScanOptions) -> Inspector {
    Inspector::new(Arc::new(SignatureDatabase::builtin().unwrap()), options)
}

#[test]
fn batch_keeps_input_order_and_isolates_failures() {
    let dir = tempdir().expect("tempdir");
    let rsa = write_fixture(dir.path(), "rsa.o", &rsa_fixture().elf());
    let clean = write_fixture(dir.path(), "clean.o", &clean_fixture().elf());
    let text = write_fixture(dir.path(), "notes.txt", b"just some notes\n");
    let mut short = rsa_fixture().elf();
    short.truncate(20);
    let truncated = write_fixture(dir.path(), "short.o", &short);
    let missing = dir.path().join("missing.o");

    let paths = vec![rsa.clone(), text.clone(), clean.clone(), truncated, missing];
    let batch = inspector(ScanOptions::default())
        .with_threads(Some(2))
        .inspect_batch(&paths, &CancellationToken::new())
        .expect("batch runs");

    let reported: Vec<String> = batch.reports.iter().map(|r| r.target.path.clone()).collect();
    let expected: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    assert_eq!(reported, expected);

    let kinds: Vec<Option<ErrorKind>> =
        batch.reports.iter().map(|r| r.error.as_ref().map(|e| e.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            None,
            Some(ErrorKind::UnsupportedFormat),
            None,
            Some(ErrorKind::CorruptInput),
            Some(ErrorKind::Io),
        ]
    );

    assert!(batch.reports[0].is_vulnerable());
    assert_eq!(batch.reports[0].target.format, Some(BinaryFormat::Elf));
    assert!(batch.reports[2].verdicts.is_empty());
    assert_eq!(batch.reports[1].target.size, 16);

    assert_eq!(batch.summary.targets, 5);
    assert_eq!(batch.summary.failed, 3);
    assert_eq!(batch.summary.vulnerable_targets, 1);
}

#[test]
fn batch_results_do_not_depend_on_thread_count() {
    let dir = tempdir().expect("tempdir");
    let paths: Vec<_> = (0..6)
        .map(|i| {
            let bytes = if i % 2 == 0 { rsa_fixture().elf() } else { clean_fixture().elf() };
            write_fixture(dir.path(), &format!("t{i}.o"), &bytes)
        })
        .collect();

    let token = CancellationToken::new();
    let serial = inspector(ScanOptions::default()).with_threads(Some(1)).inspect_batch(&paths, &token).unwrap();
    let parallel = inspector(ScanOptions::default()).with_threads(Some(4)).inspect_batch(&paths, &token).unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn cancelled_batch_marks_every_target() {
    let dir = tempdir().expect("tempdir");
    let paths = vec![
        write_fixture(dir.path(), "a.o", &rsa_fixture().elf()),
        write_fixture(dir.path(), "b.o", &clean_fixture().elf()),
    ];
    let token = CancellationToken::new();
    token.cancel();
    let batch = inspector(ScanOptions::default()).inspect_batch(&paths, &token).unwrap();
    assert_eq!(batch.summary.failed, 2);
    assert!(batch.reports.iter().all(|r| r.error.as_ref().map(|e| e.kind) == Some(ErrorKind::Cancelled)));
}

#[test]
fn exhausted_budget_reports_timeout() {
    let dir = tempdir().expect("tempdir");
    let path = write_fixture(dir.path(), "rsa.o", &rsa_fixture().elf());
    let options = ScanOptions { timeout: Some(Duration::ZERO), ..ScanOptions::default() };
    let inspector = inspector(options);
    let report = inspector.inspect(&path, &inspector.context(&CancellationToken::new()));

    let error = report.error.expect("timed out");
    assert_eq!(error.kind, ErrorKind::ScanTimeout);
    assert!(report.verdicts.is_empty());
}

#[test]
fn empty_batch_is_empty() {
    let batch = inspector(ScanOptions::default()).inspect_batch(&[], &CancellationToken::new()).unwrap();
    assert!(batch.reports.is_empty());
    assert!(!batch.any_failed());
}

#[test]
fn timed_batch_keeps_each_targets_own_span() {
    let dir = tempdir().expect("tempdir");
    let heavy = write_fixture(dir.path(), "heavy.o", &Fixture::default().rodata(&vec![0x5a; 1024 * 1024]).elf());
    let light = write_fixture(dir.path(), "notes.txt", b"just some notes\n");
    let options = ScanOptions { threshold: 4, ..ScanOptions::default() };

    let timed = inspector(options)
        .with_threads(Some(2))
        .inspect_batch_timed(&[heavy.clone(), light], &CancellationToken::new())
        .unwrap();

    assert_eq!(timed.len(), 2);
    assert_eq!(timed[0].report.target.path, heavy.display().to_string());
    assert!(timed[0].report.error.is_none());
    assert_eq!(timed[1].report.error.as_ref().map(|e| e.kind), Some(ErrorKind::UnsupportedFormat));

    let span = |t: &InspectedTarget| t.finished_at - t.started_at;
    assert!(timed.iter().all(|t| t.started_at <= t.finished_at));
    assert!(span(&timed[0]) > span(&timed[1]), "{:?} vs {:?}", span(&timed[0]), span(&timed[1]));
    assert_ne!(
        (timed[0].started_at, timed[0].finished_at),
        (timed[1].started_at, timed[1].finished_at)
    );
}
