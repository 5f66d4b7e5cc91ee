//! End-to-end: legacy files on disk -> migrated, encrypted, queryable store.

use std::fs;
use std::path::Path;
use tempfile::TempDir;
use totp_store::migrate::{Step, StepOutcome};
use totp_store::{
    DedupePolicy, Layout, MigrationPolicy, Projection, Repository, Store, SubsequenceMatcher,
    Transcoder, decode_batch_uri, decode_single_uri, run_migrations,
};

const SECRETS: [(&str, &str); 3] = [
    ("Work", "JBSWY3DPEHPK3PXP"),
    ("Mail", "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ"),
    ("Work", "MFRGGZDFMZTWQ2LK"),
];

fn write(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn write_v0(layout: &Layout) {
    let list: Vec<serde_json::Value> = SECRETS
        .iter()
        .map(|(name, key)| serde_json::json!({ "Name": name, "Key": key }))
        .collect();
    write(&layout.v0_file(), &serde_json::to_string(&list).unwrap());
}

fn read_store(layout: &Layout) -> Store {
    serde_json::from_str(&fs::read_to_string(layout.store_file()).unwrap()).unwrap()
}

#[test]
fn v0_store_reaches_current_version_encrypted() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::new(dir.path());
    let t = Transcoder::generate();
    write_v0(&layout);

    let report = run_migrations(&layout, &t, MigrationPolicy::default());
    assert_eq!(report.migrated(), 3);
    assert_eq!(report.failed(), 0);

    for legacy in [
        layout.v0_file(),
        layout.v0_dir(),
        layout.v1_file(),
        layout.v1_dir(),
        layout.v2_file(),
        layout.v2_version_file(),
    ] {
        assert!(!legacy.exists(), "{} should be gone", legacy.display());
    }

    let store = read_store(&layout);
    assert_eq!(store.version, 3);
    assert_eq!(store.entries.len(), SECRETS.len());
    for (entry, (name, secret)) in store.entries.iter().zip(SECRETS) {
        assert!(entry.is_encrypted);
        assert_eq!(entry.name, name);
        assert_eq!(t.decrypt(&entry.key).unwrap().as_str(), secret);
    }
}

#[test]
fn second_run_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::new(dir.path());
    let t = Transcoder::generate();
    write_v0(&layout);

    run_migrations(&layout, &t, MigrationPolicy::default());
    let first = fs::read_to_string(layout.store_file()).unwrap();
    let modified = fs::metadata(layout.store_file()).unwrap().modified().unwrap();

    let report = run_migrations(&layout, &t, MigrationPolicy::default());
    for step in [Step::V0ToV1, Step::V1ToV2, Step::V2ToV3] {
        assert!(matches!(report.outcome(step), Some(Ok(StepOutcome::Skipped))));
    }
    assert_eq!(fs::read_to_string(layout.store_file()).unwrap(), first);
    assert_eq!(
        fs::metadata(layout.store_file()).unwrap().modified().unwrap(),
        modified
    );
}

#[test]
fn corrupt_v1_does_not_block_startup() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::new(dir.path());
    let t = Transcoder::generate();
    write(&layout.v1_file(), "{\"Version\": 1, \"Entries\": [{\"Na");

    let report = run_migrations(&layout, &t, MigrationPolicy::default());
    assert_eq!(report.failed(), 1);
    assert!(layout.v1_file().exists());

    let repo = Repository::open(layout.store_file(), t).unwrap();
    assert!(repo.is_empty());
}

#[test]
fn plaintext_entries_are_upgraded_on_open() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::new(dir.path());
    let t = Transcoder::generate();
    write(
        &layout.store_file(),
        r#"{
  "Version": 3,
  "Authenticators": [
    { "Name": "Work", "Key": "JBSWY3DPEHPK3PXP", "IsEncrypted": false }
  ]
}"#,
    );

    let repo = Repository::open(layout.store_file(), t.clone()).unwrap();
    assert_eq!(repo.snapshot().unencrypted_count(), 0);

    let on_disk = read_store(&layout);
    assert!(on_disk.entries.iter().all(|e| e.is_encrypted));

    let reopened = Repository::open(layout.store_file(), t.clone()).unwrap();
    let key = reopened.snapshot().entries[0].key.clone();
    assert_eq!(on_disk.entries[0].key, key);
    assert_eq!(t.decrypt(&key).unwrap().as_str(), "JBSWY3DPEHPK3PXP");
}

#[test]
fn corrupt_store_is_reported() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::new(dir.path());
    write(&layout.store_file(), "not json");

    let err = Repository::open(layout.store_file(), Transcoder::generate()).unwrap_err();
    assert!(matches!(err, totp_store::Error::CorruptStore { .. }));
}

#[test]
fn import_then_query() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::new(dir.path());
    let t = Transcoder::generate();
    let repo = Repository::open(layout.store_file(), t).unwrap();

    let single = decode_single_uri("otpauth://totp/Work?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ")
        .unwrap();
    repo.commit(single, DedupePolicy::Off).unwrap();

    // empty payload: the decoder yields nothing and the commit is a no-op
    let empty = decode_batch_uri("otpauth-migration://offline?data=").unwrap();
    assert!(empty.candidates.is_empty());
    let summary = repo.commit(empty.candidates, DedupePolicy::BySecret).unwrap();
    assert_eq!(summary.added, 0);

    let rows = repo.project("wrk", &SubsequenceMatcher, 59);
    assert_eq!(rows.len(), 1);
    match &rows[0] {
        Projection::Live {
            name,
            code,
            remaining_secs,
            ..
        } => {
            assert_eq!(name, "Work");
            assert_eq!(code, "287082");
            assert_eq!(*remaining_secs, 1);
        }
        other => panic!("expected a live code, got {other:?}"),
    }
}
