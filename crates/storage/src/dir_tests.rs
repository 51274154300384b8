// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use xbar_core::test_support::TestRecord;
use xbar_core::ContextRecord;

fn id(s: &str) -> MachineId {
    MachineId::new(s)
}

#[tokio::test]
async fn save_creates_one_file_per_machine() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::open(dir.path()).unwrap();

    store.save(&id("call-1"), &TestRecord::new("IDLE")).await.unwrap();
    store.save(&id("call-2"), &TestRecord::new("RINGING")).await.unwrap();

    assert!(dir.path().join("call-1.json").exists());
    assert!(dir.path().join("call-2.json").exists());
}

#[tokio::test]
async fn save_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::open(dir.path()).unwrap();

    let mut record = TestRecord::new("CONNECTED");
    record.set_last_state_change(42_000);
    record.note("answered");
    store.save(&id("call-3"), &record).await.unwrap();

    let loaded: TestRecord = store.load(&id("call-3")).await.unwrap().unwrap();
    assert_eq!(loaded, record);
}

#[tokio::test]
async fn save_is_atomic_no_temp_residue() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::open(dir.path()).unwrap();

    store.save(&id("call-4"), &TestRecord::new("IDLE")).await.unwrap();
    store.save(&id("call-4"), &TestRecord::new("RINGING")).await.unwrap();

    assert!(!dir.path().join("call-4.tmp").exists());
    let loaded: TestRecord = store.load(&id("call-4")).await.unwrap().unwrap();
    assert_eq!(loaded.current_state(), "RINGING");
}

#[tokio::test]
async fn missing_record_reads_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::open(dir.path()).unwrap();

    assert!(!ContextStore::<TestRecord>::exists(&store, &id("ghost")).await.unwrap());
    assert!(!ContextStore::<TestRecord>::is_complete(&store, &id("ghost")).await.unwrap());
    let loaded: Option<TestRecord> = store.load(&id("ghost")).await.unwrap();
    assert!(loaded.is_none());
}

#[tokio::test]
async fn is_complete_reads_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::open(dir.path()).unwrap();

    let mut record = TestRecord::new("HUNGUP");
    record.set_complete(true);
    store.save(&id("call-5"), &record).await.unwrap();

    assert!(ContextStore::<TestRecord>::is_complete(&store, &id("call-5")).await.unwrap());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::open(dir.path()).unwrap();

    store.save(&id("call-6"), &TestRecord::new("IDLE")).await.unwrap();
    ContextStore::<TestRecord>::delete(&store, &id("call-6")).await.unwrap();
    assert!(!dir.path().join("call-6.json").exists());

    ContextStore::<TestRecord>::delete(&store, &id("call-6")).await.unwrap();
}

#[tokio::test]
async fn corrupt_record_surfaces_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::open(dir.path()).unwrap();

    std::fs::write(dir.path().join("call-7.json"), "{ not json").unwrap();

    let err = ContextStore::<TestRecord>::load(&store, &id("call-7")).await;
    assert!(matches!(err, Err(StoreError::Malformed { .. })));
}

#[tokio::test]
async fn open_creates_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("state").join("contexts");
    let store = DirStore::open(&nested).unwrap();
    assert_eq!(store.root(), nested.as_path());
    assert!(nested.is_dir());
}
