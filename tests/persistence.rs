//! Journal-backed stores across reopen and compaction.

use memo_sync::{MemoColor, MemoStore, OwnerId, StoreConfig};
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().join("store"),
        sync_writes: false,
        ..StoreConfig::default()
    }
}

#[test]
fn test_reopen_restores_every_owner() {
    let dir = TempDir::new().unwrap();
    let u1 = OwnerId::from("u1");
    let u2 = OwnerId::from("u2");

    let (before_u1, before_u2) = {
        let store = MemoStore::create(config(&dir)).unwrap();
        let a = store.create(&u1, "a", "1", MemoColor::Yellow).unwrap();
        store.create(&u1, "b", "2", MemoColor::Pink).unwrap();
        store.create(&u2, "c", "3", MemoColor::Cyan).unwrap();
        store.update(&a.id, "a2", "1b").unwrap();
        (store.snapshot(&u1).unwrap(), store.snapshot(&u2).unwrap())
    };

    let store = MemoStore::open(config(&dir)).unwrap();
    assert_eq!(store.snapshot(&u1).unwrap().memos, before_u1.memos);
    assert_eq!(store.snapshot(&u2).unwrap().memos, before_u2.memos);
    assert_eq!(store.stats().owner_count, 2);
}

#[test]
fn test_reopen_keeps_deletes_and_ordering() {
    let dir = TempDir::new().unwrap();
    let u1 = OwnerId::from("u1");
    {
        let store = MemoStore::create(config(&dir)).unwrap();
        let doomed = store.create(&u1, "doomed", "", MemoColor::Green).unwrap();
        store.create(&u1, "older", "", MemoColor::Green).unwrap();
        store.create(&u1, "newer", "", MemoColor::Green).unwrap();
        store.delete(&doomed.id).unwrap();
    }

    let store = MemoStore::open_or_create(config(&dir)).unwrap();
    assert_eq!(store.snapshot(&u1).unwrap().titles(), vec!["newer", "older"]);

    // New memos still sort ahead of replayed ones
    store.create(&u1, "newest", "", MemoColor::Green).unwrap();
    assert_eq!(
        store.snapshot(&u1).unwrap().titles(),
        vec!["newest", "newer", "older"]
    );
}

#[test]
fn test_compaction_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let u1 = OwnerId::from("u1");
    {
        let store = MemoStore::create(config(&dir)).unwrap();
        for i in 0..20 {
            let memo = store
                .create(&u1, &format!("m{i}"), "", MemoColor::Orange)
                .unwrap();
            if i % 2 == 0 {
                store.delete(&memo.id).unwrap();
            }
        }
        store.compact().unwrap();
        assert_eq!(store.stats().journal_entries, 10);
    }

    let store = MemoStore::open(config(&dir)).unwrap();
    let snapshot = store.snapshot(&u1).unwrap();
    assert_eq!(snapshot.len(), 10);
    assert_eq!(snapshot.memos[0].title, "m19");
    assert_eq!(snapshot.memos[9].title, "m1");
}

#[test]
fn test_watch_on_reopened_store() {
    let dir = TempDir::new().unwrap();
    let u1 = OwnerId::from("u1");
    {
        let store = MemoStore::create(config(&dir)).unwrap();
        store.create(&u1, "persisted", "", MemoColor::Yellow).unwrap();
    }

    let store = MemoStore::open(config(&dir)).unwrap();
    let handle = store.subscribe(&u1).unwrap();
    let initial = handle.next_snapshot(Duration::from_secs(1)).unwrap();
    assert_eq!(initial.titles(), vec!["persisted"]);
}
