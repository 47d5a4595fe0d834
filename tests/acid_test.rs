//! End-to-end transaction scenarios against a shared engine.
//!
//! Each test builds a fresh engine and drives it through the public API only:
//! start, put/remove, read, commit, rollback.

use std::sync::Arc;

use oxidb_mvcc::{EngineConfig, Error, MemoryStore, MvccEngine, ReadBound, TxState};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn engine_with(config: EngineConfig) -> MvccEngine {
    MvccEngine::new(config, Arc::new(MemoryStore::new()))
}

fn commit_put(engine: &MvccEngine, key: &str, value: &str) {
    let mut txn = engine.start_write_transaction();
    engine.put(&mut txn, key.as_bytes(), value.as_bytes()).unwrap();
    engine.commit(txn).unwrap();
}

fn get(engine: &MvccEngine, txn: &oxidb_mvcc::Transaction, key: &str) -> Option<String> {
    engine
        .read(txn, key.as_bytes())
        .unwrap()
        .map(|v| String::from_utf8(v).expect("utf-8 value"))
}

// ===========================================================================
// Test cases
// ===========================================================================

// 1. Readers see the latest committed version at their snapshot
#[test]
fn test_snapshot_sequence() {
    let engine = engine_with(EngineConfig::default());

    let mut a = engine.start_write_transaction();
    assert_eq!(a.snapshot_id(), 1);
    engine.put(&mut a, b"k", b"v1").unwrap();
    engine.commit(a).unwrap();

    // R2 captures snapshot 1 and reads before B commits.
    let r2 = engine.start_read_transaction();
    assert_eq!(r2.snapshot_id(), 1);

    let mut b = engine.start_write_transaction();
    assert_eq!(b.snapshot_id(), 2);
    engine.put(&mut b, b"k", b"v2").unwrap();
    assert_eq!(get(&engine, &r2, "k").as_deref(), Some("v1"));
    engine.commit(b).unwrap();
    // R2 keeps its snapshot after B lands.
    assert_eq!(get(&engine, &r2, "k").as_deref(), Some("v1"));

    let r = engine.start_read_transaction();
    assert_eq!(r.snapshot_id(), 2);
    assert_eq!(get(&engine, &r, "k").as_deref(), Some("v2"));
}

// 2. An old snapshot keeps its view after newer commits land
#[test]
fn test_snapshot_isolation_strict() {
    let engine = engine_with(EngineConfig::default());
    commit_put(&engine, "k", "v1");
    let r2 = engine.start_read_transaction();
    commit_put(&engine, "k", "v2");
    commit_put(&engine, "other", "x");

    assert_eq!(get(&engine, &r2, "k").as_deref(), Some("v1"));
    assert_eq!(get(&engine, &r2, "other"), None);

    let r = engine.start_read_transaction();
    assert_eq!(get(&engine, &r, "k").as_deref(), Some("v2"));
    assert_eq!(get(&engine, &r, "other").as_deref(), Some("x"));
}

// 2b. Watermark-bounded reads trade repeatability for freshness: an old
//     snapshot observes commits made after it started
#[test]
fn test_watermark_bound_reads_newer_commits() {
    let engine = engine_with(EngineConfig {
        read_bound: ReadBound::Watermark,
        ..EngineConfig::default()
    });
    commit_put(&engine, "k", "v1");
    let r2 = engine.start_read_transaction();
    assert_eq!(r2.snapshot_id(), 1);
    commit_put(&engine, "k", "v2");

    assert_eq!(get(&engine, &r2, "k").as_deref(), Some("v2"));
}

// 3. Write-write conflict: newer transaction commits first
#[test]
fn test_conflict_newer_commits_first() {
    let engine = engine_with(EngineConfig::default());
    let mut a = engine.start_write_transaction();
    let mut b = engine.start_write_transaction();
    engine.put(&mut a, b"x", b"from-a").unwrap();
    engine.put(&mut b, b"x", b"from-b").unwrap();

    engine.commit(b).unwrap();
    let err = engine.commit(a).unwrap_err();
    assert!(matches!(err, Error::WriteConflict { snapshot_id: 1, watermark: 2, .. }));
    assert!(
        err.to_string().contains("conflict"),
        "expected conflict error, got: {err}"
    );

    let r = engine.start_read_transaction();
    assert_eq!(get(&engine, &r, "x").as_deref(), Some("from-b"));
}

// 4. Older transaction commits first: the newer one succeeds and supersedes
#[test]
fn test_older_commits_first() {
    let engine = engine_with(EngineConfig::default());
    let mut a = engine.start_write_transaction();
    let mut b = engine.start_write_transaction();
    engine.put(&mut a, b"x", b"from-a").unwrap();
    engine.put(&mut b, b"x", b"from-b").unwrap();

    engine.commit(a).unwrap();
    engine.commit(b).unwrap();

    let r = engine.start_read_transaction();
    assert_eq!(get(&engine, &r, "x").as_deref(), Some("from-b"));
}

// 5. Retry after a conflict succeeds with a fresh transaction
#[test]
fn test_retry_after_conflict() {
    let engine = engine_with(EngineConfig::default());
    let mut a = engine.start_write_transaction();
    engine.put(&mut a, b"x", b"stale").unwrap();
    commit_put(&engine, "x", "winner");

    let err = engine.commit(a).unwrap_err();
    assert!(err.is_retryable());

    let mut retry = engine.start_write_transaction();
    engine.put(&mut retry, b"x", b"retried").unwrap();
    engine.commit(retry).unwrap();

    let r = engine.start_read_transaction();
    assert_eq!(get(&engine, &r, "x").as_deref(), Some("retried"));
}

// 6. Tombstones shadow older versions and the backing store
#[test]
fn test_tombstone() {
    let backing = Arc::new(MemoryStore::new());
    backing.insert("k", "on-disk");
    let engine = MvccEngine::new(EngineConfig::default(), backing);

    commit_put(&engine, "k", "in-memory");
    let mut d = engine.start_write_transaction();
    engine.remove(&mut d, b"k").unwrap();
    engine.commit(d).unwrap();

    let r = engine.start_read_transaction();
    assert_eq!(get(&engine, &r, "k"), None);

    commit_put(&engine, "k", "revived");
    let r = engine.start_read_transaction();
    assert_eq!(get(&engine, &r, "k").as_deref(), Some("revived"));
}

// 7. Uncommitted writes are invisible to others but visible to their owner
#[test]
fn test_isolation_uncommitted_not_visible() {
    let engine = engine_with(EngineConfig::default());
    let mut w = engine.start_write_transaction();
    engine.put(&mut w, b"secret", b"s").unwrap();

    let other = engine.start_read_transaction();
    assert_eq!(get(&engine, &other, "secret"), None);
    assert_eq!(get(&engine, &w, "secret").as_deref(), Some("s"));

    engine.commit(w).unwrap();
    let r = engine.start_read_transaction();
    assert_eq!(get(&engine, &r, "secret").as_deref(), Some("s"));
}

// 8. Rollback and abandoned handles leave nothing behind
#[test]
fn test_atomicity_rollback() {
    let engine = engine_with(EngineConfig::default());
    let mut w = engine.start_write_transaction();
    engine.put(&mut w, b"a", b"1").unwrap();
    engine.put(&mut w, b"b", b"2").unwrap();
    engine.rollback(w);

    {
        let mut ghost = engine.start_write_transaction();
        engine.put(&mut ghost, b"a", b"ghost").unwrap();
        assert_eq!(ghost.state(), TxState::InProgress);
    }

    let r = engine.start_read_transaction();
    assert_eq!(get(&engine, &r, "a"), None);
    assert_eq!(get(&engine, &r, "b"), None);
}

// 9. Multi-key commit is visible as a whole
#[test]
fn test_atomicity_commit() {
    let engine = engine_with(EngineConfig::default());
    let mut w = engine.start_write_transaction();
    for i in 0..25 {
        engine
            .put(&mut w, format!("user:{i}").as_bytes(), format!("{i}").as_bytes())
            .unwrap();
    }
    engine.commit(w).unwrap();

    let r = engine.start_read_transaction();
    for i in 0..25 {
        assert_eq!(get(&engine, &r, &format!("user:{i}")), Some(format!("{i}")));
    }
}

// 10. Garbage collection keeps every visible read intact
#[test]
fn test_gc_preserves_reads() {
    let engine = engine_with(EngineConfig {
        auto_gc: false,
        ..EngineConfig::default()
    });
    for i in 0..10 {
        commit_put(&engine, "hot", &format!("v{i}"));
        commit_put(&engine, &format!("cold{i}"), "c");
    }
    let mut d = engine.start_write_transaction();
    engine.remove(&mut d, b"cold3").unwrap();
    engine.commit(d).unwrap();

    let before = engine.stats();
    let stats = engine.collect_garbage().expect("no concurrent pass");
    // Nine superseded "hot" versions plus the put shadowed by the cold3 tombstone.
    assert_eq!(stats.versions_removed, 10);
    assert!(engine.stats().log_records < before.log_records);

    let r = engine.start_read_transaction();
    assert_eq!(get(&engine, &r, "hot").as_deref(), Some("v9"));
    assert_eq!(get(&engine, &r, "cold3"), None);
    assert_eq!(get(&engine, &r, "cold4").as_deref(), Some("c"));

    let again = engine.collect_garbage().expect("no concurrent pass");
    assert_eq!(again.versions_removed, 0);
    assert_eq!(get(&engine, &r, "hot").as_deref(), Some("v9"));
}
