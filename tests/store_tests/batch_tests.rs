//! Tests for group commit through Storage::exec_batch
//!
//! These tests verify:
//! - Concurrent batched writes all land, in fewer commits than writes
//! - Every caller of a batch receives the batch's result
//! - A panicking write fails its batch without killing the committer
//! - Batched writes after close fail fast instead of hanging

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use tabula::{key, Config, Entity, Query, ReadContext, Storage, TabulaError, WalSyncStrategy};
use tempfile::TempDir;

const ITEMS: Entity = 1;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_storage() -> (TempDir, Arc<Storage>) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .build();
    let storage = Storage::open(config).unwrap();
    (temp_dir, Arc::new(storage))
}

/// Hold the write lock in a direct transaction until the returned sender fires
fn block_writers(storage: &Arc<Storage>) -> (channel::Sender<()>, thread::JoinHandle<()>) {
    let (locked_tx, locked_rx) = channel::bounded(0);
    let (release_tx, release_rx) = channel::bounded::<()>(0);
    let storage = Arc::clone(storage);
    let handle = thread::spawn(move || {
        storage
            .exec(|_tx| {
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(())
            })
            .unwrap();
    });
    locked_rx.recv().unwrap();
    (release_tx, handle)
}

// =============================================================================
// Coalescing
// =============================================================================

#[test]
fn test_single_batch_write() {
    let (_temp, storage) = setup_temp_storage();

    storage
        .exec_batch(|tx| tx.put_var(&key!(ITEMS, 1u64), "one"))
        .unwrap();

    assert_eq!(storage.get_str(&key!(ITEMS, 1u64)).unwrap().as_deref(), Some("one"));
    assert_eq!(storage.batch_commit_count(), 1);
}

#[test]
fn test_concurrent_batch_writes_all_land() {
    let (_temp, storage) = setup_temp_storage();
    const WRITERS: u64 = 16;
    const PER_WRITER: u64 = 20;

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                for i in 0..PER_WRITER {
                    let id = w * PER_WRITER + i;
                    storage
                        .exec_batch(move |tx| tx.put_id(&key!(ITEMS, id), id))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = WRITERS * PER_WRITER;
    let mut all = Query::new(ITEMS);
    assert_eq!(storage.count(&mut all).unwrap(), total);
    assert!(storage.batch_commit_count() >= 1);
    assert!(storage.batch_commit_count() <= total);
}

#[test]
fn test_writes_queued_behind_a_transaction_share_one_commit() {
    let (_temp, storage) = setup_temp_storage();
    let (release, blocker) = block_writers(&storage);

    // The first write is picked up and waits for the lock; the rest queue up
    let first = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || storage.exec_batch(|tx| tx.put_id(&key!(ITEMS, 0u64), 0)))
    };
    thread::sleep(Duration::from_millis(100));
    let queued: Vec<_> = (1..=5u64)
        .map(|id| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || storage.exec_batch(move |tx| tx.put_id(&key!(ITEMS, id), id)))
        })
        .collect();
    thread::sleep(Duration::from_millis(200));

    release.send(()).unwrap();
    blocker.join().unwrap();
    first.join().unwrap().unwrap();
    for handle in queued {
        handle.join().unwrap().unwrap();
    }

    let mut all = Query::new(ITEMS);
    assert_eq!(storage.count(&mut all).unwrap(), 6);
    assert_eq!(storage.batch_commit_count(), 2);
}

// =============================================================================
// Shared Results
// =============================================================================

#[test]
fn test_failure_is_shared_by_the_whole_batch() {
    let (_temp, storage) = setup_temp_storage();
    let (release, blocker) = block_writers(&storage);

    let first = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || storage.exec_batch(|tx| tx.put_id(&key!(ITEMS, 0u64), 0)))
    };
    thread::sleep(Duration::from_millis(100));

    let failing = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || {
            storage.exec_batch(|tx| {
                tx.put_id(&key!(ITEMS, 1u64), 1)?;
                Err(TabulaError::failed("bad row"))
            })
        })
    };
    thread::sleep(Duration::from_millis(50));
    let innocent = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || storage.exec_batch(|tx| tx.put_id(&key!(ITEMS, 2u64), 2)))
    };
    thread::sleep(Duration::from_millis(200));

    release.send(()).unwrap();
    blocker.join().unwrap();

    assert!(first.join().unwrap().is_ok());
    let failing = failing.join().unwrap();
    let innocent = innocent.join().unwrap();
    assert!(matches!(failing, Err(TabulaError::TransactionFailed(ref m)) if m == "bad row"));
    assert!(matches!(innocent, Err(TabulaError::TransactionFailed(ref m)) if m == "bad row"));

    assert!(storage.get(&key!(ITEMS, 0u64)).unwrap().is_some());
    assert!(storage.get(&key!(ITEMS, 1u64)).unwrap().is_none());
    assert!(storage.get(&key!(ITEMS, 2u64)).unwrap().is_none());
}

#[test]
fn test_panicking_write_fails_batch_but_committer_survives() {
    let (_temp, storage) = setup_temp_storage();

    let result = storage.exec_batch(|_tx| panic!("write exploded"));
    match result {
        Err(TabulaError::TransactionFailed(message)) => {
            assert!(message.contains("write exploded"))
        }
        other => panic!("expected a transaction failure, got {:?}", other),
    }

    storage
        .exec_batch(|tx| tx.put_id(&key!(ITEMS, 9u64), 9))
        .unwrap();
    assert_eq!(storage.get_id(&key!(ITEMS, 9u64)).unwrap(), Some(9));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_batch_after_close_returns_engine_closed() {
    let (_temp, storage) = setup_temp_storage();
    storage
        .exec_batch(|tx| tx.put_id(&key!(ITEMS, 1u64), 1))
        .unwrap();

    storage.close().unwrap();

    for _ in 0..3 {
        let result = storage.exec_batch(|tx| tx.put_id(&key!(ITEMS, 2u64), 2));
        assert!(matches!(result, Err(TabulaError::EngineClosed)));
    }
}

#[test]
fn test_batch_after_close_from_many_threads_does_not_hang() {
    let (_temp, storage) = setup_temp_storage();
    storage.close().unwrap();

    let handles: Vec<_> = (0..8u64)
        .map(|id| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || storage.exec_batch(move |tx| tx.put_id(&key!(ITEMS, id), id)))
        })
        .collect();

    for handle in handles {
        assert!(matches!(handle.join().unwrap(), Err(TabulaError::EngineClosed)));
    }
}

#[test]
fn test_batch_after_reopen() {
    let (_temp, storage) = setup_temp_storage();
    storage
        .exec_batch(|tx| tx.put_id(&key!(ITEMS, 1u64), 1))
        .unwrap();
    storage.close().unwrap();
    storage.reopen().unwrap();

    storage
        .exec_batch(|tx| tx.put_id(&key!(ITEMS, 2u64), 2))
        .unwrap();

    let mut all = Query::new(ITEMS);
    assert_eq!(storage.count(&mut all).unwrap(), 2);
}
