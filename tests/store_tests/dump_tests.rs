//! Tests for dump and restore
//!
//! These tests verify:
//! - A full dump restores into an empty store unchanged
//! - A query limits what gets dumped
//! - Damaged or foreign files are rejected before anything is loaded

use std::fs;
use std::ops::ControlFlow;
use std::path::PathBuf;

use tabula::{key, Config, Entity, Query, ReadContext, Storage, TabulaError};
use tempfile::TempDir;

const USERS: Entity = 1;
const ORDERS: Entity = 2;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_store(temp_dir: &TempDir, name: &str) -> Storage {
    let config = Config::builder()
        .data_dir(temp_dir.path().join(name))
        .restore_batch_size(16)
        .build();
    Storage::open(config).unwrap()
}

fn populated(temp_dir: &TempDir) -> Storage {
    let storage = open_store(temp_dir, "source");
    storage
        .exec(|tx| {
            for _ in 0..40 {
                let id = tx.sequence_next_val(USERS)?;
                tx.put_var(&key!(USERS, id), &format!("user-{}", id))?;
            }
            for id in 0..25u64 {
                tx.put_id(&key!(ORDERS, id % 5, id), id)?;
            }
            Ok(())
        })
        .unwrap();
    storage
}

fn all_records(storage: &Storage) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut everything = Query::with_filter(Vec::new());
    storage
        .fetch(&mut everything, |record| {
            out.push((record.key.clone(), record.value.clone()));
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
    out
}

fn dump_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("backup.dump")
}

// =============================================================================
// Round Trip
// =============================================================================

#[test]
fn test_dump_and_restore_everything() {
    let temp = TempDir::new().unwrap();
    let source = populated(&temp);
    let path = dump_path(&temp);

    let dumped = source.dump(&path, None).unwrap();
    // 40 users, 25 orders and one sequence counter
    assert_eq!(dumped, 66);

    let target = open_store(&temp, "target");
    assert_eq!(target.restore(&path).unwrap(), 66);

    assert_eq!(all_records(&target), all_records(&source));
    target
        .exec(|tx| {
            assert_eq!(tx.sequence_next_val(USERS)?, 41);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_dump_of_empty_store() {
    let temp = TempDir::new().unwrap();
    let source = open_store(&temp, "source");
    let path = dump_path(&temp);

    assert_eq!(source.dump(&path, None).unwrap(), 0);

    let target = open_store(&temp, "target");
    assert_eq!(target.restore(&path).unwrap(), 0);
    assert!(all_records(&target).is_empty());
}

#[test]
fn test_dump_with_query() {
    let temp = TempDir::new().unwrap();
    let source = populated(&temp);
    let path = dump_path(&temp);

    let orders_of_two = Query::for_entity(ORDERS, &2u64);
    assert_eq!(source.dump(&path, Some(&orders_of_two)).unwrap(), 5);

    let target = open_store(&temp, "target");
    target.restore(&path).unwrap();

    let mut ids = Query::new(ORDERS);
    assert_eq!(target.query_ids(&mut ids).unwrap(), vec![2, 7, 12, 17, 22]);
    let mut users = Query::new(USERS);
    assert_eq!(target.count(&mut users).unwrap(), 0);
}

#[test]
fn test_restore_overwrites_existing_keys() {
    let temp = TempDir::new().unwrap();
    let source = populated(&temp);
    let path = dump_path(&temp);
    source.dump(&path, Some(&Query::new(USERS))).unwrap();

    let target = open_store(&temp, "target");
    target
        .exec(|tx| {
            tx.put_var(&key!(USERS, 1u64), "stale")?;
            tx.put_var(&key!(USERS, 1000u64), "local only")
        })
        .unwrap();

    target.restore(&path).unwrap();

    assert_eq!(target.get_str(&key!(USERS, 1u64)).unwrap().as_deref(), Some("user-1"));
    assert_eq!(
        target.get_str(&key!(USERS, 1000u64)).unwrap().as_deref(),
        Some("local only")
    );
}

// =============================================================================
// Damaged Files
// =============================================================================

#[test]
fn test_flipped_byte_is_rejected_before_loading() {
    let temp = TempDir::new().unwrap();
    let source = populated(&temp);
    let path = dump_path(&temp);
    source.dump(&path, None).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    let target = open_store(&temp, "target");
    assert!(target.restore(&path).is_err());
    assert!(all_records(&target).is_empty());
}

#[test]
fn test_truncated_dump_is_rejected() {
    let temp = TempDir::new().unwrap();
    let source = populated(&temp);
    let path = dump_path(&temp);
    source.dump(&path, None).unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

    let target = open_store(&temp, "target");
    assert!(target.restore(&path).is_err());
    assert!(all_records(&target).is_empty());
}

#[test]
fn test_foreign_file_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("notes.txt");
    fs::write(&path, b"these are definitely not records").unwrap();

    let target = open_store(&temp, "target");

    assert!(matches!(target.restore(&path), Err(TabulaError::Decode(_))));
    assert!(matches!(
        target.restore(temp.path().join("missing.dump")),
        Err(TabulaError::Io(_))
    ));
}
