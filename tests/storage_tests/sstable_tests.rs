//! Tests for SSTables
//!
//! These tests verify:
//! - Builder output can be read back (values and tombstones)
//! - Ordered key navigation over the in-memory index
//! - Sequential iteration with CRC verification
//! - Manager flush / load order and quarantine of damaged tables

use std::fs;
use std::ops::Bound;
use std::path::PathBuf;

use tabula::memtable::{MemTable, MemTableEntry};
use tabula::sstable::{SSTableBuilder, SSTableManager, SSTableReader};
use tabula::TabulaError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sstables");
    fs::create_dir_all(&path).unwrap();
    (temp_dir, path)
}

/// Table with keys k00..k(n-1), every third one a tombstone
fn build_table(path: &PathBuf, n: usize) -> PathBuf {
    let file = path.join("test.sst");
    let mut builder = SSTableBuilder::new(&file).unwrap();
    for i in 0..n {
        let key = format!("k{:02}", i);
        if i % 3 == 2 {
            builder.add_tombstone(key.as_bytes()).unwrap();
        } else {
            builder.add(key.as_bytes(), format!("v{}", i).as_bytes()).unwrap();
        }
    }
    builder.finish().unwrap();
    file
}

// =============================================================================
// Builder / Reader Tests
// =============================================================================

#[test]
fn test_build_and_read_back() {
    let (_temp, dir) = setup_temp_dir();
    let file = build_table(&dir, 10);

    let reader = SSTableReader::open(&file).unwrap();

    assert_eq!(reader.entry_count(), 10);
    assert_eq!(reader.get(b"k00").unwrap(), Some(MemTableEntry::Value(b"v0".to_vec())));
    assert_eq!(reader.get(b"k02").unwrap(), Some(MemTableEntry::Tombstone));
    assert_eq!(reader.get(b"k09").unwrap(), Some(MemTableEntry::Value(b"v9".to_vec())));
    assert_eq!(reader.get(b"missing").unwrap(), None);
    assert_eq!(reader.file_size(), fs::metadata(&file).unwrap().len());
    assert_eq!(reader.path(), file.as_path());
}

#[test]
fn test_builder_metadata() {
    let (_temp, dir) = setup_temp_dir();
    let mut builder = SSTableBuilder::new(&dir.join("meta.sst")).unwrap();
    builder.add(b"b", b"1").unwrap();
    builder.add_entry(b"c", &MemTableEntry::Tombstone).unwrap();
    let table = builder.finish().unwrap();

    assert_eq!(table.entry_count(), 2);
    assert_eq!(table.min_key, b"b".to_vec());
    assert_eq!(table.max_key, b"c".to_vec());
    assert!(table.might_contain(b"bb"));
    assert!(!table.might_contain(b"a"));
}

#[test]
fn test_builder_rejects_unsorted_keys() {
    let (_temp, dir) = setup_temp_dir();
    let mut builder = SSTableBuilder::new(&dir.join("bad.sst")).unwrap();
    builder.add(b"b", b"1").unwrap();

    assert!(matches!(builder.add(b"a", b"2"), Err(TabulaError::Storage(_))));
    assert!(builder.add(b"b", b"3").is_err());
}

#[test]
fn test_reader_key_navigation() {
    let (_temp, dir) = setup_temp_dir();
    let reader = SSTableReader::open(&build_table(&dir, 5)).unwrap();

    assert_eq!(reader.min_key(), Some(&b"k00"[..]));
    assert_eq!(reader.max_key(), Some(&b"k04"[..]));
    assert_eq!(reader.next_key(Bound::Excluded(&b"k01"[..])), Some(b"k02".to_vec()));
    assert_eq!(reader.next_key(Bound::Included(&b"k01"[..])), Some(b"k01".to_vec()));
    assert_eq!(reader.prev_key(Bound::Excluded(&b"k01"[..])), Some(b"k00".to_vec()));
    assert_eq!(reader.prev_key(Bound::Unbounded), Some(b"k04".to_vec()));
    assert_eq!(reader.next_key(Bound::Excluded(&b"k04"[..])), None);
    assert!(reader.might_contain(b"k03"));
    assert!(!reader.might_contain(b"z"));
}

#[test]
fn test_iterator_and_verify() {
    let (_temp, dir) = setup_temp_dir();
    let reader = SSTableReader::open(&build_table(&dir, 6)).unwrap();

    let mut iter = reader.iter().unwrap();
    let keys: Vec<Vec<u8>> = iter.by_ref().map(|item| item.unwrap().0).collect();
    assert_eq!(keys.len(), 6);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    assert_ne!(iter.data_crc(), 0);

    reader.verify().unwrap();
}

#[test]
fn test_verify_detects_flipped_data_byte() {
    let (_temp, dir) = setup_temp_dir();
    let file = build_table(&dir, 6);

    let mut bytes = fs::read(&file).unwrap();
    // Inside the first value, after header (14) + lengths (8) + key (3)
    bytes[14 + 8 + 3] ^= 0xff;
    fs::write(&file, &bytes).unwrap();

    let reader = SSTableReader::open(&file).unwrap();
    assert!(reader.verify().is_err());
}

#[test]
fn test_open_rejects_garbage() {
    let (_temp, dir) = setup_temp_dir();
    let file = dir.join("garbage.sst");
    fs::write(&file, vec![7u8; 64]).unwrap();

    assert!(SSTableReader::open(&file).is_err());
}

// =============================================================================
// Manager Tests
// =============================================================================

#[test]
fn test_manager_flush_and_load_newest_first() {
    let (_temp, dir) = setup_temp_dir();
    let manager = SSTableManager::open(&dir).unwrap();
    assert_eq!(manager.dir(), dir.as_path());

    let first = MemTable::new();
    first.put(1, b"k".to_vec(), b"old".to_vec());
    manager.flush(&first).unwrap();

    let second = MemTable::new();
    second.put(2, b"k".to_vec(), b"new".to_vec());
    manager.flush(&second).unwrap();

    let reopened = SSTableManager::open(&dir).unwrap();
    let tables = reopened.load().unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].get(b"k").unwrap(), Some(MemTableEntry::Value(b"new".to_vec())));
    assert_eq!(tables[1].get(b"k").unwrap(), Some(MemTableEntry::Value(b"old".to_vec())));
    assert_eq!(reopened.next_sstable_id(), 3);
}

#[test]
fn test_manager_refuses_empty_memtable() {
    let (_temp, dir) = setup_temp_dir();
    let manager = SSTableManager::open(&dir).unwrap();

    assert!(manager.flush(&MemTable::new()).is_err());
}

#[test]
fn test_repair_quarantines_damaged_table() {
    let (_temp, dir) = setup_temp_dir();
    let manager = SSTableManager::open(&dir).unwrap();

    let good = MemTable::new();
    good.put(1, b"good".to_vec(), b"1".to_vec());
    let good_table = manager.flush(&good).unwrap();

    let bad = MemTable::new();
    bad.put(2, b"bad".to_vec(), b"2".to_vec());
    let bad_path = manager.flush(&bad).unwrap().path().to_path_buf();

    let mut bytes = fs::read(&bad_path).unwrap();
    bytes[14 + 8 + 3] ^= 0xff;
    fs::write(&bad_path, &bytes).unwrap();

    let report = SSTableManager::repair(&dir).unwrap();

    assert_eq!(report.tables_ok, 1);
    assert_eq!(report.quarantined, vec![bad_path.with_extension("corrupt")]);
    assert!(!bad_path.exists());
    assert!(good_table.path().exists());
    assert_eq!(SSTableManager::open(&dir).unwrap().load().unwrap().len(), 1);
}
