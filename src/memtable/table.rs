//! MemTable implementation
//!
//! BTreeMap-based multi-version memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::MemTableEntry;

/// Per-version bookkeeping overhead counted towards the size limit
const VERSION_OVERHEAD: usize = 16;

type Versions = Vec<(u64, MemTableEntry)>;

/// In-memory table for recent writes
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, Versions>>,
    /// Approximate size in bytes over all versions
    size: AtomicUsize,
    /// Number of distinct keys
    entry_count: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
            entry_count: AtomicUsize::new(0),
        }
    }

    /// Record `entry` for `key` at sequence `seq` and return the new size
    ///
    /// Sequences must be non-decreasing; a second write at the same
    /// sequence replaces the first.
    pub fn insert(&self, seq: u64, key: Vec<u8>, entry: MemTableEntry) -> usize {
        let added = key.len() + entry.payload_len() + VERSION_OVERHEAD;
        let mut data = self.data.write();

        match data.get_mut(key.as_slice()) {
            Some(versions) => match versions.last_mut() {
                Some(last) if last.0 == seq => last.1 = entry,
                _ => versions.push((seq, entry)),
            },
            None => {
                data.insert(key, vec![(seq, entry)]);
                self.entry_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.size.fetch_add(added, Ordering::Relaxed) + added
    }

    /// Put a value at sequence `seq`
    pub fn put(&self, seq: u64, key: Vec<u8>, value: Vec<u8>) -> usize {
        self.insert(seq, key, MemTableEntry::Value(value))
    }

    /// Delete a key at sequence `seq` (inserts tombstone)
    pub fn delete(&self, seq: u64, key: Vec<u8>) -> usize {
        self.insert(seq, key, MemTableEntry::Tombstone)
    }

    /// Newest version of `key` visible at sequence `seq`
    pub fn get(&self, key: &[u8], seq: u64) -> Option<MemTableEntry> {
        let data = self.data.read();
        data.get(key).and_then(|versions| visible(versions, seq).cloned())
    }

    /// Newest version of `key`, ignoring sequence numbers
    pub fn get_latest(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.get(key, u64::MAX)
    }

    /// First key after `from` with a version visible at `seq`
    pub fn next_key(&self, from: Bound<&[u8]>, seq: u64) -> Option<Vec<u8>> {
        let data = self.data.read();
        data.range::<[u8], _>((from, Bound::Unbounded))
            .find(|(_, versions)| visible(versions, seq).is_some())
            .map(|(key, _)| key.clone())
    }

    /// Last key before `before` with a version visible at `seq`
    pub fn prev_key(&self, before: Bound<&[u8]>, seq: u64) -> Option<Vec<u8>> {
        let data = self.data.read();
        data.range::<[u8], _>((Bound::Unbounded, before))
            .rev()
            .find(|(_, versions)| visible(versions, seq).is_some())
            .map(|(key, _)| key.clone())
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Get distinct key count
    pub fn entry_count(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Latest version of every key in sorted key order (for flush)
    pub fn iter(&self) -> MemTableIterator {
        let data = self.data.read();
        let entries: Vec<_> = data
            .iter()
            .filter_map(|(key, versions)| {
                versions
                    .last()
                    .map(|(_, entry)| (key.clone(), entry.clone()))
            })
            .collect();
        MemTableIterator {
            inner: entries.into_iter(),
        }
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

fn visible(versions: &Versions, seq: u64) -> Option<&MemTableEntry> {
    versions
        .iter()
        .rev()
        .find(|(version_seq, _)| *version_seq <= seq)
        .map(|(_, entry)| entry)
}

/// Iterator over MemTable entries captured at creation time
pub struct MemTableIterator {
    inner: std::vec::IntoIter<(Vec<u8>, MemTableEntry)>,
}

impl Iterator for MemTableIterator {
    type Item = (Vec<u8>, MemTableEntry);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
