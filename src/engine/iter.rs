//! Ordered iteration over layered sources
//!
//! A snapshot is a stack of sources (transaction write set, memtable view,
//! SSTables newest → oldest). [`MergedCursor`] walks their union in key
//! order; on equal keys the higher source wins, and a winning tombstone
//! hides the key entirely.
//!
//! Positioning is by key rather than by per-source iterator state, so the
//! cursor can reverse direction at any point (the descending scan seeks
//! forward and then walks backwards).

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use crate::error::Result;
use crate::memtable::{MemTable, MemTableEntry};
use crate::sstable::SSTableReader;

/// A raw key/value pair yielded by a cursor
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Result of a cursor step: `None` once the cursor runs off either end
pub type CursorResult = Result<Option<KeyValue>>;

/// Bidirectional cursor over a consistent view of the store
///
/// A fresh cursor answers `next` with the first key and `prev` with the
/// last. After running off the end, `prev` returns the last key; after
/// running off the start, `next` returns the first.
pub trait Cursor {
    /// Position at the first key `>= key`
    fn seek(&mut self, key: &[u8]) -> CursorResult;

    fn seek_first(&mut self) -> CursorResult;

    fn seek_last(&mut self) -> CursorResult;

    fn next(&mut self) -> CursorResult;

    fn prev(&mut self) -> CursorResult;
}

/// One layer of a snapshot
pub(crate) trait Source: Send + Sync {
    /// Smallest key after `from`
    fn next_key(&self, from: Bound<&[u8]>) -> Result<Option<Vec<u8>>>;

    /// Largest key before `before`
    fn prev_key(&self, before: Bound<&[u8]>) -> Result<Option<Vec<u8>>>;

    /// Entry this layer holds for `key`
    fn lookup(&self, key: &[u8]) -> Result<Option<MemTableEntry>>;
}

// =============================================================================
// Source implementations
// =============================================================================

/// Memtable as seen at a fixed sequence number
pub(crate) struct MemTableView {
    pub(crate) table: Arc<MemTable>,
    pub(crate) seq: u64,
}

impl Source for MemTableView {
    fn next_key(&self, from: Bound<&[u8]>) -> Result<Option<Vec<u8>>> {
        Ok(self.table.next_key(from, self.seq))
    }

    fn prev_key(&self, before: Bound<&[u8]>) -> Result<Option<Vec<u8>>> {
        Ok(self.table.prev_key(before, self.seq))
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        Ok(self.table.get(key, self.seq))
    }
}

impl Source for SSTableReader {
    fn next_key(&self, from: Bound<&[u8]>) -> Result<Option<Vec<u8>>> {
        Ok(SSTableReader::next_key(self, from))
    }

    fn prev_key(&self, before: Bound<&[u8]>) -> Result<Option<Vec<u8>>> {
        Ok(SSTableReader::prev_key(self, before))
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        self.get(key)
    }
}

/// Pending writes of a transaction
impl Source for BTreeMap<Vec<u8>, MemTableEntry> {
    fn next_key(&self, from: Bound<&[u8]>) -> Result<Option<Vec<u8>>> {
        Ok(self
            .range::<[u8], _>((from, Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone()))
    }

    fn prev_key(&self, before: Bound<&[u8]>) -> Result<Option<Vec<u8>>> {
        Ok(self
            .range::<[u8], _>((Bound::Unbounded, before))
            .next_back()
            .map(|(k, _)| k.clone()))
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        Ok(self.get(key).cloned())
    }
}

// =============================================================================
// Merged cursor
// =============================================================================

#[derive(Debug, Clone)]
enum Position {
    Unpositioned,
    BeforeFirst,
    At(Vec<u8>),
    AfterLast,
}

/// Cursor over the union of several sources, highest priority first
pub struct MergedCursor {
    sources: Vec<Arc<dyn Source>>,
    position: Position,
}

impl MergedCursor {
    pub(crate) fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        Self {
            sources,
            position: Position::Unpositioned,
        }
    }

    fn forward(&mut self, mut from: Bound<Vec<u8>>) -> CursorResult {
        loop {
            let mut best: Option<(Vec<u8>, usize)> = None;
            for (i, source) in self.sources.iter().enumerate() {
                if let Some(key) = source.next_key(borrow_bound(&from))? {
                    if best.as_ref().map_or(true, |(b, _)| key < *b) {
                        best = Some((key, i));
                    }
                }
            }

            let Some((key, winner)) = best else {
                self.position = Position::AfterLast;
                return Ok(None);
            };

            if let Some(MemTableEntry::Value(value)) = self.sources[winner].lookup(&key)? {
                self.position = Position::At(key.clone());
                return Ok(Some((key, value)));
            }
            from = Bound::Excluded(key);
        }
    }

    fn backward(&mut self, mut before: Bound<Vec<u8>>) -> CursorResult {
        loop {
            let mut best: Option<(Vec<u8>, usize)> = None;
            for (i, source) in self.sources.iter().enumerate() {
                if let Some(key) = source.prev_key(borrow_bound(&before))? {
                    if best.as_ref().map_or(true, |(b, _)| key > *b) {
                        best = Some((key, i));
                    }
                }
            }

            let Some((key, winner)) = best else {
                self.position = Position::BeforeFirst;
                return Ok(None);
            };

            if let Some(MemTableEntry::Value(value)) = self.sources[winner].lookup(&key)? {
                self.position = Position::At(key.clone());
                return Ok(Some((key, value)));
            }
            before = Bound::Excluded(key);
        }
    }
}

impl Cursor for MergedCursor {
    fn seek(&mut self, key: &[u8]) -> CursorResult {
        self.forward(Bound::Included(key.to_vec()))
    }

    fn seek_first(&mut self) -> CursorResult {
        self.forward(Bound::Unbounded)
    }

    fn seek_last(&mut self) -> CursorResult {
        self.backward(Bound::Unbounded)
    }

    fn next(&mut self) -> CursorResult {
        match std::mem::replace(&mut self.position, Position::Unpositioned) {
            Position::Unpositioned | Position::BeforeFirst => self.forward(Bound::Unbounded),
            Position::At(key) => self.forward(Bound::Excluded(key)),
            Position::AfterLast => {
                self.position = Position::AfterLast;
                Ok(None)
            }
        }
    }

    fn prev(&mut self) -> CursorResult {
        match std::mem::replace(&mut self.position, Position::Unpositioned) {
            Position::Unpositioned | Position::AfterLast => self.backward(Bound::Unbounded),
            Position::At(key) => self.backward(Bound::Excluded(key)),
            Position::BeforeFirst => {
                self.position = Position::BeforeFirst;
                Ok(None)
            }
        }
    }
}

fn borrow_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
