//! Exclusive engine transactions
//!
//! An [`EngineTransaction`] holds the engine's write lock for its whole
//! life, so at most one is open at a time. Its writes are buffered in a
//! sorted write set and become visible (and durable) together on commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::error::Result;
use crate::memtable::MemTableEntry;
use crate::wal::Operation;

use super::iter::{MergedCursor, Source};
use super::snapshot::Snapshot;
use super::Engine;

type WriteSet = BTreeMap<Vec<u8>, MemTableEntry>;

/// Read-write transaction over the engine
///
/// Reads see the snapshot taken at begin plus this transaction's own
/// writes. Dropping without [`commit`](Self::commit) discards the writes.
pub struct EngineTransaction<'a> {
    engine: &'a Engine,
    _guard: MutexGuard<'a, ()>,
    snapshot: Snapshot,
    /// Shared with open cursors; copied on write while one is alive
    writes: Arc<WriteSet>,
}

impl<'a> EngineTransaction<'a> {
    pub(super) fn new(engine: &'a Engine, guard: MutexGuard<'a, ()>, snapshot: Snapshot) -> Self {
        Self {
            engine,
            _guard: guard,
            snapshot,
            writes: Arc::new(WriteSet::new()),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(entry) => Ok(entry.clone().into_value()),
            None => self.snapshot.get(key),
        }
    }

    /// Cursor over the snapshot overlaid with the writes made so far
    pub fn cursor(&self) -> MergedCursor {
        let mut sources: Vec<Arc<dyn Source>> = vec![Arc::clone(&self.writes) as Arc<dyn Source>];
        sources.extend(self.snapshot.sources());
        MergedCursor::new(sources)
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        Arc::make_mut(&mut self.writes)
            .insert(key.to_vec(), MemTableEntry::Value(value.to_vec()));
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        Arc::make_mut(&mut self.writes).insert(key.to_vec(), MemTableEntry::Tombstone);
        Ok(())
    }

    /// Number of keys written
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Write the buffered set to the WAL and publish it atomically
    pub fn commit(self) -> Result<()> {
        let writes = Arc::try_unwrap(self.writes).unwrap_or_else(|shared| (*shared).clone());
        let operations: Vec<Operation> = writes
            .into_iter()
            .map(|(key, entry)| match entry {
                MemTableEntry::Value(value) => Operation::Put { key, value },
                MemTableEntry::Tombstone => Operation::Delete { key },
            })
            .collect();
        self.engine.commit_locked(operations)?;
        Ok(())
    }

    /// Throw the buffered writes away
    pub fn discard(self) {}
}
