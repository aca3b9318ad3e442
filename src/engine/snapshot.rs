//! Point-in-time views of the engine

use std::sync::Arc;

use crate::error::Result;
use crate::memtable::{MemTable, MemTableEntry};
use crate::sstable::SSTableReader;

use super::iter::{MemTableView, MergedCursor, Source};

/// The set of tables making up the store at one moment
///
/// Replaced wholesale on flush; snapshots keep the old one alive.
pub(crate) struct Version {
    pub(crate) memtable: Arc<MemTable>,
    /// Newest first
    pub(crate) sstables: Vec<Arc<SSTableReader>>,
}

impl Version {
    pub(crate) fn empty_memtable(sstables: Vec<Arc<SSTableReader>>) -> Self {
        Self {
            memtable: Arc::new(MemTable::new()),
            sstables,
        }
    }
}

/// Consistent read-only view of the store
///
/// Sees every write set committed before it was taken and none after.
#[derive(Clone)]
pub struct Snapshot {
    version: Arc<Version>,
    seq: u64,
}

impl Snapshot {
    pub(crate) fn new(version: Arc<Version>, seq: u64) -> Self {
        Self { version, seq }
    }

    /// Sequence number of the last write set this snapshot sees
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Get the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.lookup(key)?.and_then(MemTableEntry::into_value))
    }

    /// Open a cursor over this snapshot
    pub fn cursor(&self) -> MergedCursor {
        MergedCursor::new(self.sources())
    }

    pub(crate) fn lookup(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        if let Some(entry) = self.version.memtable.get(key, self.seq) {
            return Ok(Some(entry));
        }
        for table in &self.version.sstables {
            if !table.might_contain(key) {
                continue;
            }
            if let Some(entry) = table.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub(crate) fn sources(&self) -> Vec<Arc<dyn Source>> {
        let mut sources: Vec<Arc<dyn Source>> = Vec::with_capacity(self.version.sstables.len() + 1);
        sources.push(Arc::new(MemTableView {
            table: Arc::clone(&self.version.memtable),
            seq: self.seq,
        }));
        for table in &self.version.sstables {
            sources.push(Arc::clone(table) as Arc<dyn Source>);
        }
        sources
    }
}
