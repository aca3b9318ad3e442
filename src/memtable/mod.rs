//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Keep every version written since the last flush, tagged with the
//!   sequence number of its write set, so snapshots see a stable view
//! - Track size for flush triggers
//! - Ordered iteration for SSTable creation
//!
//! ## Data Structure Choice
//! `BTreeMap<key, Vec<(seq, entry)>>` wrapped in a RwLock:
//! - Ordered keys (required for SSTable generation and range scans)
//! - Versions per key appended in increasing sequence order

mod table;

pub use table::{MemTable, MemTableIterator};

/// Entry stored in the MemTable (and in SSTables / transaction write sets)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl MemTableEntry {
    /// Value bytes, or `None` for a tombstone
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            MemTableEntry::Value(v) => Some(v),
            MemTableEntry::Tombstone => None,
        }
    }

    /// Approximate in-memory footprint of the payload
    pub(crate) fn payload_len(&self) -> usize {
        match self {
            MemTableEntry::Value(v) => v.len(),
            MemTableEntry::Tombstone => 0,
        }
    }
}
