//! Engine Module
//!
//! The ordered key-value engine underneath the store.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, and SSTables
//! - Hand out snapshots and cursors for consistent reads
//! - Run exclusive read-write transactions
//! - Trigger flushes when the MemTable is full
//! - Manage crash recovery on startup

mod iter;
mod snapshot;
mod transaction;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{Result, TabulaError};
use crate::sstable::{RepairReport, SSTableManager};
use crate::wal::{Operation, WalRecovery, WalWriter};

pub use iter::{Cursor, CursorResult, KeyValue, MergedCursor};
pub use snapshot::Snapshot;
pub use transaction::EngineTransaction;

use snapshot::Version;

/// The storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes**: Serialized by `write_lock`. A transaction holds it from
///   begin to commit/discard; flush and close take it too.
/// - **Reads**: Lock-free apart from cloning the current `Version`.
///   Every write set carries a sequence number; a snapshot records the
///   last published one and ignores newer memtable versions.
pub struct Engine {
    config: Config,

    /// Directory holding the SSTables
    storage_dir: PathBuf,

    wal: Mutex<WalWriter>,

    tables: SSTableManager,

    /// Current memtable + SSTable list
    state: RwLock<Arc<Version>>,

    /// Sequence number of the last published write set
    last_seq: AtomicU64,

    write_lock: Mutex<()>,

    closed: AtomicBool,
}

impl Engine {
    const WAL_FILENAME: &'static str = "wal.log";
    const SSTABLE_DIR: &'static str = "sstables";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Load existing SSTables
    /// 3. Replay the WAL and flush what it held
    /// 4. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let storage_dir = config.data_dir.join(Self::SSTABLE_DIR);
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);

        let tables = SSTableManager::open(&storage_dir)?;
        let mut sstables = tables.load()?;
        let memtable = crate::memtable::MemTable::new();

        let last_lsn = if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path)?;
            if recovery.entries_recovered > 0 || recovery.entries_corrupted > 0 {
                tracing::info!(
                    "WAL recovery: {} entries recovered, {} corrupted, last_lsn={}",
                    recovery.entries_recovered,
                    recovery.entries_corrupted,
                    recovery.last_lsn
                );
            }

            for entry in entries {
                for op in entry.operations {
                    match op {
                        Operation::Put { key, value } => memtable.put(entry.lsn, key, value),
                        Operation::Delete { key } => memtable.delete(entry.lsn, key),
                    };
                }
            }
            recovery.last_lsn
        } else {
            0
        };

        let mut wal = WalWriter::open_at(&wal_path, config.wal_sync_strategy, last_lsn)?;
        if !memtable.is_empty() {
            tracing::debug!(
                "Flushing {} recovered keys to SSTable",
                memtable.entry_count()
            );
            sstables.insert(0, tables.flush(&memtable)?);
            wal.truncate()?;
        }

        tracing::debug!(
            "Opened engine at {} ({} SSTables)",
            config.data_dir.display(),
            sstables.len()
        );

        Ok(Self {
            config,
            storage_dir,
            wal: Mutex::new(wal),
            tables,
            state: RwLock::new(Arc::new(Version::empty_memtable(sstables))),
            last_seq: AtomicU64::new(last_lsn),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Open with default config rooted at `path`
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::with_dir(path))
    }

    /// Verify the on-disk state and set aside anything unreadable
    ///
    /// Unreadable SSTables are renamed to `*.corrupt`; a torn WAL tail is
    /// cut off. The engine must not be open.
    pub fn repair(config: &Config) -> Result<RepairReport> {
        let report = SSTableManager::repair(&config.data_dir.join(Self::SSTABLE_DIR))?;
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        if wal_path.exists() {
            WalRecovery::recover(&wal_path)?;
        }
        tracing::info!(
            "Repaired {}: {} tables ok, {} quarantined",
            config.data_dir.display(),
            report.tables_ok,
            report.quarantined.len()
        );
        Ok(report)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Take a snapshot of everything committed so far
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.ensure_open()?;
        let state = self.state.read();
        let seq = self.last_seq.load(Ordering::Acquire);
        Ok(Snapshot::new(Arc::clone(&state), seq))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.snapshot()?.get(key)
    }

    /// Cursor over a fresh snapshot
    pub fn cursor(&self) -> Result<MergedCursor> {
        Ok(self.snapshot()?.cursor())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Begin an exclusive transaction, waiting for any open one to finish
    pub fn begin(&self) -> Result<EngineTransaction<'_>> {
        self.ensure_open()?;
        let guard = self.write_lock.lock();
        // close() may have won the race for the lock
        self.ensure_open()?;
        let snapshot = {
            let state = self.state.read();
            Snapshot::new(Arc::clone(&state), self.last_seq.load(Ordering::Acquire))
        };
        Ok(EngineTransaction::new(self, guard, snapshot))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut txn = self.begin()?;
        txn.put(key, value)?;
        txn.commit()
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut txn = self.begin()?;
        txn.delete(key)?;
        txn.commit()
    }

    /// Apply one write set; the caller holds `write_lock`
    fn commit_locked(&self, operations: Vec<Operation>) -> Result<u64> {
        self.ensure_open()?;
        if operations.is_empty() {
            return Ok(self.last_seq.load(Ordering::Acquire));
        }

        // WAL first: a failed append must leave nothing behind in the memtable
        let seq = self.wal.lock().append(operations.clone())?;

        let version = Arc::clone(&self.state.read());
        for op in operations {
            match op {
                Operation::Put { key, value } => version.memtable.put(seq, key, value),
                Operation::Delete { key } => version.memtable.delete(seq, key),
            };
        }
        self.last_seq.store(seq, Ordering::Release);

        // The write set is durable and visible; a failed flush is retried
        // by the next commit and must not turn this one into an error
        if version.memtable.should_flush(self.config.memtable_size_limit) {
            if let Err(err) = self.flush_locked() {
                tracing::warn!("Flush after commit {} failed, will retry: {}", seq, err);
            }
        }
        Ok(seq)
    }

    /// Force the memtable out to an SSTable
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.ensure_open()?;
        self.flush_locked()
    }

    fn flush_locked(&self) -> Result<()> {
        let current = Arc::clone(&self.state.read());
        if current.memtable.is_empty() {
            return Ok(());
        }

        let table = self.tables.flush(&current.memtable)?;
        let mut sstables = Vec::with_capacity(current.sstables.len() + 1);
        sstables.push(table);
        sstables.extend(current.sstables.iter().cloned());
        *self.state.write() = Arc::new(Version::empty_memtable(sstables));

        self.wal.lock().truncate()
    }

    /// Flush pending data and refuse further operations
    ///
    /// Returns [`TabulaError::EngineClosed`] when already closed. Snapshots
    /// and cursors taken earlier stay readable.
    pub fn close(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TabulaError::EngineClosed);
        }
        self.flush_locked()?;
        self.wal.lock().sync()?;
        tracing::debug!("Closed engine at {}", self.config.data_dir.display());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(TabulaError::EngineClosed)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the storage directory path (where SSTables are stored)
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn memtable_size(&self) -> usize {
        self.state.read().memtable.size()
    }

    /// Distinct keys currently held in the memtable
    pub fn memtable_entry_count(&self) -> usize {
        self.state.read().memtable.entry_count()
    }

    pub fn sstable_count(&self) -> usize {
        self.state.read().sstables.len()
    }

    /// Sequence number of the last committed write set
    pub fn last_sequence(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
