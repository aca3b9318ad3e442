//! SSTable Manager
//!
//! Owns the SSTable directory.
//!
//! ## Responsibilities
//! - Discover existing SSTables on startup (newest first)
//! - Create new SSTables from MemTable flushes
//! - Quarantine unreadable SSTables during repair

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Result, TabulaError};
use crate::memtable::MemTable;

use super::{SSTableBuilder, SSTableReader};

/// Outcome of [`SSTableManager::repair`]
#[derive(Debug, Default, Clone)]
pub struct RepairReport {
    /// Tables that passed verification
    pub tables_ok: usize,
    /// Tables renamed to `*.corrupt`
    pub quarantined: Vec<PathBuf>,
}

/// Manages the SSTable files of one engine
///
/// ## Concurrency:
/// - `next_sstable_id`: Atomic counter (lock-free)
/// - Readers are handed out as `Arc`s; the engine's version list owns them
pub struct SSTableManager {
    dir: PathBuf,
    next_sstable_id: AtomicU64,
}

impl SSTableManager {
    /// Open or create the SSTable directory
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let next_id = Self::discover(path)?.first().map(|&id| id + 1).unwrap_or(1);

        Ok(Self {
            dir: path.to_path_buf(),
            next_sstable_id: AtomicU64::new(next_id),
        })
    }

    /// Open readers for every SSTable, newest first
    pub fn load(&self) -> Result<Vec<Arc<SSTableReader>>> {
        Self::discover(&self.dir)?
            .into_iter()
            .map(|id| SSTableReader::open(&self.sstable_path(id)).map(Arc::new))
            .collect()
    }

    /// Write the latest version of every memtable key into a new SSTable
    pub fn flush(&self, memtable: &MemTable) -> Result<Arc<SSTableReader>> {
        if memtable.is_empty() {
            return Err(TabulaError::Storage(
                "Cannot flush empty MemTable".to_string(),
            ));
        }

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let path = self.sstable_path(id);

        let mut builder = SSTableBuilder::new(&path)?;
        for (key, entry) in memtable.iter() {
            builder.add_entry(&key, &entry)?;
        }
        let table = builder.finish()?;
        tracing::debug!(
            "Flushed {} entries to {} ({} bytes)",
            table.entry_count(),
            table.path.display(),
            table.file_size
        );

        Ok(Arc::new(SSTableReader::open(&path)?))
    }

    /// Verify every SSTable in `path`, renaming failures to `*.corrupt`
    pub fn repair(path: &Path) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        if !path.exists() {
            return Ok(report);
        }

        for id in Self::discover(path)? {
            let table_path = Self::sstable_path_with_dir(path, id);
            let verdict = SSTableReader::open(&table_path).and_then(|reader| reader.verify());
            match verdict {
                Ok(()) => report.tables_ok += 1,
                Err(e) => {
                    let quarantine = table_path.with_extension("corrupt");
                    tracing::warn!(
                        "Quarantining SSTable {}: {}",
                        table_path.display(),
                        e
                    );
                    fs::rename(&table_path, &quarantine)?;
                    report.quarantined.push(quarantine);
                }
            }
        }
        Ok(report)
    }

    /// Get the SSTable directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the next SSTable ID (for testing/debugging)
    pub fn next_sstable_id(&self) -> u64 {
        self.next_sstable_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// SSTable ids found in `dir`, highest first
    fn discover(dir: &Path) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let file_path = entry?.path();
            if file_path.is_file() {
                if let Some(id) = Self::parse_sstable_id(&file_path) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    fn sstable_path(&self, id: u64) -> PathBuf {
        Self::sstable_path_with_dir(&self.dir, id)
    }

    fn sstable_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("sstable_{:06}.sst", id))
    }

    /// "sstable_000042.sst" → Some(42)
    fn parse_sstable_id(path: &Path) -> Option<u64> {
        if path.extension()? != "sst" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        let id_str = name.strip_prefix("sstable_")?;
        id_str.parse().ok()
    }
}
