//! Configuration for Tabula
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};

/// Main configuration for a Tabula store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (WAL, SSTables, etc.)
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log          (write-ahead log)
    ///     └── sstables/        (SSTable files)
    ///
    /// Vacuum uses the siblings `{data_dir}.tmp` and `{data_dir}.old`.
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Maintenance Configuration
    // -------------------------------------------------------------------------
    /// Records copied per sub-transaction during vacuum
    pub vacuum_batch_size: usize,

    /// Records loaded per sub-transaction during restore
    pub restore_batch_size: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tabula_data"),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 64 * 1024 * 1024, // 64 MB
            vacuum_batch_size: 10_000,
            restore_batch_size: 10_000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Default config rooted at `path`
    pub fn with_dir(path: impl AsRef<Path>) -> Self {
        Self::builder().data_dir(path.as_ref()).build()
    }

    /// Copy of this config pointing at another directory
    pub(crate) fn relocated(&self, data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..self.clone()
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    ///
    /// Trailing separators are dropped so that `{dir}.tmp` lands beside it.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        self.config.data_dir = path.components().collect();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set how many records vacuum copies per sub-transaction
    pub fn vacuum_batch_size(mut self, count: usize) -> Self {
        self.config.vacuum_batch_size = count.max(1);
        self
    }

    /// Set how many records restore loads per sub-transaction
    pub fn restore_batch_size(mut self, count: usize) -> Self {
        self.config.restore_batch_size = count.max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
