//! Storage
//!
//! Owns the engine handle and everything scoped to one store directory:
//! lifecycle (open / close / destroy / truncate / reopen), transactional
//! writes through [`Storage::exec`] and [`Storage::exec_batch`], and online
//! compaction through [`Storage::vacuum`].
//!
//! ## Locking
//! - `write_lock` serializes direct transactions, vacuum and truncate.
//! - `engine` is a `RwLock` around the handle. Reads and transactions hold
//!   it shared for their whole duration; only close and the vacuum
//!   directory swap take it exclusively.
//!
//! Lock order is `write_lock` → `engine`.

use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::batch::{self, Coalescer};
use crate::config::Config;
use crate::context::ReadContext;
use crate::cursor::{self, Visitor};
use crate::engine::{Cursor, Engine};
use crate::error::{Result, TabulaError};
use crate::key::Entity;
use crate::query::Query;
use crate::transaction::Transaction;

/// State shared between the store handle and its batch committer
pub(crate) struct Shared {
    config: Config,
    engine: RwLock<Option<Arc<Engine>>>,
    write_lock: Mutex<()>,
    /// Highest sequence value issued per entity
    sequences: Mutex<HashMap<Entity, u64>>,
    coalescer: Coalescer,
}

impl Shared {
    pub(crate) fn coalescer(&self) -> &Coalescer {
        &self.coalescer
    }

    pub(crate) fn sequence_reservation(&self, entity: Entity) -> u64 {
        self.sequences.lock().get(&entity).copied().unwrap_or(0)
    }

    pub(crate) fn reserve_sequence(&self, entity: Entity, value: u64) {
        let mut sequences = self.sequences.lock();
        let slot = sequences.entry(entity).or_insert(0);
        *slot = (*slot).max(value);
    }

    pub(crate) fn set_sequence_reservation(&self, entity: Entity, value: u64) {
        self.sequences.lock().insert(entity, value);
    }

    /// Run `f` in a new transaction; commit unless it failed
    ///
    /// An `Err` return or a panic inside `f` marks the transaction failed.
    /// Panics never escape.
    pub(crate) fn exec<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<()>,
    {
        let _write_guard = self.write_lock.lock();
        let handle = self.engine.read_recursive();
        let engine = handle.as_ref().ok_or(TabulaError::EngineClosed)?;

        let mut tx = Transaction::new(self, engine.begin()?);
        match panic::catch_unwind(AssertUnwindSafe(|| f(&mut tx))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tx.fail(err),
            Err(payload) => {
                let err = TabulaError::from_panic(payload);
                tracing::warn!("Transaction panicked: {}", err);
                tx.fail(err);
            }
        }
        tx.finish()
    }

    fn open_engine(config: &Config) -> Result<Engine> {
        match Engine::open(config.clone()) {
            Ok(engine) => Ok(engine),
            Err(err) => {
                tracing::warn!(
                    "Opening {} failed ({}), repairing",
                    config.data_dir.display(),
                    err
                );
                Engine::repair(config)?;
                Engine::open(config.clone())
            }
        }
    }

    /// Close the engine if open; the handle is left empty
    fn close_engine(&self) -> Result<()> {
        let engine = self.engine.write().take();
        self.coalescer.stop();
        match engine {
            Some(engine) => match engine.close() {
                Err(TabulaError::EngineClosed) => Ok(()),
                other => other,
            },
            None => Ok(()),
        }
    }
}

/// An open store
///
/// All methods take `&self`; share a `Storage` between threads with `Arc`.
/// Dropping it closes the engine.
pub struct Storage {
    shared: Arc<Shared>,
}

impl Storage {
    /// Open or create the store described by `config`
    ///
    /// If the first open fails the directory is repaired (unreadable
    /// tables set aside, torn log tail cut) and opened again.
    pub fn open(config: Config) -> Result<Self> {
        let engine = Shared::open_engine(&config)?;
        tracing::info!("Opened storage at {}", config.data_dir.display());

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                engine: RwLock::new(Some(Arc::new(engine))),
                write_lock: Mutex::new(()),
                sequences: Mutex::new(HashMap::new()),
                coalescer: Coalescer::default(),
            }),
        })
    }

    /// Open with default config rooted at `path`
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::with_dir(path))
    }

    /// Open the engine again after [`close`](Self::close) or [`destroy`](Self::destroy)
    ///
    /// Does nothing when the store is already open.
    pub fn reopen(&self) -> Result<()> {
        let mut handle = self.shared.engine.write();
        if handle.is_none() {
            *handle = Some(Arc::new(Shared::open_engine(&self.shared.config)?));
            self.shared.coalescer.resume();
            tracing::info!("Reopened storage at {}", self.dir().display());
        }
        Ok(())
    }

    /// Flush and close the engine; later calls fail with [`TabulaError::EngineClosed`]
    ///
    /// Waits for running transactions. Closing twice is not an error.
    pub fn close(&self) -> Result<()> {
        self.shared.close_engine()?;
        tracing::info!("Closed storage at {}", self.dir().display());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.engine.read_recursive().is_none()
    }

    /// Close the store and delete its directory
    pub fn destroy(&self) -> Result<()> {
        self.shared.close_engine()?;
        let dir = self.dir();
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        self.shared.sequences.lock().clear();
        tracing::info!("Destroyed storage at {}", dir.display());
        Ok(())
    }

    /// Delete every record and start over with an empty store
    pub fn truncate(&self) -> Result<()> {
        let _write_guard = self.shared.write_lock.lock();
        self.destroy()?;
        self.reopen()?;
        tracing::info!("Truncated storage at {}", self.dir().display());
        Ok(())
    }

    /// Total bytes of every file under the store directory
    pub fn size(&self) -> Result<u64> {
        dir_size(self.dir())
    }

    pub fn dir(&self) -> &Path {
        &self.shared.config.data_dir
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Group commits performed by [`exec_batch`](Self::exec_batch) so far
    pub fn batch_commit_count(&self) -> u64 {
        self.shared.coalescer.commit_count()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Run `f` in its own transaction
    ///
    /// Direct transactions run one at a time. The transaction commits when
    /// `f` returns `Ok` without having called [`Transaction::fail`]; an
    /// error, a sticky failure or a panic discards it and is returned.
    pub fn exec<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<()>,
    {
        self.shared.exec(f)
    }

    /// Run `f` as part of the next group commit
    ///
    /// Blocks until the batch containing `f` commits and returns the
    /// batch's result, which is shared by every function in it.
    pub fn exec_batch<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<()> + Send + 'static,
    {
        batch::submit(&self.shared, Box::new(f))
    }

    // =========================================================================
    // Vacuum
    // =========================================================================

    /// Rewrite the store into a fresh directory, dropping dead data
    ///
    /// Live records are copied from a snapshot into `<dir>.tmp` in
    /// sub-transactions of `vacuum_batch_size`, then the directories are
    /// swapped. Readers keep using the old engine until the swap; writers
    /// wait for the whole vacuum.
    pub fn vacuum(&self) -> Result<()> {
        let _write_guard = self.shared.write_lock.lock();
        let config = &self.shared.config;
        let dir = config.data_dir.clone();
        let tmp_dir = sibling(&dir, "tmp");
        let old_dir = sibling(&dir, "old");

        for leftover in [&tmp_dir, &old_dir] {
            if leftover.exists() {
                fs::remove_dir_all(leftover)?;
            }
        }

        let snapshot = {
            let handle = self.shared.engine.read_recursive();
            let engine = handle.as_ref().ok_or(TabulaError::EngineClosed)?;
            engine.snapshot()?
        };
        let size_before = self.size()?;

        let copied = {
            let fresh = Engine::open(config.relocated(tmp_dir.clone()))?;
            let copied = copy_live(&mut snapshot.cursor(), &fresh, config.vacuum_batch_size)?;
            fresh.close()?;
            copied
        };
        drop(snapshot);

        {
            let mut handle = self.shared.engine.write();
            if let Some(engine) = handle.take() {
                if let Err(err) = engine.close() {
                    if !err.is_closed() {
                        *handle = Some(engine);
                        return Err(err);
                    }
                }
            }

            if let Err(err) = fs::rename(&dir, &old_dir) {
                *handle = Some(Arc::new(Engine::open(config.clone())?));
                return Err(err.into());
            }
            if let Err(err) = fs::rename(&tmp_dir, &dir) {
                fs::rename(&old_dir, &dir)?;
                *handle = Some(Arc::new(Engine::open(config.clone())?));
                return Err(err.into());
            }
            *handle = Some(Arc::new(Engine::open(config.clone())?));
        }

        fs::remove_dir_all(&old_dir)?;
        tracing::info!(
            "Vacuumed {}: {} records, {} -> {} bytes",
            dir.display(),
            copied,
            size_before,
            self.size()?
        );
        Ok(())
    }
}

impl ReadContext for Storage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.shared.engine.read_recursive();
        let engine = handle.as_ref().ok_or(TabulaError::EngineClosed)?;
        engine.get(key)
    }

    /// Scans read a snapshot; concurrent commits are not observed
    fn scan(&self, query: &mut Query, visit: Option<&mut Visitor<'_>>) -> Result<()> {
        let handle = self.shared.engine.read_recursive();
        let mut cursor = handle.as_ref().ok_or(TabulaError::EngineClosed)?.cursor()?;
        cursor::execute(&mut cursor, query, visit)
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(err) = self.shared.close_engine() {
            tracing::warn!("Closing {} on drop failed: {}", self.dir().display(), err);
        }
    }
}

/// Copy every live record under `cursor` into `target`, `batch_size` per commit
fn copy_live<C: Cursor>(cursor: &mut C, target: &Engine, batch_size: usize) -> Result<u64> {
    let mut copied = 0u64;
    let mut item = cursor.seek_first()?;
    while item.is_some() {
        let mut txn = target.begin()?;
        let mut n = 0;
        while n < batch_size {
            let Some((key, value)) = item.take() else {
                break;
            };
            txn.put(&key, &value)?;
            n += 1;
            item = cursor.next()?;
        }
        txn.commit()?;
        copied += n as u64;
    }
    Ok(copied)
}

/// `<dir>.<suffix>` beside `dir`
fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    if !path.exists() {
        return Ok(0);
    }
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        total += if meta.is_dir() {
            dir_size(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}
