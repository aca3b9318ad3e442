//! Group commit
//!
//! Write functions submitted through [`Storage::exec_batch`](crate::Storage::exec_batch)
//! are queued in a pending batch. A background committer swaps the whole
//! batch out, runs every function in submission order inside one
//! transaction and commits once; every caller of that batch then receives
//! the same result.
//!
//! ## Signalling
//! - The caller whose write makes the batch non-empty starts the committer
//!   if none is running, or wakes it through the condvar. Both happen under
//!   the lock that guards the swap, so the committer can never sleep on a
//!   non-empty batch.
//! - Completion is a crossbeam channel that is never sent on: dropping the
//!   sender disconnects it and releases every waiter at once.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, TabulaError};
use crate::storage::Shared;
use crate::transaction::Transaction;

/// A write function queued for the next group commit
pub type BatchWrite = Box<dyn FnOnce(&mut Transaction<'_>) -> Result<()> + Send>;

type ResultSlot = Arc<Mutex<Option<Result<()>>>>;

/// Writes collected for one commit plus the signal their callers wait on
struct PendingBatch {
    writes: Vec<BatchWrite>,
    done_tx: Sender<()>,
    done_rx: Receiver<()>,
    result: ResultSlot,
}

impl Default for PendingBatch {
    fn default() -> Self {
        let (done_tx, done_rx) = channel::bounded(0);
        Self {
            writes: Vec::new(),
            done_tx,
            done_rx,
            result: Arc::new(Mutex::new(None)),
        }
    }
}

#[derive(Default)]
struct CoalescerState {
    pending: PendingBatch,
    committer_running: bool,
    /// Set by close; an idle committer exits instead of waiting
    stopping: bool,
}

/// Batch queue and committer control, owned by the store
#[derive(Default)]
pub(crate) struct Coalescer {
    state: Mutex<CoalescerState>,
    wake: Condvar,
    commits: AtomicU64,
}

impl Coalescer {
    /// Number of group commits performed so far
    pub(crate) fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Let an idle committer exit
    pub(crate) fn stop(&self) {
        self.state.lock().stopping = true;
        self.wake.notify_all();
    }

    /// Keep committers alive between batches again
    pub(crate) fn resume(&self) {
        self.state.lock().stopping = false;
    }
}

/// Queue `write` for the next group commit and wait for its result
pub(crate) fn submit(shared: &Arc<Shared>, write: BatchWrite) -> Result<()> {
    let coalescer = shared.coalescer();
    let (done, result) = {
        let mut state = coalescer.state.lock();
        state.pending.writes.push(write);

        if state.pending.writes.len() == 1 {
            if state.committer_running {
                coalescer.wake.notify_one();
            } else if let Err(err) = spawn_committer(shared) {
                state.pending.writes.pop();
                return Err(err);
            } else {
                state.committer_running = true;
            }
        }
        (state.pending.done_rx.clone(), Arc::clone(&state.pending.result))
    };

    // Disconnect is the completion signal
    let _ = done.recv();
    let outcome = result.lock().clone();
    outcome.unwrap_or(Err(TabulaError::EngineClosed))
}

fn spawn_committer(shared: &Arc<Shared>) -> Result<()> {
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name("tabula-batch".to_string())
        .spawn(move || run_committer(shared))?;
    Ok(())
}

fn run_committer(shared: Arc<Shared>) {
    let coalescer = shared.coalescer();
    tracing::debug!("Batch committer started");

    loop {
        let batch = {
            let mut state = coalescer.state.lock();
            while state.pending.writes.is_empty() {
                if state.stopping {
                    state.committer_running = false;
                    tracing::debug!("Batch committer stopped");
                    return;
                }
                coalescer.wake.wait(&mut state);
            }
            mem::take(&mut state.pending)
        };

        let size = batch.writes.len();
        let writes = batch.writes;
        let result = shared.exec(move |tx| {
            for write in writes {
                if let Err(err) = write(tx) {
                    tx.fail(err);
                }
            }
            Ok(())
        });

        *batch.result.lock() = Some(result.clone());
        drop(batch.done_tx);
        coalescer.commits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Group commit of {} writes: {:?}", size, result);

        if matches!(result, Err(TabulaError::EngineClosed)) {
            let mut state = coalescer.state.lock();
            if state.pending.writes.is_empty() {
                state.committer_running = false;
                tracing::debug!("Batch committer exiting: storage closed");
                return;
            }
        }
    }
}
