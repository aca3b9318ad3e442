//! Transactions
//!
//! A [`Transaction`] wraps one engine transaction for the duration of an
//! [`exec`](crate::Storage::exec) call. It carries a sticky error: once a
//! write fails or the caller calls [`fail`](Transaction::fail), later
//! writes do nothing and return that error, and the transaction is
//! discarded instead of committed.
//!
//! ## Sequences
//! Per-entity counters live under [`SEQUENCES_ENTITY`]. The transaction
//! caches values it has read or issued. The store additionally remembers
//! the highest value issued per entity, so a value handed out by a
//! transaction that was later discarded is skipped rather than issued
//! twice.

use std::collections::HashMap;

use serde::Serialize;

use crate::codec::encode_value;
use crate::context::ReadContext;
use crate::cursor::{self, Visitor};
use crate::engine::EngineTransaction;
use crate::error::{Result, TabulaError};
use crate::key::{Entity, Key, SEQUENCES_ENTITY};
use crate::query::Query;
use crate::storage::Shared;

/// Read-write access to the store inside [`Storage::exec`](crate::Storage::exec)
pub struct Transaction<'a> {
    shared: &'a Shared,
    txn: EngineTransaction<'a>,
    err: Option<TabulaError>,
    sequences: HashMap<Entity, u64>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(shared: &'a Shared, txn: EngineTransaction<'a>) -> Self {
        Self {
            shared,
            txn,
            err: None,
            sequences: HashMap::new(),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store raw bytes under `key`
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check()?;
        let res = self.txn.put(key, value);
        self.record(res)
    }

    /// Encode `value` and store it under `key`
    pub fn put_var<T: Serialize + ?Sized>(&mut self, key: &[u8], value: &T) -> Result<()> {
        self.check()?;
        let data = encode_value(value);
        let data = self.record(data)?;
        self.put(key, &data)
    }

    pub fn put_id(&mut self, key: &[u8], id: u64) -> Result<()> {
        self.put_var(key, &id)
    }

    pub fn put_int(&mut self, key: &[u8], value: i64) -> Result<()> {
        self.put_var(key, &value)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check()?;
        let res = self.txn.delete(key);
        self.record(res)
    }

    /// Add `delta` to the integer under `key` (absent counts as 0)
    pub fn inc_int(&mut self, key: &[u8], delta: i64) -> Result<i64> {
        self.check()?;
        let current = self.get_int(key);
        let value = self.record(current)?.unwrap_or(0).checked_add(delta).ok_or_else(|| {
            TabulaError::failed(format!("counter overflow adding {}", delta))
        });
        let value = self.record(value)?;
        self.put_int(key, value)?;
        Ok(value)
    }

    // =========================================================================
    // Failure
    // =========================================================================

    /// Mark the transaction failed; it will be discarded
    ///
    /// The first failure wins.
    pub fn fail(&mut self, err: TabulaError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// The sticky error, if one is set
    pub fn error(&self) -> Option<&TabulaError> {
        self.err.as_ref()
    }

    fn check(&self) -> Result<()> {
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Make a failed write sticky
    fn record<T>(&mut self, res: Result<T>) -> Result<T> {
        res.map_err(|err| {
            self.fail(err.clone());
            err
        })
    }

    // =========================================================================
    // Sequences
    // =========================================================================

    /// Current value of `entity`'s sequence without advancing it
    pub fn sequence_cur_val(&mut self, entity: Entity) -> Result<u64> {
        if let Some(&v) = self.sequences.get(&entity) {
            return Ok(v);
        }
        let stored = self.get_id(sequence_key(entity).as_bytes());
        let v = self.record(stored)?.unwrap_or(0);
        self.sequences.insert(entity, v);
        Ok(v)
    }

    /// Advance `entity`'s sequence and return the new value
    pub fn sequence_next_val(&mut self, entity: Entity) -> Result<u64> {
        self.check()?;
        let current = self.sequence_cur_val(entity)?;
        let reserved = self.shared.sequence_reservation(entity);
        let next = current.max(reserved).checked_add(1).ok_or_else(|| {
            TabulaError::failed(format!("sequence of entity {} is exhausted", entity))
        });
        let next = self.record(next)?;

        self.put_id(sequence_key(entity).as_bytes(), next)?;
        self.sequences.insert(entity, next);
        self.shared.reserve_sequence(entity, next);
        Ok(next)
    }

    /// Set `entity`'s sequence to `value`
    pub fn put_sequence_value(&mut self, entity: Entity, value: u64) -> Result<()> {
        self.put_id(sequence_key(entity).as_bytes(), value)?;
        self.sequences.insert(entity, value);
        self.shared.set_sequence_reservation(entity, value);
        Ok(())
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Commit, or discard when the sticky error is set
    pub(crate) fn finish(self) -> Result<()> {
        match self.err {
            Some(err) => {
                self.txn.discard();
                Err(err)
            }
            None => self.txn.commit(),
        }
    }
}

impl ReadContext for Transaction<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.txn.get(key)
    }

    fn scan(&self, query: &mut Query, visit: Option<&mut Visitor<'_>>) -> Result<()> {
        let mut cursor = self.txn.cursor();
        cursor::execute(&mut cursor, query, visit)
    }
}

fn sequence_key(entity: Entity) -> Key {
    Key::new(SEQUENCES_ENTITY).with(&entity)
}
