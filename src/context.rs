//! Read operations shared by the live store and open transactions
//!
//! Implementors supply raw `get` and `scan`; everything else (typed gets,
//! fetch helpers, counting, existence) is derived here.

use std::ops::ControlFlow;

use serde::de::DeserializeOwned;

use crate::codec::decode_value;
use crate::cursor::Visitor;
use crate::error::Result;
use crate::query::Query;
use crate::record::Record;

/// Read access to a consistent view of the store
pub trait ReadContext {
    /// Raw value stored under `key`, `None` when absent
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Execute `query`, calling `visit` for each produced row
    fn scan(&self, query: &mut Query, visit: Option<&mut Visitor<'_>>) -> Result<()>;

    /// Decode the value under `key` into `T`
    fn get_var<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(data) => decode_value(&data).map(Some),
            None => Ok(None),
        }
    }

    fn get_id(&self, key: &[u8]) -> Result<Option<u64>> {
        self.get_var(key)
    }

    fn get_int(&self, key: &[u8]) -> Result<Option<i64>> {
        self.get_var(key)
    }

    fn get_str(&self, key: &[u8]) -> Result<Option<String>> {
        self.get_var(key)
    }

    /// Visit every row `query` produces
    fn fetch<F>(&self, query: &mut Query, mut f: F) -> Result<()>
    where
        F: FnMut(&Record) -> Result<ControlFlow<()>>,
    {
        self.scan(query, Some(&mut f))
    }

    /// Visit the row id held in the value of every row `query` produces
    fn fetch_ids<F>(&self, query: &mut Query, mut f: F) -> Result<()>
    where
        F: FnMut(u64) -> Result<ControlFlow<()>>,
    {
        self.fetch(query, |record| f(record.value_id()?))
    }

    /// Number of rows `query` produces
    fn count(&self, query: &mut Query) -> Result<u64> {
        self.scan(query, None)?;
        Ok(query.num_rows)
    }

    /// True when `query` produces at least one row; `query` is left untouched
    fn exists(&self, query: &Query) -> Result<bool> {
        let mut probe = query.clone();
        probe.set_limit(Some(1));
        self.scan(&mut probe, None)?;
        Ok(probe.num_rows > 0)
    }

    /// Decode the value of the first row `query` produces
    ///
    /// Sets the query's limit to 1.
    fn query_value<T: DeserializeOwned>(&self, query: &mut Query) -> Result<Option<T>> {
        query.set_limit(Some(1));
        let mut found = None;
        self.fetch(query, |record| {
            found = Some(record.decode()?);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(found)
    }

    /// Collect the row ids of every row `query` produces
    fn query_ids(&self, query: &mut Query) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        self.fetch_ids(query, |id| {
            ids.push(id);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(ids)
    }

    /// Row id held by the first row `query` produces
    fn query_id(&self, query: &mut Query) -> Result<Option<u64>> {
        self.query_value(query)
    }
}
