//! Query descriptors
//!
//! A [`Query`] names a key prefix (entity plus leading filter segments),
//! a direction, a row limit and an optional record predicate. It is
//! reusable: every execution moves its offset to the last row produced,
//! so running it again continues where the previous run stopped.

use std::fmt;
use std::sync::Arc;

use crate::key::{Entity, Hex, Key, KeyPart};
use crate::record::Record;

/// Per-record predicate; rows it rejects are skipped without counting
pub type RecordFilter = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Range-scan request over one key prefix
#[derive(Clone)]
pub struct Query {
    filter: Vec<u8>,
    offset: Vec<u8>,
    desc: bool,
    /// `None` means no limit
    limit: Option<u64>,
    record_filter: Option<RecordFilter>,

    /// Rows produced by the last execution
    pub num_rows: u64,
}

impl Query {
    /// Query everything under `entity`
    pub fn new(entity: Entity) -> Self {
        Self::with_filter(Key::new(entity))
    }

    /// Query the rows of `entity` whose leading segments equal `parts`
    pub fn for_entity<P: KeyPart + ?Sized>(entity: Entity, parts: &P) -> Self {
        Self::with_filter(Key::new(entity).with(parts))
    }

    /// Query under an already-built key prefix
    pub fn with_filter(filter: impl Into<Vec<u8>>) -> Self {
        Self {
            filter: filter.into(),
            offset: Vec::new(),
            desc: false,
            limit: None,
            record_filter: None,
            num_rows: 0,
        }
    }

    /// First row only, ascending
    pub fn first(self) -> Self {
        self.limit(1).asc()
    }

    /// Last row only, descending
    pub fn last(self) -> Self {
        self.limit(1).desc()
    }

    /// Produce at most `limit` rows; `0` produces none
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn unlimited(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Resume after the row whose key suffix encodes `offset`
    pub fn offset<P: KeyPart + ?Sized>(mut self, offset: &P) -> Self {
        let mut buf = Vec::new();
        offset.encode_key_part(&mut buf);
        self.offset = buf;
        self
    }

    /// Resume after a raw key suffix (as returned by [`current_offset`](Self::current_offset))
    pub fn offset_bytes(mut self, offset: impl Into<Vec<u8>>) -> Self {
        self.offset = offset.into();
        self
    }

    pub fn asc(mut self) -> Self {
        self.desc = false;
        self
    }

    pub fn desc(mut self) -> Self {
        self.desc = true;
        self
    }

    /// Only produce records for which `f` returns true
    pub fn filter_record<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.record_filter = Some(Arc::new(f));
        self
    }

    /// Key suffix of the last row produced
    pub fn current_offset(&self) -> &[u8] {
        &self.offset
    }

    pub fn filter(&self) -> &[u8] {
        &self.filter
    }

    pub fn is_desc(&self) -> bool {
        self.desc
    }

    pub fn row_limit(&self) -> Option<u64> {
        self.limit
    }

    pub(crate) fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    pub(crate) fn set_offset(&mut self, offset: &[u8]) {
        self.offset.clear();
        self.offset.extend_from_slice(offset);
    }

    pub(crate) fn accepts(&self, record: &Record) -> bool {
        self.record_filter.as_ref().map_or(true, |f| f(record))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{filter:{}, offset:{}, limit:",
            Hex(&self.filter),
            Hex(&self.offset)
        )?;
        match self.limit {
            Some(n) => write!(f, "{}", n)?,
            None => f.write_str("none")?,
        }
        write!(f, ", desc:{}}}", self.desc)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("filter", &format_args!("{}", Hex(&self.filter)))
            .field("offset", &format_args!("{}", Hex(&self.offset)))
            .field("desc", &self.desc)
            .field("limit", &self.limit)
            .field("record_filter", &self.record_filter.is_some())
            .field("num_rows", &self.num_rows)
            .finish()
    }
}
