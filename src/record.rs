//! Stored key/value pairs

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{decode_value, encode_value};
use crate::error::Result;
use crate::key::{self, Entity, FromKeyPart, Hex};
use crate::query::Query;

/// One record as stored: an encoded key and an encoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Build a record by encoding `value`
    pub fn new<T: Serialize + ?Sized>(key: impl Into<Vec<u8>>, value: &T) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            value: encode_value(value)?,
        })
    }

    pub fn from_raw(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    // -------------------------------------------------------------------------
    // Key
    // -------------------------------------------------------------------------

    /// Entity (table or index) this record belongs to
    pub fn entity(&self) -> Result<Entity> {
        key::entity_of(&self.key)
    }

    /// Decode the key segments after the entity
    pub fn decode_key<T: FromKeyPart>(&self) -> Result<T> {
        key::decode_key::<T>(&self.key).map(|(_, parts)| parts)
    }

    /// Row id of a primary-key record `(entity, id)`
    pub fn row_id(&self) -> Result<u64> {
        self.decode_key::<u64>()
    }

    /// Key suffix after the query's filter prefix
    pub fn key_offset<'a>(&'a self, query: &Query) -> &'a [u8] {
        self.key.get(query.filter().len()..).unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Value
    // -------------------------------------------------------------------------

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        decode_value(&self.value)
    }

    /// Value read as a row id (index entries point at rows this way)
    pub fn value_id(&self) -> Result<u64> {
        self.decode()
    }

    pub fn value_str(&self) -> Result<String> {
        self.decode()
    }

    pub fn value_int(&self) -> Result<i64> {
        self.decode()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record({}:{})", Hex(&self.key), Hex(&self.value))
    }
}
