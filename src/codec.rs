//! Value encoding
//!
//! Values are opaque to the store. They are written with bincode's default
//! options (varint integers, trailing bytes rejected) over serde, so any
//! `Serialize`/`Deserialize` type can be stored. A type that needs its own
//! binary layout implements those traits by hand.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, TabulaError};

fn options() -> impl Options {
    bincode::DefaultOptions::new()
}

/// Encode a value for storage
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    options()
        .serialize(value)
        .map_err(|e| TabulaError::Serialization(e.to_string()))
}

/// Decode a stored value into `T`
pub fn decode_value<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    options()
        .deserialize(data)
        .map_err(|e| TabulaError::Decode(e.to_string()))
}
