//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.
//! One entry holds the complete write set of one committed transaction.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TabulaError};

/// Frame header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operations applied atomically by this entry
    pub operations: Vec<Operation>,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Operation {
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

impl WalEntry {
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            lsn,
            operations,
            timestamp,
        }
    }

    /// Serialize into a complete frame: `[lsn][crc][len][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| TabulaError::Serialization(format!("WAL entry: {}", e)))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.put_u64_le(self.lsn);
        frame.put_u32_le(Self::compute_crc(self.lsn, &payload));
        frame.put_u32_le(payload.len() as u32);
        frame.put_slice(&payload);
        Ok(frame)
    }

    /// Decode a frame payload after the header has been validated
    pub fn deserialize(header: &[u8; HEADER_SIZE], payload: &[u8]) -> Result<Self> {
        let mut buf = &header[..];
        let lsn = buf.get_u64_le();
        let crc = buf.get_u32_le();

        if Self::compute_crc(lsn, payload) != crc {
            return Err(TabulaError::WalCorruption(format!(
                "CRC mismatch for entry with LSN {}",
                lsn
            )));
        }

        let entry: WalEntry = bincode::deserialize(payload)
            .map_err(|e| TabulaError::WalCorruption(format!("undecodable entry: {}", e)))?;

        if entry.lsn != lsn {
            return Err(TabulaError::WalCorruption(format!(
                "LSN mismatch: header {} vs payload {}",
                lsn, entry.lsn
            )));
        }
        Ok(entry)
    }

    /// CRC over the LSN and payload bytes
    pub fn compute_crc(lsn: u64, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }
}

/// Payload length stored in a frame header
pub(crate) fn frame_payload_len(header: &[u8; HEADER_SIZE]) -> usize {
    let mut buf = &header[12..];
    buf.get_u32_le() as usize
}
