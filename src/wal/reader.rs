//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Result, TabulaError};

use super::entry::{frame_payload_len, HEADER_SIZE};
use super::WalEntry;

/// Upper bound for a single frame payload (guards against garbage lengths)
const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last successfully read entry
    position: u64,
    file_len: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
        })
    }

    /// Read the next entry from the WAL
    ///
    /// Returns `Ok(None)` at a clean end of file and `WalCorruption` for a
    /// torn or damaged frame.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        if self.position >= self.file_len {
            return Ok(None);
        }

        let remaining = self.file_len - self.position;
        if remaining < HEADER_SIZE as u64 {
            return Err(TabulaError::WalCorruption(format!(
                "partial header at offset {}",
                self.position
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header)?;

        let payload_len = frame_payload_len(&header);
        if payload_len > MAX_PAYLOAD_SIZE || (payload_len as u64) > remaining - HEADER_SIZE as u64 {
            return Err(TabulaError::WalCorruption(format!(
                "partial entry at offset {} (payload {} bytes)",
                self.position, payload_len
            )));
        }

        let mut payload = vec![0u8; payload_len];
        self.reader.read_exact(&mut payload)?;

        let entry = WalEntry::deserialize(&header, &payload)?;
        self.position += (HEADER_SIZE + payload_len) as u64;
        Ok(Some(entry))
    }

    /// Offset just past the last valid entry read so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over WAL entries; stops after the first error
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
