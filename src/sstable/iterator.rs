//! SSTable Iterator
//!
//! Sequential iteration over all entries in an SSTable, hashing the data
//! block as it goes so callers can check it against the footer CRC.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Buf;

use crate::error::{Result, TabulaError};
use crate::memtable::MemTableEntry;

use super::{HEADER_SIZE, TOMBSTONE_MARKER};

/// Iterator over SSTable entries in sorted key order
pub struct SSTableIterator {
    file: BufReader<File>,
    /// Stop reading when we reach this offset (start of index block)
    end_offset: u64,
    offset: u64,
    crc: crc32fast::Hasher,
    failed: bool,
}

impl SSTableIterator {
    /// Open its own handle on `path` and position it at the data block
    pub(super) fn open(path: &Path, end_offset: u64) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            offset: HEADER_SIZE,
            crc: crc32fast::Hasher::new(),
            failed: false,
        })
    }

    /// CRC of the data consumed so far
    pub fn data_crc(&self) -> u32 {
        self.crc.clone().finalize()
    }

    fn read_entry(&mut self) -> Result<(Vec<u8>, MemTableEntry)> {
        let mut header = [0u8; 8];
        self.file.read_exact(&mut header)?;
        let mut buf = &header[..];
        let key_len = buf.get_u32_le() as usize;
        let val_len = buf.get_u32_le();

        let body_len = if val_len == TOMBSTONE_MARKER {
            key_len as u64
        } else {
            key_len as u64 + val_len as u64
        };
        if self.offset + 8 + body_len > self.end_offset {
            return Err(TabulaError::Storage(format!(
                "SSTable entry at offset {} overruns the data block",
                self.offset
            )));
        }

        let mut key = vec![0u8; key_len];
        self.file.read_exact(&mut key)?;
        self.crc.update(&header);
        self.crc.update(&key);

        let entry = if val_len == TOMBSTONE_MARKER {
            MemTableEntry::Tombstone
        } else {
            let mut value = vec![0u8; val_len as usize];
            self.file.read_exact(&mut value)?;
            self.crc.update(&value);
            MemTableEntry::Value(value)
        };

        self.offset += 8 + body_len;
        Ok((key, entry))
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<(Vec<u8>, MemTableEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.end_offset {
            return None;
        }
        let item = self.read_entry();
        self.failed = item.is_err();
        Some(item)
    }
}
