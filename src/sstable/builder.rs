//! SSTable Builder
//!
//! Writes sorted key-value entries to a new SSTable file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::BufMut;

use crate::error::{Result, TabulaError};
use crate::memtable::MemTableEntry;

use super::{SSTable, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Builder for creating new SSTables from sorted entries
///
/// Keys must arrive in strictly increasing order; readers rely on the
/// data block being sorted.
pub struct SSTableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
    /// Offset where the next entry starts
    offset: u64,
    /// key → file offset of its entry
    index: Vec<(Vec<u8>, u64)>,
    /// Running CRC over the data block
    data_crc: crc32fast::Hasher,
    /// Reused buffer for one encoded entry
    scratch: Vec<u8>,
}

impl SSTableBuilder {
    /// Create the file and write a header with a placeholder entry count
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.put_slice(MAGIC);
        header.put_u16_le(VERSION);
        header.put_u64_le(0);

        let mut writer = BufWriter::new(file);
        writer.write_all(&header)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            entry_count: 0,
            offset: HEADER_SIZE,
            index: Vec::new(),
            data_crc: crc32fast::Hasher::new(),
            scratch: Vec::new(),
        })
    }

    /// Add a key-value pair
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.append(key, Some(value))
    }

    /// Add a tombstone
    pub fn add_tombstone(&mut self, key: &[u8]) -> Result<()> {
        self.append(key, None)
    }

    /// Add a memtable entry (value or tombstone)
    pub fn add_entry(&mut self, key: &[u8], entry: &MemTableEntry) -> Result<()> {
        match entry {
            MemTableEntry::Value(v) => self.add(key, v),
            MemTableEntry::Tombstone => self.add_tombstone(key),
        }
    }

    fn append(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if let Some((last, _)) = self.index.last() {
            if key <= last.as_slice() {
                return Err(TabulaError::Storage(format!(
                    "SSTable keys out of order: {:?} after {:?}",
                    key, last
                )));
            }
        }

        let val_len = match value {
            Some(v) if v.len() >= TOMBSTONE_MARKER as usize => {
                return Err(TabulaError::Storage(format!(
                    "value of {} bytes exceeds SSTable limit",
                    v.len()
                )))
            }
            Some(v) => v.len() as u32,
            None => TOMBSTONE_MARKER,
        };

        // [key_len(4)][val_len(4)][key][value]
        self.scratch.clear();
        self.scratch.put_u32_le(key.len() as u32);
        self.scratch.put_u32_le(val_len);
        self.scratch.put_slice(key);
        if let Some(v) = value {
            self.scratch.put_slice(v);
        }

        self.writer.write_all(&self.scratch)?;
        self.data_crc.update(&self.scratch);

        self.index.push((key.to_vec(), self.offset));
        self.offset += self.scratch.len() as u64;
        self.entry_count += 1;
        Ok(())
    }

    /// Write index block and footer, patch the header, fsync
    pub fn finish(mut self) -> Result<SSTable> {
        let index_offset = self.offset;

        let mut block = Vec::new();
        for (key, offset) in &self.index {
            block.put_u32_le(key.len() as u32);
            block.put_u64_le(*offset);
            block.put_slice(key);
        }
        block.put_u64_le(index_offset);
        block.put_u32_le(self.data_crc.clone().finalize());
        block.put_u32_le(0);
        self.writer.write_all(&block)?;
        self.writer.flush()?;

        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| TabulaError::Storage(format!("Failed to flush SSTable: {}", e)))?;
        file.seek(SeekFrom::Start(MAGIC.len() as u64 + 2))?;
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();
        let min_key = self.index.first().map(|(k, _)| k.clone()).unwrap_or_default();
        let max_key = self.index.last().map(|(k, _)| k.clone()).unwrap_or_default();

        Ok(SSTable {
            path: self.path,
            entry_count: self.entry_count,
            min_key,
            max_key,
            file_size,
        })
    }
}
