//! SSTable Reader
//!
//! Opens SSTable files and provides O(log n) key lookups and ordered key
//! navigation via an in-memory index. The file handle sits behind a mutex
//! so one reader can be shared by any number of snapshots and cursors.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use bytes::Buf;
use parking_lot::Mutex;

use crate::error::{Result, TabulaError};
use crate::memtable::MemTableEntry;

use super::iterator::SSTableIterator;
use super::{FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Reader for SSTable files with in-memory index
pub struct SSTableReader {
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    /// key → file offset of its entry
    index: BTreeMap<Vec<u8>, u64>,
    entry_count: u64,
    /// Index block starting offset (end of data block)
    index_offset: u64,
    data_crc: u32,
    file_size: u64,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Loads the entire index into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(TabulaError::Storage(format!(
                "SSTable {} too short ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(TabulaError::Storage(format!(
                "Invalid SSTable magic in {}: {:?}",
                path.display(),
                &header[0..4]
            )));
        }
        let mut buf = &header[4..];
        let version = buf.get_u16_le();
        if version != VERSION {
            return Err(TabulaError::Storage(format!(
                "Unsupported SSTable version: {}",
                version
            )));
        }
        let entry_count = buf.get_u64_le();

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        let mut buf = &footer[..];
        let index_offset = buf.get_u64_le();
        let data_crc = buf.get_u32_le();

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(TabulaError::Storage(format!(
                "SSTable {} has index offset {} outside the file",
                path.display(),
                index_offset
            )));
        }

        let mut block = vec![0u8; (file_size - FOOTER_SIZE - index_offset) as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut block)?;
        let index = parse_index(&block, path)?;

        if index.len() as u64 != entry_count {
            return Err(TabulaError::Storage(format!(
                "SSTable {} index holds {} keys, header says {}",
                path.display(),
                index.len(),
                entry_count
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            entry_count,
            index_offset,
            data_crc,
            file_size,
        })
    }

    /// Get the entry stored for `key`
    ///
    /// Returns `Ok(None)` when the key is not in this table at all and
    /// `Ok(Some(Tombstone))` when this table records its deletion.
    pub fn get(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Ok(None),
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let mut buf = &header[..];
        let key_len = buf.get_u32_le() as i64;
        let val_len = buf.get_u32_le();

        file.seek_relative(key_len)?;
        if val_len == TOMBSTONE_MARKER {
            return Ok(Some(MemTableEntry::Tombstone));
        }

        let mut value = vec![0u8; val_len as usize];
        file.read_exact(&mut value)?;
        Ok(Some(MemTableEntry::Value(value)))
    }

    /// First key after `from`
    pub fn next_key(&self, from: Bound<&[u8]>) -> Option<Vec<u8>> {
        self.index
            .range::<[u8], _>((from, Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    /// Last key before `before`
    pub fn prev_key(&self, before: Bound<&[u8]>) -> Option<Vec<u8>> {
        self.index
            .range::<[u8], _>((Bound::Unbounded, before))
            .next_back()
            .map(|(k, _)| k.clone())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.keys().next_back().map(|k| k.as_slice())
    }

    /// Quick check if a key might be in this SSTable (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false,
        }
    }

    /// Sequential iterator over all entries (own file handle)
    pub fn iter(&self) -> Result<SSTableIterator> {
        SSTableIterator::open(&self.path, self.index_offset)
    }

    /// Re-read the data block and check entry count and CRC
    pub fn verify(&self) -> Result<()> {
        let mut iter = self.iter()?;
        let mut seen = 0u64;
        for item in iter.by_ref() {
            item?;
            seen += 1;
        }
        if seen != self.entry_count {
            return Err(TabulaError::Storage(format!(
                "SSTable {} data block holds {} entries, header says {}",
                self.path.display(),
                seen,
                self.entry_count
            )));
        }
        if iter.data_crc() != self.data_crc {
            return Err(TabulaError::Storage(format!(
                "SSTable {} data CRC mismatch",
                self.path.display()
            )));
        }
        Ok(())
    }
}

/// Parse `[key_len(4)][offset(8)][key]` records
fn parse_index(mut block: &[u8], path: &Path) -> Result<BTreeMap<Vec<u8>, u64>> {
    let mut index = BTreeMap::new();
    while block.has_remaining() {
        if block.remaining() < 12 {
            return Err(TabulaError::Storage(format!(
                "SSTable {} has a truncated index record",
                path.display()
            )));
        }
        let key_len = block.get_u32_le() as usize;
        let offset = block.get_u64_le();
        if block.remaining() < key_len {
            return Err(TabulaError::Storage(format!(
                "SSTable {} has a truncated index key",
                path.display()
            )));
        }
        index.insert(block[..key_len].to_vec(), offset);
        block.advance(key_len);
    }
    Ok(index)
}
