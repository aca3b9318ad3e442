//! Dump and restore
//!
//! A dump is one portable file holding raw records:
//!
//! ```text
//! ┌──────────────┬─────────────┬──────────────────────────────────┬─────────────┬───────────┐
//! │ magic "TBDP" │ version u16 │ records...                       │ count u64   │ crc32 u32 │
//! └──────────────┴─────────────┴──────────────────────────────────┴─────────────┴───────────┘
//! record: [key_len u32][val_len u32][key][value]
//! ```
//!
//! All integers are little-endian. The CRC covers the record bytes.
//! Restore verifies the whole file before loading anything.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::ControlFlow;
use std::path::Path;

use bytes::{Buf, BufMut};

use crate::context::ReadContext;
use crate::error::{Result, TabulaError};
use crate::query::Query;
use crate::record::Record;
use crate::storage::Storage;

const MAGIC: &[u8; 4] = b"TBDP";
const VERSION: u16 = 1;
const HEADER_SIZE: u64 = 6;
const TRAILER_SIZE: u64 = 12;

impl Storage {
    /// Write every record (or those `query` produces) to `path`
    ///
    /// Returns the number of records written. The scan reads one snapshot.
    pub fn dump(&self, path: impl AsRef<Path>, query: Option<&Query>) -> Result<u64> {
        let path = path.as_ref();
        let mut query = query.cloned().unwrap_or_else(|| Query::with_filter(Vec::new()));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.put_slice(MAGIC);
        header.put_u16_le(VERSION);
        writer.write_all(&header)?;

        let mut crc = crc32fast::Hasher::new();
        let mut count = 0u64;
        let mut frame = Vec::new();
        self.fetch(&mut query, |record| {
            frame.clear();
            put_record(&mut frame, record)?;
            writer.write_all(&frame)?;
            crc.update(&frame);
            count += 1;
            Ok(ControlFlow::Continue(()))
        })?;

        let mut trailer = Vec::with_capacity(TRAILER_SIZE as usize);
        trailer.put_u64_le(count);
        trailer.put_u32_le(crc.finalize());
        writer.write_all(&trailer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        tracing::info!("Dumped {} records to {}", count, path.display());
        Ok(count)
    }

    /// Load a dump written by [`dump`](Self::dump) into this store
    ///
    /// The file is verified first; records are then written in
    /// sub-transactions of `restore_batch_size`. Existing keys are
    /// overwritten. Returns the number of records loaded.
    pub fn restore(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let expected = DumpReader::open(path)?.verify()?;

        let batch_size = self.config().restore_batch_size;
        let mut reader = DumpReader::open(path)?;
        let mut loaded = 0u64;
        loop {
            let mut batch = Vec::with_capacity(batch_size.min(1024));
            while batch.len() < batch_size {
                match reader.next_record()? {
                    Some(record) => batch.push(record),
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }
            let n = batch.len() as u64;
            self.exec(move |tx| {
                for record in &batch {
                    tx.put(&record.key, &record.value)?;
                }
                Ok(())
            })?;
            loaded += n;
        }

        if loaded != expected {
            return Err(TabulaError::Decode(format!(
                "dump {} changed while restoring",
                path.display()
            )));
        }
        tracing::info!("Restored {} records from {}", loaded, path.display());
        Ok(loaded)
    }
}

fn put_record(buf: &mut Vec<u8>, record: &Record) -> Result<()> {
    let key_len = u32::try_from(record.key.len())
        .map_err(|_| TabulaError::Serialization("key too large for dump".to_string()))?;
    let val_len = u32::try_from(record.value.len())
        .map_err(|_| TabulaError::Serialization("value too large for dump".to_string()))?;
    buf.put_u32_le(key_len);
    buf.put_u32_le(val_len);
    buf.put_slice(&record.key);
    buf.put_slice(&record.value);
    Ok(())
}

/// Sequential reader over the records of a dump file
struct DumpReader {
    reader: BufReader<File>,
    offset: u64,
    /// Start of the trailer
    data_end: u64,
    crc: crc32fast::Hasher,
    count: u64,
}

impl DumpReader {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_SIZE + TRAILER_SIZE {
            return Err(TabulaError::Decode(format!(
                "dump {} too short ({} bytes)",
                path.display(),
                len
            )));
        }

        let mut reader = BufReader::new(file);
        let mut header = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut header)?;
        if &header[..4] != MAGIC {
            return Err(TabulaError::Decode(format!(
                "{} is not a dump file",
                path.display()
            )));
        }
        let version = (&header[4..]).get_u16_le();
        if version != VERSION {
            return Err(TabulaError::Decode(format!(
                "unsupported dump version {}",
                version
            )));
        }

        Ok(Self {
            reader,
            offset: HEADER_SIZE,
            data_end: len - TRAILER_SIZE,
            crc: crc32fast::Hasher::new(),
            count: 0,
        })
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        if self.offset >= self.data_end {
            return Ok(None);
        }
        let mut lens = [0u8; 8];
        self.reader.read_exact(&mut lens)?;
        let mut buf = &lens[..];
        let key_len = buf.get_u32_le() as u64;
        let val_len = buf.get_u32_le() as u64;
        if self.offset + 8 + key_len + val_len > self.data_end {
            return Err(TabulaError::Decode(format!(
                "dump record at offset {} overruns the data",
                self.offset
            )));
        }

        let mut key = vec![0u8; key_len as usize];
        self.reader.read_exact(&mut key)?;
        let mut value = vec![0u8; val_len as usize];
        self.reader.read_exact(&mut value)?;

        self.crc.update(&lens);
        self.crc.update(&key);
        self.crc.update(&value);
        self.offset += 8 + key_len + val_len;
        self.count += 1;
        Ok(Some(Record::from_raw(key, value)))
    }

    /// Read to the end and check the trailer; returns the record count
    fn verify(mut self) -> Result<u64> {
        while self.next_record()?.is_some() {}

        let mut trailer = [0u8; TRAILER_SIZE as usize];
        self.reader.read_exact(&mut trailer)?;
        let mut buf = &trailer[..];
        let count = buf.get_u64_le();
        let crc = buf.get_u32_le();

        if count != self.count {
            return Err(TabulaError::Decode(format!(
                "dump holds {} records, trailer says {}",
                self.count, count
            )));
        }
        if crc != self.crc.finalize() {
            return Err(TabulaError::Decode("dump checksum mismatch".to_string()));
        }
        Ok(count)
    }
}
