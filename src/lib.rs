//! # Tabula
//!
//! Tables and indexes on top of an embedded ordered key-value engine:
//! - Composite keys whose byte order equals tuple order
//! - Prefix range queries with resumable pagination, in either direction
//! - Per-table sequences and typed values
//! - All-or-nothing transactions, plus group commit for concurrent writers
//! - Online vacuum, dump and restore
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Storage                              │
//! │        exec / exec_batch / vacuum / dump / restore           │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!   ┌────────────────────────┐      ┌────────────────────────┐
//!   │   Batch Coalescer      │─────▶│      Transaction       │
//!   │   (group commit)       │      │  (sticky error, seqs)  │
//!   └────────────────────────┘      └───────────┬────────────┘
//!                                               │ ReadContext
//!                                               ▼
//!                                   ┌────────────────────────┐
//!                                   │  Cursor Engine / Query │
//!                                   └───────────┬────────────┘
//!                                               │
//! ┌─────────────────────────────────────────────▼───────────────┐
//! │                          Engine                              │
//! │      WAL (append)  ·  MemTable (versions)  ·  SSTables       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use tabula::{key, Query, ReadContext, Storage};
//!
//! const USERS: tabula::Entity = 1;
//!
//! # fn main() -> tabula::Result<()> {
//! let store = Storage::open_path("./users_db")?;
//! store.exec(|tx| {
//!     let id = tx.sequence_next_val(USERS)?;
//!     tx.put_var(&key!(USERS, id), "Alice")
//! })?;
//!
//! let mut query = Query::new(USERS).limit(10);
//! store.fetch(&mut query, |record| {
//!     println!("{} -> {}", record.row_id()?, record.value_str()?);
//!     Ok(ControlFlow::Continue(()))
//! })?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod memtable;
pub mod sstable;
pub mod engine;

pub mod key;
pub mod codec;
pub mod record;
pub mod query;
pub mod cursor;
pub mod context;
pub mod transaction;
pub mod batch;
pub mod storage;
mod dump;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TabulaError};
pub use config::{Config, ConfigBuilder, WalSyncStrategy};
pub use engine::{Cursor, Engine, EngineTransaction, Snapshot};
pub use key::{decode_key, encode_key, Entity, FromKeyPart, Key, KeyPart, SEQUENCES_ENTITY};
pub use codec::{decode_value, encode_value};
pub use record::Record;
pub use query::Query;
pub use cursor::Visitor;
pub use context::ReadContext;
pub use transaction::Transaction;
pub use storage::Storage;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Tabula
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
