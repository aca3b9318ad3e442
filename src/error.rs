//! Error types for Tabula
//!
//! Provides a unified error type for all operations.
//!
//! `TabulaError` is `Clone`: a group-committed batch hands the same result
//! to every caller that contributed to it.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using TabulaError
pub type Result<T> = std::result::Result<T, TabulaError>;

/// Unified error type for Tabula operations
#[derive(Debug, Clone, Error)]
pub enum TabulaError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage is closed")]
    EngineClosed,

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid key data: string segment unterminated or containing NUL")]
    InvalidKeyFormat,

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TabulaError {
    /// Build a transaction failure from any message
    pub fn failed(message: impl Into<String>) -> Self {
        TabulaError::TransactionFailed(message.into())
    }

    /// True for the distinguished "store closed" error
    pub fn is_closed(&self) -> bool {
        matches!(self, TabulaError::EngineClosed)
    }

    /// Convert a caught panic payload into a transaction failure
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(err) = payload.downcast_ref::<TabulaError>() {
            return err.clone();
        } else {
            "unknown panic payload".to_string()
        };
        TabulaError::TransactionFailed(format!("panic: {}", message))
    }
}

impl From<std::io::Error> for TabulaError {
    fn from(e: std::io::Error) -> Self {
        TabulaError::Io(Arc::new(e))
    }
}
