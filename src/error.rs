//! Error types for recstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for recstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Offset {offset} out of bounds (volume length {len})")]
    OutOfBounds { offset: u64, len: u64 },

    #[error("Volume is read-only")]
    ReadOnly,

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    #[error("Data corruption: {0}")]
    DataCorruption(String),

    #[error("Pointer checksum broken: {0:#018x}")]
    PointerChecksumBroken(u64),

    #[error("Header checksum broken: {0}")]
    HeadChecksumBroken(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Wrong configuration: {0}")]
    WrongConfiguration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    #[error("Store is closed")]
    Closed,

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Recid {0} is not allocated")]
    RecidNotAllocated(u64),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("Transaction conflict on recid {0}, transaction was rolled back")]
    TxRollback(u64),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True for errors that mean the backing data can no longer be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::DataCorruption(_)
                | StoreError::PointerChecksumBroken(_)
                | StoreError::HeadChecksumBroken(_)
        )
    }
}
