//! # recstore
//!
//! An embedded record store:
//! - Records addressed by recid, stored in a single file (or in memory)
//! - Freed space recycled per 16-byte size class through in-file long stacks
//! - Parity-protected pointers; corruption is reported, never patched
//! - Write-ahead log with crash-safe replay for transactional stores
//! - Optimistic transactions with snapshots and conflict detection
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                TxEngine / Tx (optional)                      │
//! │          snapshots, first-committer-wins conflicts           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ RecordStore
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │         StoreWal (transactions)  or  StoreDirect             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────────┐
//!   │     WAL     │          │  WriteBack      │
//!   │  (Append)   │          │  overlay        │
//!   └─────────────┘          └───────┬─────────┘
//!                                    │
//!                                    ▼
//!                           ┌─────────────────┐
//!                           │     Volume      │
//!                           │ memory/mmap/file│
//!                           └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod encoding;
pub mod engine;
pub mod serializer;
pub mod store;
pub mod tx;
pub mod volume;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{ByteTransform, Config, ConfigBuilder, Feature, FeatureSet, VolumeKind};
pub use engine::{open, RecordStore, RecordStoreExt};
pub use error::{Result, StoreError};
pub use serializer::{BincodeSerializer, BytesSerializer, Serializer, StringSerializer};
pub use store::{StoreDirect, StoreStats, StoreWal};
pub use tx::{Tx, TxEngine};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of recstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Reserved Recids
// =============================================================================

/// Catalog of named records, reserved for collection layers
pub const RECID_NAME_CATALOG: u64 = 1;

/// Catalog of serialized class descriptions
pub const RECID_CLASS_CATALOG: u64 = 2;

/// Recids up to and including this one are preallocated when a store is
/// created; the first `put` returns `RECID_LAST_RESERVED + 1`
pub const RECID_LAST_RESERVED: u64 = 8;
