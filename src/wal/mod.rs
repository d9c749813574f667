//! Write-Ahead Log (WAL) Module
//!
//! Provides durability for transactional stores through append-only logging.
//!
//! ## Responsibilities
//! - Append physical (offset/bytes) and logical (recid) entries
//! - Seal each transaction with a CRC32 commit marker
//! - Replay only sealed segments after a crash
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header: magic "RWAL" (4) │ version (2) │ feature bits (2)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Segment                                                      │
//! │  ┌─────┬──────────────────────────────────┐                  │
//! │  │ 1   │ offset* │ value (8)              │  LONG            │
//! │  │ 2   │ offset* │ len* │ bytes           │  BYTE_ARRAY      │
//! │  │ 3   │ recid*  │ len+1* (0 = null) │ .. │  RECORD          │
//! │  │ 4   │ recid*                           │  TOMBSTONE       │
//! │  │ 5   │ recid*                           │  PREALLOCATE     │
//! │  │ 6   │ crc32 of segment bytes (4)       │  COMMIT          │
//! │  │ 7   │ crc32 of segment bytes (4)       │  ROLLBACK        │
//! │  └─────┴──────────────────────────────────┘                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ 0 (EOF) / zero fill                                          │
//! └──────────────────────────────────────────────────────────────┘
//!   * forward-packed long
//! ```

mod entry;
mod reader;
mod replay;
mod writer;

pub use entry::{Decoded, WalRecord, WAL_HEADER_SIZE, WAL_MAGIC, WAL_VERSION};
pub use reader::{ReadEnd, WalReader};
pub use replay::{replay, verify, ReplayStats, WalReplay};
pub use writer::WriteAheadLog;
