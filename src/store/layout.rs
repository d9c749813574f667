//! On-disk layout of a direct store
//!
//! ## Zero page (64 KiB)
//! ```text
//! ┌────────┬──────────────────────────────────────────────────────┐
//! │ 0      │ magic (4) │ format version (2) │ feature bits (2)     │
//! │ 8      │ header CRC32 over [16, HEADER_SIZE) (4) │ zero (4)   │
//! │ 16     │ store size                    (parity16)             │
//! │ 24     │ max recid                     (parity4)              │
//! │ 32     │ first extra index page        (parity16, 0 = none)   │
//! │ 40     │ free-recid long stack master link                    │
//! │ 48     │ 4096 size-class master links, one per 16 bytes       │
//! │ 32816  │ index slots for recids 1..=4090                      │
//! └────────┴──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Index value (one u64 per recid)
//! ```text
//! ┌────────────┬──────────────────────────┬───────────────────────┐
//! │ size (16)  │ offset (48, 16-aligned)  │ LINKED│UNUSED│-│parity│
//! └────────────┴──────────────────────────┴───────────────────────┘
//! ```
//! Zero means "recid free". `UNUSED` marks a preallocated record that has
//! no value yet.

use crate::encoding::{parity1_get, parity1_set};
use crate::error::{Result, StoreError};

/// "RST1"
pub const MAGIC: u32 = 0x5253_5431;
pub const FORMAT_VERSION: u16 = 1;

/// Size of the zero page and of every extra index page
pub const PAGE_SIZE: u64 = 1 << 16;

pub const HEAD_FEATURES: u64 = 6;
pub const HEAD_CHECKSUM: u64 = 8;
pub const STORE_SIZE: u64 = 16;
pub const MAX_RECID: u64 = 24;
pub const INDEX_PAGE: u64 = 32;
pub const FREE_RECID_STACK: u64 = 40;
pub const LONG_STACK_MASTERS: u64 = 48;

/// Largest single chunk; bigger records are split into linked chunks
pub const MAX_REC_SIZE: u64 = 0xFFFF;

/// Number of 16-byte size classes (and size-class master links)
pub const SIZE_CLASSES: u64 = (MAX_REC_SIZE + 15) / 16;

/// End of the header region; index slots of the zero page start here
pub const HEADER_SIZE: u64 = LONG_STACK_MASTERS + SIZE_CLASSES * 8;

/// Index slots held by the zero page
pub const ZERO_PAGE_SLOTS: u64 = (PAGE_SIZE - HEADER_SIZE) / 8;

/// Index slots held by every extra index page (after its 8-byte link)
pub const PAGE_SLOTS: u64 = (PAGE_SIZE - 8) / 8;

/// Largest record accepted, across all linked chunks
pub const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

/// Payload carried by a non-final linked chunk
pub const LINKED_CHUNK_PAYLOAD: u64 = MAX_REC_SIZE - 8;

// Index value flags
pub const MLINKED: u64 = 0x8;
pub const MUNUSED: u64 = 0x4;
pub const MOFFSET: u64 = 0x0000_FFFF_FFFF_FFF0;

// Long stack page sizes
pub const LONG_STACK_MIN_SIZE: u64 = 32;
pub const LONG_STACK_MAX_SIZE: u64 = 256;
pub const LONG_STACK_PREF_SIZE: u64 = 160;
/// Page header: page size (16) + previous page (48)
pub const LONG_STACK_HEADER: u64 = 8;

/// Round up to the 16-byte allocation granularity
pub fn round16(size: u64) -> u64 {
    (size + 15) & !15
}

/// Free-list bucket for an allocation of `size` bytes (1-based)
///
/// Monotonic in `size`; `MAX_REC_SIZE` alone maps to the top bucket.
pub fn size_class(size: u32) -> u32 {
    size.div_ceil(16)
}

/// Header slot of the long stack that recycles chunks of `size` bytes
pub fn master_link_offset(size: u64) -> Result<u64> {
    if size == 0 || size > round16(MAX_REC_SIZE) {
        return Err(StoreError::IllegalArgument(format!(
            "no size class for {} bytes",
            size
        )));
    }
    let class = u64::from(size_class(size.min(MAX_REC_SIZE) as u32));
    Ok(LONG_STACK_MASTERS + (class - 1) * 8)
}

/// Decoded index value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexValue {
    pub size: u64,
    pub offset: u64,
    pub linked: bool,
    pub unused: bool,
}

impl IndexValue {
    /// Preallocated recid without a value
    pub const fn unused() -> Self {
        Self {
            size: 0,
            offset: 0,
            linked: false,
            unused: true,
        }
    }

    pub const fn chunk(size: u64, offset: u64, linked: bool) -> Self {
        Self {
            size,
            offset,
            linked,
            unused: false,
        }
    }

    /// Word as stored on disk, parity included
    pub fn encode(&self) -> u64 {
        debug_assert!(self.size <= MAX_REC_SIZE);
        debug_assert!(self.offset & !MOFFSET == 0);
        let mut v = (self.size << 48) | self.offset;
        if self.linked {
            v |= MLINKED;
        }
        if self.unused {
            v |= MUNUSED;
        }
        parity1_set(v)
    }

    /// Decode a non-zero stored word
    pub fn decode(stored: u64) -> Result<Self> {
        let v = parity1_get(stored)?;
        if v & 0x2 != 0 {
            return Err(StoreError::DataCorruption(format!(
                "reserved bit set in index value {:#018x}",
                stored
            )));
        }
        Ok(Self {
            size: v >> 48,
            offset: v & MOFFSET,
            linked: v & MLINKED != 0,
            unused: v & MUNUSED != 0,
        })
    }
}
