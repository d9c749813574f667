//! Volume Module
//!
//! A volume is a growable, byte-addressable region. Everything above it (the
//! store, the WAL) talks in absolute offsets.
//!
//! ## Responsibilities
//! - Bounds-checked fixed-width and packed get/put at absolute offsets
//! - Bulk growth via `ensure_available`; new space always reads as zero
//! - Durability via `sync`, resource release via `close`
//!
//! ## Implementations
//! ```text
//! ┌──────────────────┬─────────────────────────────────────────────┐
//! │ MemoryVolume     │ Vec<u8> behind a RwLock                     │
//! │ MappedFileVolume │ memmap2 raw mapping, remapped on growth     │
//! │ FileChannelVolume│ File with seek + read/write                 │
//! │ WriteBackVolume  │ dirty-page overlay used by transactions     │
//! └──────────────────┴─────────────────────────────────────────────┘
//! ```

mod file;
mod mapped;
mod memory;
mod overlay;

pub use file::FileChannelVolume;
pub use mapped::MappedFileVolume;
pub use memory::MemoryVolume;
pub use overlay::{DirtyRange, WriteBackVolume};

use std::path::Path;
use std::sync::Arc;

use crate::config::VolumeKind;
use crate::encoding::{pack_long, unpack_long, MAX_PACKED_LEN};
use crate::error::{Result, StoreError};

/// Growth step for file-backed volumes (1 MiB)
pub const FILE_GROWTH: u64 = 1 << 20;

/// Growth step for memory volumes (64 KiB)
pub const MEMORY_GROWTH: u64 = 1 << 16;

/// Round `size` up to a multiple of `step`
pub(crate) fn round_up(size: u64, step: u64) -> u64 {
    size.div_ceil(step) * step
}

/// Byte-addressable storage region
///
/// All methods take `&self`; implementations synchronise internally so that
/// writers touching disjoint ranges can proceed in parallel.
pub trait Volume: Send + Sync {
    /// Current addressable length in bytes
    fn len(&self) -> u64;

    /// Grow so that offsets below `offset` are addressable. New space is
    /// zero-filled. Never shrinks.
    fn ensure_available(&self, offset: u64) -> Result<()>;

    /// Fill `buf` from `offset`; fails with `OutOfBounds` past the end
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`, growing the volume if needed
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Cut the volume to exactly `size` bytes
    fn truncate(&self, size: u64) -> Result<()>;

    /// Force written data to durable storage
    fn sync(&self) -> Result<()>;

    /// Release the underlying resources. Idempotent.
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    fn is_read_only(&self) -> bool {
        false
    }

    /// Backing file, if any
    fn path(&self) -> Option<&Path> {
        None
    }

    /// Close and remove the backing file. Memory volumes only close.
    fn delete_file(&self) -> Result<()> {
        self.close()?;
        if let Some(path) = self.path() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Provided accessors
    // -------------------------------------------------------------------------

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_byte(&self, offset: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_at(offset, &mut buf)?;
        Ok(buf[0])
    }

    fn put_byte(&self, offset: u64, value: u8) -> Result<()> {
        self.write_at(offset, &[value])
    }

    fn get_int(&self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_at(offset, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn put_int(&self, offset: u64, value: u32) -> Result<()> {
        self.write_at(offset, &value.to_be_bytes())
    }

    fn get_long(&self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_at(offset, &mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn put_long(&self, offset: u64, value: u64) -> Result<()> {
        self.write_at(offset, &value.to_be_bytes())
    }

    /// Read a 48-bit value stored in six bytes
    fn get_six_long(&self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_at(offset, &mut buf[2..])?;
        Ok(u64::from_be_bytes(buf))
    }

    fn put_six_long(&self, offset: u64, value: u64) -> Result<()> {
        if value >> 48 != 0 {
            return Err(StoreError::IllegalArgument(format!(
                "{:#x} does not fit in 48 bits",
                value
            )));
        }
        self.write_at(offset, &value.to_be_bytes()[2..])
    }

    fn get_data(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    fn put_data(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.write_at(offset, data)
    }

    /// Returns the value and the number of bytes it occupied
    fn get_packed_long(&self, offset: u64) -> Result<(u64, usize)> {
        let avail = self.len().saturating_sub(offset).min(MAX_PACKED_LEN as u64) as usize;
        if avail == 0 {
            return Err(StoreError::OutOfBounds {
                offset,
                len: self.len(),
            });
        }
        let buf = self.get_data(offset, avail)?;
        unpack_long(&buf)
    }

    /// Returns the number of bytes written
    fn put_packed_long(&self, offset: u64, value: u64) -> Result<usize> {
        let mut buf = Vec::with_capacity(MAX_PACKED_LEN);
        let len = pack_long(&mut buf, value);
        self.write_at(offset, &buf)?;
        Ok(len)
    }

    /// Zero `[start, end)`
    fn clear(&self, start: u64, end: u64) -> Result<()> {
        const ZEROS: [u8; 4096] = [0u8; 4096];
        let mut pos = start;
        while pos < end {
            let n = std::cmp::min(end - pos, ZEROS.len() as u64) as usize;
            self.write_at(pos, &ZEROS[..n])?;
            pos += n as u64;
        }
        Ok(())
    }
}

/// Shared bounds check for reads
pub(crate) fn check_read(offset: u64, len: usize, volume_len: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= volume_len => Ok(()),
        _ => Err(StoreError::OutOfBounds {
            offset,
            len: volume_len,
        }),
    }
}

/// Opens volumes of one configured kind
#[derive(Debug, Clone, Copy)]
pub struct VolumeFactory {
    kind: VolumeKind,
    read_only: bool,
}

impl VolumeFactory {
    pub fn new(kind: VolumeKind, read_only: bool) -> Self {
        Self { kind, read_only }
    }

    pub fn kind(&self) -> VolumeKind {
        self.kind
    }

    /// Open (or create) the volume at `path`; memory volumes ignore the path
    pub fn open(&self, path: Option<&Path>) -> Result<Arc<dyn Volume>> {
        let volume: Arc<dyn Volume> = match (self.kind, path) {
            (VolumeKind::Memory, _) => Arc::new(MemoryVolume::new()),
            (VolumeKind::MappedFile, Some(p)) => Arc::new(MappedFileVolume::open(p, self.read_only)?),
            (VolumeKind::FileChannel, Some(p)) => {
                Arc::new(FileChannelVolume::open(p, self.read_only)?)
            }
            (kind, None) => {
                return Err(StoreError::Config(format!("{:?} volume requires a path", kind)))
            }
        };
        Ok(volume)
    }

    /// Fresh writable volume for temporary data such as a compaction target
    pub fn open_scratch(&self, path: Option<&Path>) -> Result<Arc<dyn Volume>> {
        if let Some(p) = path {
            if p.exists() {
                std::fs::remove_file(p)?;
            }
        }
        Self::new(self.kind, false).open(path)
    }
}
