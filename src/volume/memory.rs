//! In-memory volume
//!
//! A single growable byte array. Reads share the lock, writes and growth take
//! it exclusively.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{Result, StoreError};

use super::{check_read, round_up, Volume, MEMORY_GROWTH};

/// Growable byte-array volume
pub struct MemoryVolume {
    data: RwLock<Vec<u8>>,
    closed: AtomicBool,
}

impl MemoryVolume {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl Volume for MemoryVolume {
    fn len(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn ensure_available(&self, offset: u64) -> Result<()> {
        self.check_open()?;
        if offset <= self.len() {
            return Ok(());
        }
        let mut data = self.data.write();
        let target = round_up(offset, MEMORY_GROWTH) as usize;
        if target > data.len() {
            data.resize(target, 0);
        }
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_open()?;
        let data = self.data.read();
        check_read(offset, buf.len(), data.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: u64, src: &[u8]) -> Result<()> {
        self.ensure_available(offset + src.len() as u64)?;
        let mut data = self.data.write();
        let start = offset as usize;
        data[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn truncate(&self, size: u64) -> Result<()> {
        self.check_open()?;
        let mut data = self.data.write();
        data.resize(size as usize, 0);
        data.shrink_to_fit();
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.check_open()
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut data = self.data.write();
            data.clear();
            data.shrink_to_fit();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
