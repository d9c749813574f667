//! File channel volume
//!
//! Positioned reads and writes through a single file handle. The handle sits
//! behind a mutex because every access is a seek followed by a transfer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, StoreError};

use super::{check_read, round_up, Volume, FILE_GROWTH};

/// Volume backed by a plain file
pub struct FileChannelVolume {
    path: PathBuf,
    /// `None` once closed
    file: Mutex<Option<File>>,
    size: AtomicU64,
    read_only: bool,
}

impl FileChannelVolume {
    /// Open or create the file
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = if read_only {
            File::open(path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?
        };
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
            size: AtomicU64::new(size),
            read_only,
        })
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }
}

impl Volume for FileChannelVolume {
    fn len(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn ensure_available(&self, offset: u64) -> Result<()> {
        if offset <= self.len() {
            return Ok(());
        }
        self.check_writable()?;
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or(StoreError::Closed)?;
        let current = self.size.load(Ordering::Acquire);
        if offset <= current {
            return Ok(());
        }
        let target = round_up(offset, FILE_GROWTH);
        file.set_len(target)?;
        self.size.store(target, Ordering::Release);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        check_read(offset, buf.len(), self.len())?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.ensure_available(offset + data.len() as u64)?;
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn truncate(&self, size: u64) -> Result<()> {
        self.check_writable()?;
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or(StoreError::Closed)?;
        file.set_len(size)?;
        self.size.store(size, Ordering::Release);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or(StoreError::Closed)?;
        if !self.read_only {
            file.sync_all()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        // Dropping the handle releases the descriptor
        if let Some(mut file) = self.file.lock().take() {
            if !self.read_only {
                file.flush()?;
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.file.lock().is_none()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
