//! Memory-mapped file volume
//!
//! The file is mapped once and remapped whenever it grows. Readers and
//! writers share the map lock; only growth, truncation and close take it
//! exclusively, so writes to disjoint ranges run in parallel.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use memmap2::{MmapOptions, MmapRaw};
use parking_lot::RwLock;

use crate::error::{Result, StoreError};

use super::{check_read, round_up, Volume, FILE_GROWTH};

/// Volume backed by a memory-mapped file
pub struct MappedFileVolume {
    path: PathBuf,
    state: RwLock<MapState>,
    read_only: bool,
    closed: AtomicBool,
}

struct MapState {
    /// Released on close
    file: Option<File>,
    /// `None` while the file is empty (zero-length maps are not allowed)
    map: Option<MmapRaw>,
}

impl MapState {
    fn len(&self) -> u64 {
        self.map.as_ref().map_or(0, |m| m.len() as u64)
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(StoreError::Closed)
    }
}

impl MappedFileVolume {
    /// Open or create the file and map its current contents
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
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            Some(Self::map(&file, len, read_only)?)
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(MapState {
                file: Some(file),
                map,
            }),
            read_only,
            closed: AtomicBool::new(false),
        })
    }

    fn map(file: &File, len: u64, read_only: bool) -> Result<MmapRaw> {
        let mut options = MmapOptions::new();
        options.len(len as usize);
        let map = if read_only {
            options.map_raw_read_only(file)?
        } else {
            options.map_raw(file)?
        };
        Ok(map)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }
}

impl Volume for MappedFileVolume {
    fn len(&self) -> u64 {
        self.state.read().len()
    }

    fn ensure_available(&self, offset: u64) -> Result<()> {
        if offset <= self.len() {
            return Ok(());
        }
        self.check_writable()?;

        let mut state = self.state.write();
        if offset <= state.len() {
            return Ok(());
        }
        let target = round_up(offset, FILE_GROWTH);
        // Drop the old mapping before resizing the file underneath it
        state.map = None;
        let file = state.file()?;
        file.set_len(target)?;
        let map = Self::map(file, target, false)?;
        state.map = Some(map);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_open()?;
        let state = self.state.read();
        check_read(offset, buf.len(), state.len())?;
        if let Some(m) = state.map.as_ref() {
            // SAFETY: the range was bounds-checked against the live mapping,
            // which cannot be replaced while the read lock is held.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    m.as_ptr().add(offset as usize),
                    buf.as_mut_ptr(),
                    buf.len(),
                );
            }
        }
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.ensure_available(offset + data.len() as u64)?;
        let state = self.state.read();
        check_read(offset, data.len(), state.len())?;
        if let Some(m) = state.map.as_ref() {
            // SAFETY: bounds-checked above; callers never write overlapping
            // ranges concurrently (the store serialises per recid and per
            // structural change).
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr(),
                    m.as_mut_ptr().add(offset as usize),
                    data.len(),
                );
            }
        }
        Ok(())
    }

    fn truncate(&self, size: u64) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        state.map = None;
        let file = state.file()?;
        file.set_len(size)?;
        if size > 0 {
            let map = Self::map(file, size, false)?;
            state.map = Some(map);
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.check_open()?;
        if self.read_only {
            return Ok(());
        }
        let state = self.state.read();
        if let Some(m) = state.map.as_ref() {
            m.flush()?;
        }
        state.file()?.sync_all()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.state.write();
        let map = state.map.take();
        state.file = None;
        if let Some(m) = map {
            if !self.read_only {
                m.flush()?;
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
