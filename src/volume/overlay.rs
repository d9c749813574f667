//! Write-back overlay volume
//!
//! Sits between a transactional store and its main volume. Writes land in
//! in-memory dirty pages; reads see dirty pages first and fall through to the
//! base volume. Nothing reaches the base until the owner drains the dirty
//! ranges (to log them in the WAL and apply them) or discards them on
//! rollback.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StoreError};

use super::{check_read, round_up, Volume, MEMORY_GROWTH};

/// Granularity of dirty tracking
pub const OVERLAY_PAGE: u64 = 4096;

/// One modified byte range, ready to be logged and applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyRange {
    pub offset: u64,
    pub data: Vec<u8>,
}

struct DirtyPage {
    data: Box<[u8]>,
    /// Modified span within the page
    lo: usize,
    hi: usize,
}

/// Dirty-page overlay over a base volume
pub struct WriteBackVolume {
    base: RwLock<Arc<dyn Volume>>,
    pages: RwLock<BTreeMap<u64, DirtyPage>>,
    /// Logical length; may run ahead of the base until the next apply
    len: AtomicU64,
}

impl WriteBackVolume {
    pub fn new(base: Arc<dyn Volume>) -> Self {
        let len = base.len();
        Self {
            base: RwLock::new(base),
            pages: RwLock::new(BTreeMap::new()),
            len: AtomicU64::new(len),
        }
    }

    /// Volume the overlay writes back to
    pub fn base(&self) -> Arc<dyn Volume> {
        self.base.read().clone()
    }

    /// Swap the base volume (after compaction); pending writes are dropped
    pub fn replace_base(&self, base: Arc<dyn Volume>) {
        let mut pages = self.pages.write();
        pages.clear();
        self.len.store(base.len(), Ordering::Release);
        *self.base.write() = base;
    }

    /// True when nothing is pending
    pub fn is_clean(&self) -> bool {
        self.pages.read().is_empty() && self.len() == self.base().len()
    }

    /// Number of dirty pages held in memory
    pub fn dirty_pages(&self) -> usize {
        self.pages.read().len()
    }

    /// Remove and return every modified range in offset order, together with
    /// the logical length the base must grow to
    pub fn take_dirty(&self) -> (Vec<DirtyRange>, u64) {
        let mut pages = self.pages.write();
        let drained = std::mem::take(&mut *pages);
        let ranges = drained
            .into_iter()
            .map(|(page_no, page)| DirtyRange {
                offset: page_no * OVERLAY_PAGE + page.lo as u64,
                data: page.data[page.lo..page.hi].to_vec(),
            })
            .collect();
        (ranges, self.len())
    }

    /// Drop every pending write
    pub fn discard(&self) {
        let mut pages = self.pages.write();
        pages.clear();
        self.len.store(self.base().len(), Ordering::Release);
    }

    /// Copy of one page as the base currently holds it
    fn load_base_page(base: &dyn Volume, page_no: u64) -> Result<Box<[u8]>> {
        let mut data = vec![0u8; OVERLAY_PAGE as usize].into_boxed_slice();
        let start = page_no * OVERLAY_PAGE;
        let base_len = base.len();
        if start < base_len {
            let n = std::cmp::min(OVERLAY_PAGE, base_len - start) as usize;
            base.read_at(start, &mut data[..n])?;
        }
        Ok(data)
    }
}

impl Volume for WriteBackVolume {
    fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    fn ensure_available(&self, offset: u64) -> Result<()> {
        if self.base().is_read_only() && offset > self.len() {
            return Err(StoreError::ReadOnly);
        }
        self.len
            .fetch_max(round_up(offset, MEMORY_GROWTH), Ordering::AcqRel);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_read(offset, buf.len(), self.len())?;
        let base = self.base();
        let base_len = base.len();
        let pages = self.pages.read();

        let mut done = 0usize;
        while done < buf.len() {
            let pos = offset + done as u64;
            let page_no = pos / OVERLAY_PAGE;
            let in_page = (pos % OVERLAY_PAGE) as usize;
            let n = std::cmp::min(buf.len() - done, OVERLAY_PAGE as usize - in_page);
            let dst = &mut buf[done..done + n];

            if let Some(page) = pages.get(&page_no) {
                dst.copy_from_slice(&page.data[in_page..in_page + n]);
            } else if pos >= base_len {
                dst.fill(0);
            } else {
                let from_base = std::cmp::min(n as u64, base_len - pos) as usize;
                base.read_at(pos, &mut dst[..from_base])?;
                dst[from_base..].fill(0);
            }
            done += n;
        }
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let base = self.base();
        if base.is_read_only() {
            return Err(StoreError::ReadOnly);
        }
        self.ensure_available(offset + data.len() as u64)?;
        let mut pages = self.pages.write();

        let mut done = 0usize;
        while done < data.len() {
            let pos = offset + done as u64;
            let page_no = pos / OVERLAY_PAGE;
            let in_page = (pos % OVERLAY_PAGE) as usize;
            let n = std::cmp::min(data.len() - done, OVERLAY_PAGE as usize - in_page);

            if !pages.contains_key(&page_no) {
                let loaded = Self::load_base_page(base.as_ref(), page_no)?;
                pages.insert(
                    page_no,
                    DirtyPage {
                        data: loaded,
                        lo: in_page,
                        hi: in_page + n,
                    },
                );
            }
            if let Some(page) = pages.get_mut(&page_no) {
                page.data[in_page..in_page + n].copy_from_slice(&data[done..done + n]);
                page.lo = page.lo.min(in_page);
                page.hi = page.hi.max(in_page + n);
            }
            done += n;
        }
        Ok(())
    }

    fn truncate(&self, _size: u64) -> Result<()> {
        Err(StoreError::Unsupported(
            "write-back volume cannot be truncated".to_string(),
        ))
    }

    fn sync(&self) -> Result<()> {
        // Durability comes from the WAL commit, not from the overlay
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.pages.write().clear();
        self.base().close()
    }

    fn is_closed(&self) -> bool {
        self.base().is_closed()
    }

    fn is_read_only(&self) -> bool {
        self.base().is_read_only()
    }
}
