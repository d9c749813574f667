//! Direct store
//!
//! Maps recids to physical byte ranges inside a single volume and recycles
//! freed ranges through per-size-class long stacks.
//!
//! ## Locking
//! - `structure` (mutex): every change to free lists, store size, max recid
//!   and index growth
//! - `stripes` (rwlock per `recid mod N`): record reads take it shared,
//!   record writes take it exclusively
//! - Order is always stripe → structure; `lock_all` takes every stripe in
//!   index order and then the structure lock

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use tracing::{debug, info, trace, warn};

use crate::config::{Config, FeatureSet};
use crate::encoding::{parity16_get, parity16_set, parity4_get, parity4_set};
use crate::error::{Result, StoreError};
use crate::volume::{Volume, VolumeFactory};
use crate::RECID_LAST_RESERVED;

use super::layout::*;

/// Free-list and size bookkeeping guarded by the structural lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Structure {
    /// End of the allocated region; fresh allocations start here
    pub store_size: u64,
    pub max_recid: u64,
}

/// Every stripe plus the structural lock, held for whole-store operations
pub(crate) struct Exclusive<'a> {
    _stripes: Vec<RwLockWriteGuard<'a, ()>>,
    pub structure: MutexGuard<'a, Structure>,
}

/// Point-in-time numbers describing a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub store_size: u64,
    pub volume_len: u64,
    pub max_recid: u64,
    pub index_pages: usize,
    /// Recids waiting on the free-recid list
    pub free_recids: u64,
    /// Bytes waiting on size-class free lists
    pub free_bytes: u64,
    pub features: FeatureSet,
}

/// Record allocator over a single volume
pub struct StoreDirect {
    config: Config,
    volume: RwLock<Arc<dyn Volume>>,
    structure: Mutex<Structure>,
    /// Offsets of index pages; entry 0 is the zero page
    index_pages: RwLock<Vec<u64>>,
    /// Mirror of `Structure::max_recid` for lock-free recid validation
    max_recid: AtomicU64,
    stripes: Vec<CachePadded<RwLock<()>>>,
    stripe_mask: u64,
    features: FeatureSet,
    /// Owned by a transactional wrapper that drives checksum and sync
    transactional: bool,
    closed: AtomicBool,
}

impl StoreDirect {
    /// Open or create a non-transactional store described by `config`
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let factory = VolumeFactory::new(config.volume_kind, config.read_only);
        let volume = factory.open(config.path.as_deref())?;
        Self::with_volume(volume, config, false)
    }

    /// Open or create a non-transactional store on a caller-supplied volume
    pub fn open_volume(volume: Arc<dyn Volume>, config: Config) -> Result<Self> {
        config.validate()?;
        Self::with_volume(volume, config, false)
    }

    /// Build a store over an already opened volume. The volume is closed
    /// again if the header turns out to be unusable.
    pub(crate) fn with_volume(
        volume: Arc<dyn Volume>,
        config: Config,
        transactional: bool,
    ) -> Result<Self> {
        match Self::init(volume.clone(), config, transactional) {
            Ok(store) => Ok(store),
            Err(e) => {
                if let Err(close_err) = volume.close() {
                    warn!(error = %close_err, "failed to close volume after open error");
                }
                Err(e)
            }
        }
    }

    fn init(volume: Arc<dyn Volume>, config: Config, transactional: bool) -> Result<Self> {
        let features = config.features();
        if volume.is_empty() {
            if volume.is_read_only() {
                return Err(StoreError::ReadOnly);
            }
            Self::create_header(volume.as_ref(), features)?;
            info!(features = %features, "created new store");
        } else {
            Self::verify_header(volume.as_ref(), features)?;
        }

        let (structure, index_pages) = Self::load_state(volume.as_ref())?;
        let stripes = config.lock_stripes.max(1).next_power_of_two();
        debug!(
            store_size = structure.store_size,
            max_recid = structure.max_recid,
            index_pages = index_pages.len(),
            "store opened"
        );

        Ok(Self {
            max_recid: AtomicU64::new(structure.max_recid),
            structure: Mutex::new(structure),
            index_pages: RwLock::new(index_pages),
            stripes: (0..stripes).map(|_| CachePadded::new(RwLock::new(()))).collect(),
            stripe_mask: stripes as u64 - 1,
            volume: RwLock::new(volume),
            features,
            transactional,
            closed: AtomicBool::new(false),
            config,
        })
    }

    // =========================================================================
    // Header
    // =========================================================================

    fn create_header(vol: &dyn Volume, features: FeatureSet) -> Result<()> {
        vol.ensure_available(PAGE_SIZE)?;
        vol.put_int(0, MAGIC)?;
        vol.write_at(4, &FORMAT_VERSION.to_be_bytes())?;
        vol.write_at(HEAD_FEATURES, &features.bits().to_be_bytes())?;
        vol.put_long(STORE_SIZE, parity16_set(PAGE_SIZE << 16))?;
        vol.put_long(MAX_RECID, parity4_set(RECID_LAST_RESERVED << 4))?;
        for recid in 1..=RECID_LAST_RESERVED {
            vol.put_long(
                HEADER_SIZE + (recid - 1) * 8,
                IndexValue::unused().encode(),
            )?;
        }
        let crc = Self::header_checksum(vol)?;
        vol.put_int(HEAD_CHECKSUM, crc)?;
        Ok(())
    }

    fn verify_header(vol: &dyn Volume, features: FeatureSet) -> Result<()> {
        if vol.len() < PAGE_SIZE {
            return Err(StoreError::HeadChecksumBroken(format!(
                "file too short for a header: {} bytes",
                vol.len()
            )));
        }
        let magic = vol.get_int(0)?;
        if magic != MAGIC {
            return Err(StoreError::HeadChecksumBroken(format!(
                "bad magic {:#010x}",
                magic
            )));
        }
        let head = vol.get_data(4, 4)?;
        let version = u16::from_be_bytes([head[0], head[1]]);
        if version != FORMAT_VERSION {
            return Err(StoreError::WrongConfiguration(format!(
                "unsupported format version {}",
                version
            )));
        }
        let stored = FeatureSet::from_bits(u16::from_be_bytes([head[2], head[3]]))?;
        if stored != features {
            return Err(StoreError::WrongConfiguration(format!(
                "store was created with features [{}], opened with [{}]",
                stored, features
            )));
        }
        let expected = vol.get_int(HEAD_CHECKSUM)?;
        let actual = Self::header_checksum(vol)?;
        if expected != actual {
            return Err(StoreError::HeadChecksumBroken(format!(
                "expected {:#010x}, computed {:#010x}",
                expected, actual
            )));
        }
        Ok(())
    }

    fn header_checksum(vol: &dyn Volume) -> Result<u32> {
        let header = vol.get_data(STORE_SIZE, (HEADER_SIZE - STORE_SIZE) as usize)?;
        Ok(crc32fast::hash(&header))
    }

    /// Recompute and store the header checksum (structure lock held)
    pub(crate) fn write_header_checksum(&self, _structure: &Structure) -> Result<()> {
        let vol = self.vol();
        let crc = Self::header_checksum(vol.as_ref())?;
        vol.put_int(HEAD_CHECKSUM, crc)
    }

    fn load_state(vol: &dyn Volume) -> Result<(Structure, Vec<u64>)> {
        let store_size = parity16_get(vol.get_long(STORE_SIZE)?)? >> 16;
        let max_recid = parity4_get(vol.get_long(MAX_RECID)?)? >> 4;
        if store_size < PAGE_SIZE || store_size > vol.len() {
            return Err(StoreError::DataCorruption(format!(
                "store size {} outside volume of {} bytes",
                store_size,
                vol.len()
            )));
        }

        let mut pages = vec![0u64];
        let mut link = vol.get_long(INDEX_PAGE)?;
        while link != 0 {
            let page = parity16_get(link)? >> 16;
            if page < PAGE_SIZE || page + PAGE_SIZE > store_size || pages.contains(&page) {
                return Err(StoreError::DataCorruption(format!(
                    "index page link {:#x} is invalid",
                    page
                )));
            }
            pages.push(page);
            link = vol.get_long(page)?;
        }

        if max_recid > Self::slot_capacity(pages.len()) {
            return Err(StoreError::DataCorruption(format!(
                "max recid {} exceeds index capacity",
                max_recid
            )));
        }
        Ok((
            Structure {
                store_size,
                max_recid,
            },
            pages,
        ))
    }

    /// Re-read structural state from the volume (after rollback or
    /// compaction)
    pub(crate) fn reload_state(&self, structure: &mut Structure) -> Result<()> {
        let vol = self.vol();
        let (loaded, pages) = Self::load_state(vol.as_ref())?;
        *structure = loaded;
        *self.index_pages.write() = pages;
        self.max_recid.store(loaded.max_recid, Ordering::Release);
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub(crate) fn vol(&self) -> Arc<dyn Volume> {
        self.volume.read().clone()
    }

    pub(crate) fn replace_volume(&self, volume: Arc<dyn Volume>) {
        *self.volume.write() = volume;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn features(&self) -> FeatureSet {
        self.features
    }

    pub fn max_recid(&self) -> u64 {
        self.max_recid.load(Ordering::Acquire)
    }

    pub(crate) fn lock_structure(&self) -> MutexGuard<'_, Structure> {
        self.structure.lock()
    }

    /// Take every stripe and then the structural lock
    pub(crate) fn lock_all(&self) -> Exclusive<'_> {
        let stripes = self.stripes.iter().map(|s| s.write()).collect();
        Exclusive {
            _stripes: stripes,
            structure: self.structure.lock(),
        }
    }

    fn stripe(&self, recid: u64) -> &RwLock<()> {
        &self.stripes[(recid & self.stripe_mask) as usize]
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn check_recid(&self, recid: u64) -> Result<()> {
        if recid == 0 || recid > self.max_recid() {
            return Err(StoreError::RecidNotAllocated(recid));
        }
        Ok(())
    }

    // =========================================================================
    // Index table
    // =========================================================================

    fn slot_capacity(pages: usize) -> u64 {
        ZERO_PAGE_SLOTS + (pages as u64 - 1) * PAGE_SLOTS
    }

    /// Volume offset of the index slot for `recid`
    pub(crate) fn index_offset(&self, recid: u64) -> Result<u64> {
        if recid == 0 {
            return Err(StoreError::RecidNotAllocated(recid));
        }
        let pos = recid - 1;
        if pos < ZERO_PAGE_SLOTS {
            return Ok(HEADER_SIZE + pos * 8);
        }
        let rest = pos - ZERO_PAGE_SLOTS;
        let pages = self.index_pages.read();
        let page = pages
            .get((rest / PAGE_SLOTS + 1) as usize)
            .ok_or(StoreError::RecidNotAllocated(recid))?;
        Ok(page + 8 + (rest % PAGE_SLOTS) * 8)
    }

    /// Decoded index value, `None` when the recid is free
    pub(crate) fn read_index(&self, vol: &dyn Volume, recid: u64) -> Result<Option<IndexValue>> {
        let stored = vol.get_long(self.index_offset(recid)?)?;
        if stored == 0 {
            return Ok(None);
        }
        IndexValue::decode(stored).map(Some)
    }

    fn ensure_index_capacity(
        &self,
        vol: &dyn Volume,
        st: &mut Structure,
        recid: u64,
    ) -> Result<()> {
        loop {
            let last = {
                let pages = self.index_pages.read();
                if recid <= Self::slot_capacity(pages.len()) {
                    return Ok(());
                }
                pages.last().copied().unwrap_or(0)
            };
            let page = self.alloc_fresh(vol, st, PAGE_SIZE)?;
            vol.clear(page, page + PAGE_SIZE)?;
            let link_slot = if last == 0 { INDEX_PAGE } else { last };
            vol.put_long(link_slot, parity16_set(page << 16))?;
            self.index_pages.write().push(page);
            debug!(page, "allocated index page");
        }
    }

    /// Hand out a recid, recycling freed ones first
    pub(crate) fn alloc_recid(&self, vol: &dyn Volume, st: &mut Structure) -> Result<u64> {
        let reused = self.long_stack_take(vol, st, FREE_RECID_STACK)?;
        if reused != 0 {
            return Ok(reused);
        }
        let recid = st.max_recid + 1;
        self.set_max_recid(vol, st, recid)?;
        Ok(recid)
    }

    pub(crate) fn set_max_recid(&self, vol: &dyn Volume, st: &mut Structure, recid: u64) -> Result<()> {
        self.ensure_index_capacity(vol, st, recid)?;
        vol.put_long(MAX_RECID, parity4_set(recid << 4))?;
        st.max_recid = recid;
        self.max_recid.store(recid, Ordering::Release);
        Ok(())
    }

    // =========================================================================
    // Physical allocation
    // =========================================================================

    /// Grow the store by `size` bytes (rounded to 16) and return the offset
    pub(crate) fn alloc_fresh(&self, vol: &dyn Volume, st: &mut Structure, size: u64) -> Result<u64> {
        let offset = st.store_size;
        let end = offset + round16(size);
        if end >> 48 != 0 {
            return Err(StoreError::IllegalArgument(
                "store size exceeds 48-bit offsets".to_string(),
            ));
        }
        vol.ensure_available(end)?;
        vol.put_long(STORE_SIZE, parity16_set(end << 16))?;
        st.store_size = end;
        Ok(offset)
    }

    /// Allocate one chunk, preferring recycled space of the same size class
    pub(crate) fn alloc_space(
        &self,
        vol: &dyn Volume,
        st: &mut Structure,
        size: u64,
        recursive: bool,
    ) -> Result<u64> {
        if !recursive {
            let master = master_link_offset(round16(size))?;
            let reused = self.long_stack_take(vol, st, master)?;
            if reused != 0 {
                return Ok(reused);
            }
        }
        self.alloc_fresh(vol, st, size)
    }

    /// Return one chunk to its size-class free list
    pub(crate) fn free_space(
        &self,
        vol: &dyn Volume,
        st: &mut Structure,
        offset: u64,
        size: u64,
        recursive: bool,
    ) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        if offset < PAGE_SIZE || offset & 0xF != 0 {
            return Err(StoreError::DataCorruption(format!(
                "freeing invalid offset {:#x}",
                offset
            )));
        }
        let master = master_link_offset(round16(size))?;
        self.long_stack_put(vol, st, master, offset, recursive)
    }

    /// Allocate the chunks needed for a payload of `len` bytes
    pub(crate) fn alloc_chunks(
        &self,
        vol: &dyn Volume,
        st: &mut Structure,
        len: usize,
    ) -> Result<Vec<(u64, u64)>> {
        let mut sizes = Vec::new();
        let mut remaining = len as u64;
        while remaining > MAX_REC_SIZE {
            sizes.push(MAX_REC_SIZE);
            remaining -= LINKED_CHUNK_PAYLOAD;
        }
        if remaining > 0 {
            sizes.push(remaining);
        }
        let mut chunks = Vec::with_capacity(sizes.len());
        for size in sizes {
            let offset = self.alloc_space(vol, st, size, false)?;
            chunks.push((size, offset));
        }
        Ok(chunks)
    }

    /// Write `payload` into previously allocated chunks, linking them
    pub(crate) fn write_chunks(
        &self,
        vol: &dyn Volume,
        chunks: &[(u64, u64)],
        payload: &[u8],
    ) -> Result<IndexValue> {
        let Some(&(first_size, first_offset)) = chunks.first() else {
            return Ok(IndexValue::chunk(0, 0, false));
        };
        let mut pos = 0usize;
        for (i, &(size, offset)) in chunks.iter().enumerate() {
            if let Some(&(next_size, next_offset)) = chunks.get(i + 1) {
                let link = IndexValue::chunk(next_size, next_offset, i + 2 < chunks.len());
                vol.put_long(offset, link.encode())?;
                let n = (size - 8) as usize;
                vol.put_data(offset + 8, &payload[pos..pos + n])?;
                pos += n;
            } else {
                vol.put_data(offset, &payload[pos..])?;
            }
        }
        Ok(IndexValue::chunk(first_size, first_offset, chunks.len() > 1))
    }

    /// Chunks making up the record behind `iv`, in order
    pub(crate) fn chunk_list(&self, vol: &dyn Volume, iv: IndexValue) -> Result<Vec<(u64, u64)>> {
        let mut chunks = Vec::new();
        if iv.unused || iv.size == 0 {
            return Ok(chunks);
        }
        let mut cur = iv;
        loop {
            self.check_chunk(cur)?;
            chunks.push((cur.size, cur.offset));
            if !cur.linked {
                return Ok(chunks);
            }
            if chunks.len() as u64 * LINKED_CHUNK_PAYLOAD > MAX_RECORD_SIZE as u64 {
                return Err(StoreError::DataCorruption(
                    "linked record chain does not terminate".to_string(),
                ));
            }
            cur = IndexValue::decode(vol.get_long(cur.offset)?)?;
        }
    }

    /// Raw stored bytes of the record behind `iv`
    pub(crate) fn read_chunks(&self, vol: &dyn Volume, iv: IndexValue) -> Result<Vec<u8>> {
        let chunks = self.chunk_list(vol, iv)?;
        let mut out = Vec::new();
        let last = chunks.len().saturating_sub(1);
        for (i, &(size, offset)) in chunks.iter().enumerate() {
            if i < last {
                out.extend_from_slice(&vol.get_data(offset + 8, (size - 8) as usize)?);
            } else {
                out.extend_from_slice(&vol.get_data(offset, size as usize)?);
            }
        }
        Ok(out)
    }

    fn check_chunk(&self, iv: IndexValue) -> Result<()> {
        if iv.offset < PAGE_SIZE || (iv.linked && iv.size <= 8) {
            return Err(StoreError::DataCorruption(format!(
                "invalid chunk {{ size: {}, offset: {:#x} }}",
                iv.size, iv.offset
            )));
        }
        Ok(())
    }

    fn free_chunks(&self, vol: &dyn Volume, st: &mut Structure, chunks: &[(u64, u64)]) -> Result<()> {
        for &(size, offset) in chunks {
            self.free_space(vol, st, offset, size, false)?;
        }
        Ok(())
    }

    // =========================================================================
    // Record encoding
    // =========================================================================

    fn encode_record(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() > MAX_RECORD_SIZE {
            return Err(StoreError::IllegalArgument(format!(
                "record of {} bytes exceeds the {} byte limit",
                data.len(),
                MAX_RECORD_SIZE
            )));
        }
        let mut out = data.to_vec();
        for transform in &self.config.transforms {
            out = transform.encode(&out)?;
        }
        if self.config.checksum {
            let crc = crc32fast::hash(&out);
            out.extend_from_slice(&crc.to_be_bytes());
        }
        if out.len() > MAX_RECORD_SIZE {
            return Err(StoreError::IllegalArgument(format!(
                "encoded record of {} bytes exceeds the {} byte limit",
                out.len(),
                MAX_RECORD_SIZE
            )));
        }
        Ok(out)
    }

    fn decode_record(&self, recid: u64, mut raw: Vec<u8>) -> Result<Vec<u8>> {
        if self.config.checksum {
            if raw.len() < 4 {
                return Err(StoreError::DataCorruption(format!(
                    "record {} too short for its checksum",
                    recid
                )));
            }
            let split = raw.len() - 4;
            let stored = u32::from_be_bytes([raw[split], raw[split + 1], raw[split + 2], raw[split + 3]]);
            raw.truncate(split);
            if crc32fast::hash(&raw) != stored {
                return Err(StoreError::DataCorruption(format!(
                    "record {} checksum mismatch",
                    recid
                )));
            }
        }
        for transform in self.config.transforms.iter().rev() {
            raw = transform.decode(&raw)?;
        }
        Ok(raw)
    }

    fn read_value(&self, vol: &dyn Volume, recid: u64, iv: IndexValue) -> Result<Option<Vec<u8>>> {
        if iv.unused {
            return Ok(None);
        }
        let raw = self.read_chunks(vol, iv)?;
        self.decode_record(recid, raw).map(Some)
    }

    /// Swap the record behind `recid` for `payload` (stripe lock held)
    fn replace(&self, vol: &dyn Volume, recid: u64, old: IndexValue, payload: &[u8]) -> Result<()> {
        let index = self.index_offset(recid)?;
        let len = payload.len() as u64;

        // Same size class, single chunk: rewrite in place
        if !old.unused
            && !old.linked
            && old.size > 0
            && len > 0
            && len <= MAX_REC_SIZE
            && round16(old.size) == round16(len)
        {
            vol.put_data(old.offset, payload)?;
            return vol.put_long(index, IndexValue::chunk(len, old.offset, false).encode());
        }

        let old_chunks = self.chunk_list(vol, old)?;
        let chunks = {
            let mut st = self.structure.lock();
            self.alloc_chunks(vol, &mut st, payload.len())?
        };
        let iv = self.write_chunks(vol, &chunks, payload)?;
        vol.put_long(index, iv.encode())?;
        let mut st = self.structure.lock();
        self.free_chunks(vol, &mut st, &old_chunks)
    }

    // =========================================================================
    // Record operations
    // =========================================================================

    /// Store a new record and return its recid
    pub fn put(&self, data: &[u8]) -> Result<u64> {
        self.check_writable()?;
        let payload = self.encode_record(data)?;
        let vol = self.vol();
        let (recid, chunks) = {
            let mut st = self.structure.lock();
            let recid = self.alloc_recid(vol.as_ref(), &mut st)?;
            match self.alloc_chunks(vol.as_ref(), &mut st, payload.len()) {
                Ok(chunks) => (recid, chunks),
                Err(e) => {
                    // Slot is still zero; hand the recid back
                    self.long_stack_put(vol.as_ref(), &mut st, FREE_RECID_STACK, recid, false)?;
                    return Err(e);
                }
            }
        };

        let _guard = self.stripe(recid).write();
        let iv = self.write_chunks(vol.as_ref(), &chunks, &payload)?;
        vol.put_long(self.index_offset(recid)?, iv.encode())?;
        trace!(recid, size = payload.len(), "put");
        Ok(recid)
    }

    /// Read a record; `None` for deleted or preallocated recids
    pub fn get(&self, recid: u64) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.check_recid(recid)?;
        let vol = self.vol();
        let _guard = self.stripe(recid).read();
        match self.read_index(vol.as_ref(), recid)? {
            None => Ok(None),
            Some(iv) => self.read_value(vol.as_ref(), recid, iv),
        }
    }

    /// Replace the value of an allocated recid
    pub fn update(&self, recid: u64, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.check_recid(recid)?;
        let payload = self.encode_record(data)?;
        let vol = self.vol();
        let _guard = self.stripe(recid).write();
        let old = self
            .read_index(vol.as_ref(), recid)?
            .ok_or(StoreError::RecidNotAllocated(recid))?;
        self.replace(vol.as_ref(), recid, old, &payload)?;
        trace!(recid, size = payload.len(), "update");
        Ok(())
    }

    /// Free a record and its recid. Deleting a free recid is a no-op;
    /// reserved recids cannot be deleted.
    pub fn delete(&self, recid: u64) -> Result<()> {
        self.check_writable()?;
        self.check_recid(recid)?;
        if recid <= RECID_LAST_RESERVED {
            return Err(StoreError::IllegalArgument(format!(
                "recid {} is reserved and cannot be deleted",
                recid
            )));
        }
        let vol = self.vol();
        let _guard = self.stripe(recid).write();
        let Some(old) = self.read_index(vol.as_ref(), recid)? else {
            return Ok(());
        };
        let chunks = self.chunk_list(vol.as_ref(), old)?;
        vol.put_long(self.index_offset(recid)?, 0)?;

        let mut st = self.structure.lock();
        self.free_chunks(vol.as_ref(), &mut st, &chunks)?;
        self.long_stack_put(vol.as_ref(), &mut st, FREE_RECID_STACK, recid, false)?;
        trace!(recid, "delete");
        Ok(())
    }

    /// Reserve a recid whose value reads as `None` until updated
    pub fn preallocate(&self) -> Result<u64> {
        self.check_writable()?;
        let vol = self.vol();
        let recid = {
            let mut st = self.structure.lock();
            self.alloc_recid(vol.as_ref(), &mut st)?
        };
        let _guard = self.stripe(recid).write();
        vol.put_long(self.index_offset(recid)?, IndexValue::unused().encode())?;
        Ok(recid)
    }

    /// Atomically replace the value if it currently equals `expected`
    ///
    /// Returns `false` without writing when the values differ or the recid
    /// has been deleted.
    pub fn compare_and_swap(&self, recid: u64, expected: Option<&[u8]>, new: &[u8]) -> Result<bool> {
        self.check_writable()?;
        self.check_recid(recid)?;
        let payload = self.encode_record(new)?;
        let vol = self.vol();
        let _guard = self.stripe(recid).write();
        let Some(old) = self.read_index(vol.as_ref(), recid)? else {
            return Ok(false);
        };
        let current = self.read_value(vol.as_ref(), recid, old)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        self.replace(vol.as_ref(), recid, old, &payload)?;
        Ok(true)
    }

    /// Make all changes durable (header checksum + sync)
    pub fn commit(&self) -> Result<()> {
        self.check_open()?;
        if self.config.read_only {
            return Ok(());
        }
        let st = self.structure.lock();
        self.write_header_checksum(&st)?;
        if self.config.sync_on_commit {
            self.vol().sync()?;
        }
        Ok(())
    }

    /// Direct stores write in place and cannot roll back
    pub fn rollback(&self) -> Result<()> {
        self.check_open()?;
        Err(StoreError::Unsupported(
            "rollback requires a transactional store".to_string(),
        ))
    }

    /// Close the store and release the volume. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let vol = self.vol();
        let mut result = Ok(());
        if !self.transactional && !self.config.read_only && !vol.is_closed() {
            let st = self.structure.lock();
            result = self.write_header_checksum(&st).and_then(|_| vol.sync());
        }
        let closed = vol.close();
        debug!("store closed");
        result.and(closed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Rewrite the store densely into a fresh volume
    pub fn compact(&self) -> Result<()> {
        self.check_writable()?;
        if self.transactional {
            return Err(StoreError::Unsupported(
                "transactional stores compact through their owner".to_string(),
            ));
        }
        let config = self.config.clone();
        let old = self.vol();
        self.compact_with(move |target| super::compact::install_compacted(&config, old, target))
    }

    /// Numbers for diagnostics; walks every free list
    pub fn stats(&self) -> Result<StoreStats> {
        self.check_open()?;
        let vol = self.vol();
        let st = self.structure.lock();
        let free_recids = self.long_stack_entries(vol.as_ref(), FREE_RECID_STACK)?.len() as u64;
        let mut free_bytes = 0;
        for class in 1..=SIZE_CLASSES {
            let master = LONG_STACK_MASTERS + (class - 1) * 8;
            if vol.get_long(master)? != 0 {
                free_bytes += self.long_stack_entries(vol.as_ref(), master)?.len() as u64 * class * 16;
            }
        }
        Ok(StoreStats {
            store_size: st.store_size,
            volume_len: vol.len(),
            max_recid: st.max_recid,
            index_pages: self.index_pages.read().len(),
            free_recids,
            free_bytes,
            features: self.features,
        })
    }

    /// Store bytes exactly as they sit on disk at `recid` (compaction)
    pub(crate) fn put_raw_at(
        &self,
        vol: &dyn Volume,
        st: &mut Structure,
        recid: u64,
        raw: Option<&[u8]>,
    ) -> Result<()> {
        let iv = match raw {
            None => IndexValue::unused(),
            Some(bytes) => {
                let chunks = self.alloc_chunks(vol, st, bytes.len())?;
                self.write_chunks(vol, &chunks, bytes)?
            }
        };
        vol.put_long(self.index_offset(recid)?, iv.encode())
    }
}

impl Drop for StoreDirect {
    fn drop(&mut self) {
        if !self.transactional && !self.is_closed() {
            warn!("store dropped without close, closing now");
            if let Err(e) = self.close() {
                warn!(error = %e, "close on drop failed");
            }
        }
    }
}
