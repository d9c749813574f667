//! WAL-backed store
//!
//! A `StoreDirect` running on a write-back overlay. Between commits every
//! write stays in the overlay's dirty pages, so the main volume only ever
//! holds committed state.
//!
//! ## Commit
//! ```text
//!   lock all ─► header checksum ─► drain dirty ranges ─► log ranges
//!     ─► seal (COMMIT + crc, fsync) ─► apply ranges to main ─► fsync main
//!     ─► reset WAL
//! ```
//! A crash before the seal loses the transaction; a crash after it is
//! repaired by replaying the WAL into the main volume on the next open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::volume::{DirtyRange, FileChannelVolume, MemoryVolume, Volume, VolumeFactory, WriteBackVolume};
use crate::wal::{self, WalReader, WalReplay, WriteAheadLog};

use super::compact::install_compacted;
use super::direct::{StoreDirect, StoreStats};

/// Transactional store with physical redo logging
pub struct StoreWal {
    direct: StoreDirect,
    overlay: Arc<WriteBackVolume>,
    /// `None` for read-only stores. Also serialises commit, rollback and
    /// compaction.
    wal: Mutex<Option<WriteAheadLog>>,
    config: Config,
    closed: AtomicBool,
    /// Set when a sealed commit could not be applied; the store refuses
    /// work until reopened, which replays the kept WAL
    failed: AtomicBool,
}

/// Applies replayed physical entries straight to the main volume
struct MainVolumeReplay<'a> {
    main: &'a dyn Volume,
}

impl WalReplay for MainVolumeReplay<'_> {
    fn write_long(&mut self, offset: u64, value: u64) -> Result<()> {
        self.main.put_long(offset, value)
    }

    fn write_byte_array(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.main.put_data(offset, data)
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

impl StoreWal {
    /// Open or create a transactional store, replaying any pending WAL
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let factory = VolumeFactory::new(config.volume_kind, config.read_only);
        let main = factory.open(config.path.as_deref())?;
        match Self::open_wal(&config).and_then(|wal_vol| Self::init(main.clone(), wal_vol, config)) {
            Ok(store) => Ok(store),
            Err(e) => {
                if let Err(close_err) = main.close() {
                    warn!(error = %close_err, "failed to close volume after open error");
                }
                Err(e)
            }
        }
    }

    /// Open a writable store on caller-supplied main and log volumes
    pub fn with_volumes(main: Arc<dyn Volume>, wal_vol: Arc<dyn Volume>, config: Config) -> Result<Self> {
        config.validate()?;
        if config.read_only {
            return Err(StoreError::Config(
                "a store on supplied volumes must be writable".to_string(),
            ));
        }
        Self::init(main, Some(wal_vol), config)
    }

    fn open_wal(config: &Config) -> Result<Option<Arc<dyn Volume>>> {
        if config.read_only {
            Self::check_no_pending(config)?;
            return Ok(None);
        }
        let wal_vol: Arc<dyn Volume> = match config.wal_path() {
            Some(path) => Arc::new(FileChannelVolume::open(&path, false)?),
            None => Arc::new(MemoryVolume::new()),
        };
        Ok(Some(wal_vol))
    }

    fn init(main: Arc<dyn Volume>, wal_vol: Option<Arc<dyn Volume>>, config: Config) -> Result<Self> {
        let features = config.features();

        let wal = match wal_vol {
            None => None,
            Some(wal_vol) => {
                if let Some(logged) = WalReader::open(wal_vol.as_ref())?.features() {
                    if logged != features {
                        return Err(StoreError::WrongConfiguration(format!(
                            "wal was written with features [{}], opened with [{}]",
                            logged, features
                        )));
                    }
                }
                let stats = wal::replay(wal_vol.as_ref(), &mut MainVolumeReplay { main: main.as_ref() })?;
                if stats.transactions_committed > 0 {
                    main.sync()?;
                    info!(
                        transactions = stats.transactions_committed,
                        "recovered committed transactions from wal"
                    );
                }
                Some(WriteAheadLog::create(wal_vol, features)?)
            }
        };

        let overlay = Arc::new(WriteBackVolume::new(main));
        let created = overlay.is_empty();
        let direct = StoreDirect::with_volume(overlay.clone(), config.clone(), true)?;
        let store = Self {
            direct,
            overlay,
            wal: Mutex::new(wal),
            config,
            closed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        };
        if created {
            // Make the fresh header durable right away
            store.commit()?;
        }
        Ok(store)
    }

    /// A read-only open cannot replay, so refuse when work is pending
    fn check_no_pending(config: &Config) -> Result<()> {
        let Some(path) = config.wal_path() else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let vol = FileChannelVolume::open(&path, true)?;
        let stats = wal::verify(&vol);
        vol.close()?;
        if stats?.transactions_committed > 0 {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) || self.failed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// True once a commit failed after sealing; reopen to recover
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Statistics of the underlying store (uncommitted changes included)
    pub fn stats(&self) -> Result<StoreStats> {
        self.check_open()?;
        self.direct.stats()
    }

    /// Overlay pages holding uncommitted changes
    pub fn pending_pages(&self) -> usize {
        self.overlay.dirty_pages()
    }

    // =========================================================================
    // Record operations
    // =========================================================================

    pub fn put(&self, data: &[u8]) -> Result<u64> {
        self.check_open()?;
        self.direct.put(data)
    }

    pub fn get(&self, recid: u64) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.direct.get(recid)
    }

    pub fn update(&self, recid: u64, data: &[u8]) -> Result<()> {
        self.check_open()?;
        self.direct.update(recid, data)
    }

    pub fn delete(&self, recid: u64) -> Result<()> {
        self.check_open()?;
        self.direct.delete(recid)
    }

    pub fn preallocate(&self) -> Result<u64> {
        self.check_open()?;
        self.direct.preallocate()
    }

    pub fn compare_and_swap(&self, recid: u64, expected: Option<&[u8]>, new: &[u8]) -> Result<bool> {
        self.check_open()?;
        self.direct.compare_and_swap(recid, expected, new)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Make every change since the last commit durable
    pub fn commit(&self) -> Result<()> {
        self.check_open()?;
        let mut wal_guard = self.wal.lock();
        match wal_guard.as_mut() {
            Some(wal) => self.commit_locked(wal),
            None => Ok(()),
        }
    }

    fn commit_locked(&self, wal: &mut WriteAheadLog) -> Result<()> {
        let mut excl = self.direct.lock_all();
        if self.overlay.is_clean() {
            return Ok(());
        }

        self.direct.write_header_checksum(&excl.structure)?;
        let (ranges, len) = self.overlay.take_dirty();

        if let Err(e) = self.log_ranges(wal, &ranges) {
            warn!(error = %e, "wal write failed, transaction discarded");
            self.overlay.discard();
            if let Err(reset_err) = wal.reset() {
                warn!(error = %reset_err, "failed to reset wal");
            }
            self.direct.reload_state(&mut excl.structure)?;
            return Err(e);
        }

        if let Err(e) = self.apply_ranges(&ranges, len) {
            // The main volume may be partly written and no longer matches the
            // allocator; only a replay on the next open can repair it
            warn!(error = %e, "applying sealed transaction failed, wal kept for replay");
            self.overlay.discard();
            self.failed.store(true, Ordering::Release);
            return Err(e);
        }
        wal.reset()?;
        self.overlay.discard();

        debug!(
            ranges = ranges.len(),
            bytes = ranges.iter().map(|r| r.data.len()).sum::<usize>(),
            "commit"
        );
        Ok(())
    }

    fn log_ranges(&self, wal: &mut WriteAheadLog, ranges: &[DirtyRange]) -> Result<()> {
        for range in ranges {
            if range.data.len() == 8 && range.offset % 8 == 0 {
                let mut word = [0u8; 8];
                word.copy_from_slice(&range.data);
                wal.write_long(range.offset, u64::from_be_bytes(word))?;
            } else {
                wal.write_byte_array(range.offset, &range.data)?;
            }
        }
        wal.commit(self.config.sync_on_commit)
    }

    fn apply_ranges(&self, ranges: &[DirtyRange], len: u64) -> Result<()> {
        let main = self.overlay.base();
        main.ensure_available(len)?;
        for range in ranges {
            main.write_at(range.offset, &range.data)?;
        }
        if self.config.sync_on_commit {
            main.sync()?;
        }
        Ok(())
    }

    /// Drop every change since the last commit
    pub fn rollback(&self) -> Result<()> {
        self.check_open()?;
        let _wal = self.wal.lock();
        let mut excl = self.direct.lock_all();
        let pages = self.overlay.dirty_pages();
        self.overlay.discard();
        self.direct.reload_state(&mut excl.structure)?;
        debug!(pages, "rollback");
        Ok(())
    }

    /// Commit, then rewrite the main volume densely
    pub fn compact(&self) -> Result<()> {
        self.check_open()?;
        let mut wal_guard = self.wal.lock();
        let Some(wal) = wal_guard.as_mut() else {
            return Err(StoreError::ReadOnly);
        };
        self.commit_locked(wal)?;
        // Segments left in the log address the old layout
        wal.sync()?;

        let config = self.config.clone();
        let overlay = self.overlay.clone();
        self.direct.compact_with(move |target| {
            let main = install_compacted(&config, overlay.base(), target)?;
            overlay.replace_base(main);
            Ok(overlay as Arc<dyn Volume>)
        })
    }

    /// Discard uncommitted changes, close the main volume and remove the WAL
    ///
    /// A failed store keeps its WAL so the next open can replay it.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut wal = self.wal.lock();
        {
            let _excl = self.direct.lock_all();
            if !self.overlay.is_clean() {
                warn!(
                    pages = self.overlay.dirty_pages(),
                    "closing with uncommitted changes, discarding them"
                );
                self.overlay.discard();
            }
        }
        let closed = self.direct.close();
        let removed = match wal.take() {
            Some(log) if self.is_failed() => log.close(),
            Some(log) => log.destroy(),
            None => Ok(()),
        };
        closed.and(removed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for StoreWal {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!("transactional store dropped without close, closing now");
            if let Err(e) = self.close() {
                warn!(error = %e, "close on drop failed");
            }
        }
    }
}
