//! A single transaction

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::RecordStore;
use crate::error::{Result, StoreError};

use super::engine::Shared;

/// Committed values this transaction must keep seeing, keyed by recid
pub(crate) type Snapshot = Arc<Mutex<HashMap<u64, Option<Vec<u8>>>>>;

/// Buffered change to one recid
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Pending {
    Value(Vec<u8>),
    Deleted,
}

#[derive(Default)]
struct TxState {
    writes: BTreeMap<u64, Pending>,
    /// Recids reserved in the store for `put`/`preallocate`; freed on rollback
    preallocated: Vec<u64>,
}

/// Optimistic transaction; also usable as a `RecordStore`
///
/// Dropping an unfinished transaction rolls it back.
pub struct Tx {
    shared: Arc<Shared>,
    id: u64,
    start_version: u64,
    read_only: bool,
    snapshot: Snapshot,
    state: Mutex<TxState>,
    finished: AtomicBool,
}

impl Tx {
    pub(crate) fn new(
        shared: Arc<Shared>,
        id: u64,
        start_version: u64,
        read_only: bool,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            shared,
            id,
            start_version,
            read_only,
            snapshot,
            state: Mutex::new(TxState::default()),
            finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Recids with buffered writes
    pub fn pending_writes(&self) -> usize {
        self.state.lock().writes.len()
    }

    fn check_open(&self) -> Result<()> {
        if self.finished.load(Ordering::Acquire) {
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

    fn read(&self, recid: u64) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.state.lock().writes.get(&recid) {
            return Ok(match pending {
                Pending::Value(data) => Some(data.clone()),
                Pending::Deleted => None,
            });
        }
        // Holding the read lock keeps commits from interleaving between the
        // snapshot lookup and the store read
        let _state = self.shared.state.read();
        if let Some(parked) = self.snapshot.lock().get(&recid) {
            return Ok(parked.clone());
        }
        self.shared.inner.get(recid)
    }

    fn write(&self, recid: u64, pending: Pending) {
        self.state.lock().writes.insert(recid, pending);
    }

    fn reserve(&self) -> Result<u64> {
        let recid = self.shared.reserve()?;
        self.state.lock().preallocated.push(recid);
        Ok(recid)
    }

    fn finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    fn take_state(&self) -> TxState {
        std::mem::take(&mut *self.state.lock())
    }
}

impl RecordStore for Tx {
    fn put(&self, data: &[u8]) -> Result<u64> {
        self.check_writable()?;
        let recid = self.reserve()?;
        self.write(recid, Pending::Value(data.to_vec()));
        Ok(recid)
    }

    fn get(&self, recid: u64) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.read(recid)
    }

    fn update(&self, recid: u64, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.write(recid, Pending::Value(data.to_vec()));
        Ok(())
    }

    fn delete(&self, recid: u64) -> Result<()> {
        self.check_writable()?;
        self.write(recid, Pending::Deleted);
        Ok(())
    }

    fn compare_and_swap(&self, recid: u64, expected: Option<&[u8]>, new: &[u8]) -> Result<bool> {
        self.check_writable()?;
        if self.read(recid)?.as_deref() != expected {
            return Ok(false);
        }
        self.write(recid, Pending::Value(new.to_vec()));
        Ok(true)
    }

    fn preallocate(&self) -> Result<u64> {
        self.check_writable()?;
        self.reserve()
    }

    /// Apply the write set, or fail with `TxRollback` on conflict. Any
    /// failure rolls the transaction back and leaves the store untouched.
    fn commit(&self) -> Result<()> {
        if !self.finish() {
            return Err(StoreError::Closed);
        }
        let state = self.take_state();
        if self.read_only {
            self.shared.forget(self.id);
            return Ok(());
        }
        let writes: Vec<(u64, Pending)> = state.writes.into_iter().collect();
        match self.shared.commit(self.id, self.start_version, &writes) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.rollback(self.id, &state.preallocated)?;
                Err(e)
            }
        }
    }

    /// Discard the write set. A no-op once finished.
    fn rollback(&self) -> Result<()> {
        if !self.finish() {
            return Ok(());
        }
        let state = self.take_state();
        if self.read_only {
            self.shared.forget(self.id);
            return Ok(());
        }
        debug!(id = self.id, writes = state.writes.len(), "transaction rolled back");
        self.shared.rollback(self.id, &state.preallocated)
    }

    fn close(&self) -> Result<()> {
        self.rollback()
    }

    fn is_closed(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn compact(&self) -> Result<()> {
        Err(StoreError::Unsupported(
            "compaction is not available inside a transaction".to_string(),
        ))
    }

    fn can_rollback(&self) -> bool {
        true
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if let Err(e) = self.rollback() {
            debug!(id = self.id, error = %e, "rollback on drop failed");
        }
    }
}
