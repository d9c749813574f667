//! Transaction engine
//!
//! Hands out transactions and serialises their commits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::{self, RecordStore};
use crate::error::{Result, StoreError};

use super::transaction::{Pending, Snapshot, Tx};

/// Shared between the engine handle and its transactions
pub(crate) struct Shared {
    pub inner: Arc<dyn RecordStore>,
    pub state: RwLock<EngineState>,
    next_id: AtomicU64,
}

pub(crate) struct EngineState {
    /// Bumped by every successful commit
    pub version: u64,
    /// Version of the last commit that wrote each recid
    pub last_write: HashMap<u64, u64>,
    pub open: HashMap<u64, OpenTx>,
}

pub(crate) struct OpenTx {
    pub start_version: u64,
    pub snapshot: Snapshot,
}

/// Optimistic transaction manager over a record store
#[derive(Clone)]
pub struct TxEngine {
    shared: Arc<Shared>,
}

impl TxEngine {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner,
                state: RwLock::new(EngineState {
                    version: 0,
                    last_write: HashMap::new(),
                    open: HashMap::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open the store described by `config` and wrap it
    pub fn open(config: Config) -> Result<Self> {
        Ok(Self::new(engine::open(config)?))
    }

    /// Start a read-write transaction
    pub fn begin(&self) -> Tx {
        self.start(false)
    }

    /// Start a read-only view of the current committed state
    pub fn snapshot(&self) -> Tx {
        self.start(true)
    }

    fn start(&self, read_only: bool) -> Tx {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let snapshot: Snapshot = Arc::new(Mutex::new(HashMap::new()));
        let mut state = self.shared.state.write();
        let start_version = state.version;
        state.open.insert(
            id,
            OpenTx {
                start_version,
                snapshot: snapshot.clone(),
            },
        );
        Tx::new(self.shared.clone(), id, start_version, read_only, snapshot)
    }

    /// Run `f` in a transaction, retrying from scratch on conflict
    pub fn execute<R, F>(&self, mut f: F) -> Result<R>
    where
        F: FnMut(&Tx) -> Result<R>,
    {
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            let tx = self.begin();
            let result = f(&tx).and_then(|value| tx.commit().map(|_| value));
            match result {
                Ok(value) => return Ok(value),
                Err(StoreError::TxRollback(recid)) => {
                    tx.rollback()?;
                    debug!(recid, attempt, "transaction conflict, retrying");
                }
                Err(e) => {
                    tx.rollback()?;
                    return Err(e);
                }
            }
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.shared.inner
    }

    /// Number of successful commits so far
    pub fn version(&self) -> u64 {
        self.shared.state.read().version
    }

    pub fn open_transactions(&self) -> usize {
        self.shared.state.read().open.len()
    }

    pub fn close(&self) -> Result<()> {
        self.shared.inner.close()
    }
}

impl Shared {
    /// Validate, publish and apply a write set (called by `Tx::commit`)
    pub(crate) fn commit(
        &self,
        id: u64,
        start_version: u64,
        writes: &[(u64, Pending)],
    ) -> Result<()> {
        let mut state = self.state.write();

        for (recid, _) in writes {
            if state.last_write.get(recid).is_some_and(|&v| v > start_version) {
                state.open.remove(&id);
                prune(&mut state);
                return Err(StoreError::TxRollback(*recid));
            }
        }

        // Unallocated targets fail here, before anything reaches the store
        let mut old_values = Vec::with_capacity(writes.len());
        for (recid, _) in writes {
            old_values.push((*recid, self.inner.get(*recid)?));
        }

        // Park the values other transactions must keep seeing
        for (other, open) in state.open.iter() {
            if *other == id {
                continue;
            }
            let mut snapshot = open.snapshot.lock();
            for (recid, old) in &old_values {
                snapshot.entry(*recid).or_insert_with(|| old.clone());
            }
        }

        if let Err(e) = self.apply(writes) {
            self.undo_partial(id, &e)?;
            return Err(e);
        }

        state.version += 1;
        let version = state.version;
        for (recid, _) in writes {
            state.last_write.insert(*recid, version);
        }
        state.open.remove(&id);
        prune(&mut state);
        debug!(id, version, writes = writes.len(), "transaction committed");
        Ok(())
    }

    fn apply(&self, writes: &[(u64, Pending)]) -> Result<()> {
        for (recid, pending) in writes {
            match pending {
                Pending::Value(data) => self.inner.update(*recid, data)?,
                Pending::Deleted => self.inner.delete(*recid)?,
            }
        }
        self.inner.commit()
    }

    /// Drop whatever part of a failed write set reached the store
    fn undo_partial(&self, id: u64, cause: &StoreError) -> Result<()> {
        if self.inner.can_rollback() {
            debug!(id, error = %cause, "commit failed, rolling back store");
            return self.inner.rollback();
        }
        warn!(id, error = %cause, "commit failed on a store without rollback");
        Ok(())
    }

    /// Reserve a recid in the store and make the reservation durable
    ///
    /// Nothing but a running commit may be pending in the store, so a failed
    /// commit can roll the store back without losing other reservations.
    pub(crate) fn reserve(&self) -> Result<u64> {
        let _state = self.state.write();
        let recid = self.inner.preallocate()?;
        self.inner.commit()?;
        Ok(recid)
    }

    /// Undo the recids a transaction reserved and forget it
    pub(crate) fn rollback(&self, id: u64, preallocated: &[u64]) -> Result<()> {
        let mut state = self.state.write();
        state.open.remove(&id);
        prune(&mut state);
        if preallocated.is_empty() {
            return Ok(());
        }
        for recid in preallocated {
            self.inner.delete(*recid)?;
        }
        self.inner.commit()
    }

    /// Release a read-only transaction
    pub(crate) fn forget(&self, id: u64) {
        let mut state = self.state.write();
        state.open.remove(&id);
        prune(&mut state);
    }
}

/// Drop write records no open transaction can conflict with any more
fn prune(state: &mut EngineState) {
    let oldest = state
        .open
        .values()
        .map(|open| open.start_version)
        .min()
        .unwrap_or(state.version);
    state.last_write.retain(|_, v| *v > oldest);
}
