//! Transaction Module
//!
//! Optimistic transactions over any `RecordStore`.
//!
//! ## Model
//! - A `Tx` buffers its writes privately until commit
//! - Reads see a snapshot taken at `begin`: when another transaction commits
//!   a recid this one has not written, the previous value is parked in this
//!   transaction's snapshot map
//! - Commit fails with `TxRollback` if any written recid was committed by
//!   someone else after this transaction began (first committer wins)
//!
//! ```text
//!   begin ──► get/put/update/delete (private write set)
//!                     │
//!                  commit ── conflict? ──► TxRollback
//!                     │
//!          park old values in open snapshots ─► apply ─► inner.commit()
//! ```

mod engine;
mod transaction;

pub use engine::TxEngine;
pub use transaction::Tx;
