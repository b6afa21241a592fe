use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use inline_array::InlineArray;
use parking_lot::MutexGuard;
use serde::{Deserialize, Serialize};

use crate::{FastLock, FastLockGuard, Manager, Ts, Txn};

/// The kind of access a transaction makes to a record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum RequestKind {
    /// A plain read.
    Read,
    /// The read phase of a writer, which claims the right to write later.
    Prewrite,
    /// A writer installing its data at commit time.
    WriteCommit,
    /// A writer (or a parked transaction) giving up its claims on the record
    /// because it aborted.
    AbortRelease,
}

/// The decision an engine made about an access.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Outcome {
    /// Served. For reads and prewrites the transaction's output slot has
    /// been filled before returning.
    Ok,
    /// Deferred. The transaction is parked until a later wake cascade sets
    /// its ready flag, at which point its output slot is filled.
    Wait,
    /// The access conflicts with the timestamp order and the transaction
    /// must be aborted and retried by its driver.
    Abort,
}

/// A snapshot of a record's data along with the timestamp of the write that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Timestamp of the write that produced this version, 0 for a record's
    /// initial contents.
    pub wts: Ts,
    /// The record contents.
    pub data: InlineArray,
}

/// The per-record concurrency control contract shared by every protocol.
///
/// Each call runs entirely under the record's latch and never blocks on
/// another transaction: it serves, parks or aborts the caller and returns.
pub trait RowControl: Send + Sync {
    /// Decides on one access by `txn` to this record.
    ///
    /// `data` carries the new record contents for
    /// [`RequestKind::WriteCommit`] and is ignored otherwise.
    ///
    /// # Panics
    ///
    /// Panics when the access violates the protocol the driver is expected
    /// to follow, such as committing a write without a matching prewrite.
    fn access(
        &self,
        txn: &Arc<Txn>,
        kind: RequestKind,
        data: Option<InlineArray>,
    ) -> Outcome;

    /// The id of the record this engine manages.
    fn record_id(&self) -> u64;
}

/// Serializes access to one record's bookkeeping, either with its own spin
/// lock or, in central lock mode, through the manager's lock pool.
///
/// Only one of the two ever arbitrates between threads. In central mode the
/// record's `FastLock` is still taken, but only while the bucket mutex is
/// held, so it is always free and acquiring it is a single uncontended CAS
/// that provides access to the state. It is never spun on in that mode.
#[derive(Debug)]
pub(crate) struct RowLatch<S> {
    record_id: u64,
    manager: Arc<Manager>,
    state: FastLock<S>,
}

pub(crate) struct LatchGuard<'a, S> {
    // declared first so that the record state is released before the bucket
    state: FastLockGuard<'a, S>,
    _central: Option<MutexGuard<'a, ()>>,
}

impl<S> RowLatch<S> {
    pub(crate) fn new(
        manager: &Arc<Manager>,
        record_id: u64,
        state: S,
    ) -> RowLatch<S> {
        RowLatch {
            record_id,
            manager: manager.clone(),
            state: FastLock::new(state),
        }
    }

    pub(crate) fn record_id(&self) -> u64 {
        self.record_id
    }

    pub(crate) fn manager(&self) -> &Manager {
        &self.manager
    }

    pub(crate) fn lock(&self) -> LatchGuard<'_, S> {
        if self.manager.config().get_central_lock() {
            let central = self.manager.lock_record(self.record_id);
            let Some(state) = self.state.try_lock() else {
                unreachable!(
                    "record {} latched outside of its central lock bucket",
                    self.record_id
                );
            };
            LatchGuard { state, _central: Some(central) }
        } else {
            LatchGuard { state: self.state.lock(), _central: None }
        }
    }
}

impl<S> Deref for LatchGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.state
    }
}

impl<S> DerefMut for LatchGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.state
    }
}
