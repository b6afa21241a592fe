use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{Backoff, Ts, Version};

/// Per-transaction state shared between the thread driving a transaction
/// and the record engines that decide on its accesses.
///
/// A transaction that received [`Outcome::Wait`](crate::Outcome::Wait) has
/// its ready flag cleared and is woken by whichever thread later runs the
/// wake cascade on that record. The flag is level-triggered: it may be set
/// more than once and the driver must re-check it rather than consume it.
#[derive(Debug)]
pub struct Txn {
    id: u64,
    thread_id: usize,
    ts: AtomicU64,
    ready: AtomicBool,
    view: Mutex<Option<Version>>,
}

impl Txn {
    pub(crate) fn new(id: u64, thread_id: usize, ts: Ts) -> Txn {
        Txn {
            id,
            thread_id,
            ts: AtomicU64::new(ts),
            ready: AtomicBool::new(true),
            view: Mutex::new(None),
        }
    }

    /// Unique for the lifetime of the manager, kept across restarts.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The worker thread whose active-timestamp slot this transaction uses.
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// The timestamp of the current attempt of this transaction.
    pub fn ts(&self) -> Ts {
        self.ts.load(Ordering::Acquire)
    }

    pub(crate) fn restamp(&self, ts: Ts) {
        self.ts.store(ts, Ordering::Release);
        self.ready.store(true, Ordering::Release);
        self.view.lock().take();
    }

    /// Whether the transaction may proceed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn park(&self) {
        self.ready.store(false, Ordering::Release);
    }

    /// Publishes the version an engine decided this transaction sees and
    /// then marks it ready.
    pub(crate) fn wake(&self, version: Version) {
        self.set_version(version);
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn set_version(&self, version: Version) {
        *self.view.lock() = Some(version);
    }

    /// Takes the version most recently handed to this transaction by a
    /// record engine, leaving the output slot empty.
    pub fn take_version(&self) -> Option<Version> {
        self.view.lock().take()
    }

    /// Polls the ready flag with backoff until another thread's wake cascade
    /// sets it.
    pub fn wait(&self) {
        let backoff = Backoff::new();
        while !self.is_ready() {
            backoff.snooze();
        }
    }

    /// Like [`Txn::wait`], but gives up after `timeout`. Returns whether the
    /// transaction became ready. A driver that gives up is expected to issue
    /// [`RequestKind::AbortRelease`](crate::RequestKind::AbortRelease) on
    /// the record it was parked on.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        while !self.is_ready() {
            if Instant::now() >= deadline {
                return self.is_ready();
            }
            backoff.snooze();
        }
        true
    }
}
