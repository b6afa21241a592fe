use std::hash::Hasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use fnv::FnvHasher;
use inline_array::InlineArray;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    CachePadded, Config, Error, Mvcc, Protocol, Result, RowControl,
    TimestampOrdering, Ts, Txn,
};

/// Marks an active-timestamp slot whose thread is not running a transaction.
const IDLE: Ts = Ts::MAX;

/// The global timestamp authority.
///
/// Hands out transaction timestamps, tracks the timestamp of the
/// transaction each worker thread is currently running so that MVCC can
/// compute its garbage collection horizon, and owns the lock pool used when
/// records are latched centrally.
#[derive(Debug)]
pub struct Manager {
    config: Config,
    timestamp: AtomicU64,
    txn_ids: AtomicU64,
    active: Box<[CachePadded<AtomicU64>]>,
    row_locks: Box<[Mutex<()>]>,
}

impl Manager {
    pub(crate) fn new(config: Config) -> Manager {
        let active = (0..config.get_threads())
            .map(|_| CachePadded::new(AtomicU64::new(IDLE)))
            .collect();

        let buckets =
            if config.get_central_lock() { config.get_lock_buckets() } else { 0 };
        let row_locks = (0..buckets).map(|_| Mutex::new(())).collect();

        Manager {
            config,
            // 0 is the write timestamp of every record's initial version
            timestamp: AtomicU64::new(1),
            txn_ids: AtomicU64::new(0),
            active,
            row_locks,
        }
    }

    /// The configuration this manager was started with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Draws the next timestamp. Timestamps are unique and strictly
    /// increasing in the order they are drawn.
    pub fn next_ts(&self) -> Ts {
        self.timestamp.fetch_add(1, Ordering::SeqCst)
    }

    /// Begins a new transaction on the given worker thread, registering its
    /// timestamp as active.
    pub fn begin(&self, thread_id: usize) -> Result<Arc<Txn>> {
        if thread_id >= self.active.len() {
            return Err(Error::ThreadOutOfRange {
                thread_id,
                threads: self.active.len(),
            });
        }
        let id = self.txn_ids.fetch_add(1, Ordering::Relaxed);
        let ts = self.register(thread_id);
        log::trace!("txn {} began on thread {} with ts {}", id, thread_id, ts);
        Ok(Arc::new(Txn::new(id, thread_id, ts)))
    }

    /// Assigns a fresh timestamp to a transaction that is about to be retried
    /// after an abort. The caller must already have released every
    /// prewrite the previous attempt held.
    pub fn restart(&self, txn: &Txn) {
        let ts = self.register(txn.thread_id());
        log::trace!("txn {} restarted with ts {}", txn.id(), ts);
        txn.restamp(ts);
    }

    /// Deregisters a finished (committed or abandoned) transaction.
    pub fn finish(&self, txn: &Txn) {
        self.active[txn.thread_id()].store(IDLE, Ordering::Release);
    }

    fn register(&self, thread_id: usize) -> Ts {
        let slot = &self.active[thread_id];
        // publish a lower bound before drawing so that a concurrent horizon
        // scan can never overtake the timestamp we are about to receive.
        slot.store(self.timestamp.load(Ordering::SeqCst), Ordering::SeqCst);
        let ts = self.next_ts();
        slot.store(ts, Ordering::Release);
        ts
    }

    /// An estimate of the smallest timestamp among running transactions.
    /// Never greater than the true minimum, so versions below it are never
    /// visible to anyone again. If nothing is running this is the next
    /// timestamp to be issued.
    pub fn min_active_ts(&self) -> Ts {
        let mut min = self.timestamp.load(Ordering::SeqCst);
        for slot in self.active.iter() {
            min = min.min(slot.load(Ordering::Acquire));
        }
        min
    }

    /// Locks the central lock bucket that `record_id` hashes to.
    ///
    /// # Panics
    ///
    /// Panics if the manager was not configured for central locking.
    pub fn lock_record(&self, record_id: u64) -> MutexGuard<'_, ()> {
        assert!(
            !self.row_locks.is_empty(),
            "lock_record called without central_lock configured"
        );
        let mut hasher = FnvHasher::default();
        hasher.write_u64(record_id);
        let bucket = (hasher.finish() % self.row_locks.len() as u64) as usize;
        self.row_locks[bucket].lock()
    }

    /// Creates the concurrency control engine for one record, using the
    /// configured protocol.
    pub fn row<D: Into<InlineArray>>(
        self: &Arc<Self>,
        record_id: u64,
        data: D,
    ) -> Box<dyn RowControl> {
        match self.config.get_protocol() {
            Protocol::Mvcc => Box::new(Mvcc::new(self, record_id, data)),
            Protocol::TimestampOrdering => {
                Box::new(TimestampOrdering::new(self, record_id, data))
            }
        }
    }
}
