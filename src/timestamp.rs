//! Single-version timestamp ordering.
//!
//! A record keeps one current version along with the timestamps of the last
//! write and the last read it served. Writers announce themselves with a
//! prewrite, which is queued until the writer commits or aborts; readers and
//! committing writers that would overtake an older announced writer are
//! queued behind it and released, oldest first, by the cascade that runs
//! whenever a prewrite leaves the queue.
//!
//! With the Thomas write rule enabled, writes that arrive after a newer
//! write was installed are dropped at commit instead of aborting the writer
//! at prewrite time.
use std::sync::Arc;

use inline_array::InlineArray;
use serde::{Deserialize, Serialize};

use crate::{
    Manager, Outcome, RequestKind, RowControl, RowLatch, Ts, Txn, Version,
};

#[derive(Debug, Clone)]
struct TsRequest {
    txn: Arc<Txn>,
    ts: Ts,
    // only set for write commits
    data: Option<InlineArray>,
}

/// Requests of one kind, in arrival order.
#[derive(Debug, Default)]
struct RequestQueue {
    entries: Vec<TsRequest>,
}

impl RequestQueue {
    fn push(&mut self, req: TsRequest) {
        self.entries.push(req);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn min_ts(&self) -> Ts {
        self.entries.iter().map(|req| req.ts).min().unwrap_or(Ts::MAX)
    }

    fn contains(&self, txn_id: u64) -> bool {
        self.entries.iter().any(|req| req.txn.id() == txn_id)
    }

    fn remove_txn(&mut self, txn_id: u64) -> Option<TsRequest> {
        let idx = self.entries.iter().position(|req| req.txn.id() == txn_id)?;
        Some(self.entries.remove(idx))
    }

    /// Removes and returns, in arrival order, every entry accepted by `pred`.
    fn drain_where(
        &mut self,
        mut pred: impl FnMut(&TsRequest) -> bool,
    ) -> Vec<TsRequest> {
        if !self.entries.iter().any(&mut pred) {
            return vec![];
        }
        let (taken, kept) = self.entries.drain(..).partition(|req| pred(req));
        self.entries = kept;
        taken
    }
}

/// A snapshot of a timestamp ordering record's bookkeeping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct TimestampStats {
    /// Timestamp of the last installed write.
    pub wts: Ts,
    /// Largest timestamp a read has been served at.
    pub rts: Ts,
    /// Smallest timestamp among parked reads, `Ts::MAX` when none are.
    pub min_rts: Ts,
    /// Smallest timestamp among parked write commits.
    pub min_wts: Ts,
    /// Smallest timestamp among announced prewrites.
    pub min_pts: Ts,
    /// Reads parked behind an older prewrite.
    pub pending_reads: usize,
    /// Prewrites whose writer has not yet committed or aborted.
    pub pending_prewrites: usize,
    /// Write commits parked until older prewrites and reads are resolved.
    pub pending_writes: usize,
}

#[derive(Debug)]
struct TimestampState {
    data: InlineArray,
    wts: Ts,
    rts: Ts,
    min_rts: Ts,
    min_wts: Ts,
    min_pts: Ts,
    reads: RequestQueue,
    prewrites: RequestQueue,
    writes: RequestQueue,
    thomas_write_rule: bool,
}

impl TimestampState {
    fn new(data: InlineArray, thomas_write_rule: bool) -> TimestampState {
        TimestampState {
            data,
            wts: 0,
            rts: 0,
            min_rts: Ts::MAX,
            min_wts: Ts::MAX,
            min_pts: Ts::MAX,
            reads: RequestQueue::default(),
            prewrites: RequestQueue::default(),
            writes: RequestQueue::default(),
            thomas_write_rule,
        }
    }

    fn stats(&self) -> TimestampStats {
        TimestampStats {
            wts: self.wts,
            rts: self.rts,
            min_rts: self.min_rts,
            min_wts: self.min_wts,
            min_pts: self.min_pts,
            pending_reads: self.reads.len(),
            pending_prewrites: self.prewrites.len(),
            pending_writes: self.writes.len(),
        }
    }

    fn current(&self) -> Version {
        Version { wts: self.wts, data: self.data.clone() }
    }

    fn read(&mut self, txn: &Arc<Txn>, ts: Ts) -> Outcome {
        if ts < self.wts {
            return Outcome::Abort;
        }

        if ts > self.min_pts {
            // an older writer has announced itself, read what it writes
            self.reads.push(TsRequest { txn: txn.clone(), ts, data: None });
            self.min_rts = self.min_rts.min(ts);
            txn.park();
            return Outcome::Wait;
        }

        txn.set_version(self.current());
        self.rts = self.rts.max(ts);
        Outcome::Ok
    }

    fn prewrite(&mut self, txn: &Arc<Txn>, ts: Ts) -> Outcome {
        if ts < self.rts {
            return Outcome::Abort;
        }
        if !self.thomas_write_rule && ts < self.wts {
            return Outcome::Abort;
        }

        self.prewrites.push(TsRequest { txn: txn.clone(), ts, data: None });
        self.min_pts = self.min_pts.min(ts);
        txn.set_version(self.current());
        Outcome::Ok
    }

    fn write_commit(&mut self, txn: &Arc<Txn>, ts: Ts, data: Option<InlineArray>) {
        let Some(data) = data else {
            panic!("txn {} committed a write at ts {} without data", txn.id(), ts);
        };
        assert!(
            self.prewrites.contains(txn.id()),
            "txn {} committed a write at ts {} without a prewrite",
            txn.id(),
            ts
        );

        if self.thomas_write_rule && ts < self.wts {
            log::debug!(
                "dropping stale write of txn {} at ts {}, record is at {}",
                txn.id(),
                ts,
                self.wts
            );
            self.prewrites.remove_txn(txn.id());
            self.update_buffer();
            return;
        }

        if self.write_blocked(ts) {
            self.writes.push(TsRequest { txn: txn.clone(), ts, data: Some(data) });
            self.min_wts = self.min_wts.min(ts);
            return;
        }

        self.install(ts, data);
        self.prewrites.remove_txn(txn.id());
        self.update_buffer();
    }

    fn abort_release(&mut self, txn: &Txn) {
        let released = self.prewrites.remove_txn(txn.id()).is_some();

        let reads = self.reads.drain_where(|req| req.txn.id() == txn.id());
        let writes = self.writes.drain_where(|req| req.txn.id() == txn.id());
        if !reads.is_empty() || !writes.is_empty() {
            log::trace!(
                "cancelled {} parked requests of txn {}",
                reads.len() + writes.len(),
                txn.id()
            );
            self.min_rts = self.reads.min_ts();
            self.min_wts = self.writes.min_ts();
        }

        if released || !reads.is_empty() {
            self.update_buffer();
        }
    }

    /// Whether a write commit at `ts` must wait for an older prewrite or an
    /// older parked read.
    fn write_blocked(&self, ts: Ts) -> bool {
        (!self.thomas_write_rule && ts > self.min_pts) || ts > self.min_rts
    }

    fn install(&mut self, ts: Ts, data: InlineArray) {
        self.data = data;
        self.wts = self.wts.max(ts);
    }

    /// Releases everything that a prewrite leaving the queue unblocked:
    /// reads no longer behind any prewrite, then the write commits that
    /// were only waiting on those reads, repeating while the installed
    /// writes unblock more.
    fn update_buffer(&mut self) {
        loop {
            let min_pts = self.prewrites.min_ts();
            assert!(
                min_pts >= self.min_pts,
                "prewrite minimum went backwards from {} to {}",
                self.min_pts,
                min_pts
            );
            self.min_pts = min_pts;

            let ready_reads = self.reads.drain_where(|req| req.ts <= min_pts);
            for req in &ready_reads {
                debug_assert!(req.ts >= self.wts);
                self.rts = self.rts.max(req.ts);
                log::trace!("waking reader {} at ts {}", req.txn.id(), req.ts);
                req.txn.wake(self.current());
            }
            self.min_rts = self.reads.min_ts();

            let ready_writes = {
                let (twr, min_pts, min_rts) =
                    (self.thomas_write_rule, self.min_pts, self.min_rts);
                self.writes.drain_where(|req| {
                    (twr || req.ts <= min_pts) && req.ts <= min_rts
                })
            };
            self.min_wts = self.writes.min_ts();

            if ready_reads.is_empty() && ready_writes.is_empty() {
                break;
            }

            for req in &ready_writes {
                let prewrite = self.prewrites.remove_txn(req.txn.id());
                assert!(
                    prewrite.is_some(),
                    "parked write of txn {} lost its prewrite",
                    req.txn.id()
                );
            }

            // the oldest released write wins and the rest are superseded
            let Some(winner) = ready_writes.iter().min_by_key(|req| req.ts) else {
                continue;
            };
            for loser in ready_writes.iter().filter(|req| req.ts != winner.ts) {
                log::debug!(
                    "dropping write of txn {} at ts {} superseded by ts {}",
                    loser.txn.id(),
                    loser.ts,
                    winner.ts
                );
            }

            if winner.ts < self.wts {
                log::debug!(
                    "dropping stale write of txn {} at ts {}, record is at {}",
                    winner.txn.id(),
                    winner.ts,
                    self.wts
                );
            } else if let Some(data) = winner.data.clone() {
                self.install(winner.ts, data);
            }
        }
    }

    fn check_invariants(&self) {
        assert_eq!(self.min_rts, self.reads.min_ts());
        assert_eq!(self.min_wts, self.writes.min_ts());
        assert_eq!(self.min_pts, self.prewrites.min_ts());

        for req in &self.reads.entries {
            assert!(req.ts > self.min_pts);
        }
        for req in &self.writes.entries {
            assert!(req.data.is_some());
            assert!(self.write_blocked(req.ts));
            assert!(self.prewrites.contains(req.txn.id()));
        }
    }
}

/// The timestamp ordering engine for one record.
#[derive(Debug)]
pub struct TimestampOrdering {
    latch: RowLatch<TimestampState>,
}

impl TimestampOrdering {
    /// Creates the engine for `record_id`, whose initial contents are
    /// treated as written at timestamp 0.
    pub fn new<D: Into<InlineArray>>(
        manager: &Arc<Manager>,
        record_id: u64,
        data: D,
    ) -> TimestampOrdering {
        let twr = manager.config().get_thomas_write_rule();
        let state = TimestampState::new(data.into(), twr);
        TimestampOrdering { latch: RowLatch::new(manager, record_id, state) }
    }

    /// A snapshot of this record's bookkeeping, taken under its latch.
    pub fn stats(&self) -> TimestampStats {
        self.latch.lock().stats()
    }
}

impl RowControl for TimestampOrdering {
    fn access(
        &self,
        txn: &Arc<Txn>,
        kind: RequestKind,
        data: Option<InlineArray>,
    ) -> Outcome {
        let ts = txn.ts();
        let mut row = self.latch.lock();

        let outcome = match kind {
            RequestKind::Read => row.read(txn, ts),
            RequestKind::Prewrite => row.prewrite(txn, ts),
            RequestKind::WriteCommit => {
                row.write_commit(txn, ts, data);
                Outcome::Ok
            }
            RequestKind::AbortRelease => {
                row.abort_release(txn);
                Outcome::Ok
            }
        };

        if cfg!(debug_assertions) {
            row.check_invariants();
        }

        log::trace!(
            "t/o record {} {:?} by txn {} at ts {} -> {:?}",
            self.latch.record_id(),
            kind,
            txn.id(),
            ts,
            outcome
        );
        outcome
    }

    fn record_id(&self) -> u64 {
        self.latch.record_id()
    }
}
