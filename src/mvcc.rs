//! Bounded-history multi-version concurrency control.
//!
//! Each record keeps a small array of committed versions next to a "base"
//! buffer that holds the newest version older than everything in the array.
//! Readers are served the newest version older than their timestamp. At most
//! one writer at a time holds a reserved slot that it fills at commit, and
//! any reader or writer that must observe that commit is parked in the
//! pending request array until the commit (or abort) wakes it.
//!
//! Versions fall out of the array either through garbage collection, once
//! the array is full and they are older than the oldest running
//! transaction, or through forced recycling once the array has grown to as
//! many slots as there are worker threads. Readers older than every retained
//! version are aborted.
use std::mem;
use std::sync::Arc;

use inline_array::InlineArray;
use serde::{Deserialize, Serialize};

use crate::{
    Manager, Outcome, RequestKind, RowControl, RowLatch, Ts, Txn, Version,
};

/// One entry of the version array.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    /// Unused. May still own a buffer from an earlier version so that
    /// reserving it doesn't allocate.
    Empty { storage: Option<Vec<u8>> },
    /// Owned by the outstanding prewrite, holding the writer's working copy.
    Reserved { ts: Ts, buf: Vec<u8> },
    /// A committed version.
    Valid { ts: Ts, buf: Vec<u8> },
}

impl Slot {
    const fn empty() -> Slot {
        Slot::Empty { storage: None }
    }

    fn valid_ts(&self) -> Option<Ts> {
        match self {
            Slot::Valid { ts, .. } => Some(*ts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Latest {
    Base,
    Slot(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    ts: Ts,
    slot: usize,
}

#[derive(Debug, Clone)]
struct PendingRequest {
    kind: RequestKind,
    ts: Ts,
    txn: Arc<Txn>,
}

/// What the reservation algorithm needs to know about the rest of the
/// system, read under the record latch.
#[derive(Debug, Clone, Copy)]
struct Horizon {
    min_active_ts: Ts,
    threads: usize,
}

/// A snapshot of an MVCC record's bookkeeping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct MvccStats {
    /// Write timestamp of the newest committed version.
    pub latest_wts: Ts,
    /// Write timestamp of the oldest version still readable.
    pub oldest_wts: Ts,
    /// Largest timestamp a read has been served at.
    pub max_served_rts: Ts,
    /// Timestamp of the writer holding the reservation, if any.
    pub prewrite_ts: Option<Ts>,
    /// Committed versions held in the version array.
    pub versions: usize,
    /// Capacity of the version array.
    pub history_len: usize,
    /// Parked reads and prewrites.
    pub pending: usize,
    /// Capacity of the pending request array.
    pub requests_len: usize,
    /// Versions recycled while possibly still visible to a running
    /// transaction, because the array had reached the thread count.
    pub forced_recycles: u64,
}

#[derive(Debug)]
struct MvccState {
    base: Vec<u8>,
    latest: Latest,
    latest_wts: Ts,
    oldest_wts: Ts,
    max_served_rts: Ts,
    history: Vec<Slot>,
    requests: Vec<Option<PendingRequest>>,
    prewrite: Option<Reservation>,
    num_versions: usize,
    forced_recycles: u64,
}

impl MvccState {
    fn new(data: Vec<u8>, history_len: usize) -> MvccState {
        MvccState {
            base: data,
            latest: Latest::Base,
            latest_wts: 0,
            oldest_wts: 0,
            max_served_rts: 0,
            history: (0..history_len).map(|_| Slot::empty()).collect(),
            requests: (0..history_len).map(|_| None).collect(),
            prewrite: None,
            num_versions: 0,
            forced_recycles: 0,
        }
    }

    fn stats(&self) -> MvccStats {
        MvccStats {
            latest_wts: self.latest_wts,
            oldest_wts: self.oldest_wts,
            max_served_rts: self.max_served_rts,
            prewrite_ts: self.prewrite.map(|r| r.ts),
            versions: self.num_versions,
            history_len: self.history.len(),
            pending: self.requests.iter().flatten().count(),
            requests_len: self.requests.len(),
            forced_recycles: self.forced_recycles,
        }
    }

    fn latest_data(&self) -> &[u8] {
        match self.latest {
            Latest::Base => &self.base,
            Latest::Slot(idx) => match &self.history[idx] {
                Slot::Valid { buf, .. } => buf,
                other => unreachable!(
                    "latest version points at slot {} which is {:?}",
                    idx, other
                ),
            },
        }
    }

    fn latest_version(&self) -> Version {
        Version { wts: self.latest_wts, data: self.latest_data().into() }
    }

    /// The newest committed version older than `ts`, or the base version if
    /// every retained version is at least as new as `ts`.
    fn visible_version(&self, ts: Ts) -> Version {
        let newest_older = self
            .history
            .iter()
            .filter_map(|slot| match slot {
                Slot::Valid { ts: wts, buf } if *wts < ts => Some((*wts, buf)),
                _ => None,
            })
            .max_by_key(|(wts, _)| *wts);

        match newest_older {
            Some((wts, buf)) => Version { wts, data: buf[..].into() },
            None => Version { wts: self.oldest_wts, data: self.base[..].into() },
        }
    }

    fn working_copy(&self, idx: usize) -> Version {
        match &self.history[idx] {
            Slot::Reserved { buf, .. } => {
                Version { wts: self.latest_wts, data: buf[..].into() }
            }
            other => unreachable!(
                "working copy requested from slot {} which is {:?}",
                idx, other
            ),
        }
    }

    fn read(&mut self, txn: &Arc<Txn>, ts: Ts) -> Outcome {
        if ts < self.oldest_wts {
            // the version this reader should see was already recycled
            return Outcome::Abort;
        }

        if ts > self.latest_wts {
            if matches!(self.prewrite, Some(r) if r.ts < ts) {
                self.buffer(RequestKind::Read, txn, ts);
                txn.park();
                return Outcome::Wait;
            }
            self.max_served_rts = self.max_served_rts.max(ts);
            txn.set_version(self.latest_version());
            return Outcome::Ok;
        }

        txn.set_version(self.visible_version(ts));
        Outcome::Ok
    }

    // NB a writer that holds the reservation here while parked as a
    // prewriter on another record can deadlock with a writer doing the
    // opposite. Nothing detects this; drivers must time out and release.
    fn prewrite(
        &mut self,
        txn: &Arc<Txn>,
        ts: Ts,
        horizon: impl FnOnce() -> Horizon,
    ) -> Outcome {
        if ts < self.latest_wts
            || ts < self.max_served_rts
            || matches!(self.prewrite, Some(r) if r.ts > ts)
        {
            return Outcome::Abort;
        }

        if self.prewrite.is_some() {
            self.buffer(RequestKind::Prewrite, txn, ts);
            txn.park();
            return Outcome::Wait;
        }

        let idx = self.reserve(ts, horizon);
        txn.set_version(self.working_copy(idx));
        Outcome::Ok
    }

    fn write_commit(
        &mut self,
        txn: &Txn,
        ts: Ts,
        data: Option<InlineArray>,
        horizon: impl FnOnce() -> Horizon,
    ) {
        let reservation = match self.prewrite {
            Some(r) if r.ts == ts => r,
            other => panic!(
                "txn {} committed a write at ts {} without holding the \
                 reservation (outstanding: {:?})",
                txn.id(),
                ts,
                other
            ),
        };
        debug_assert!(ts > self.latest_wts);

        let mut buf =
            match mem::replace(&mut self.history[reservation.slot], Slot::empty())
            {
                Slot::Reserved { buf, .. } => buf,
                other => unreachable!(
                    "reservation points at slot {} which is {:?}",
                    reservation.slot, other
                ),
            };
        if let Some(data) = data {
            buf.clear();
            buf.extend_from_slice(&data);
        }

        self.history[reservation.slot] = Slot::Valid { ts, buf };
        self.latest_wts = ts;
        self.latest = Latest::Slot(reservation.slot);
        self.prewrite = None;
        self.num_versions += 1;

        self.wake(ts, horizon);
    }

    fn abort_release(
        &mut self,
        txn: &Txn,
        ts: Ts,
        horizon: impl FnOnce() -> Horizon,
    ) {
        let cancelled = self.cancel_pending(txn.id());
        if cancelled > 0 {
            log::trace!("cancelled {} parked requests of txn {}", cancelled, txn.id());
        }

        let reservation = match self.prewrite {
            Some(r) if r.ts == ts => r,
            _ => return,
        };

        let storage =
            match mem::replace(&mut self.history[reservation.slot], Slot::empty())
            {
                Slot::Reserved { buf, .. } => buf,
                other => unreachable!(
                    "reservation points at slot {} which is {:?}",
                    reservation.slot, other
                ),
            };
        self.history[reservation.slot] = Slot::Empty { storage: Some(storage) };
        self.prewrite = None;

        self.wake(ts, horizon);
    }

    /// Claims a version slot for a new prewrite at `ts`, filling it with a
    /// copy of the latest version. Always succeeds, by collecting garbage,
    /// forcibly recycling the oldest version, or growing the array. The
    /// horizon is only computed once the array is full.
    fn reserve(&mut self, ts: Ts, horizon: impl FnOnce() -> Horizon) -> usize {
        assert!(self.prewrite.is_none(), "only one prewrite may be served");

        let idx = match self.free_slot() {
            Some(idx) => idx,
            None => {
                let horizon = horizon();
                if self.oldest_wts < horizon.min_active_ts {
                    self.collect_garbage(horizon.min_active_ts);
                }
                match self.free_slot() {
                    Some(idx) => idx,
                    // every slot is plausibly in use by some running
                    // transaction
                    None if self.history.len() >= horizon.threads => {
                        self.recycle_oldest()
                    }
                    None => self.grow_history(),
                }
            }
        };

        let storage = match mem::replace(&mut self.history[idx], Slot::empty()) {
            Slot::Empty { storage } => storage,
            other => unreachable!(
                "reserving slot {} which is {:?}",
                idx, other
            ),
        };
        let mut buf = storage.unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(self.latest_data());

        self.history[idx] = Slot::Reserved { ts, buf };
        self.prewrite = Some(Reservation { ts, slot: idx });
        idx
    }

    /// Prefers empty slots that still own a buffer. Only searches when the
    /// array is not full of committed versions.
    fn free_slot(&self) -> Option<usize> {
        if self.num_versions >= self.history.len() {
            return None;
        }

        let mut unallocated = None;
        for (idx, slot) in self.history.iter().enumerate() {
            if let Slot::Empty { storage } = slot {
                if storage.is_some() {
                    return Some(idx);
                }
                unallocated = Some(idx);
            }
        }
        unallocated
    }

    /// Recycles every version that no running transaction can read: the
    /// newest version older than `min_active_ts` becomes the base and
    /// everything at or below it is freed.
    fn collect_garbage(&mut self, min_active_ts: Ts) {
        let newest_recyclable = self
            .history
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.valid_ts().map(|ts| (idx, ts)))
            .filter(|(_, ts)| *ts < min_active_ts)
            .max_by_key(|(_, ts)| *ts);

        let Some((idx, max_recycle_ts)) = newest_recyclable else {
            return;
        };

        self.promote_to_base(idx);

        let mut freed = 1;
        for slot in &mut self.history {
            if matches!(slot.valid_ts(), Some(ts) if ts <= max_recycle_ts) {
                let Slot::Valid { buf, .. } = mem::replace(slot, Slot::empty())
                else {
                    unreachable!()
                };
                *slot = Slot::Empty { storage: Some(buf) };
                self.num_versions -= 1;
                freed += 1;
            }
        }

        log::debug!(
            "gc below horizon {} freed {} versions, oldest retained is now {}",
            min_active_ts,
            freed,
            self.oldest_wts
        );
    }

    /// Recycles the oldest committed version even though it may still be
    /// visible to a running transaction. Such a transaction will abort on
    /// the oldest-version check instead of reading it.
    fn recycle_oldest(&mut self) -> usize {
        let (idx, ts) = self
            .history
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.valid_ts().map(|ts| (idx, ts)))
            .min_by_key(|(_, ts)| *ts)
            .expect("a full version array holds at least one version");

        debug_assert!(ts > self.oldest_wts);
        self.promote_to_base(idx);
        self.forced_recycles += 1;

        log::debug!(
            "forcibly recycled version {} in slot {}, {} slots in use",
            ts,
            idx,
            self.history.len()
        );
        idx
    }

    /// Exchanges a committed version with the base buffer, leaving the slot
    /// empty but holding the old base's storage.
    fn promote_to_base(&mut self, idx: usize) {
        let (ts, buf) = match mem::replace(&mut self.history[idx], Slot::empty()) {
            Slot::Valid { ts, buf } => (ts, buf),
            other => unreachable!("promoting slot {} which is {:?}", idx, other),
        };

        let old_base = mem::replace(&mut self.base, buf);
        self.history[idx] = Slot::Empty { storage: Some(old_base) };
        self.oldest_wts = ts;
        self.num_versions -= 1;

        if self.latest == Latest::Slot(idx) {
            self.latest = Latest::Base;
        }
    }

    /// Doubles the version array and returns the first new slot.
    fn grow_history(&mut self) -> usize {
        let old_len = self.history.len();
        self.history.resize_with(old_len * 2, Slot::empty);
        log::debug!("grew version array from {} to {}", old_len, old_len * 2);
        old_len
    }

    fn buffer(&mut self, kind: RequestKind, txn: &Arc<Txn>, ts: Ts) {
        let idx = match self.requests.iter().position(Option::is_none) {
            Some(idx) => idx,
            None => {
                let old_len = self.requests.len();
                self.requests.resize_with(old_len * 2, || None);
                old_len
            }
        };
        self.requests[idx] = Some(PendingRequest { kind, ts, txn: txn.clone() });
    }

    fn cancel_pending(&mut self, txn_id: u64) -> usize {
        let mut cancelled = 0;
        for entry in &mut self.requests {
            if matches!(entry, Some(req) if req.txn.id() == txn_id) {
                *entry = None;
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Runs after the writer at `ts` committed or released its reservation.
    /// Readers older than the next parked prewriter see the latest version,
    /// and that prewriter receives the reservation.
    fn wake(&mut self, ts: Ts, horizon: impl FnOnce() -> Horizon) {
        let next_pre_ts = self
            .requests
            .iter()
            .flatten()
            .filter(|req| req.kind == RequestKind::Prewrite && req.ts > ts)
            .map(|req| req.ts)
            .min()
            .unwrap_or(Ts::MAX);

        let mut next_prewriter = None;
        for idx in 0..self.requests.len() {
            let Some(req) = self.requests[idx].take() else {
                continue;
            };
            debug_assert!(req.ts > ts);

            if req.kind == RequestKind::Read && req.ts < next_pre_ts {
                self.max_served_rts = self.max_served_rts.max(req.ts);
                log::trace!("waking reader {} at ts {}", req.txn.id(), req.ts);
                req.txn.wake(self.latest_version());
            } else if req.ts == next_pre_ts {
                assert_eq!(
                    req.kind,
                    RequestKind::Prewrite,
                    "only a prewrite may hold the next prewrite timestamp"
                );
                next_prewriter = Some(req);
            } else {
                self.requests[idx] = Some(req);
            }
        }

        if let Some(req) = next_prewriter {
            let slot = self.reserve(req.ts, horizon);
            log::trace!("waking prewriter {} at ts {}", req.txn.id(), req.ts);
            req.txn.wake(self.working_copy(slot));
        }
    }

    fn check_invariants(&self) {
        let valid = self.history.iter().filter(|s| s.valid_ts().is_some()).count();
        assert_eq!(valid, self.num_versions);
        assert!(self.num_versions <= self.history.len());

        let reserved: Vec<usize> = self
            .history
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Slot::Reserved { .. }))
            .map(|(idx, _)| idx)
            .collect();
        match self.prewrite {
            Some(r) => assert_eq!(reserved, vec![r.slot]),
            None => assert!(reserved.is_empty()),
        }

        if let Some(max_ts) = self.history.iter().filter_map(Slot::valid_ts).max() {
            assert_eq!(max_ts, self.latest_wts);
        }

        for req in self.requests.iter().flatten() {
            assert!(req.ts > self.latest_wts);
            if let Some(r) = self.prewrite {
                assert!(req.ts > r.ts);
            }
        }
    }
}

/// The MVCC engine for one record.
#[derive(Debug)]
pub struct Mvcc {
    latch: RowLatch<MvccState>,
}

impl Mvcc {
    /// Creates the engine for `record_id`, whose initial contents are
    /// treated as a version written at timestamp 0.
    pub fn new<D: Into<InlineArray>>(
        manager: &Arc<Manager>,
        record_id: u64,
        data: D,
    ) -> Mvcc {
        let data: InlineArray = data.into();
        let history_len = manager.config().get_history_len();
        let state = MvccState::new(data.to_vec(), history_len);
        Mvcc { latch: RowLatch::new(manager, record_id, state) }
    }

    /// A snapshot of this record's bookkeeping, taken under its latch.
    pub fn stats(&self) -> MvccStats {
        self.latch.lock().stats()
    }

    fn horizon(&self) -> Horizon {
        let manager = self.latch.manager();
        Horizon {
            min_active_ts: manager.min_active_ts(),
            threads: manager.config().get_threads(),
        }
    }
}

impl RowControl for Mvcc {
    fn access(
        &self,
        txn: &Arc<Txn>,
        kind: RequestKind,
        data: Option<InlineArray>,
    ) -> Outcome {
        let ts = txn.ts();
        let mut row = self.latch.lock();

        if cfg!(debug_assertions) {
            row.check_invariants();
        }

        let outcome = match kind {
            RequestKind::Read => row.read(txn, ts),
            RequestKind::Prewrite => row.prewrite(txn, ts, || self.horizon()),
            RequestKind::WriteCommit => {
                row.write_commit(txn, ts, data, || self.horizon());
                Outcome::Ok
            }
            RequestKind::AbortRelease => {
                row.abort_release(txn, ts, || self.horizon());
                Outcome::Ok
            }
        };

        log::trace!(
            "mvcc record {} {:?} by txn {} at ts {} -> {:?}",
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
