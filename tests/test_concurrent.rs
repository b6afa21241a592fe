mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use rand::Rng;
use rowcc::{
    Config, Mvcc, Outcome, Protocol, RequestKind, RowControl, Txn,
};

const RECORDS: usize = 8;
const THREADS: usize = 4;
const TXNS_PER_THREAD: usize = 500;

fn decode(data: &[u8]) -> u64 {
    u64::from_be_bytes(data.try_into().unwrap())
}

/// Blocks the calling worker until a parked access is served. Returns
/// whether the access may proceed.
fn settle(txn: &Txn, outcome: Outcome) -> bool {
    match outcome {
        Outcome::Ok => true,
        Outcome::Wait => {
            common::wait_for(txn);
            true
        }
        Outcome::Abort => false,
    }
}

/// Every transaction reads one record and increments another (or the same
/// one, depending on `read_own_write`). With serializable scheduling no
/// increment is ever lost, so the records sum to the number of commits.
fn run_increments(config: Config, read_own_write: bool) {
    common::setup_logger();
    let manager = config.threads(THREADS).start().unwrap();
    let rows: Arc<Vec<Box<dyn RowControl>>> = Arc::new(
        (0..RECORDS as u64)
            .map(|id| manager.row(id, &0_u64.to_be_bytes()[..]))
            .collect(),
    );
    let aborts = Arc::new(AtomicU64::new(0));

    let workers: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let manager = manager.clone();
            let rows = rows.clone();
            let aborts = aborts.clone();
            thread::Builder::new()
                .name(format!("worker-{}", thread_id))
                .spawn(move || {
                    let mut rng = rand::rng();
                    for _ in 0..TXNS_PER_THREAD {
                        let txn = manager.begin(thread_id).unwrap();
                        loop {
                            let target = rng.random_range(0..RECORDS);
                            let source = if read_own_write {
                                target
                            } else {
                                rng.random_range(0..RECORDS)
                            };

                            let read =
                                rows[source].access(&txn, RequestKind::Read, None);
                            if !settle(&txn, read) {
                                aborts.fetch_add(1, Ordering::Relaxed);
                                manager.restart(&txn);
                                continue;
                            }
                            let seen = txn.take_version().unwrap();

                            let prewrite = rows[target].access(
                                &txn,
                                RequestKind::Prewrite,
                                None,
                            );
                            if !settle(&txn, prewrite) {
                                rows[target].access(
                                    &txn,
                                    RequestKind::AbortRelease,
                                    None,
                                );
                                aborts.fetch_add(1, Ordering::Relaxed);
                                manager.restart(&txn);
                                continue;
                            }
                            let working = txn.take_version().unwrap();

                            let base =
                                if read_own_write { &seen } else { &working };
                            let next = decode(&base.data) + 1;
                            let outcome = rows[target].access(
                                &txn,
                                RequestKind::WriteCommit,
                                Some(next.to_be_bytes()[..].into()),
                            );
                            assert_eq!(outcome, Outcome::Ok);
                            break;
                        }
                        manager.finish(&txn);
                    }
                })
                .unwrap()
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let reader = manager.begin(0).unwrap();
    let total: u64 = rows
        .iter()
        .map(|row| {
            assert_eq!(row.access(&reader, RequestKind::Read, None), Outcome::Ok);
            decode(&reader.take_version().unwrap().data)
        })
        .sum();
    manager.finish(&reader);

    log::info!(
        "{} commits, {} aborts",
        THREADS * TXNS_PER_THREAD,
        aborts.load(Ordering::Relaxed)
    );
    assert_eq!(total, (THREADS * TXNS_PER_THREAD) as u64);
}

#[test]
#[cfg_attr(miri, ignore)]
fn mvcc_increments_are_never_lost() {
    run_increments(Config::new().protocol(Protocol::Mvcc).history_len(2), false);
}

#[test]
#[cfg_attr(miri, ignore)]
fn mvcc_central_lock_increments_are_never_lost() {
    run_increments(
        Config::new()
            .protocol(Protocol::Mvcc)
            .central_lock(true)
            .lock_buckets(3),
        false,
    );
}

#[test]
#[cfg_attr(miri, ignore)]
fn timestamp_ordering_increments_are_never_lost() {
    run_increments(
        Config::new().protocol(Protocol::TimestampOrdering),
        true,
    );
}

#[test]
#[cfg_attr(miri, ignore)]
fn thomas_write_rule_increments_are_never_lost() {
    run_increments(
        Config::new()
            .protocol(Protocol::TimestampOrdering)
            .thomas_write_rule(true),
        true,
    );
}

/// Readers are never aborted for reading below the oldest retained version
/// unless that record had to forcibly recycle a version: garbage collection
/// alone only frees versions below every running transaction.
#[test]
#[cfg_attr(miri, ignore)]
fn mvcc_gc_never_aborts_active_readers() {
    common::setup_logger();
    // spare thread slots let version arrays grow well past what the
    // workers keep alive before forced recycling is allowed
    let manager = Config::new()
        .threads(THREADS * 16)
        .protocol(Protocol::Mvcc)
        .history_len(1)
        .start()
        .unwrap();
    let rows: Arc<Vec<Mvcc>> = Arc::new(
        (0..RECORDS as u64)
            .map(|id| Mvcc::new(&manager, id, &0_u64.to_be_bytes()[..]))
            .collect(),
    );
    let read_aborts: Arc<Vec<AtomicU64>> =
        Arc::new((0..RECORDS).map(|_| AtomicU64::new(0)).collect());

    let workers: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let manager = manager.clone();
            let rows = rows.clone();
            let read_aborts = read_aborts.clone();
            thread::Builder::new()
                .name(format!("worker-{}", thread_id))
                .spawn(move || {
                    let mut rng = rand::rng();
                    for _ in 0..TXNS_PER_THREAD {
                        let txn = manager.begin(thread_id).unwrap();
                        loop {
                            let source = rng.random_range(0..RECORDS);
                            let target = rng.random_range(0..RECORDS);

                            assert!(txn.ts() >= manager.min_active_ts());
                            let read =
                                rows[source].access(&txn, RequestKind::Read, None);
                            if !settle(&txn, read) {
                                read_aborts[source].fetch_add(1, Ordering::Relaxed);
                                manager.restart(&txn);
                                continue;
                            }
                            txn.take_version().unwrap();

                            let prewrite = rows[target].access(
                                &txn,
                                RequestKind::Prewrite,
                                None,
                            );
                            if !settle(&txn, prewrite) {
                                manager.restart(&txn);
                                continue;
                            }
                            txn.take_version().unwrap();
                            rows[target].access(&txn, RequestKind::WriteCommit, None);
                            break;
                        }
                        manager.finish(&txn);
                    }
                })
                .unwrap()
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    for (row, aborts) in rows.iter().zip(read_aborts.iter()) {
        let stats = row.stats();
        let aborts = aborts.load(Ordering::Relaxed);
        log::info!(
            "record {}: {} read aborts, {} forced recycles, {} slots",
            row.record_id(),
            aborts,
            stats.forced_recycles,
            stats.history_len
        );
        if stats.forced_recycles == 0 {
            assert_eq!(aborts, 0, "record {} aborted readers", row.record_id());
        }
    }
}
