mod common;

use rowcc::{Config, Mvcc, Outcome, Protocol, RequestKind, RowControl};

fn commit(row: &dyn RowControl, txn: &std::sync::Arc<rowcc::Txn>, data: &[u8]) {
    assert_eq!(
        row.access(txn, RequestKind::WriteCommit, Some(data.into())),
        Outcome::Ok
    );
}

#[test]
fn writer_blocks_only_younger_readers() {
    common::setup_logger();
    let manager = common::start(Protocol::Mvcc, 4);
    let row = manager.row(1, &b"init"[..]);

    let old_reader = manager.begin(0).unwrap();
    let writer = manager.begin(1).unwrap();
    let young_reader = manager.begin(2).unwrap();

    assert_eq!(row.access(&writer, RequestKind::Prewrite, None), Outcome::Ok);
    assert_eq!(&*writer.take_version().unwrap().data, b"init");

    assert_eq!(row.access(&old_reader, RequestKind::Read, None), Outcome::Ok);
    assert_eq!(&*old_reader.take_version().unwrap().data, b"init");

    assert_eq!(row.access(&young_reader, RequestKind::Read, None), Outcome::Wait);
    assert!(!young_reader.is_ready());

    commit(&*row, &writer, b"next");
    common::wait_for(&young_reader);
    let seen = young_reader.take_version().unwrap();
    assert_eq!(seen.wts, writer.ts());
    assert_eq!(&*seen.data, b"next");

    for txn in [&old_reader, &writer, &young_reader] {
        manager.finish(txn);
    }
}

#[test]
fn late_writer_aborts_and_retries() {
    common::setup_logger();
    let manager = common::start(Protocol::Mvcc, 2);
    let row = manager.row(2, &b"a"[..]);

    let writer = manager.begin(0).unwrap();
    let reader = manager.begin(1).unwrap();
    assert_eq!(row.access(&reader, RequestKind::Read, None), Outcome::Ok);
    manager.finish(&reader);

    // the reader already saw the version this write would have replaced
    assert_eq!(row.access(&writer, RequestKind::Prewrite, None), Outcome::Abort);
    assert_eq!(
        row.access(&writer, RequestKind::AbortRelease, None),
        Outcome::Ok
    );

    manager.restart(&writer);
    assert!(writer.ts() > reader.ts());
    assert_eq!(row.access(&writer, RequestKind::Prewrite, None), Outcome::Ok);
    commit(&*row, &writer, b"b");
    manager.finish(&writer);
}

#[test]
fn old_reader_sees_history() {
    common::setup_logger();
    let manager = common::start(Protocol::Mvcc, 2);
    let row = Mvcc::new(&manager, 3, &b"v0"[..]);

    let reader = manager.begin(0).unwrap();
    for value in [&b"v1"[..], b"v2", b"v3"] {
        let writer = manager.begin(1).unwrap();
        assert_eq!(row.access(&writer, RequestKind::Prewrite, None), Outcome::Ok);
        commit(&row, &writer, value);
        manager.finish(&writer);
    }

    assert_eq!(row.access(&reader, RequestKind::Read, None), Outcome::Ok);
    let seen = reader.take_version().unwrap();
    assert_eq!((seen.wts, &*seen.data), (0, &b"v0"[..]));
    manager.finish(&reader);

    let stats = row.stats();
    assert_eq!(stats.versions, 3);
    assert_eq!(stats.oldest_wts, 0);
    assert!(stats.max_served_rts < stats.latest_wts);
}

#[test]
fn parked_prewriter_inherits_reservation() {
    common::setup_logger();
    let manager = common::start(Protocol::Mvcc, 2);
    let row = Mvcc::new(&manager, 4, &b"x"[..]);

    let first = manager.begin(0).unwrap();
    let second = manager.begin(1).unwrap();
    assert_eq!(row.access(&first, RequestKind::Prewrite, None), Outcome::Ok);
    assert_eq!(row.access(&second, RequestKind::Prewrite, None), Outcome::Wait);
    assert_eq!(row.stats().pending, 1);

    commit(&row, &first, b"y");
    common::wait_for(&second);
    assert_eq!(&*second.take_version().unwrap().data, b"y");
    assert_eq!(row.stats().prewrite_ts, Some(second.ts()));

    commit(&row, &second, b"z");
    assert_eq!(row.stats().prewrite_ts, None);
    assert_eq!(row.stats().latest_wts, second.ts());
}

#[test]
fn released_reservation_passes_to_next_prewriter() {
    common::setup_logger();
    let manager = common::start(Protocol::Mvcc, 3);
    let row = Mvcc::new(&manager, 5, &b"x"[..]);

    let first = manager.begin(0).unwrap();
    let second = manager.begin(1).unwrap();
    let reader = manager.begin(2).unwrap();
    assert_eq!(row.access(&first, RequestKind::Prewrite, None), Outcome::Ok);
    assert_eq!(row.access(&second, RequestKind::Prewrite, None), Outcome::Wait);
    assert_eq!(row.access(&reader, RequestKind::Read, None), Outcome::Wait);

    assert_eq!(row.access(&first, RequestKind::AbortRelease, None), Outcome::Ok);
    common::wait_for(&second);
    assert_eq!(&*second.take_version().unwrap().data, b"x");
    // the reader is younger than the new reservation holder
    assert!(!reader.is_ready());

    commit(&row, &second, b"w");
    common::wait_for(&reader);
    assert_eq!(&*reader.take_version().unwrap().data, b"w");

    let stats = row.stats();
    assert_eq!(stats.versions, 1);
    assert_eq!(stats.pending, 0);
}

#[test]
fn central_lock_mode_serves_requests() {
    common::setup_logger();
    let manager = Config::new()
        .threads(2)
        .central_lock(true)
        .lock_buckets(2)
        .start()
        .unwrap();
    let rows: Vec<_> =
        (0..8).map(|id| manager.row(id, &id.to_be_bytes()[..])).collect();

    let writer = manager.begin(0).unwrap();
    for row in &rows {
        assert_eq!(row.access(&writer, RequestKind::Prewrite, None), Outcome::Ok);
        commit(&**row, &writer, b"done");
    }
    manager.finish(&writer);

    let reader = manager.begin(1).unwrap();
    for row in &rows {
        assert_eq!(row.access(&reader, RequestKind::Read, None), Outcome::Ok);
        assert_eq!(&*reader.take_version().unwrap().data, b"done");
    }
    manager.finish(&reader);
}
