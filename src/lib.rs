//! `rowcc` is the per-record concurrency control layer of an in-memory
//! transactional store.
//!
//! Every record gets an engine implementing [`RowControl`], which decides
//! for each access whether a transaction is served, parked, or must abort,
//! based only on timestamps drawn from a shared [`Manager`]. Two protocols
//! are provided:
//!
//! * [`Mvcc`] keeps a bounded array of committed versions so that readers
//!   are served the newest version older than themselves without ever
//!   blocking behind writers that are younger.
//! * [`TimestampOrdering`] keeps a single version and queues accesses that
//!   would overtake an older announced writer, optionally applying the
//!   Thomas write rule.
//!
//! Engines never block. A transaction told to [`Outcome::Wait`] is woken by
//! whichever thread later releases what it waits for, and observes that
//! through [`Txn::is_ready`] or [`Txn::wait`].
//!
//! # Examples
//!
//! ```
//! use rowcc::{Config, Outcome, Protocol, RequestKind};
//!
//! let manager = Config::new()
//!     .threads(2)
//!     .protocol(Protocol::Mvcc)
//!     .start()
//!     .unwrap();
//!
//! let row = manager.row(7, &b"v0"[..]);
//!
//! let writer = manager.begin(0).unwrap();
//! assert_eq!(row.access(&writer, RequestKind::Prewrite, None), Outcome::Ok);
//! row.access(&writer, RequestKind::WriteCommit, Some(b"v1"[..].into()));
//! manager.finish(&writer);
//!
//! let reader = manager.begin(1).unwrap();
//! assert_eq!(row.access(&reader, RequestKind::Read, None), Outcome::Ok);
//! assert_eq!(&*reader.take_version().unwrap().data, b"v1");
//! manager.finish(&reader);
//! ```
#![deny(missing_docs, missing_debug_implementations)]

mod backoff;
mod cache_padded;
mod concurrency_control;
mod config;
mod fastlock;
mod manager;
mod mvcc;
mod result;
mod timestamp;
mod txn;

pub use inline_array::InlineArray;

pub use crate::{
    concurrency_control::{Outcome, RequestKind, RowControl, Version},
    config::{Config, Protocol},
    manager::Manager,
    mvcc::{Mvcc, MvccStats},
    result::{Error, Result},
    timestamp::{TimestampOrdering, TimestampStats},
    txn::Txn,
};

use crate::{
    backoff::Backoff,
    cache_padded::CachePadded,
    concurrency_control::RowLatch,
    fastlock::{FastLock, FastLockGuard},
};

/// A transaction timestamp. Drawn from [`Manager::next_ts`], so timestamps
/// are unique and ordered by when they were drawn. Timestamp 0 is reserved
/// for the initial version of every record.
pub type Ts = u64;
