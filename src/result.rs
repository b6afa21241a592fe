use std::{
    error::Error as StdError,
    fmt::{self, Display},
};

/// The top-level result type for configuring and starting the system.
///
/// Conflicts detected by a record engine are not errors, they are reported
/// through [`Outcome`](crate::Outcome).
pub type Result<T> = std::result::Result<T, Error>;

/// An Error type encapsulating the ways the system may be set up or driven
/// incorrectly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The system has been configured in an unsupported way.
    Unsupported(String),
    /// A worker thread id outside of the configured thread count was used
    /// to begin a transaction.
    ThreadOutOfRange {
        /// The offending thread id.
        thread_id: usize,
        /// The configured number of worker threads.
        threads: usize,
    },
}

impl StdError for Error {}

impl Display for Error {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> std::result::Result<(), fmt::Error> {
        use self::Error::*;

        match *self {
            Unsupported(ref e) => write!(f, "Unsupported: {}", e),
            ThreadOutOfRange { thread_id, threads } => write!(
                f,
                "thread id {} is out of range for a system configured \
                 with {} worker threads",
                thread_id, threads
            ),
        }
    }
}
