use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Error, Manager, Result};

/// Which concurrency control protocol new records are managed by.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum Protocol {
    /// Bounded-history multi-version concurrency control.
    #[default]
    Mvcc,
    /// Single-version timestamp ordering.
    TimestampOrdering,
}

/// Top-level configuration for the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    threads: usize,
    history_len: usize,
    central_lock: bool,
    lock_buckets: usize,
    protocol: Protocol,
    thomas_write_rule: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            history_len: 4,
            central_lock: false,
            lock_buckets: 1024,
            protocol: Protocol::Mvcc,
            thomas_write_rule: false,
        }
    }
}

macro_rules! builder {
    ($(($name:ident, $get:ident, $set:ident, $t:ty, $desc:expr)),*) => {
        $(
            #[doc="Get "]
            #[doc=$desc]
            pub fn $get(&self) -> $t {
                self.$name.clone()
            }

            #[doc="Set "]
            #[doc=$desc]
            pub fn $set(&mut self, to: $t) {
                self.$name = to;
            }

            #[doc="Builder, set "]
            #[doc=$desc]
            pub fn $name(&self, to: $t) -> Config {
                let mut ret = self.clone();
                ret.$name = to;
                ret
            }
        )*
    }
}

impl Config {
    /// Returns the default configuration.
    pub fn new() -> Config {
        Config::default()
    }

    builder!(
        (threads, get_threads, set_threads, usize, "number of worker threads driving transactions"),
        (history_len, get_history_len, set_history_len, usize, "initial number of MVCC version and request slots per record"),
        (central_lock, get_central_lock, set_central_lock, bool, "whether records are latched through the central lock pool instead of per-record spin locks"),
        (lock_buckets, get_lock_buckets, set_lock_buckets, usize, "number of locks in the central lock pool"),
        (protocol, get_protocol, set_protocol, Protocol, "concurrency control protocol used for new records"),
        (thomas_write_rule, get_thomas_write_rule, set_thomas_write_rule, bool, "whether timestamp ordering discards stale writes instead of aborting them")
    );

    /// Checks that the configuration can be used to start a system.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Unsupported(
                "at least one worker thread must be configured".into(),
            ));
        }
        if self.history_len == 0 {
            return Err(Error::Unsupported(
                "history_len must be at least 1".into(),
            ));
        }
        if self.central_lock && self.lock_buckets == 0 {
            return Err(Error::Unsupported(
                "central lock mode needs at least one lock bucket".into(),
            ));
        }
        Ok(())
    }

    /// Validates this configuration and starts the timestamp authority
    /// that every record engine is created through.
    pub fn start(&self) -> Result<Arc<Manager>> {
        self.validate()?;
        log::debug!("starting concurrency control manager with {:?}", self);
        Ok(Arc::new(Manager::new(self.clone())))
    }
}
