//! Clock implementations for Alertcast
//!
//! Cadence alignment is defined on wall-clock time, so every component that
//! needs "now" takes a [`Clock`] instead of calling the system clock
//! directly. Tests drive a [`ManualClock`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock (UTC)
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        SystemClock
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for simulation and tests
///
/// Clones share the same instant.
#[derive(Clone, Debug)]
pub struct ManualClock {
    value: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            value: Arc::new(Mutex::new(start)),
        }
    }

    /// Jump to an absolute instant (may move backwards)
    pub fn set(&self, at: DateTime<Utc>) {
        *self.value.lock() = at;
    }

    /// Advance by a duration and return the new instant
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut value = self.value.lock();
        *value += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        *value
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.value.lock()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Non-negative wall-clock distance from `from` to `to`
#[inline]
pub fn duration_until(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}
