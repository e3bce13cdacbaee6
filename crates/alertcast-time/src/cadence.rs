//! Cadence definitions and wall-clock boundary arithmetic
//!
//! An interval of N minutes has its boundaries at every instant whose
//! minute is a multiple of N and whose second is zero (14:00:00,
//! 14:05:00, ... for N = 5). N must divide 60, so the boundary set is the
//! same every hour and matches exchange candle boundaries.

use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use alertcast_core::{AlertcastError, AlertcastResult};

/// A validated batching interval in whole minutes
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Interval(u32);

impl Interval {
    pub const FIVE_MINUTES: Interval = Interval(5);
    pub const FIFTEEN_MINUTES: Interval = Interval(15);
    pub const HOUR: Interval = Interval(60);

    /// Create an interval; N must be in 1..=60 and divide 60
    pub fn minutes(n: u32) -> AlertcastResult<Self> {
        if n == 0 || n > 60 || 60 % n != 0 {
            return Err(AlertcastError::InvalidInterval(n));
        }
        Ok(Interval(n))
    }

    #[inline]
    pub fn as_minutes(self) -> u32 {
        self.0
    }

    #[inline]
    fn period_secs(self) -> i64 {
        self.0 as i64 * 60
    }

    #[inline]
    pub fn period(self) -> Duration {
        Duration::seconds(self.period_secs())
    }

    /// Is `now` inside the boundary second (minutes % N == 0 and seconds == 0)?
    #[inline]
    pub fn is_at_boundary(self, now: DateTime<Utc>) -> bool {
        now.minute() % self.0 == 0 && now.second() == 0
    }

    /// Latest boundary at or before `t`
    pub fn floor(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let secs = t.timestamp();
        let floored = secs - secs.rem_euclid(self.period_secs());
        Utc.timestamp_opt(floored, 0).single().unwrap_or(t)
    }

    /// First boundary strictly after `t`
    #[inline]
    pub fn next_after(self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.floor(t) + self.period()
    }

    /// Start of the window that the batch released at `boundary` covers
    #[inline]
    pub fn window_start(self, boundary: DateTime<Utc>) -> DateTime<Utc> {
        boundary - self.period()
    }

    /// Every boundary in the half-open range `(after, until]`, oldest first
    pub fn boundaries_in(self, after: DateTime<Utc>, until: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> {
        let period = self.period();
        std::iter::successors(Some(self.next_after(after)), move |b| Some(*b + period))
            .take_while(move |b| *b <= until)
    }
}

impl TryFrom<u32> for Interval {
    type Error = AlertcastError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Interval::minutes(n)
    }
}

impl From<Interval> for u32 {
    fn from(interval: Interval) -> Self {
        interval.0
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// Delivery cadence of a tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    /// Deliver every alert as it is classified
    Immediate,
    /// Batch alerts and release them on aligned wall-clock boundaries
    Interval(Interval),
}

impl Cadence {
    pub fn every_minutes(n: u32) -> AlertcastResult<Self> {
        Interval::minutes(n).map(Cadence::Interval)
    }

    #[inline]
    pub fn is_immediate(self) -> bool {
        matches!(self, Cadence::Immediate)
    }

    #[inline]
    pub fn interval(self) -> Option<Interval> {
        match self {
            Cadence::Immediate => None,
            Cadence::Interval(i) => Some(i),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Immediate => f.write_str("immediate"),
            Cadence::Interval(i) => write!(f, "interval({})", i),
        }
    }
}
