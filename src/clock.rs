//! Virtual Clock
//!
//! Holds the loop's notion of "now". Time only moves when the loop
//! fast-forwards to the next pending instant (or a test advances it by hand);
//! it never moves backward.

use crate::error::SchedulerError;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;
use tracing::trace;

/// A point in virtual time, in time units since loop start.
///
/// Ordered with `f64::total_cmp` so it can live in heaps and sets.
#[derive(Clone, Copy, Debug, Default)]
pub struct VirtualInstant(f64);

impl VirtualInstant {
    pub const ZERO: VirtualInstant = VirtualInstant(0.0);

    pub fn new(t: f64) -> Self {
        VirtualInstant(t)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }

    pub fn is_nan(self) -> bool {
        self.0.is_nan()
    }

    /// Bit pattern used as a hash key. Normalizes -0.0 to 0.0.
    pub(crate) fn key(self) -> u64 {
        if self.0 == 0.0 {
            0.0f64.to_bits()
        } else {
            self.0.to_bits()
        }
    }
}

impl PartialEq for VirtualInstant {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VirtualInstant {}

impl PartialOrd for VirtualInstant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VirtualInstant {
    fn cmp(&self, other: &Self) -> Ordering {
        // -0.0 and 0.0 compare equal here, unlike raw total_cmp.
        if self.0 == 0.0 && other.0 == 0.0 {
            return Ordering::Equal;
        }
        self.0.total_cmp(&other.0)
    }
}

impl Add<f64> for VirtualInstant {
    type Output = VirtualInstant;

    fn add(self, rhs: f64) -> VirtualInstant {
        VirtualInstant(self.0 + rhs)
    }
}

impl From<f64> for VirtualInstant {
    fn from(t: f64) -> Self {
        VirtualInstant(t)
    }
}

impl fmt::Display for VirtualInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The loop's clock.
#[derive(Clone, Debug)]
pub struct VirtualClock {
    now: VirtualInstant,
    resolution: f64,
}

impl VirtualClock {
    pub fn new(start: VirtualInstant, resolution: f64) -> Self {
        Self {
            now: start,
            resolution,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> VirtualInstant {
        self.now
    }

    /// Minimum schedulable granularity. Metadata only.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Move the clock to `instant`. Fails if that would move time backward.
    pub fn advance_to(&mut self, instant: VirtualInstant) -> Result<(), SchedulerError> {
        if instant < self.now || instant.is_nan() {
            return Err(SchedulerError::InvalidAdvance {
                now: self.now,
                requested: instant,
            });
        }
        trace!(from = %self.now, to = %instant, "VirtualClock::advance_to");
        self.now = instant;
        Ok(())
    }

    /// Move the clock forward by `delta`. Non-finite or non-positive deltas are ignored.
    pub fn advance_by(&mut self, delta: f64) -> VirtualInstant {
        if delta.is_finite() && delta > 0.0 {
            self.now = self.now + delta;
        }
        self.now
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(VirtualInstant::ZERO, 1e-9)
    }
}
