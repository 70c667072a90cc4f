//! Error types
//!
//! `SchedulerError` covers broken loop invariants and driver failures.
//! `WaitError` is the normal, recoverable outcome of a wait that did not
//! complete (timeout or cancellation).

use crate::clock::VirtualInstant;
use thiserror::Error;

/// Errors raised by the scheduling core and the run driver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    /// `pop_closest` was called on an empty timer set.
    #[error("timer set is empty")]
    EmptyCollection,

    /// The virtual clock was asked to move backward.
    #[error("cannot move virtual clock backward from {now} to {requested}")]
    InvalidAdvance {
        now: VirtualInstant,
        requested: VirtualInstant,
    },

    /// The awaited task cannot make progress: nothing is ready and no timer is pending.
    #[error("run stalled at {now}: no ready work and no pending timers")]
    Stalled { now: VirtualInstant },

    #[error("exceeded {0} loop iterations, likely infinite scheduling")]
    IterationLimit(usize),

    #[error("event loop is closed")]
    Closed,

    /// The root task was cancelled before producing a result.
    #[error("root task was cancelled")]
    RootCancelled,
}

impl SchedulerError {
    /// True for conditions that indicate corrupted scheduler bookkeeping.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            SchedulerError::EmptyCollection | SchedulerError::InvalidAdvance { .. }
        )
    }
}

/// Errors returned to code awaiting a delayed result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WaitError {
    #[error("timed out after {budget} virtual time units")]
    TimeoutExceeded { budget: f64 },

    #[error("cancelled")]
    Cancelled,
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::TimeoutExceeded { .. })
    }
}
