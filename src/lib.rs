//! Time Travel Loop
//!
//! A deterministic virtual-time event loop for tests:
//! - Delay-based async code (sleeps, timeouts) runs in zero wall-clock time
//! - Relative ordering matches what a real clock would produce
//! - Time advances only when nothing is left to run at the current instant
//! - Readiness polling is stubbed out; no real I/O happens in virtual time

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_loop;
pub mod executor;
pub mod handle;
pub mod readiness;
mod registry;
pub mod time;
pub mod timers;

#[cfg(test)]
mod scenario_tests;

pub use clock::{VirtualClock, VirtualInstant};
pub use config::LoopConfig;
pub use engine::Runtime;
pub use error::{SchedulerError, WaitError};
pub use event_loop::{ScheduleLoop, StepOutcome, TaskRuntime, VirtualScheduler};
pub use executor::{Executor, JoinHandle};
pub use handle::{Callback, TimerHandle};
pub use readiness::{
    Interest, IoHandle, ReadinessStub, Registration, RegistrationToken, WatchCallback, WatchData,
};
pub use time::{sleep, sleep_until, wait_for, yield_now, Sleep};
pub use timers::TimerSet;
