//! Engine - the run driver
//!
//! `Runtime` ties together the executor and the schedule loop. It spawns a
//! root task and calls `run_once` until that task finishes, fast-forwarding
//! virtual time whenever the ready-queue drains.

use crate::clock::VirtualInstant;
use crate::config::LoopConfig;
use crate::error::{SchedulerError, WaitError};
use crate::event_loop::{ScheduleLoop, VirtualScheduler};
use crate::executor::{Executor, JoinHandle};
use crate::time::{self, Sleep};
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, trace};

/// A virtual-time runtime: executor + schedule loop + driver.
pub struct Runtime {
    executor: Rc<Executor>,
    event_loop: Rc<ScheduleLoop>,
    config: LoopConfig,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(LoopConfig::default())
    }
}

impl Runtime {
    pub fn new(config: LoopConfig) -> Self {
        let executor = Rc::new(Executor::new());
        let event_loop = Rc::new(ScheduleLoop::new(executor.clone(), &config));
        Self {
            executor,
            event_loop,
            config,
        }
    }

    /// The scheduler handle to pass to delay primitives.
    pub fn scheduler(&self) -> Rc<dyn VirtualScheduler> {
        self.event_loop.clone()
    }

    pub fn event_loop(&self) -> &Rc<ScheduleLoop> {
        &self.event_loop
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn now(&self) -> VirtualInstant {
        self.event_loop.now()
    }

    /// Move the clock forward by hand. Timers passed over fire on the next step.
    pub fn advance_time(&self, delta: f64) {
        self.event_loop.advance_time(delta);
    }

    /// Convenience for `time::sleep` on this runtime's scheduler.
    pub fn sleep(&self, delay: f64) -> Sleep {
        time::sleep(&self.scheduler(), delay)
    }

    /// Spawn a task without driving the loop.
    pub fn spawn<T: 'static>(&self, fut: impl Future<Output = T> + 'static) -> JoinHandle<T> {
        self.executor.spawn(fut)
    }

    /// Spawn `fut` as the root task and drive the loop until it finishes.
    /// Virtual time carries over between calls.
    pub fn run_until_complete<F>(&self, fut: F) -> Result<F::Output, SchedulerError>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        if self.event_loop.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let handle = self.executor.spawn(fut);
        let start = self.now();
        debug!(%start, task = handle.id(), "Runtime::run_until_complete: start");

        // Keeps the queue non-empty in the step the root finishes, so the
        // clock does not jump past the completion instant.
        let id = handle.id();
        handle.add_done_callback(move || trace!(task = id, "Runtime: root finished"));

        let mut iterations = 0;
        loop {
            if let Some(result) = handle.take_result() {
                debug!(
                    %start,
                    end = %self.now(),
                    iterations,
                    "Runtime::run_until_complete: done"
                );
                return result.map_err(|e| match e {
                    WaitError::Cancelled | WaitError::TimeoutExceeded { .. } => {
                        SchedulerError::RootCancelled
                    }
                });
            }

            if iterations >= self.config.max_iterations {
                return Err(SchedulerError::IterationLimit(self.config.max_iterations));
            }

            self.event_loop.run_once()?;
            iterations += 1;

            if !handle.is_finished() && self.event_loop.is_idle() {
                let now = self.now();
                debug!(%now, "Runtime::run_until_complete: stalled");
                return Err(SchedulerError::Stalled { now });
            }
        }
    }

    /// Drive the loop until nothing is ready and no timer is pending.
    /// Returns the number of loop iterations.
    pub fn run_until_idle(&self) -> Result<usize, SchedulerError> {
        if self.event_loop.is_closed() {
            return Err(SchedulerError::Closed);
        }
        let mut iterations = 0;
        while !self.event_loop.is_idle() {
            if iterations >= self.config.max_iterations {
                return Err(SchedulerError::IterationLimit(self.config.max_iterations));
            }
            self.event_loop.run_once()?;
            iterations += 1;
        }
        debug!(now = %self.now(), iterations, "Runtime::run_until_idle: idle");
        Ok(iterations)
    }

    /// Cancel all pending work. Later `run_*` calls fail with `SchedulerError::Closed`.
    pub fn close(&self) {
        self.event_loop.close();
    }

    pub fn is_closed(&self) -> bool {
        self.event_loop.is_closed()
    }
}
