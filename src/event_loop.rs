//! Schedule Loop
//!
//! The virtual-time run-loop step. Each `run_once` releases due timers, runs
//! one batch of ready work, and only when nothing is left to run at the
//! current instant fast-forwards the clock to the nearest pending instant.
//!
//! The loop composes with a task runtime through `TaskRuntime` and exposes
//! `VirtualScheduler` to delay primitives and tests.

use crate::clock::{VirtualClock, VirtualInstant};
use crate::config::LoopConfig;
use crate::error::SchedulerError;
use crate::handle::{Callback, TimerHandle};
use crate::readiness::{IoHandle, ReadinessStub, WatchCallback, Watchers};
use crate::timers::TimerSet;
use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// What the loop needs from a task runtime.
pub trait TaskRuntime {
    /// Queue `callback` to run in the next batch.
    fn call_soon(&self, callback: Callback) -> TimerHandle;

    /// Hold `callback` until the clock reaches `when`.
    fn call_at(&self, when: VirtualInstant, callback: Callback) -> TimerHandle;

    /// Move every live timer due at or before `now` onto the ready-queue.
    fn promote_due(&self, now: VirtualInstant) -> usize;

    /// Run the callbacks that were ready when the batch began, in FIFO order.
    fn run_ready_batch(&self) -> usize;

    fn has_ready(&self) -> bool;

    /// Live (not cancelled) timers still waiting for their instant.
    fn pending_timers(&self) -> usize;

    /// Whether any live timer is still waiting. Cheaper than `pending_timers`.
    fn has_pending_timers(&self) -> bool;

    /// Cancel all queued and pending work.
    fn clear(&self);
}

/// Scheduling surface used by delay primitives and test code.
pub trait VirtualScheduler {
    fn now(&self) -> VirtualInstant;

    /// Register `callback` to become ready no earlier than `when`.
    fn schedule_at(&self, when: VirtualInstant, callback: Callback) -> TimerHandle;

    /// Register `callback` to run at the current instant.
    fn call_soon(&self, callback: Callback) -> TimerHandle;

    /// Move the clock forward by `delta` without waiting for timers.
    fn advance_time(&self, delta: f64);

    fn call_later(&self, delay: f64, callback: Callback) -> TimerHandle {
        let when = self.now() + delay;
        self.schedule_at(when, callback)
    }
}

/// Result of one `run_once` step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Work is still ready at the current instant; time did not move.
    Busy { ran: usize },
    /// The clock moved to the nearest pending instant.
    Advanced { to: VirtualInstant, ran: usize },
    /// Nothing ready and no pending instant.
    Idle { ran: usize },
}

impl StepOutcome {
    pub fn ran(&self) -> usize {
        match *self {
            StepOutcome::Busy { ran }
            | StepOutcome::Advanced { ran, .. }
            | StepOutcome::Idle { ran } => ran,
        }
    }
}

/// The virtual-time run-loop driver.
pub struct ScheduleLoop {
    clock: RefCell<VirtualClock>,
    timers: RefCell<TimerSet>,
    watchers: RefCell<Watchers>,
    runtime: Rc<dyn TaskRuntime>,
    closed: Cell<bool>,
}

impl ScheduleLoop {
    pub fn new(runtime: Rc<dyn TaskRuntime>, config: &LoopConfig) -> Self {
        let start = VirtualInstant::new(config.start_time);
        debug!(%start, resolution = config.clock_resolution, "ScheduleLoop::new");
        Self {
            clock: RefCell::new(VirtualClock::new(start, config.clock_resolution)),
            timers: RefCell::new(TimerSet::new()),
            watchers: RefCell::new(Watchers::new()),
            runtime,
            closed: Cell::new(false),
        }
    }

    pub fn clock_resolution(&self) -> f64 {
        self.clock.borrow().resolution()
    }

    /// Distinct instants still registered for clock advancement.
    pub fn pending_instants(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn runtime(&self) -> &Rc<dyn TaskRuntime> {
        &self.runtime
    }

    /// True when there is nothing ready, no registered instant, and no live timer.
    pub fn is_idle(&self) -> bool {
        !self.runtime.has_ready()
            && self.timers.borrow().is_empty()
            && !self.runtime.has_pending_timers()
    }

    /// Time only moves once the ready-queue has fully drained.
    pub fn should_advance(&self) -> bool {
        !self.runtime.has_ready()
    }

    /// Run one loop iteration.
    pub fn run_once(&self) -> Result<StepOutcome, SchedulerError> {
        if self.closed.get() {
            return Err(SchedulerError::Closed);
        }

        let now = self.now();
        let promoted = self.runtime.promote_due(now);

        // No descriptor ever becomes ready; keep the poll step for parity.
        let events = self.watchers.borrow_mut().poll(Some(0.0));
        debug_assert!(events.is_empty());

        let ran = self.runtime.run_ready_batch();
        trace!(%now, promoted, ran, "ScheduleLoop::run_once: batch done");

        if !self.should_advance() {
            return Ok(StepOutcome::Busy { ran });
        }

        match self.advance_to_next_instant()? {
            Some(to) => Ok(StepOutcome::Advanced { to, ran }),
            None => Ok(StepOutcome::Idle { ran }),
        }
    }

    /// Pop the nearest registered instant and move the clock there.
    ///
    /// Instants already passed by a manual `advance_time` are discarded and the
    /// clock stays at `now`, so the next step releases their callbacks before
    /// any later instant is reached.
    fn advance_to_next_instant(&self) -> Result<Option<VirtualInstant>, SchedulerError> {
        let now = self.now();
        let next = {
            let mut timers = self.timers.borrow_mut();
            let mut stale = 0;
            while timers.peek_closest().is_some_and(|next| next < now) {
                timers.pop_closest()?;
                stale += 1;
            }
            if stale > 0 {
                trace!(%now, stale, "ScheduleLoop: dropped stale instants");
                return Ok(Some(now));
            }
            if timers.is_empty() {
                return Ok(None);
            }
            timers.pop_closest()?
        };

        self.clock.borrow_mut().advance_to(next)?;
        debug!(from = %now, to = %next, "ScheduleLoop: fast-forward");
        Ok(Some(next))
    }

    /// Cancel everything pending and refuse further work.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        debug!(now = %self.now(), "ScheduleLoop::close");
        self.runtime.clear();
        self.timers.borrow_mut().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    // --- readiness surface ---

    pub fn add_reader(&self, handle: IoHandle, callback: WatchCallback) {
        self.watchers.borrow_mut().add_reader(handle, callback);
    }

    pub fn remove_reader(&self, handle: IoHandle) -> bool {
        self.watchers.borrow_mut().remove_reader(handle)
    }

    pub fn add_writer(&self, handle: IoHandle, callback: WatchCallback) {
        self.watchers.borrow_mut().add_writer(handle, callback);
    }

    pub fn remove_writer(&self, handle: IoHandle) -> bool {
        self.watchers.borrow_mut().remove_writer(handle)
    }

    /// Panics unless `callback` is the reader registered for `handle`.
    pub fn assert_reader(&self, handle: IoHandle, callback: &WatchCallback) {
        let watchers = self.watchers.borrow();
        assert!(watchers.reader(handle).is_some(), "{} is not registered", handle);
        assert!(
            watchers.has_reader(handle, callback),
            "{} has a different reader callback",
            handle
        );
    }

    /// Panics unless `callback` is the writer registered for `handle`.
    pub fn assert_writer(&self, handle: IoHandle, callback: &WatchCallback) {
        let watchers = self.watchers.borrow();
        assert!(watchers.writer(handle).is_some(), "{} is not registered", handle);
        assert!(
            watchers.has_writer(handle, callback),
            "{} has a different writer callback",
            handle
        );
    }

    pub fn remove_reader_count(&self, handle: IoHandle) -> usize {
        self.watchers.borrow().remove_reader_count(handle)
    }

    pub fn remove_writer_count(&self, handle: IoHandle) -> usize {
        self.watchers.borrow().remove_writer_count(handle)
    }

    pub fn reset_counters(&self) {
        self.watchers.borrow_mut().reset_counters();
    }

    /// Current registrations in the readiness stub.
    pub fn readiness(&self) -> Ref<'_, ReadinessStub> {
        Ref::map(self.watchers.borrow(), |w| w.stub())
    }
}

impl VirtualScheduler for ScheduleLoop {
    fn now(&self) -> VirtualInstant {
        self.clock.borrow().now()
    }

    fn schedule_at(&self, when: VirtualInstant, callback: Callback) -> TimerHandle {
        if self.closed.get() {
            warn!(%when, "ScheduleLoop::schedule_at on closed loop");
            return TimerHandle::cancelled(Some(when));
        }
        // The clock never moves backward, so past instants are registered at now.
        let now = self.now();
        let instant = if when.is_nan() { now } else { when.max(now) };
        let added = self.timers.borrow_mut().add(instant);
        trace!(%when, %instant, added, "ScheduleLoop::schedule_at");
        self.runtime.call_at(instant, callback)
    }

    fn call_soon(&self, callback: Callback) -> TimerHandle {
        if self.closed.get() {
            warn!("ScheduleLoop::call_soon on closed loop");
            return TimerHandle::cancelled(None);
        }
        self.runtime.call_soon(callback)
    }

    fn advance_time(&self, delta: f64) {
        let now = self.clock.borrow_mut().advance_by(delta);
        debug!(delta, %now, "ScheduleLoop::advance_time");
    }
}
