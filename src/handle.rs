//! Callback handles
//!
//! A scheduled callback lives behind an `Rc<CallbackCell>` shared between the
//! ready-queue or timer registry and the `TimerHandle` returned to the caller.
//! Cancelling a handle drops the callback; the queue entry becomes stale and is
//! skipped when reached.

use crate::clock::VirtualInstant;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// A zero-argument callback. Arguments are captured by the closure.
pub type Callback = Box<dyn FnOnce()>;

pub(crate) struct CallbackCell {
    callback: RefCell<Option<Callback>>,
    cancelled: Cell<bool>,
    when: Option<VirtualInstant>,
    seq: u64,
}

impl CallbackCell {
    pub(crate) fn new(callback: Callback, when: Option<VirtualInstant>, seq: u64) -> Rc<Self> {
        Rc::new(Self {
            callback: RefCell::new(Some(callback)),
            cancelled: Cell::new(false),
            when,
            seq,
        })
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    /// Drop the callback without running it. Idempotent.
    pub(crate) fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        // Release captured state now rather than when the queue entry is reached.
        let cb = self.callback.borrow_mut().take();
        drop(cb);
    }

    /// Run the callback if it is still live. Returns whether it ran.
    pub(crate) fn run(&self) -> bool {
        if self.cancelled.get() {
            return false;
        }
        let cb = self.callback.borrow_mut().take();
        match cb {
            Some(cb) => {
                cb();
                true
            }
            None => false,
        }
    }

    fn is_spent(&self) -> bool {
        self.callback.borrow().is_none()
    }
}

/// Cancellation handle for a scheduled callback.
#[derive(Clone)]
pub struct TimerHandle(pub(crate) Rc<CallbackCell>);

impl TimerHandle {
    /// Prevent the callback from running. Has no effect once it has run.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// True once the callback has run or been cancelled.
    pub fn is_done(&self) -> bool {
        self.0.is_spent()
    }

    /// The instant this callback was scheduled for, or `None` for ready callbacks.
    pub fn when(&self) -> Option<VirtualInstant> {
        self.0.when
    }

    /// A handle that is already cancelled. Returned when scheduling on a closed loop.
    pub(crate) fn cancelled(when: Option<VirtualInstant>) -> Self {
        let cell = CallbackCell::new(Box::new(|| {}), when, u64::MAX);
        cell.cancel();
        TimerHandle(cell)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("when", &self.0.when)
            .field("seq", &self.0.seq)
            .field("cancelled", &self.0.is_cancelled())
            .finish()
    }
}
