//! Delay primitives
//!
//! `sleep`, `sleep_until`, `yield_now` and `wait_for`, built on
//! `VirtualScheduler::schedule_at`. Every primitive takes the scheduler
//! explicitly.

use crate::clock::VirtualInstant;
use crate::error::WaitError;
use crate::event_loop::VirtualScheduler;
use crate::handle::TimerHandle;
use futures::future::{self, Either};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Shared wait state between a future and the callback that completes it.
#[derive(Clone, Default)]
struct WaitState {
    inner: Rc<RefCell<WaitStateInner>>,
}

#[derive(Default)]
struct WaitStateInner {
    done: bool,
    waker: Option<Waker>,
}

impl WaitState {
    fn set_waker(&self, w: &Waker) {
        let mut s = self.inner.borrow_mut();
        match &s.waker {
            Some(existing) if existing.will_wake(w) => {}
            _ => s.waker = Some(w.clone()),
        }
    }

    fn complete(&self) {
        let waker = {
            let mut s = self.inner.borrow_mut();
            if s.done {
                return;
            }
            s.done = true;
            s.waker.take()
        };
        if let Some(w) = waker {
            w.wake();
        }
    }

    fn is_done(&self) -> bool {
        self.inner.borrow().done
    }
}

enum SleepKind {
    Until(VirtualInstant),
    Yield { yielded: bool },
}

/// Future that completes once the virtual clock reaches its deadline.
/// Dropping it before then cancels the underlying timer.
pub struct Sleep {
    sched: Rc<dyn VirtualScheduler>,
    kind: SleepKind,
    state: WaitState,
    handle: Option<TimerHandle>,
}

impl Sleep {
    /// The instant this sleep completes at, or `None` for a plain yield.
    pub fn deadline(&self) -> Option<VirtualInstant> {
        match self.kind {
            SleepKind::Until(when) => Some(when),
            SleepKind::Yield { .. } => None,
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        let when = match &mut this.kind {
            SleepKind::Yield { yielded } => {
                if *yielded {
                    return Poll::Ready(());
                }
                *yielded = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            SleepKind::Until(when) => *when,
        };

        if this.state.is_done() {
            return Poll::Ready(());
        }

        this.state.set_waker(cx.waker());

        if this.handle.is_none() {
            let state = this.state.clone();
            let handle = this
                .sched
                .schedule_at(when, Box::new(move || state.complete()));
            this.handle = Some(handle);
        }

        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if self.state.is_done() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
    }
}

/// Sleep for `delay` virtual time units. A non-positive or NaN delay yields once.
pub fn sleep(sched: &Rc<dyn VirtualScheduler>, delay: f64) -> Sleep {
    if delay > 0.0 {
        sleep_until(sched, sched.now() + delay)
    } else {
        yield_now(sched)
    }
}

/// Sleep until the clock reaches `deadline`.
pub fn sleep_until(sched: &Rc<dyn VirtualScheduler>, deadline: VirtualInstant) -> Sleep {
    Sleep {
        sched: sched.clone(),
        kind: SleepKind::Until(deadline),
        state: WaitState::default(),
        handle: None,
    }
}

/// Give every other ready task one turn before continuing.
pub fn yield_now(sched: &Rc<dyn VirtualScheduler>) -> Sleep {
    Sleep {
        sched: sched.clone(),
        kind: SleepKind::Yield { yielded: false },
        state: WaitState::default(),
        handle: None,
    }
}

/// Await `fut` for at most `budget` virtual time units.
///
/// On timeout the future is dropped, cancelling any timers it registered, and
/// `WaitError::TimeoutExceeded` is returned. If the future and the budget end
/// at the same instant the future wins. `None` waits without a budget; a
/// non-positive budget gives the future a single poll.
pub fn wait_for<F>(
    sched: &Rc<dyn VirtualScheduler>,
    fut: F,
    budget: Option<f64>,
) -> impl Future<Output = Result<F::Output, WaitError>>
where
    F: Future,
{
    let sched = sched.clone();
    async move {
        let Some(budget) = budget else {
            return Ok(fut.await);
        };

        if budget.is_nan() || budget <= 0.0 {
            return future::poll_immediate(fut)
                .await
                .ok_or(WaitError::TimeoutExceeded { budget });
        }

        let deadline = sleep_until(&sched, sched.now() + budget);
        match future::select(Box::pin(fut), deadline).await {
            Either::Left((out, _deadline)) => Ok(out),
            Either::Right(((), fut)) => {
                tracing::debug!(budget, now = %sched.now(), "wait_for: budget exceeded");
                drop(fut);
                Err(WaitError::TimeoutExceeded { budget })
            }
        }
    }
}
