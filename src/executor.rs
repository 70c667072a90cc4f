//! Single-threaded deterministic executor
//!
//! The task runtime the loop drives. Holds the FIFO ready-queue (plain
//! callbacks and task polls share one queue), the per-instant timer registry,
//! and the tasks themselves. Every queued item gets a sequence number from one
//! monotonic counter, so ordering is fully reproducible.

use crate::clock::VirtualInstant;
use crate::error::WaitError;
use crate::event_loop::TaskRuntime;
use crate::handle::{Callback, CallbackCell, TimerHandle};
use crate::registry::TimerRegistry;
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    future::Future,
    mem,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll, RawWaker, RawWakerVTable, Waker},
};
use tracing::trace;

/// An entry in the ready-queue.
enum Runnable {
    Callback(Rc<CallbackCell>),
    Poll(Rc<Task>),
}

struct ExecutorInner {
    /// FIFO queue of ready work.
    ready: VecDeque<Runnable>,
    /// Callbacks waiting for a virtual instant.
    timers: TimerRegistry,
    /// Registration counter shared by ready callbacks and timers.
    next_seq: u64,
    next_task_id: u64,
}

impl ExecutorInner {
    fn alloc_seq(&mut self) -> u64 {
        let s = self.next_seq;
        self.next_seq += 1;
        s
    }

    fn push_callback(&mut self, callback: Callback) -> TimerHandle {
        let seq = self.alloc_seq();
        let cell = CallbackCell::new(callback, None, seq);
        self.ready.push_back(Runnable::Callback(cell.clone()));
        TimerHandle(cell)
    }
}

/// A spawned unit of work.
pub struct Task {
    id: u64,
    /// The future being executed. `None` once finished or cancelled.
    fut: RefCell<Option<Pin<Box<dyn Future<Output = ()>>>>>,
    /// Whether this task is currently in the ready queue.
    scheduled: Cell<bool>,
    /// Whether this task has completed and should not be polled again.
    completed: Cell<bool>,
    /// Set when cancellation arrives while the task is being polled.
    cancel_requested: Cell<bool>,
    exec: Weak<RefCell<ExecutorInner>>,
}

impl Task {
    /// Poll the task once. Returns false if it was already finished.
    fn poll(self: &Rc<Self>) -> bool {
        self.scheduled.set(false);

        // Skip completed tasks (stale wakers might have re-added them)
        if self.completed.get() {
            return false;
        }

        let waker = task_waker(self);
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.fut.borrow_mut();
        let Some(fut) = slot.as_mut() else {
            return false;
        };
        let done = fut.as_mut().poll(&mut cx).is_ready();

        if done || self.cancel_requested.get() {
            self.completed.set(true);
            let finished = slot.take();
            drop(slot);
            drop(finished);
        }
        true
    }

    /// Mark the task finished and drop its future, unless it is mid-poll.
    fn cancel(&self) {
        if self.completed.replace(true) {
            return;
        }
        let fut = match self.fut.try_borrow_mut() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                self.cancel_requested.set(true);
                None
            }
        };
        drop(fut);
    }
}

/// Shared completion state between a task and its `JoinHandle`.
struct JoinState<T> {
    result: Option<Result<T, WaitError>>,
    finished: bool,
    waker: Option<Waker>,
    done_callbacks: Vec<Callback>,
}

impl<T> JoinState<T> {
    fn new() -> Self {
        Self {
            result: None,
            finished: false,
            waker: None,
            done_callbacks: Vec::new(),
        }
    }

    /// Record the result, schedule done callbacks, then wake the awaiter.
    fn finish(
        state: &Rc<RefCell<JoinState<T>>>,
        exec: &Weak<RefCell<ExecutorInner>>,
        result: Result<T, WaitError>,
    ) {
        let (waker, callbacks) = {
            let mut s = state.borrow_mut();
            if s.finished {
                return;
            }
            s.finished = true;
            s.result = Some(result);
            (s.waker.take(), mem::take(&mut s.done_callbacks))
        };

        if let Some(inner) = exec.upgrade() {
            let mut inner = inner.borrow_mut();
            for cb in callbacks {
                inner.push_callback(cb);
            }
        }
        if let Some(w) = waker {
            w.wake();
        }
    }
}

/// Handle to a spawned task. Awaiting it yields the task's output.
pub struct JoinHandle<T> {
    state: Rc<RefCell<JoinState<T>>>,
    task: Rc<Task>,
}

impl<T> JoinHandle<T> {
    pub fn id(&self) -> u64 {
        self.task.id
    }

    /// True once the task has completed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.state.borrow().finished
    }

    /// Cancel the task. Its future is dropped, which cancels any timers it
    /// registered. Awaiting the handle afterwards yields `WaitError::Cancelled`.
    pub fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        trace!(task = self.task.id, "JoinHandle::cancel");
        self.task.cancel();
        JoinState::finish(&self.state, &self.task.exec, Err(WaitError::Cancelled));
    }

    /// Run `f` through the ready-queue once the task finishes.
    /// If it already has, `f` is queued immediately.
    pub fn add_done_callback<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        let mut s = self.state.borrow_mut();
        if !s.finished {
            s.done_callbacks.push(Box::new(f));
            return;
        }
        drop(s);
        if let Some(inner) = self.task.exec.upgrade() {
            inner.borrow_mut().push_callback(Box::new(f));
        }
    }

    /// Take the result if the task has finished.
    pub(crate) fn take_result(&self) -> Option<Result<T, WaitError>> {
        self.state.borrow_mut().result.take()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut s = self.state.borrow_mut();
        if let Some(result) = s.result.take() {
            return Poll::Ready(result);
        }
        s.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Single-threaded deterministic executor.
#[derive(Clone)]
pub struct Executor {
    inner: Rc<RefCell<ExecutorInner>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// Create a new executor.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ExecutorInner {
                ready: VecDeque::new(),
                timers: TimerRegistry::new(),
                next_seq: 0,
                next_task_id: 0,
            })),
        }
    }

    /// Spawn a new task. Its first poll is queued behind current ready work.
    pub fn spawn<T: 'static>(&self, fut: impl Future<Output = T> + 'static) -> JoinHandle<T> {
        let state = Rc::new(RefCell::new(JoinState::new()));
        let exec = Rc::downgrade(&self.inner);

        let s = state.clone();
        let e = exec.clone();
        let wrapped = async move {
            let out = fut.await;
            JoinState::finish(&s, &e, Ok(out));
        };

        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_task_id;
            inner.next_task_id += 1;
            id
        };

        let task = Rc::new(Task {
            id,
            fut: RefCell::new(Some(Box::pin(wrapped))),
            scheduled: Cell::new(false),
            completed: Cell::new(false),
            cancel_requested: Cell::new(false),
            exec,
        });
        trace!(task = id, "Executor::spawn");
        self.enqueue(&task);

        JoinHandle { state, task }
    }

    /// Enqueue a task if not already scheduled and not completed.
    fn enqueue(&self, task: &Rc<Task>) {
        if task.completed.get() {
            return;
        }
        if task.scheduled.replace(true) {
            return; // Already queued
        }
        self.inner
            .borrow_mut()
            .ready
            .push_back(Runnable::Poll(task.clone()));
    }

    /// Number of entries in the ready-queue, including cancelled ones not yet reached.
    pub fn ready_len(&self) -> usize {
        self.inner.borrow().ready.len()
    }
}

impl TaskRuntime for Executor {
    fn call_soon(&self, callback: Callback) -> TimerHandle {
        self.inner.borrow_mut().push_callback(callback)
    }

    fn call_at(&self, when: VirtualInstant, callback: Callback) -> TimerHandle {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.alloc_seq();
        let cell = CallbackCell::new(callback, Some(when), seq);
        inner.timers.insert(when, cell.clone());
        TimerHandle(cell)
    }

    fn promote_due(&self, now: VirtualInstant) -> usize {
        let mut inner = self.inner.borrow_mut();
        let due = inner.timers.pop_due(now);
        let n = due.len();
        inner.ready.extend(due.into_iter().map(Runnable::Callback));
        n
    }

    /// Run the entries that were ready when the batch began. Work queued during
    /// the batch waits for the next one.
    fn run_ready_batch(&self) -> usize {
        let n = self.inner.borrow().ready.len();
        let mut ran = 0;
        for _ in 0..n {
            let item = self.inner.borrow_mut().ready.pop_front();
            let Some(item) = item else {
                break;
            };
            let did_run = match item {
                Runnable::Callback(cell) => cell.run(),
                Runnable::Poll(task) => task.poll(),
            };
            if did_run {
                ran += 1;
            }
        }
        ran
    }

    fn has_ready(&self) -> bool {
        !self.inner.borrow().ready.is_empty()
    }

    fn pending_timers(&self) -> usize {
        self.inner.borrow().timers.live_len()
    }

    fn has_pending_timers(&self) -> bool {
        self.inner.borrow_mut().timers.peek_deadline().is_some()
    }

    fn clear(&self) {
        let drained: Vec<Runnable> = {
            let mut inner = self.inner.borrow_mut();
            inner.timers.clear();
            inner.ready.drain(..).collect()
        };
        for item in drained {
            match item {
                Runnable::Callback(cell) => cell.cancel(),
                Runnable::Poll(task) => task.scheduled.set(false),
            }
        }
    }
}

// --- Waker implementation ---

fn task_waker(task: &Rc<Task>) -> Waker {
    /// Clone the waker data.
    unsafe fn clone_fn(data: *const ()) -> RawWaker {
        let task = Rc::<Task>::from_raw(data as *const Task);
        let cloned = task.clone();
        std::mem::forget(task);
        RawWaker::new(Rc::into_raw(cloned) as *const (), &VTABLE)
    }

    /// Wake the task and consume the waker.
    unsafe fn wake_fn(data: *const ()) {
        wake_by_ref_fn(data);
        drop_fn(data);
    }

    /// Wake the task without consuming the waker.
    unsafe fn wake_by_ref_fn(data: *const ()) {
        let task = Rc::<Task>::from_raw(data as *const Task);
        if !task.completed.get() {
            if let Some(exec) = task.exec.upgrade() {
                if !task.scheduled.replace(true) {
                    exec.borrow_mut().ready.push_back(Runnable::Poll(task.clone()));
                }
            }
        }
        std::mem::forget(task);
    }

    /// Drop the waker.
    unsafe fn drop_fn(data: *const ()) {
        drop(Rc::<Task>::from_raw(data as *const Task));
    }

    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_fn, wake_fn, wake_by_ref_fn, drop_fn);

    let raw = RawWaker::new(Rc::into_raw(task.clone()) as *const (), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}
