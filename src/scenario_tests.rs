//! Virtual-Time Ordering Test Suite
//!
//! End-to-end scenarios that drive real async workflows (sleeps, spawned
//! tasks, done callbacks, timeouts) through the runtime and check that the
//! observed order matches what a real clock would produce.

#[cfg(test)]
mod tests {
    use crate::clock::VirtualInstant;
    use crate::engine::Runtime;
    use crate::error::{SchedulerError, WaitError};
    use crate::event_loop::{StepOutcome, VirtualScheduler};
    use crate::time::{sleep, wait_for, yield_now};
    use futures::future::join_all;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SLEEP_TIME: f64 = 4096.0;
    const FANOUT_SLEEP: f64 = 3072.0;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    type Log = Rc<RefCell<Vec<u32>>>;

    fn push(log: &Log, marker: u32) {
        log.borrow_mut().push(marker);
    }

    /// Five sequential sleeps of SLEEP_TIME each.
    async fn sequential_sleeps(sched: Rc<dyn VirtualScheduler>) {
        for _ in 0..5 {
            sleep(&sched, SLEEP_TIME).await;
        }
    }

    // ==================== TEST CASES ====================

    /// Test: timeout boundary
    /// 5 x 4096 = 20480 units of work fits a budget of 20481 but not 20479.
    #[test]
    fn test_timeout_boundary() {
        init_tracing();
        let rt = Runtime::default();
        let sched = rt.scheduler();
        let total = SLEEP_TIME * 5.0;

        let ok = rt
            .run_until_complete(wait_for(
                &sched,
                sequential_sleeps(sched.clone()),
                Some(total + 1.0),
            ))
            .unwrap();
        assert_eq!(ok, Ok(()));
        assert_eq!(rt.now(), VirtualInstant::new(total));

        // Again on the same loop: the budget is relative to the current time.
        let ok = rt
            .run_until_complete(wait_for(
                &sched,
                sequential_sleeps(sched.clone()),
                Some(total + 1.0),
            ))
            .unwrap();
        assert_eq!(ok, Ok(()));

        let start = rt.now();
        let timed_out = rt
            .run_until_complete(wait_for(
                &sched,
                sequential_sleeps(sched.clone()),
                Some(total - 1.0),
            ))
            .unwrap();
        assert_eq!(
            timed_out,
            Err(WaitError::TimeoutExceeded {
                budget: total - 1.0
            })
        );
        assert_eq!(rt.now(), start + (total - 1.0));
    }

    /// Test: same-instant fan-out ordering
    /// Four concurrent sleeps of 3, 1, 4, 2 units finish in ascending order.
    #[test]
    fn test_concurrent_sleep_ordering() {
        init_tracing();
        let rt = Runtime::default();
        let sched = rt.scheduler();
        let log: Log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        let s = sched.clone();
        let ex = rt.executor().clone();
        let inner = async move {
            push(&l, 0);

            let mut tasks = Vec::new();
            for (index, multiple) in [(1, 3.0), (2, 1.0), (3, 4.0), (4, 2.0)] {
                let task = s.clone();
                let handle = ex.spawn(async move {
                    sleep(&task, FANOUT_SLEEP * multiple).await;
                });
                let l = l.clone();
                handle.add_done_callback(move || push(&l, index));
                tasks.push(handle);
            }

            for result in join_all(tasks).await {
                assert_eq!(result, Ok(()));
            }
        };

        let out = rt
            .run_until_complete(wait_for(&sched, inner, Some(FANOUT_SLEEP * 4.0 + 1.0)))
            .unwrap();
        assert_eq!(out, Ok(()));
        assert_eq!(*log.borrow(), vec![0, 2, 4, 1, 3]);
    }

    /// Test: nested dependencies
    /// A parent awaits a child that spawns side-delays and grandchildren.
    /// Markers come out in logical-step order even where branches share instants.
    #[test]
    fn test_nested_dependency_ordering() {
        init_tracing();
        let rt = Runtime::default();
        let sched = rt.scheduler();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let times = Rc::new(RefCell::new(Vec::new()));

        let mark = {
            let log = log.clone();
            let times = times.clone();
            let sched = sched.clone();
            Rc::new(move |marker: u32| {
                push(&log, marker);
                times.borrow_mut().push(sched.now().as_f64());
            })
        };

        let child = {
            let mark = mark.clone();
            let s = sched.clone();
            let ex = rt.executor().clone();
            async move {
                mark(1);

                // Side delay: fires at t=3, sharing that instant with g2's first sleep.
                let (m, t) = (mark.clone(), s.clone());
                let _side = ex.spawn(async move {
                    sleep(&t, 3.0).await;
                    m(3);
                });

                let (m, t) = (mark.clone(), s.clone());
                let g1 = ex.spawn(async move {
                    sleep(&t, 1.0).await;
                    m(2);
                    sleep(&t, 4.0).await;
                    m(5);
                });

                let (m, t) = (mark.clone(), s.clone());
                let g2 = ex.spawn(async move {
                    sleep(&t, 3.0).await;
                    sleep(&t, 1.0).await;
                    m(4);
                });

                g1.await.unwrap();
                // Same instant as marker 5, ordered after it by the dependency.
                mark(6);
                g2.await.unwrap();

                sleep(&s, 2.0).await;
                mark(7);

                let (m, t) = (mark.clone(), s.clone());
                let g3 = ex.spawn(async move {
                    sleep(&t, 1.0).await;
                    m(8);
                });
                g3.await.unwrap();
            }
        };

        let m = mark.clone();
        let ex = rt.executor().clone();
        rt.run_until_complete(async move {
            m(0);
            ex.spawn(child).await.unwrap();
            m(9);
        })
        .unwrap();

        assert_eq!(*log.borrow(), (0..10).collect::<Vec<u32>>());
        assert_eq!(
            *times.borrow(),
            vec![0.0, 0.0, 1.0, 3.0, 4.0, 5.0, 5.0, 7.0, 8.0, 8.0]
        );
    }

    /// Test: drain before advance
    /// Work queued at t=0 by a t=0 callback runs before the clock moves.
    #[test]
    fn test_drain_before_advance() {
        init_tracing();
        let rt = Runtime::default();
        let sched = rt.scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        sched.call_later(
            1.0,
            Box::new(move || l.borrow_mut().push("later")),
        );

        let l = log.clone();
        let s = sched.clone();
        sched.schedule_at(
            VirtualInstant::ZERO,
            Box::new(move || {
                l.borrow_mut().push("a");
                let l2 = l.clone();
                let s2 = s.clone();
                s.schedule_at(
                    VirtualInstant::ZERO,
                    Box::new(move || {
                        assert_eq!(s2.now(), VirtualInstant::ZERO);
                        l2.borrow_mut().push("b");
                    }),
                );
                let l3 = l.clone();
                s.call_soon(Box::new(move || l3.borrow_mut().push("soon")));
            }),
        );

        rt.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec!["a", "soon", "b", "later"]);
        assert_eq!(rt.now(), VirtualInstant::new(1.0));
    }

    /// Test: manual advance from inside a task
    /// A sleeper whose deadline is jumped over wakes at the advanced time,
    /// before the clock reaches any later instant.
    #[test]
    fn test_advance_time_inside_task() {
        init_tracing();
        let rt = Runtime::default();
        let sched = rt.scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));

        let s = sched.clone();
        let l = log.clone();
        let ex = rt.executor().clone();
        rt.run_until_complete(async move {
            let (t, l2) = (s.clone(), l.clone());
            let sleeper = ex.spawn(async move {
                sleep(&t, 5.0).await;
                l2.borrow_mut().push(("sleeper", t.now().as_f64()));
            });
            // Let the sleeper register its timer at t=5.
            yield_now(&s).await;

            s.advance_time(10.0);
            sleep(&s, 10.0).await;
            l.borrow_mut().push(("root", s.now().as_f64()));
            sleeper.await.unwrap();
        })
        .unwrap();

        assert_eq!(*log.borrow(), vec![("sleeper", 10.0), ("root", 20.0)]);
        assert_eq!(rt.now(), VirtualInstant::new(20.0));
    }

    /// Test: idempotent cancellation
    #[test]
    fn test_cancel_before_fire() {
        init_tracing();
        let rt = Runtime::default();
        let sched = rt.scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        let doomed = sched.call_later(10.0, Box::new(move || l.borrow_mut().push("doomed")));
        let l = log.clone();
        sched.call_later(10.0, Box::new(move || l.borrow_mut().push("kept")));

        doomed.cancel();
        doomed.cancel();
        rt.advance_time(20.0);
        rt.run_until_idle().unwrap();
        doomed.cancel();

        assert_eq!(*log.borrow(), vec!["kept"]);
        assert!(doomed.is_cancelled());
    }

    /// Test: cancelling a task cancels the timers it was waiting on.
    #[test]
    fn test_cancel_task_mid_sleep() {
        init_tracing();
        let rt = Runtime::default();
        let sched = rt.scheduler();
        let log: Log = Rc::new(RefCell::new(Vec::new()));

        let s = sched.clone();
        let l = log.clone();
        let ex = rt.executor().clone();
        let out = rt
            .run_until_complete(async move {
                let (t, l2) = (s.clone(), l.clone());
                let sleeper = ex.spawn(async move {
                    sleep(&t, 100.0).await;
                    push(&l2, 1);
                });
                sleep(&s, 10.0).await;
                sleeper.cancel();
                push(&l, 0);
                sleeper.await
            })
            .unwrap();

        assert_eq!(out, Err(WaitError::Cancelled));
        rt.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec![0]);
    }

    /// Test: a task awaiting work that never completes is a stall, not a hang.
    #[test]
    fn test_stalled_run() {
        init_tracing();
        let rt = Runtime::default();
        let sched = rt.scheduler();

        let s = sched.clone();
        let err = rt
            .run_until_complete(async move {
                sleep(&s, 5.0).await;
                futures::future::pending::<()>().await;
            })
            .unwrap_err();
        assert_eq!(
            err,
            SchedulerError::Stalled {
                now: VirtualInstant::new(5.0)
            }
        );
    }

    /// Test: step-level view of a single sleep.
    #[test]
    fn test_step_outcomes() {
        init_tracing();
        let rt = Runtime::default();
        let lp = rt.event_loop().clone();
        rt.spawn(rt.sleep(7.0));

        // Poll the task: registers the timer, queue drains, clock jumps.
        assert_eq!(
            lp.run_once().unwrap(),
            StepOutcome::Advanced {
                to: VirtualInstant::new(7.0),
                ran: 1
            }
        );
        // Timer fires and wakes the task.
        assert_eq!(lp.run_once().unwrap(), StepOutcome::Busy { ran: 1 });
        // Task completes.
        assert_eq!(lp.run_once().unwrap(), StepOutcome::Idle { ran: 1 });
        assert!(lp.is_idle());
    }

    proptest! {
        /// Sleepers with arbitrary delays finish in (delay, spawn order) order,
        /// each observing its own deadline, and the clock never moves backward.
        #[test]
        fn prop_sleepers_finish_in_deadline_order(delays in proptest::collection::vec(0u8..20, 1..24)) {
            let rt = Runtime::default();
            let sched = rt.scheduler();
            let log = Rc::new(RefCell::new(Vec::new()));

            for (i, d) in delays.iter().enumerate() {
                let s = sched.clone();
                let l = log.clone();
                let delay = *d as f64 + 1.0;
                rt.spawn(async move {
                    sleep(&s, delay).await;
                    l.borrow_mut().push((s.now().as_f64(), i));
                });
            }

            let mut last = rt.now();
            while !rt.event_loop().is_idle() {
                if let StepOutcome::Advanced { to, .. } = rt.event_loop().run_once().unwrap() {
                    prop_assert!(to >= last);
                    last = to;
                }
            }

            let mut expected: Vec<(f64, usize)> = delays
                .iter()
                .enumerate()
                .map(|(i, d)| (*d as f64 + 1.0, i))
                .collect();
            expected.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            prop_assert_eq!(log.borrow().clone(), expected);
        }
    }
}
