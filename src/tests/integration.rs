//! Integration tests for the blocking protocols: suspend/resume, timed
//! sleep, cooperative termination and join.

use core::cell::Cell;
use std::boxed::Box;
use std::vec::Vec;

use super::helpers::*;
use crate::thread::{Message, ThreadState};
use crate::time::{Duration, Instant};
use crate::{ThreadReference, MSG_TIMEOUT};

#[test]
fn suspend_resume_round_trip() {
    let kernel = test_kernel();
    let main = spawn_main(kernel);
    let cell: &ThreadReference = Box::leak(Box::new(ThreadReference::new()));

    kernel.scheduler().defer(Box::new(move |cs| {
        assert_eq!(main.state(cs), ThreadState::Suspended);
        assert!(!cell.is_empty(cs));
        kernel.resume_i(cs, cell, 7);
        assert!(cell.is_empty(cs));
    }));

    let msg = kernel.suspend(cell);
    assert_eq!(msg, 7);

    critical_section::with(|cs| {
        assert_eq!(main.state(cs), ThreadState::Running);
        assert!(cell.is_empty(cs));
    });
    // Exactly one wakeup was delivered.
    assert_eq!(kernel.scheduler().woken_threads(), std::vec![main]);
}

#[test]
fn resume_on_empty_cell_is_a_no_op() {
    let kernel = test_kernel();
    let _main = spawn_main(kernel);
    let cell = Box::leak(Box::new(ThreadReference::new()));

    kernel.resume(cell, 1);
    assert!(kernel.scheduler().woken_threads().is_empty());
    // Nothing was woken, so no reschedule check was needed.
    assert_eq!(kernel.scheduler().reschedule_count(), 0);
}

#[test]
fn resume_i_does_not_reschedule() {
    let kernel = test_kernel();
    let _main = spawn_main(kernel);
    let cell: &ThreadReference = Box::leak(Box::new(ThreadReference::new()));

    kernel.scheduler().defer(Box::new(move |cs| {
        kernel.resume_i(cs, cell, 3);
    }));
    assert_eq!(kernel.suspend(cell), 3);

    assert_eq!(kernel.scheduler().reschedule_count(), 0);
}

#[test]
fn sleep_wakes_exactly_at_deadline() {
    let kernel = test_kernel();
    let main = spawn_main(kernel);

    kernel.scheduler().defer(Box::new(move |cs| {
        for elapsed in 0..10 {
            // Not ready anywhere in (T, T+10).
            assert_eq!(
                main.state(cs),
                ThreadState::SleepingTimed,
                "thread woke early after {} ticks",
                elapsed
            );
            kernel.tick_i(cs);
        }
        assert_eq!(main.state(cs), ThreadState::Ready);
    }));

    kernel.sleep(Duration::from_ticks(10));

    assert_eq!(kernel.now(), Instant::from_ticks(10));
    // Woken exactly once, with a timeout wake reason.
    assert_eq!(kernel.scheduler().woken_threads(), std::vec![main]);
    critical_section::with(|cs| {
        assert_eq!(main.state(cs), ThreadState::Running);
        assert_eq!(main.tcb().wake_payload(cs), MSG_TIMEOUT);
    });
}

#[test]
fn termination_is_cooperative() {
    let kernel = test_kernel();
    let main = spawn_main(kernel);

    assert!(!kernel.should_terminate());
    kernel.request_termination(main);
    assert!(kernel.should_terminate());

    // The flag stops nothing by itself; the thread is still running.
    critical_section::with(|cs| assert_eq!(main.state(cs), ThreadState::Running));
}

#[test]
fn exit_then_wait_returns_exit_code() {
    let kernel = test_kernel();
    let _main = spawn_current(kernel, 5);

    // Thread B at priority 3, entry would exit(42) immediately.
    let thread_b = kernel.create_static(leak_area(), 3, noop_entry, core::ptr::null_mut());
    critical_section::with(|cs| assert_eq!(thread_b.state(cs), ThreadState::AwaitingStart));
    assert!(!kernel.scheduler().ready_contains(thread_b));

    kernel.start(thread_b);
    assert!(kernel.scheduler().ready_contains(thread_b));

    kernel.scheduler().defer(Box::new(move |cs| {
        run_ready_thread(kernel, cs, thread_b, |cs| kernel.exit_s(cs, 42));
        assert_eq!(thread_b.state(cs), ThreadState::Final);
    }));

    let code = kernel.wait(thread_b);
    assert_eq!(code, 42);
    critical_section::with(|cs| {
        assert_eq!(thread_b.state(cs), ThreadState::Final);
        assert!(thread_b.tcb().waiters.is_empty(cs));
    });
    // Everyone is either running or terminated; nothing left enqueued.
    assert_eq!(kernel.scheduler().ready_len(), 0);
}

#[test]
fn wait_on_already_terminated_thread_does_not_block() {
    let kernel = test_kernel();
    let _main = spawn_main(kernel);

    let thread = kernel.create_static(leak_area(), 10, noop_entry, core::ptr::null_mut());
    kernel.start(thread);
    critical_section::with(|cs| {
        run_ready_thread(kernel, cs, thread, |cs| kernel.exit_s(cs, 17));
    });

    let sleeps_before = kernel.scheduler().sleep_states().len();
    let code = kernel.wait(thread);
    assert_eq!(code, 17);
    // No WaitingExit transition happened.
    assert_eq!(kernel.scheduler().sleep_states().len(), sleeps_before);
}

#[test]
fn exit_wakes_all_waiters_in_fifo_order_with_same_code() {
    let kernel = test_kernel();
    let _main = spawn_main(kernel);

    let target = kernel.create_static(leak_area(), 10, noop_entry, core::ptr::null_mut());
    let waiter_a = kernel.create_static(leak_area(), 20, noop_entry, core::ptr::null_mut());
    let waiter_b = kernel.create_static(leak_area(), 30, noop_entry, core::ptr::null_mut());
    kernel.start(target);
    kernel.start(waiter_a);
    kernel.start(waiter_b);

    let codes: &'static Cell<(Option<Message>, Option<Message>)> =
        Box::leak(Box::new(Cell::new((None, None))));

    // While main sleeps: A joins the target, then (while A blocks) B joins,
    // then (while B blocks) the target exits, waking both.
    kernel.scheduler().defer(Box::new(move |cs| {
        run_ready_thread(kernel, cs, waiter_a, |cs| {
            let code = kernel.wait_s(cs, target);
            codes.set((Some(code), codes.get().1));
        });
    }));
    kernel.scheduler().defer(Box::new(move |cs| {
        run_ready_thread(kernel, cs, waiter_b, |cs| {
            let code = kernel.wait_s(cs, target);
            codes.set((codes.get().0, Some(code)));
        });
    }));
    kernel.scheduler().defer(Box::new(move |cs| {
        run_ready_thread(kernel, cs, target, |cs| kernel.exit_s(cs, 99));
    }));
    kernel.scheduler().defer(Box::new(move |cs| {
        kernel.tick_i(cs);
    }));

    kernel.sleep(Duration::from_ticks(1));

    // Both waiters read the same exit code, exactly once each.
    assert_eq!(codes.get(), (Some(99), Some(99)));

    // FIFO arrival order: the exit woke A before B (their start-time
    // enqueues come earlier in the log, so compare the last occurrences).
    let woken: Vec<_> = kernel.scheduler().woken_threads();
    let pos_a = woken.iter().rposition(|t| *t == waiter_a).unwrap();
    let pos_b = woken.iter().rposition(|t| *t == waiter_b).unwrap();
    assert!(pos_a < pos_b, "waiters not woken in arrival order");

    critical_section::with(|cs| {
        assert_eq!(target.state(cs), ThreadState::Final);
        assert!(target.tcb().waiters.is_empty(cs));
    });
}

#[test]
#[should_panic(expected = "waiting on self")]
fn wait_on_self_is_fatal() {
    let kernel = test_kernel();
    let main = spawn_main(kernel);
    kernel.wait(main);
}

#[test]
#[should_panic(expected = "exit code read before termination")]
fn exit_code_before_termination_is_fatal() {
    let kernel = test_kernel();
    let _main = spawn_main(kernel);
    let thread = kernel.create_static(leak_area(), 10, noop_entry, core::ptr::null_mut());
    critical_section::with(|cs| {
        let _ = thread.exit_code(cs);
    });
}

#[test]
fn yield_defers_to_the_scheduler() {
    let kernel = test_kernel();
    let _main = spawn_main(kernel);

    kernel.yield_now();
    kernel.yield_now();
    assert_eq!(kernel.scheduler().yield_count(), 2);
}

#[test]
fn exit_hook_observes_exit_code() {
    use crate::{Kernel, KernelConfig};
    use portable_atomic::{AtomicIsize, Ordering};

    static LAST_EXIT: AtomicIsize = AtomicIsize::new(0);
    fn record_exit(thread: crate::ThreadRef) {
        critical_section::with(|cs| {
            LAST_EXIT.store(thread.tcb().wake_payload(cs), Ordering::Release);
        });
    }

    let kernel = Box::leak(Box::new(Kernel::with_config(
        TestScheduler::new(),
        1_000,
        KernelConfig {
            init_hook: None,
            exit_hook: Some(record_exit),
        },
    )));
    kernel.init().unwrap();
    let _main = spawn_main(kernel);

    let thread = kernel.create_static(leak_area(), 10, noop_entry, core::ptr::null_mut());
    kernel.start(thread);
    critical_section::with(|cs| {
        run_ready_thread(kernel, cs, thread, |cs| kernel.exit_s(cs, 55));
    });
    assert_eq!(LAST_EXIT.load(Ordering::Acquire), 55);
}

#[cfg(feature = "dynamic")]
mod dynamic {
    use super::*;
    use crate::{working_area_size, SpawnError, ThreadPool, WorkingArea};

    const POOL_WA: usize = working_area_size(1024);

    #[test]
    fn pool_threads_return_their_area_on_release() {
        static STORAGE: [WorkingArea<POOL_WA>; 1] = [WorkingArea::new()];
        static POOL: ThreadPool = ThreadPool::new(POOL_WA);

        let kernel = test_kernel();
        let _main = spawn_main(kernel);
        POOL.load(&STORAGE);

        let thread = kernel
            .spawn_pool(&POOL, 10, noop_entry, core::ptr::null_mut())
            .unwrap();
        critical_section::with(|cs| assert_eq!(thread.ref_count(cs), 1));
        assert_eq!(POOL.stats().1, 1);

        // Pool is now empty.
        assert_eq!(
            kernel
                .spawn_pool(&POOL, 10, noop_entry, core::ptr::null_mut())
                .unwrap_err(),
            SpawnError::PoolExhausted
        );

        kernel.start(thread);
        kernel.scheduler().defer(Box::new(move |cs| {
            run_ready_thread(kernel, cs, thread, |cs| kernel.exit_s(cs, 0));
        }));
        let code = kernel.wait(thread);
        assert_eq!(code, 0);

        // The working area went back to the pool and can be reused.
        assert_eq!(POOL.stats().1, 0);
        assert!(kernel
            .spawn_pool(&POOL, 10, noop_entry, core::ptr::null_mut())
            .is_ok());
    }

    #[test]
    fn heap_thread_lives_until_last_reference() {
        let kernel = test_kernel();
        let _main = spawn_main(kernel);

        let thread = kernel
            .spawn_heap(POOL_WA, 10, noop_entry, core::ptr::null_mut())
            .unwrap();
        kernel.start(thread);

        // A second owner keeps the TCB alive across the join.
        kernel.add_reference(thread);
        critical_section::with(|cs| assert_eq!(thread.ref_count(cs), 2));

        kernel.scheduler().defer(Box::new(move |cs| {
            run_ready_thread(kernel, cs, thread, |cs| kernel.exit_s(cs, 8));
        }));
        assert_eq!(kernel.wait(thread), 8);

        // Still alive: the registry entry and exit code remain readable.
        critical_section::with(|cs| {
            assert_eq!(thread.ref_count(cs), 1);
            assert_eq!(thread.exit_code(cs), 8);
            assert_eq!(kernel.registry().len(cs), 2);
        });

        kernel.release(thread);
        critical_section::with(|cs| assert_eq!(kernel.registry().len(cs), 1));
    }

    #[test]
    fn dynamic_thread_stays_registered_until_release() {
        let kernel = test_kernel();
        let _main = spawn_main(kernel);

        let thread = kernel
            .spawn_heap(POOL_WA, 10, noop_entry, core::ptr::null_mut())
            .unwrap();
        kernel.start(thread);
        kernel.add_reference(thread);

        critical_section::with(|cs| {
            run_ready_thread(kernel, cs, thread, |cs| kernel.exit_s(cs, 0));
            // Unlike a static thread, still registered after exit.
            assert_eq!(kernel.registry().len(cs), 2);
        });

        assert_eq!(kernel.wait(thread), 0);
        kernel.release(thread);
        critical_section::with(|cs| assert_eq!(kernel.registry().len(cs), 1));
    }
}
