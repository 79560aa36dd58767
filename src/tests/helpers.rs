//! Shared test harness.
//!
//! The harness runs the lifecycle API on the host with a scripted
//! scheduler: instead of context switching, [`TestScheduler::go_to_sleep`]
//! drains a queue of deferred actions — "what the other threads do while
//! the caller is blocked" — and then expects the sleeping thread to have
//! been made ready again. This lets a single host thread exercise
//! block/wake protocols end to end.

use core::cell::{Cell, RefCell};
use critical_section::{CriticalSection, Mutex};
use std::boxed::Box;
use std::collections::VecDeque;
use std::vec::Vec;

use crate::sched::{priority, Scheduler};
use crate::thread::{Message, Priority, ThreadRef, ThreadState};
use crate::{working_area_size, Kernel, WorkingArea};

/// Working area size used by harness threads.
pub(crate) const TEST_WA_SIZE: usize = working_area_size(1024);

/// Deferred action run while some thread is parked.
pub(crate) type Action = Box<dyn FnOnce(CriticalSection<'_>)>;

/// Scripted scheduler for host tests.
pub(crate) struct TestScheduler {
    current: Mutex<Cell<Option<ThreadRef>>>,
    ready: Mutex<RefCell<VecDeque<ThreadRef>>>,
    pending: Mutex<RefCell<VecDeque<Action>>>,
    /// Every state passed to `go_to_sleep`, in order
    sleeps: Mutex<RefCell<Vec<ThreadState>>>,
    /// Every thread passed to `ready_i`, in order
    wake_log: Mutex<RefCell<Vec<ThreadRef>>>,
    reschedules: Mutex<Cell<usize>>,
    yields: Mutex<Cell<usize>>,
}

// Test-only: the critical section serializes all access.
unsafe impl Send for TestScheduler {}
unsafe impl Sync for TestScheduler {}

impl TestScheduler {
    pub(crate) fn new() -> Self {
        Self {
            current: Mutex::new(Cell::new(None)),
            ready: Mutex::new(RefCell::new(VecDeque::new())),
            pending: Mutex::new(RefCell::new(VecDeque::new())),
            sleeps: Mutex::new(RefCell::new(Vec::new())),
            wake_log: Mutex::new(RefCell::new(Vec::new())),
            reschedules: Mutex::new(Cell::new(0)),
            yields: Mutex::new(Cell::new(0)),
        }
    }

    /// Queue an action to run at the next (possibly nested) sleep.
    pub(crate) fn defer(&self, action: Action) {
        critical_section::with(|cs| {
            self.pending.borrow(cs).borrow_mut().push_back(action);
        })
    }

    /// Install a freshly created thread as the running one without going
    /// through the ready queue, so the wake log only records real wakeups.
    pub(crate) fn adopt(&self, cs: CriticalSection<'_>, thread: ThreadRef) {
        thread.set_state(cs, ThreadState::Ready);
        thread.set_state(cs, ThreadState::Running);
        self.current.borrow(cs).set(Some(thread));
    }

    /// Make a ready thread the running one.
    pub(crate) fn dispatch(&self, cs: CriticalSection<'_>, thread: ThreadRef) {
        let ready = self.ready.borrow(cs);
        let pos = ready
            .borrow()
            .iter()
            .position(|t| *t == thread)
            .expect("dispatching a thread that is not ready");
        ready.borrow_mut().remove(pos);
        thread.set_state(cs, ThreadState::Running);
        self.current.borrow(cs).set(Some(thread));
    }

    pub(crate) fn current_opt(&self, cs: CriticalSection<'_>) -> Option<ThreadRef> {
        self.current.borrow(cs).get()
    }

    pub(crate) fn set_current_opt(&self, cs: CriticalSection<'_>, thread: Option<ThreadRef>) {
        self.current.borrow(cs).set(thread);
    }

    pub(crate) fn ready_contains(&self, thread: ThreadRef) -> bool {
        critical_section::with(|cs| self.ready.borrow(cs).borrow().contains(&thread))
    }

    pub(crate) fn ready_len(&self) -> usize {
        critical_section::with(|cs| self.ready.borrow(cs).borrow().len())
    }

    pub(crate) fn sleep_states(&self) -> Vec<ThreadState> {
        critical_section::with(|cs| self.sleeps.borrow(cs).borrow().clone())
    }

    pub(crate) fn woken_threads(&self) -> Vec<ThreadRef> {
        critical_section::with(|cs| self.wake_log.borrow(cs).borrow().clone())
    }

    pub(crate) fn reschedule_count(&self) -> usize {
        critical_section::with(|cs| self.reschedules.borrow(cs).get())
    }

    pub(crate) fn yield_count(&self) -> usize {
        critical_section::with(|cs| self.yields.borrow(cs).get())
    }

    fn drain_pending(&self, cs: CriticalSection<'_>) {
        loop {
            let action = self.pending.borrow(cs).borrow_mut().pop_front();
            match action {
                Some(action) => action(cs),
                None => break,
            }
        }
    }
}

impl Scheduler for TestScheduler {
    fn ready_i(&self, cs: CriticalSection<'_>, thread: ThreadRef) {
        thread.set_state(cs, ThreadState::Ready);
        self.ready.borrow(cs).borrow_mut().push_back(thread);
        self.wake_log.borrow(cs).borrow_mut().push(thread);
    }

    fn go_to_sleep(&self, cs: CriticalSection<'_>, new_state: ThreadState) {
        let current = self.current(cs);
        current.set_state(cs, new_state);
        self.sleeps.borrow(cs).borrow_mut().push(new_state);

        // "Run" the other threads.
        self.drain_pending(cs);

        if new_state == ThreadState::Final {
            // The terminated thread never runs again; the harness caller
            // restores whichever thread it was simulating.
            return;
        }

        assert_eq!(
            current.state(cs),
            ThreadState::Ready,
            "parked thread was never woken (simulated deadlock)"
        );
        let ready = self.ready.borrow(cs);
        let pos = ready.borrow().iter().position(|t| *t == current).unwrap();
        ready.borrow_mut().remove(pos);
        drop(ready);
        current.set_state(cs, ThreadState::Running);
        self.current.borrow(cs).set(Some(current));
    }

    fn reschedule(&self, cs: CriticalSection<'_>) {
        let count = self.reschedules.borrow(cs);
        count.set(count.get() + 1);
    }

    fn yield_now(&self, cs: CriticalSection<'_>) {
        let count = self.yields.borrow(cs);
        count.set(count.get() + 1);
    }

    fn current(&self, cs: CriticalSection<'_>) -> ThreadRef {
        self.current
            .borrow(cs)
            .get()
            .expect("no current thread in test scheduler")
    }
}

/// Create an initialized kernel driven by the scripted scheduler.
pub(crate) fn test_kernel() -> &'static Kernel<TestScheduler> {
    let kernel = Box::leak(Box::new(Kernel::new(TestScheduler::new(), 1_000)));
    kernel.init().expect("kernel already initialized");
    kernel
}

/// Leak a working area sized for harness threads.
pub(crate) fn leak_area() -> &'static WorkingArea<TEST_WA_SIZE> {
    Box::leak(Box::new(WorkingArea::new()))
}

/// Entry point for harness threads; never actually executed on the host.
pub(crate) fn noop_entry(_arg: *mut ()) -> Message {
    0
}

/// Create a thread and install it as the running one, simulating the
/// context the test body executes in.
pub(crate) fn spawn_current(
    kernel: &'static Kernel<TestScheduler>,
    prio: Priority,
) -> ThreadRef {
    let thread = kernel.create_static(leak_area(), prio, noop_entry, core::ptr::null_mut());
    critical_section::with(|cs| kernel.scheduler().adopt(cs, thread));
    thread
}

/// Create a thread and install it as current at normal priority.
pub(crate) fn spawn_main(kernel: &'static Kernel<TestScheduler>) -> ThreadRef {
    spawn_current(kernel, priority::NORMAL)
}

/// Temporarily run `body` as `thread` (which must be ready), restoring the
/// previous current thread afterwards.
pub(crate) fn run_ready_thread(
    kernel: &'static Kernel<TestScheduler>,
    cs: CriticalSection<'_>,
    thread: ThreadRef,
    body: impl FnOnce(CriticalSection<'_>),
) {
    let sched = kernel.scheduler();
    let previous = sched.current_opt(cs);
    sched.dispatch(cs, thread);
    body(cs);
    sched.set_current_opt(cs, previous);
}
