//! Kernel abstraction coordinating the thread lifecycle.
//!
//! [`Kernel`] is the explicit context object owning everything the
//! lifecycle API needs: the scheduler collaborator, the tick clock, the
//! timer queue and the thread registry. It is initialized once at boot and
//! never torn down.
//!
//! # API classes
//!
//! Public methods without a suffix are thread-class: they acquire the
//! critical section themselves and must not be called with it already held.
//! The `*_s` and `*_i` families take the [`CriticalSection`] token instead,
//! for composition by callers that already hold the guard; only the `*_i`
//! subset is additionally interrupt-safe (it never blocks and never
//! switches away from the calling context).

use critical_section::CriticalSection;
use portable_atomic::{AtomicBool, Ordering};

#[cfg(feature = "dynamic")]
use crate::errors::{SpawnError, SpawnResult};
#[cfg(feature = "dynamic")]
use crate::mem::ThreadPool;
use crate::mem::{self, StackSpan, WorkingArea};
use crate::port::{DefaultPort, Port};
use crate::sched::{priority, Scheduler};
#[cfg(feature = "registry")]
use crate::thread::registry::Registry;
use crate::thread::{
    AllocKind, EntryFn, Message, Priority, Tcb, ThreadFlags, ThreadRef, ThreadReference,
    ThreadState, MSG_TIMEOUT,
};
use crate::time::{Duration, Instant, TickCounter, TimerQueue};

/// Build-time kernel extension points.
pub struct KernelConfig {
    /// Called after each thread is fully initialized, before it is
    /// startable.
    pub init_hook: Option<fn(ThreadRef)>,
    /// Called at the start of each thread's exit path, while the exiting
    /// thread is still current.
    pub exit_hook: Option<fn(ThreadRef)>,
}

impl KernelConfig {
    /// Configuration with no hooks installed.
    pub const fn new() -> Self {
        Self {
            init_hook: None,
            exit_hook: None,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The thread-management core.
///
/// # Type Parameters
///
/// * `S` - Scheduler implementation
pub struct Kernel<S: Scheduler> {
    /// Scheduler collaborator; owns the ready queue and pick-next policy
    scheduler: S,
    /// System tick clock
    clock: TickCounter,
    /// Deadline queue backing the sleep primitives
    timers: TimerQueue,
    /// Introspection registry of live threads
    #[cfg(feature = "registry")]
    registry: Registry,
    config: KernelConfig,
    /// Whether the kernel has been initialized
    initialized: AtomicBool,
}

impl<S: Scheduler> Kernel<S> {
    /// Create a new kernel instance with default configuration.
    ///
    /// `tick_hz` is the frequency the port's timer interrupt will drive
    /// [`tick_i`](Kernel::tick_i) at.
    pub const fn new(scheduler: S, tick_hz: u32) -> Self {
        Self::with_config(scheduler, tick_hz, KernelConfig::new())
    }

    /// Create a new kernel instance with explicit configuration.
    pub const fn with_config(scheduler: S, tick_hz: u32, config: KernelConfig) -> Self {
        Self {
            scheduler,
            clock: TickCounter::new(tick_hz),
            timers: TimerQueue::new(),
            #[cfg(feature = "registry")]
            registry: Registry::new(),
            config,
            initialized: AtomicBool::new(false),
        }
    }

    /// Initialize the kernel.
    ///
    /// Must be called once, before any threading operation.
    ///
    /// # Returns
    ///
    /// `Ok(())` if initialization succeeds, `Err(())` if already initialized.
    pub fn init(&self) -> Result<(), ()> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Ok(())
        } else {
            Err(())
        }
    }

    /// Check if the kernel has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Get a reference to the scheduler.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Get the current system time.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Get the system tick clock.
    pub fn clock(&self) -> &TickCounter {
        &self.clock
    }

    /// Get the thread registry.
    #[cfg(feature = "registry")]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get the currently running thread.
    pub fn current(&self) -> ThreadRef {
        critical_section::with(|cs| self.scheduler.current(cs))
    }

    // ------------------------------------------------------------------
    // Creation and start
    // ------------------------------------------------------------------

    /// Create a thread in a caller-supplied static working area.
    ///
    /// The TCB is laid out in the low part of the area and the remainder
    /// becomes the execution stack; when first dispatched the thread begins
    /// at `entry(arg)`. The new thread is *not* enqueued for execution —
    /// it stays in `AwaitingStart` until [`start`](Kernel::start).
    ///
    /// An undersized or misaligned area and an out-of-range priority are
    /// contract violations, not recoverable errors.
    pub fn create_static<const N: usize>(
        &self,
        area: &'static WorkingArea<N>,
        priority: Priority,
        entry: EntryFn,
        arg: *mut (),
    ) -> ThreadRef {
        critical_section::with(|cs| self.create_static_i(cs, area, priority, entry, arg))
    }

    /// Already-locked variant of [`create_static`](Kernel::create_static).
    pub fn create_static_i<const N: usize>(
        &self,
        cs: CriticalSection<'_>,
        area: &'static WorkingArea<N>,
        priority: Priority,
        entry: EntryFn,
        arg: *mut (),
    ) -> ThreadRef {
        // The area reference guarantees liveness and exclusivity is the
        // caller's contract: one thread per working area.
        unsafe { self.create_raw(cs, area.base(), N, priority, entry, arg, AllocKind::Static) }
    }

    /// Create a thread in a working area from the global allocator.
    ///
    /// The thread stays in `AwaitingStart` until started. Its working area
    /// is returned to the allocator when the last reference is released
    /// after termination.
    #[cfg(feature = "dynamic")]
    pub fn spawn_heap(
        &self,
        wa_size: usize,
        priority: Priority,
        entry: EntryFn,
        arg: *mut (),
    ) -> SpawnResult<ThreadRef> {
        if !self.is_initialized() {
            return Err(SpawnError::NotInitialized);
        }
        kernel_check!(wa_size >= mem::min_working_area_size(), "working area too small");

        let layout = match core::alloc::Layout::from_size_align(wa_size, mem::WA_ALIGN) {
            Ok(layout) => layout,
            Err(_) => return Err(SpawnError::OutOfMemory),
        };
        let base = unsafe { alloc::alloc::alloc(layout) };
        if base.is_null() {
            return Err(SpawnError::OutOfMemory);
        }

        Ok(critical_section::with(|cs| unsafe {
            self.create_raw(cs, base, wa_size, priority, entry, arg, AllocKind::Heap)
        }))
    }

    /// Create a thread in a working area from a fixed-size pool.
    ///
    /// The thread stays in `AwaitingStart` until started. Its working area
    /// returns to `pool` when the last reference is released after
    /// termination.
    #[cfg(feature = "dynamic")]
    pub fn spawn_pool(
        &self,
        pool: &'static ThreadPool,
        priority: Priority,
        entry: EntryFn,
        arg: *mut (),
    ) -> SpawnResult<ThreadRef> {
        if !self.is_initialized() {
            return Err(SpawnError::NotInitialized);
        }

        let base = pool.acquire().ok_or(SpawnError::PoolExhausted)?;
        Ok(critical_section::with(|cs| unsafe {
            self.create_raw(
                cs,
                base,
                pool.area_size(),
                priority,
                entry,
                arg,
                AllocKind::Pool(pool),
            )
        }))
    }

    /// Carve a TCB and stack out of a raw working area and initialize every
    /// field.
    ///
    /// # Safety
    ///
    /// `base..base + size` must be a live, exclusively-owned region that
    /// outlives the thread.
    unsafe fn create_raw(
        &self,
        cs: CriticalSection<'_>,
        base: *mut u8,
        size: usize,
        priority: Priority,
        entry: EntryFn,
        arg: *mut (),
        alloc: AllocKind,
    ) -> ThreadRef {
        kernel_check!(!base.is_null(), "null working area");
        kernel_check!(base as usize % mem::WA_ALIGN == 0, "misaligned working area");
        kernel_check!(size >= mem::min_working_area_size(), "working area too small");
        kernel_check!(priority >= priority::LOWEST, "priority out of range");

        let stack = StackSpan::carve(base, size);
        let tcb = base as *mut Tcb;
        unsafe { tcb.write(Tcb::new(priority, alloc, stack)) };
        let thread = unsafe { ThreadRef::from_ptr(tcb) };

        DefaultPort::init_context(unsafe { &mut *thread.context_ptr() }, stack, entry, arg);

        #[cfg(feature = "registry")]
        self.registry.insert(cs, thread);
        #[cfg(not(feature = "registry"))]
        let _ = cs;

        if let Some(hook) = self.config.init_hook {
            hook(thread);
        }
        thread
    }

    /// Make a created thread schedulable.
    ///
    /// Transitions `AwaitingStart → Ready`, hands the thread to the
    /// scheduler and performs a reschedule check. At most once per thread;
    /// starting a thread in any other state is a contract violation.
    pub fn start(&self, thread: ThreadRef) {
        critical_section::with(|cs| {
            self.start_i(cs, thread);
            self.scheduler.reschedule(cs);
        })
    }

    /// Interrupt-safe variant of [`start`](Kernel::start); performs no
    /// reschedule.
    pub fn start_i(&self, cs: CriticalSection<'_>, thread: ThreadRef) {
        kernel_check!(
            thread.state(cs) == ThreadState::AwaitingStart,
            "thread already started"
        );
        self.scheduler.ready_i(cs, thread);
    }

    // ------------------------------------------------------------------
    // Suspend / resume
    // ------------------------------------------------------------------

    /// Park the calling thread in a thread reference cell.
    ///
    /// The cell must be empty. Does not return until a matching
    /// [`resume`](Kernel::resume) or [`resume_i`](Kernel::resume_i)
    /// delivers a wake payload, which is returned unchanged.
    pub fn suspend(&self, cell: &ThreadReference) -> Message {
        critical_section::with(|cs| self.suspend_s(cs, cell))
    }

    /// Already-locked variant of [`suspend`](Kernel::suspend).
    pub fn suspend_s(&self, cs: CriticalSection<'_>, cell: &ThreadReference) -> Message {
        kernel_check!(cell.is_empty(cs), "thread reference already in use");

        let current = self.scheduler.current(cs);
        cell.set(cs, current);
        self.scheduler.go_to_sleep(cs, ThreadState::Suspended);
        current.tcb().wake_payload(cs)
    }

    /// Wake the thread parked in `cell`, if any, delivering `msg`.
    ///
    /// Interrupt-safe: makes the thread ready without a reschedule, so the
    /// interrupted context is never switched away from. Preemption, if due,
    /// happens at interrupt exit.
    pub fn resume_i(&self, cs: CriticalSection<'_>, cell: &ThreadReference, msg: Message) {
        self.resume_common(cs, cell, msg);
    }

    /// Wake the thread parked in `cell`, if any, delivering `msg`, then
    /// reschedule.
    ///
    /// Thread context only: the woken thread may preempt the caller
    /// immediately.
    pub fn resume(&self, cell: &ThreadReference, msg: Message) {
        critical_section::with(|cs| {
            if self.resume_common(cs, cell, msg) {
                self.scheduler.reschedule(cs);
            }
        })
    }

    fn resume_common(&self, cs: CriticalSection<'_>, cell: &ThreadReference, msg: Message) -> bool {
        match cell.take(cs) {
            Some(thread) => {
                kernel_assert!(
                    thread.state(cs) == ThreadState::Suspended,
                    "resumed thread not suspended"
                );
                thread.tcb().set_wake_payload(cs, msg);
                self.scheduler.ready_i(cs, thread);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Priority
    // ------------------------------------------------------------------

    /// Change the calling thread's own priority, then reschedule if
    /// necessary.
    ///
    /// With priority inheritance, the effective priority is only assigned
    /// when the thread is not currently boosted (effective equals base) or
    /// when the new priority raises it; the base priority always takes the
    /// new value, so a boost is never silently discarded.
    ///
    /// # Returns
    ///
    /// The previous base priority, regardless of any active boost.
    pub fn set_priority(&self, new_priority: Priority) -> Priority {
        kernel_check!(new_priority >= priority::LOWEST, "priority out of range");

        critical_section::with(|cs| {
            let current = self.scheduler.current(cs);
            let tcb = current.tcb();

            #[cfg(feature = "inheritance")]
            let old_priority = {
                let old = tcb.base_priority(cs);
                if tcb.priority(cs) == tcb.base_priority(cs) || new_priority > tcb.priority(cs) {
                    tcb.set_priority(cs, new_priority);
                }
                tcb.set_base_priority(cs, new_priority);
                old
            };

            #[cfg(not(feature = "inheritance"))]
            let old_priority = {
                let old = tcb.priority(cs);
                tcb.set_priority(cs, new_priority);
                old
            };

            self.scheduler.reschedule(cs);
            old_priority
        })
    }

    /// Apply a priority-inheritance boost to a thread.
    ///
    /// Entry point for a mutex subsystem: raises the thread's effective
    /// priority to `priority` if that is higher, leaving the base priority
    /// untouched. Never lowers the effective priority.
    #[cfg(feature = "inheritance")]
    pub fn boost_priority_i(&self, cs: CriticalSection<'_>, thread: ThreadRef, priority: Priority) {
        if priority > thread.priority(cs) {
            thread.tcb().set_priority(cs, priority);
            if thread.state(cs) == ThreadState::Ready {
                self.scheduler.requeue_i(cs, thread);
            }
        }
    }

    // ------------------------------------------------------------------
    // Sleep and yield
    // ------------------------------------------------------------------

    /// Block the calling thread for `duration` ticks.
    ///
    /// A zero duration is a contract violation.
    pub fn sleep(&self, duration: Duration) {
        critical_section::with(|cs| self.sleep_s(cs, duration))
    }

    /// Already-locked variant of [`sleep`](Kernel::sleep).
    pub fn sleep_s(&self, cs: CriticalSection<'_>, duration: Duration) {
        kernel_check!(!duration.is_zero(), "zero sleep duration");

        let current = self.scheduler.current(cs);
        self.timers.insert(cs, current, self.clock.now() + duration);
        self.scheduler.go_to_sleep(cs, ThreadState::SleepingTimed);
    }

    /// Block the calling thread until the system time reaches `deadline`.
    ///
    /// Returns immediately, without blocking, if the deadline has already
    /// passed or is now.
    pub fn sleep_until(&self, deadline: Instant) {
        critical_section::with(|cs| {
            match deadline.checked_duration_since(self.clock.now()) {
                Some(remaining) if !remaining.is_zero() => self.sleep_s(cs, remaining),
                _ => {}
            }
        })
    }

    /// Voluntarily hand the CPU to the next ready thread of equal or higher
    /// priority, if any.
    pub fn yield_now(&self) {
        critical_section::with(|cs| self.scheduler.yield_now(cs))
    }

    // ------------------------------------------------------------------
    // Termination and join
    // ------------------------------------------------------------------

    /// Request cooperative termination of a thread.
    ///
    /// Sets the termination-requested flag and nothing else: the target is
    /// expected to poll [`should_terminate`](Kernel::should_terminate) and
    /// exit cleanly on its own, releasing whatever it holds.
    pub fn request_termination(&self, thread: ThreadRef) {
        critical_section::with(|cs| thread.tcb().add_flags(cs, ThreadFlags::TERMINATE))
    }

    /// Whether termination has been requested for the calling thread.
    pub fn should_terminate(&self) -> bool {
        critical_section::with(|cs| {
            self.scheduler
                .current(cs)
                .termination_requested(cs)
        })
    }

    /// Terminate the calling thread with the given exit code.
    ///
    /// Never returns; code placed after this call is unreachable by
    /// contract.
    pub fn exit(&self, code: Message) -> ! {
        critical_section::with(|cs| self.exit_s(cs, code));
        unreachable!("terminated thread resumed execution");
    }

    /// Already-locked variant of [`exit`](Kernel::exit).
    ///
    /// Stores the exit code, runs the configured exit hook, makes every
    /// waiter ready in FIFO arrival order, unregisters statically allocated
    /// threads, then parks the thread in `Final` forever.
    pub fn exit_s(&self, cs: CriticalSection<'_>, code: Message) {
        let current = self.scheduler.current(cs);
        current.tcb().set_wake_payload(cs, code);

        if let Some(hook) = self.config.exit_hook {
            hook(current);
        }

        #[cfg(feature = "waitexit")]
        {
            while let Some(waiter) = current.tcb().waiters.pop_front(cs) {
                self.scheduler.ready_i(cs, waiter);
            }
            kernel_assert!(
                current.tcb().waiters.is_empty(cs),
                "waiters survived termination"
            );
        }

        // Static threads leave the registry now: there is no memory to
        // recover, so nothing else will ever unregister them. Dynamic
        // threads stay visible until their last reference is released.
        #[cfg(feature = "registry")]
        {
            if current.alloc_kind().is_static() {
                self.registry.remove(cs, current);
            }
        }

        self.scheduler.go_to_sleep(cs, ThreadState::Final);
    }

    /// Block until `thread` terminates and return its exit code.
    ///
    /// Every thread that calls `wait` before the target exits receives the
    /// same exit code, exactly once per call. Waiting on oneself, or on a
    /// thread whose reference count is already zero, is a contract
    /// violation.
    ///
    /// With dynamic allocation enabled, one reference is released after the
    /// exit code is read; when the count reaches zero the working area
    /// returns to the allocator recorded at creation.
    #[cfg(feature = "waitexit")]
    pub fn wait(&self, thread: ThreadRef) -> Message {
        let code = critical_section::with(|cs| self.wait_s(cs, thread));
        // The allocation tag recorded at creation picks the cleanup path:
        // a static thread has no reference semantics and nothing to
        // reclaim.
        #[cfg(feature = "dynamic")]
        {
            if !thread.alloc_kind().is_static() {
                self.release(thread);
            }
        }
        code
    }

    /// Already-locked variant of [`wait`](Kernel::wait).
    ///
    /// Unlike [`wait`](Kernel::wait), does not release a reference.
    #[cfg(feature = "waitexit")]
    pub fn wait_s(&self, cs: CriticalSection<'_>, thread: ThreadRef) -> Message {
        let current = self.scheduler.current(cs);
        kernel_check!(thread != current, "waiting on self");
        #[cfg(feature = "dynamic")]
        kernel_check!(
            thread.alloc_kind().is_static() || thread.tcb().refs(cs) > 0,
            "waiting on unreferenced thread"
        );

        if thread.state(cs) != ThreadState::Final {
            thread.tcb().waiters.push_back(cs, current);
            self.scheduler.go_to_sleep(cs, ThreadState::WaitingExit);
        }
        thread.exit_code(cs)
    }

    // ------------------------------------------------------------------
    // Reference counting
    // ------------------------------------------------------------------

    /// Take an additional reference to a thread.
    #[cfg(feature = "dynamic")]
    pub fn add_reference(&self, thread: ThreadRef) {
        critical_section::with(|cs| {
            let refs = thread.tcb().refs(cs);
            kernel_check!(refs > 0, "referencing a released thread");
            thread.tcb().set_refs(cs, refs + 1);
        })
    }

    /// Release one reference to a thread.
    ///
    /// When the count reaches zero the thread must be terminated, and a
    /// heap- or pool-allocated working area is returned to its allocator.
    /// Static storage is never reclaimed.
    #[cfg(feature = "dynamic")]
    pub fn release(&self, thread: ThreadRef) {
        let reclaim = critical_section::with(|cs| {
            let tcb = thread.tcb();
            let refs = tcb.refs(cs);
            kernel_check!(refs > 0, "releasing an unreferenced thread");
            tcb.set_refs(cs, refs - 1);
            if refs > 1 {
                return None;
            }

            match tcb.alloc_kind() {
                AllocKind::Static => None,
                kind => {
                    kernel_assert!(
                        tcb.state(cs) == ThreadState::Final,
                        "releasing a live thread"
                    );
                    #[cfg(feature = "registry")]
                    self.registry.remove(cs, thread);
                    Some((kind, mem::working_area_size(tcb.stack().size())))
                }
            }
        });

        // Reclamation happens outside the guard: the thread is Final and
        // unreachable from every kernel structure at this point.
        if let Some((kind, wa_size)) = reclaim {
            let base = thread.as_ptr() as *mut u8;
            match kind {
                AllocKind::Heap => unsafe {
                    let layout =
                        core::alloc::Layout::from_size_align_unchecked(wa_size, mem::WA_ALIGN);
                    alloc::alloc::dealloc(base, layout);
                },
                AllocKind::Pool(pool) => unsafe { pool.release_raw(base) },
                AllocKind::Static => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Tick processing
    // ------------------------------------------------------------------

    /// Process one system tick.
    ///
    /// Called from the port's timer interrupt handler with the guard held:
    /// advances the clock and readies every thread whose sleep deadline has
    /// arrived, delivering `MSG_TIMEOUT` as the wake reason. Never
    /// reschedules; preemption happens at interrupt exit.
    pub fn tick_i(&self, cs: CriticalSection<'_>) {
        let now = self.clock.advance();
        while let Some(thread) = self.timers.expire_one(cs, now) {
            thread.tcb().set_wake_payload(cs, MSG_TIMEOUT);
            self.scheduler.ready_i(cs, thread);
        }
    }
}

// Safety: all interior mutability is serialized by the critical section or
// atomic.
unsafe impl<S: Scheduler> Send for Kernel<S> {}
unsafe impl<S: Scheduler> Sync for Kernel<S> {}
