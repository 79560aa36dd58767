//! Thread control blocks and the thread state machine.
//!
//! A [`Tcb`] is the kernel's per-thread record. It is placed at the front of
//! the thread's working area at creation and owned by the kernel from then
//! on; user code only holds [`ThreadRef`] handles. Every mutable TCB field
//! sits behind a [`critical_section::Mutex`], so mutation requires the
//! critical-section token and therefore happens atomically with respect to
//! all other threads and interrupt handlers.

use bitflags::bitflags;
use core::cell::{Cell, UnsafeCell};
use core::ptr::NonNull;
use critical_section::{CriticalSection, Mutex};

use crate::mem::StackSpan;
use crate::port::Context;
use crate::time::Instant;

mod reference;

#[cfg(feature = "registry")]
pub mod registry;

pub use reference::ThreadReference;

/// Wake-up reason / exit code payload carried in a TCB's message slot.
pub type Message = isize;

/// Normal wakeup.
pub const MSG_OK: Message = 0;
/// Wakeup caused by a timeout condition.
pub const MSG_TIMEOUT: Message = -1;
/// Wakeup caused by a reset condition.
pub const MSG_RESET: Message = -2;

/// Scheduling priority. Higher values run preferentially.
pub type Priority = u8;

/// Thread entry function.
///
/// The returned message becomes the thread's exit code when the port
/// trampoline hands it to the kernel's exit path.
pub type EntryFn = fn(arg: *mut ()) -> Message;

/// Lifecycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Created but not yet schedulable
    AwaitingStart = 0,
    /// Schedulable, not running
    Ready = 1,
    /// The unique executing context of its CPU
    Running = 2,
    /// Blocked on a thread reference
    Suspended = 3,
    /// Blocked until a deadline
    SleepingTimed = 4,
    /// Blocked waiting for another thread's termination
    WaitingExit = 5,
    /// Terminated; absorbing
    Final = 6,
}

impl ThreadState {
    /// Whether this is the terminal state.
    pub fn is_terminal(self) -> bool {
        self == ThreadState::Final
    }

    /// Whether a thread in this state is parked on some wait condition.
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            ThreadState::Suspended | ThreadState::SleepingTimed | ThreadState::WaitingExit
        )
    }

    /// Legal transition table of the thread state machine.
    ///
    /// Dispatch and preemption move between `Ready` and `Running`; the
    /// lifecycle API drives every other edge. `Final` has no outgoing
    /// edges. New blocking sub-states extend this table alongside the
    /// existing blocked states.
    pub fn can_transition_to(self, next: ThreadState) -> bool {
        use ThreadState::*;
        matches!(
            (self, next),
            (AwaitingStart, Ready)
                | (Ready, Running)
                | (Running, Ready)
                | (Running, Suspended)
                | (Running, SleepingTimed)
                | (Running, WaitingExit)
                | (Running, Final)
                | (Suspended, Ready)
                | (SleepingTimed, Ready)
                | (WaitingExit, Ready)
        )
    }
}

bitflags! {
    /// Independent per-thread condition bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u8 {
        /// Cooperative termination has been requested
        const TERMINATE = 0b0000_0001;
    }
}

/// How a thread's working area was obtained, recorded at creation.
///
/// The tag fixes which cleanup path runs when the last reference to the
/// thread is released; a static thread's storage is never reclaimed.
#[derive(Clone, Copy)]
pub enum AllocKind {
    /// Caller-supplied static working area
    Static,
    /// Working area from the global allocator
    #[cfg(feature = "dynamic")]
    Heap,
    /// Working area from a fixed-size pool
    #[cfg(feature = "dynamic")]
    Pool(&'static crate::mem::ThreadPool),
}

impl AllocKind {
    /// Whether this thread lives in caller-supplied static storage.
    pub fn is_static(self) -> bool {
        matches!(self, AllocKind::Static)
    }
}

/// Thread control block.
///
/// One per execution context, embedded at the front of the thread's working
/// area. Never copied or moved once placed.
pub struct Tcb {
    state: Mutex<Cell<ThreadState>>,
    /// Effective scheduling priority (may be boosted by inheritance)
    priority: Mutex<Cell<Priority>>,
    /// Priority the thread would have absent inheritance boosts
    #[cfg(feature = "inheritance")]
    base_priority: Mutex<Cell<Priority>>,
    flags: Mutex<Cell<ThreadFlags>>,
    alloc: AllocKind,
    /// Wake-up reason while blocked; exit code once `Final`
    wake_payload: Mutex<Cell<Message>>,
    /// Link used while this thread sits in a ready list, wait list or the
    /// timer queue; the three memberships are mutually exclusive
    pub(crate) queue_link: Mutex<Cell<Option<ThreadRef>>>,
    /// Threads blocked in a join on this thread's termination
    #[cfg(feature = "waitexit")]
    pub(crate) waiters: WaitList,
    /// Absolute wake deadline while in the timer queue
    deadline: Mutex<Cell<Instant>>,
    #[cfg(feature = "registry")]
    pub(crate) reg_next: Mutex<Cell<Option<ThreadRef>>>,
    #[cfg(feature = "registry")]
    pub(crate) reg_prev: Mutex<Cell<Option<ThreadRef>>>,
    #[cfg(feature = "registry")]
    name: Mutex<Cell<Option<&'static str>>>,
    /// Logical reference count governing deferred reclamation
    #[cfg(feature = "dynamic")]
    refs: Mutex<Cell<usize>>,
    ctx: UnsafeCell<Context>,
    stack: StackSpan,
}

// A TCB is shared between execution contexts by design; the critical
// section serializes all access to its mutable fields.
unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

impl Tcb {
    pub(crate) fn new(priority: Priority, alloc: AllocKind, stack: StackSpan) -> Self {
        Self {
            state: Mutex::new(Cell::new(ThreadState::AwaitingStart)),
            priority: Mutex::new(Cell::new(priority)),
            #[cfg(feature = "inheritance")]
            base_priority: Mutex::new(Cell::new(priority)),
            flags: Mutex::new(Cell::new(ThreadFlags::empty())),
            alloc,
            wake_payload: Mutex::new(Cell::new(MSG_OK)),
            queue_link: Mutex::new(Cell::new(None)),
            #[cfg(feature = "waitexit")]
            waiters: WaitList::new(),
            deadline: Mutex::new(Cell::new(Instant::ZERO)),
            #[cfg(feature = "registry")]
            reg_next: Mutex::new(Cell::new(None)),
            #[cfg(feature = "registry")]
            reg_prev: Mutex::new(Cell::new(None)),
            #[cfg(feature = "registry")]
            name: Mutex::new(Cell::new(None)),
            #[cfg(feature = "dynamic")]
            refs: Mutex::new(Cell::new(1)),
            ctx: UnsafeCell::new(Context::default()),
            stack,
        }
    }

    pub(crate) fn state(&self, cs: CriticalSection<'_>) -> ThreadState {
        self.state.borrow(cs).get()
    }

    pub(crate) fn set_state(&self, cs: CriticalSection<'_>, next: ThreadState) {
        let current = self.state.borrow(cs).get();
        kernel_assert!(
            current.can_transition_to(next),
            "illegal thread state transition"
        );
        self.state.borrow(cs).set(next);
    }

    pub(crate) fn priority(&self, cs: CriticalSection<'_>) -> Priority {
        self.priority.borrow(cs).get()
    }

    pub(crate) fn set_priority(&self, cs: CriticalSection<'_>, priority: Priority) {
        self.priority.borrow(cs).set(priority);
    }

    #[cfg(feature = "inheritance")]
    pub(crate) fn base_priority(&self, cs: CriticalSection<'_>) -> Priority {
        self.base_priority.borrow(cs).get()
    }

    #[cfg(feature = "inheritance")]
    pub(crate) fn set_base_priority(&self, cs: CriticalSection<'_>, priority: Priority) {
        self.base_priority.borrow(cs).set(priority);
    }

    pub(crate) fn flags(&self, cs: CriticalSection<'_>) -> ThreadFlags {
        self.flags.borrow(cs).get()
    }

    pub(crate) fn add_flags(&self, cs: CriticalSection<'_>, flags: ThreadFlags) {
        let cell = self.flags.borrow(cs);
        cell.set(cell.get() | flags);
    }

    pub(crate) fn alloc_kind(&self) -> AllocKind {
        self.alloc
    }

    pub(crate) fn wake_payload(&self, cs: CriticalSection<'_>) -> Message {
        self.wake_payload.borrow(cs).get()
    }

    pub(crate) fn set_wake_payload(&self, cs: CriticalSection<'_>, msg: Message) {
        self.wake_payload.borrow(cs).set(msg);
    }

    pub(crate) fn deadline(&self, cs: CriticalSection<'_>) -> Instant {
        self.deadline.borrow(cs).get()
    }

    pub(crate) fn set_deadline(&self, cs: CriticalSection<'_>, deadline: Instant) {
        self.deadline.borrow(cs).set(deadline);
    }

    #[cfg(feature = "dynamic")]
    pub(crate) fn refs(&self, cs: CriticalSection<'_>) -> usize {
        self.refs.borrow(cs).get()
    }

    #[cfg(feature = "dynamic")]
    pub(crate) fn set_refs(&self, cs: CriticalSection<'_>, refs: usize) {
        self.refs.borrow(cs).set(refs);
    }

    #[cfg(feature = "registry")]
    pub(crate) fn name(&self, cs: CriticalSection<'_>) -> Option<&'static str> {
        self.name.borrow(cs).get()
    }

    #[cfg(feature = "registry")]
    pub(crate) fn set_name(&self, cs: CriticalSection<'_>, name: &'static str) {
        self.name.borrow(cs).set(Some(name));
    }

    pub(crate) fn stack(&self) -> StackSpan {
        self.stack
    }
}

/// Opaque handle to a kernel-owned thread.
///
/// Copyable and pointer-sized. The referenced TCB stays valid for as long as
/// the handle can legally be used: static threads are never reclaimed, and
/// dynamic threads are reclaimed only when their reference count drops to
/// zero.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ThreadRef(NonNull<Tcb>);

unsafe impl Send for ThreadRef {}
unsafe impl Sync for ThreadRef {}

impl ThreadRef {
    /// # Safety
    ///
    /// `tcb` must point at a live, initialized TCB.
    pub(crate) unsafe fn from_ptr(tcb: *mut Tcb) -> Self {
        Self(unsafe { NonNull::new_unchecked(tcb) })
    }

    pub(crate) fn tcb(&self) -> &Tcb {
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn as_ptr(&self) -> *mut Tcb {
        self.0.as_ptr()
    }

    /// Get the thread's lifecycle state.
    pub fn state(&self, cs: CriticalSection<'_>) -> ThreadState {
        self.tcb().state(cs)
    }

    /// Transition the thread to a new state.
    ///
    /// Only the edges of the state machine are accepted; anything else is a
    /// fatal invariant violation. Scheduler implementations use this for the
    /// dispatch and preemption edges.
    pub fn set_state(&self, cs: CriticalSection<'_>, next: ThreadState) {
        self.tcb().set_state(cs, next);
    }

    /// Get the thread's effective scheduling priority.
    pub fn priority(&self, cs: CriticalSection<'_>) -> Priority {
        self.tcb().priority(cs)
    }

    /// Get the thread's priority absent inheritance boosts.
    #[cfg(feature = "inheritance")]
    pub fn base_priority(&self, cs: CriticalSection<'_>) -> Priority {
        self.tcb().base_priority(cs)
    }

    /// Get the thread's flag bits.
    pub fn flags(&self, cs: CriticalSection<'_>) -> ThreadFlags {
        self.tcb().flags(cs)
    }

    /// Whether cooperative termination has been requested for this thread.
    pub fn termination_requested(&self, cs: CriticalSection<'_>) -> bool {
        self.tcb().flags(cs).contains(ThreadFlags::TERMINATE)
    }

    /// Read the thread's exit code.
    ///
    /// The exit code is meaningful only once the thread is `Final`; reading
    /// it earlier is a contract violation.
    pub fn exit_code(&self, cs: CriticalSection<'_>) -> Message {
        kernel_check!(
            self.tcb().state(cs).is_terminal(),
            "exit code read before termination"
        );
        self.tcb().wake_payload(cs)
    }

    /// How the thread's working area was obtained.
    pub fn alloc_kind(&self) -> AllocKind {
        self.tcb().alloc_kind()
    }

    /// Current logical reference count.
    #[cfg(feature = "dynamic")]
    pub fn ref_count(&self, cs: CriticalSection<'_>) -> usize {
        self.tcb().refs(cs)
    }

    /// Get the thread's registry name, if one was set.
    #[cfg(feature = "registry")]
    pub fn name(&self, cs: CriticalSection<'_>) -> Option<&'static str> {
        self.tcb().name(cs)
    }

    /// Set the thread's registry name.
    #[cfg(feature = "registry")]
    pub fn set_name(&self, cs: CriticalSection<'_>, name: &'static str) {
        self.tcb().set_name(cs, name);
    }

    /// Pointer to the thread's saved port context.
    ///
    /// Used by scheduler implementations during the switch handoff; the
    /// pointer stays valid for the lifetime of the TCB.
    pub fn context_ptr(&self) -> *mut Context {
        self.tcb().ctx.get()
    }

    /// The thread's stack span.
    pub fn stack(&self) -> StackSpan {
        self.tcb().stack()
    }
}

impl core::fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ThreadRef({:p})", self.0.as_ptr())
    }
}

/// FIFO list of threads blocked in a join, linked intrusively through the
/// waiting threads' queue links.
#[cfg(feature = "waitexit")]
pub(crate) struct WaitList {
    head: Mutex<Cell<Option<ThreadRef>>>,
    tail: Mutex<Cell<Option<ThreadRef>>>,
}

#[cfg(feature = "waitexit")]
impl WaitList {
    pub(crate) const fn new() -> Self {
        Self {
            head: Mutex::new(Cell::new(None)),
            tail: Mutex::new(Cell::new(None)),
        }
    }

    pub(crate) fn is_empty(&self, cs: CriticalSection<'_>) -> bool {
        self.head.borrow(cs).get().is_none()
    }

    pub(crate) fn push_back(&self, cs: CriticalSection<'_>, thread: ThreadRef) {
        thread.tcb().queue_link.borrow(cs).set(None);
        match self.tail.borrow(cs).get() {
            Some(tail) => tail.tcb().queue_link.borrow(cs).set(Some(thread)),
            None => self.head.borrow(cs).set(Some(thread)),
        }
        self.tail.borrow(cs).set(Some(thread));
    }

    pub(crate) fn pop_front(&self, cs: CriticalSection<'_>) -> Option<ThreadRef> {
        let front = self.head.borrow(cs).get()?;
        let next = front.tcb().queue_link.borrow(cs).get();
        self.head.borrow(cs).set(next);
        if next.is_none() {
            self.tail.borrow(cs).set(None);
        }
        front.tcb().queue_link.borrow(cs).set(None);
        Some(front)
    }
}
