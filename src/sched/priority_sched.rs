//! Single-CPU priority scheduler.

use core::cell::Cell;
use critical_section::{CriticalSection, Mutex};

use super::ready_list::ReadyList;
use super::Scheduler;
use crate::port::{Context, DefaultPort, Port};
use crate::thread::{ThreadRef, ThreadState};

/// Strict-priority, single-CPU scheduler.
///
/// The highest-priority ready thread always runs; equal-priority threads
/// rotate only on explicit yields. The embedding image must keep one
/// always-ready idle thread started, so dispatch can never come up empty.
pub struct PriorityScheduler {
    ready: ReadyList,
    current: Mutex<Cell<Option<ThreadRef>>>,
}

impl PriorityScheduler {
    /// Create a new scheduler with an empty ready list.
    pub const fn new() -> Self {
        Self {
            ready: ReadyList::new(),
            current: Mutex::new(Cell::new(None)),
        }
    }

    /// The ready list owned by this scheduler.
    pub fn ready_list(&self) -> &ReadyList {
        &self.ready
    }

    /// Dispatch the first thread (bootstrap).
    ///
    /// Picks the highest-priority ready thread and switches into it from a
    /// throwaway boot context. Called once, after the boot path has started
    /// at least the idle thread.
    pub fn start_first_thread(&self) {
        critical_section::with(|cs| {
            kernel_check!(
                self.current.borrow(cs).get().is_none(),
                "scheduler already dispatching"
            );
            let next = match self.ready.remove_highest(cs) {
                Some(next) => next,
                None => panic!("no startable thread"),
            };
            next.set_state(cs, ThreadState::Running);
            self.current.borrow(cs).set(Some(next));

            let mut boot_ctx = Context::default();
            unsafe { DefaultPort::switch(&mut boot_ctx as *mut Context, next.context_ptr()) };
        })
    }

    fn dispatch_next(&self, cs: CriticalSection<'_>, from: ThreadRef) {
        let next = match self.ready.remove_highest(cs) {
            Some(next) => next,
            None => panic!("no ready thread to dispatch"),
        };
        next.set_state(cs, ThreadState::Running);
        self.current.borrow(cs).set(Some(next));
        unsafe { DefaultPort::switch(from.context_ptr(), next.context_ptr()) };
    }
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for PriorityScheduler {
    fn ready_i(&self, cs: CriticalSection<'_>, thread: ThreadRef) {
        thread.set_state(cs, ThreadState::Ready);
        self.ready.insert(cs, thread);
    }

    fn go_to_sleep(&self, cs: CriticalSection<'_>, new_state: ThreadState) {
        let current = self.current(cs);
        current.set_state(cs, new_state);
        self.dispatch_next(cs, current);
    }

    fn reschedule(&self, cs: CriticalSection<'_>) {
        let current = self.current(cs);
        match self.ready.front_priority(cs) {
            Some(front) if front > current.priority(cs) => {
                current.set_state(cs, ThreadState::Ready);
                self.ready.insert(cs, current);
                self.dispatch_next(cs, current);
            }
            _ => {}
        }
    }

    fn yield_now(&self, cs: CriticalSection<'_>) {
        let current = self.current(cs);
        match self.ready.front_priority(cs) {
            Some(front) if front >= current.priority(cs) => {
                current.set_state(cs, ThreadState::Ready);
                self.ready.insert(cs, current);
                self.dispatch_next(cs, current);
            }
            _ => {}
        }
    }

    fn requeue_i(&self, cs: CriticalSection<'_>, thread: ThreadRef) {
        if self.ready.remove(cs, thread) {
            self.ready.insert(cs, thread);
        }
    }

    fn current(&self, cs: CriticalSection<'_>) -> ThreadRef {
        let current = self.current.borrow(cs).get();
        kernel_assert!(current.is_some(), "no thread is running");
        match current {
            Some(thread) => thread,
            None => unreachable!(),
        }
    }
}
