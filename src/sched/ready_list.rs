//! Priority-ordered ready list.

use core::cell::Cell;
use critical_section::{CriticalSection, Mutex};

use crate::thread::{Priority, ThreadRef};

/// Intrusive list of ready threads, ordered by descending priority with
/// FIFO order among equal priorities.
///
/// The list is linked through the threads' queue links, so membership costs
/// no allocation and insertion is a bounded walk. A thread is in at most
/// one kernel queue at a time.
pub struct ReadyList {
    head: Mutex<Cell<Option<ThreadRef>>>,
}

impl ReadyList {
    /// Create an empty ready list.
    pub const fn new() -> Self {
        Self {
            head: Mutex::new(Cell::new(None)),
        }
    }

    /// Whether the list holds no threads.
    pub fn is_empty(&self, cs: CriticalSection<'_>) -> bool {
        self.head.borrow(cs).get().is_none()
    }

    /// Priority of the highest-priority ready thread, if any.
    pub fn front_priority(&self, cs: CriticalSection<'_>) -> Option<Priority> {
        self.head.borrow(cs).get().map(|t| t.priority(cs))
    }

    /// Insert a thread behind all threads of equal or higher priority.
    pub fn insert(&self, cs: CriticalSection<'_>, thread: ThreadRef) {
        let prio = thread.priority(cs);

        let mut prev: Option<ThreadRef> = None;
        let mut cursor = self.head.borrow(cs).get();
        while let Some(current) = cursor {
            if current.priority(cs) < prio {
                break;
            }
            prev = Some(current);
            cursor = current.tcb().queue_link.borrow(cs).get();
        }

        thread.tcb().queue_link.borrow(cs).set(cursor);
        match prev {
            Some(prev) => prev.tcb().queue_link.borrow(cs).set(Some(thread)),
            None => self.head.borrow(cs).set(Some(thread)),
        }
    }

    /// Remove and return the highest-priority thread.
    pub fn remove_highest(&self, cs: CriticalSection<'_>) -> Option<ThreadRef> {
        let front = self.head.borrow(cs).get()?;
        let next = front.tcb().queue_link.borrow(cs).get();
        self.head.borrow(cs).set(next);
        front.tcb().queue_link.borrow(cs).set(None);
        Some(front)
    }

    /// Remove an arbitrary thread from the list.
    ///
    /// Returns `false` if the thread was not in the list.
    pub fn remove(&self, cs: CriticalSection<'_>, thread: ThreadRef) -> bool {
        let mut prev: Option<ThreadRef> = None;
        let mut cursor = self.head.borrow(cs).get();
        while let Some(current) = cursor {
            let next = current.tcb().queue_link.borrow(cs).get();
            if current == thread {
                match prev {
                    Some(prev) => prev.tcb().queue_link.borrow(cs).set(next),
                    None => self.head.borrow(cs).set(next),
                }
                thread.tcb().queue_link.borrow(cs).set(None);
                return true;
            }
            prev = Some(current);
            cursor = next;
        }
        false
    }
}
