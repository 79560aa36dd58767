//! Deadline queue for timed sleeps.

use core::cell::Cell;
use critical_section::{CriticalSection, Mutex};

use super::Instant;
use crate::thread::ThreadRef;

/// Deadline-ordered queue of sleeping threads.
///
/// The queue is the alarm facility behind `sleep`/`sleep_until`: each
/// sleeping thread is linked in by its absolute deadline, and the tick hook
/// pops expired entries one at a time. Links and deadlines live in the
/// TCBs, so registering a deadline never allocates.
pub struct TimerQueue {
    head: Mutex<Cell<Option<ThreadRef>>>,
}

impl TimerQueue {
    /// Create an empty timer queue.
    pub const fn new() -> Self {
        Self {
            head: Mutex::new(Cell::new(None)),
        }
    }

    /// Whether no deadlines are registered.
    pub fn is_empty(&self, cs: CriticalSection<'_>) -> bool {
        self.head.borrow(cs).get().is_none()
    }

    /// Earliest registered deadline, if any.
    pub fn next_deadline(&self, cs: CriticalSection<'_>) -> Option<Instant> {
        self.head.borrow(cs).get().map(|t| t.tcb().deadline(cs))
    }

    /// Register a wake deadline for a thread.
    ///
    /// Threads with equal deadlines wake in registration order.
    pub fn insert(&self, cs: CriticalSection<'_>, thread: ThreadRef, deadline: Instant) {
        thread.tcb().set_deadline(cs, deadline);

        let mut prev: Option<ThreadRef> = None;
        let mut cursor = self.head.borrow(cs).get();
        while let Some(current) = cursor {
            if current.tcb().deadline(cs) > deadline {
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

    /// Cancel a registered deadline.
    ///
    /// Returns `false` if the thread had no deadline registered.
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

    /// Pop one thread whose deadline has arrived, if any.
    ///
    /// Called repeatedly from the tick path until it returns `None`.
    pub fn expire_one(&self, cs: CriticalSection<'_>, now: Instant) -> Option<ThreadRef> {
        let front = self.head.borrow(cs).get()?;
        if front.tcb().deadline(cs) > now {
            return None;
        }
        let next = front.tcb().queue_link.borrow(cs).get();
        self.head.borrow(cs).set(next);
        front.tcb().queue_link.borrow(cs).set(None);
        Some(front)
    }
}
