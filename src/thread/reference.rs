//! Single-slot thread reference cells.

use core::cell::Cell;
use critical_section::{CriticalSection, Mutex};

use super::ThreadRef;

/// A single-slot synchronization point for generic suspend/resume.
///
/// A driver or subsystem owns one cell per event source. The thread that
/// needs to block on the event parks itself in the cell with
/// [`Kernel::suspend`](crate::Kernel::suspend); the event handler wakes it
/// with one of the resume calls, delivering a wake payload. The cell holds
/// at most one thread, and a suspend on a non-empty cell is a contract
/// violation — this is an ad-hoc, one-waiter primitive, distinct from the
/// join mechanism.
pub struct ThreadReference {
    slot: Mutex<Cell<Option<ThreadRef>>>,
}

impl ThreadReference {
    /// Create an empty reference cell.
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(None)),
        }
    }

    /// Whether no thread is currently parked in this cell.
    pub fn is_empty(&self, cs: CriticalSection<'_>) -> bool {
        self.slot.borrow(cs).get().is_none()
    }

    pub(crate) fn set(&self, cs: CriticalSection<'_>, thread: ThreadRef) {
        self.slot.borrow(cs).set(Some(thread));
    }

    pub(crate) fn take(&self, cs: CriticalSection<'_>) -> Option<ThreadRef> {
        self.slot.borrow(cs).take()
    }
}

impl Default for ThreadReference {
    fn default() -> Self {
        Self::new()
    }
}
