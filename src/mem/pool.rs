//! Fixed-size working-area pool for dynamic thread creation.
//!
//! The pool hands out working areas of one fixed size and reuses released
//! areas through an intrusive free list threaded through the areas
//! themselves, so the pool needs no storage of its own beyond the list head.

use core::ptr::NonNull;

use portable_atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use super::working_area::{min_working_area_size, WorkingArea, WA_ALIGN};

/// Free-list node written at the start of a released working area.
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

/// A pool of same-sized thread working areas.
///
/// Storage is donated once with [`load`](ThreadPool::load); areas return to
/// the pool when the last reference to a pool-created thread is released.
pub struct ThreadPool {
    free: Mutex<Option<NonNull<FreeNode>>>,
    area_size: usize,
    /// Areas handed out over the pool's lifetime
    allocated: AtomicUsize,
    /// Areas currently in use
    in_use: AtomicUsize,
}

impl ThreadPool {
    /// Create an empty pool of working areas of `area_size` bytes each.
    pub const fn new(area_size: usize) -> Self {
        Self {
            free: Mutex::new(None),
            area_size,
            allocated: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Donate backing storage to the pool.
    ///
    /// Every element becomes one allocatable working area. `N` must match
    /// the pool's configured area size.
    pub fn load<const N: usize>(&self, areas: &'static [WorkingArea<N>]) {
        kernel_check!(N >= min_working_area_size(), "pool area too small");
        kernel_check!(N == self.area_size, "pool area size mismatch");
        for area in areas {
            unsafe { self.push_free(area.base()) };
        }
    }

    /// Size of the working areas this pool hands out.
    pub fn area_size(&self) -> usize {
        self.area_size
    }

    /// Take a working area from the pool.
    pub(crate) fn acquire(&self) -> Option<*mut u8> {
        let mut free = self.free.lock();
        let node = (*free)?;
        *free = unsafe { node.as_ref().next };
        self.allocated.fetch_add(1, Ordering::AcqRel);
        self.in_use.fetch_add(1, Ordering::AcqRel);
        Some(node.as_ptr() as *mut u8)
    }

    /// Return a working area to the pool.
    ///
    /// # Safety
    ///
    /// `base` must be the base address of an area originally acquired from
    /// this pool, with no live thread in it.
    pub(crate) unsafe fn release_raw(&self, base: *mut u8) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        unsafe { self.push_free(base) };
    }

    unsafe fn push_free(&self, base: *mut u8) {
        debug_assert_eq!(base as usize % WA_ALIGN, 0);
        let node = base as *mut FreeNode;
        let mut free = self.free.lock();
        unsafe { node.write(FreeNode { next: *free }) };
        *free = NonNull::new(node);
    }

    /// Get pool statistics as (total handed out, currently in use).
    pub fn stats(&self) -> (usize, usize) {
        (
            self.allocated.load(Ordering::Acquire),
            self.in_use.load(Ordering::Acquire),
        )
    }
}

unsafe impl Send for ThreadPool {}
unsafe impl Sync for ThreadPool {}
