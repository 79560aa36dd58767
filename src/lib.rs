#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! Thread lifecycle core for preemptive real-time kernels.
//!
//! This library provides the thread-management heart of a small RTOS:
//! creation into caller-supplied working areas, the thread state machine,
//! voluntary and involuntary suspension, timed sleep, priority management
//! with inheritance interaction, cooperative termination, and join
//! semantics. Context switching and the pick-next policy stay behind the
//! [`Port`] and [`Scheduler`] seams, so the core is testable on a host and
//! portable across targets.
//!
//! # Concurrency model
//!
//! Every kernel structure is mutated inside one strictly-nested,
//! non-preemptible critical section provided by the `critical-section`
//! crate. Plain methods acquire it themselves; the `*_s` and `*_i` families
//! take the token for already-locked composition, and only the `*_i` subset
//! may be called from interrupt handlers.
//!
//! # Quick Start
//!
//! ```ignore
//! use rtcore::{priority, working_area_size, Kernel, PriorityScheduler, WorkingArea};
//!
//! static KERNEL: Kernel<PriorityScheduler> =
//!     Kernel::new(PriorityScheduler::new(), 1_000);
//! static MAIN_WA: WorkingArea<{ working_area_size(4096) }> = WorkingArea::new();
//!
//! fn boot() {
//!     KERNEL.init().expect("kernel already initialized");
//!
//!     let main = KERNEL.create_static(
//!         &MAIN_WA,
//!         priority::NORMAL,
//!         main_thread,
//!         core::ptr::null_mut(),
//!     );
//!     KERNEL.start(main);
//!     KERNEL.scheduler().start_first_thread();
//! }
//!
//! fn main_thread(_arg: *mut ()) -> rtcore::Message {
//!     loop { /* thread work */ }
//! }
//! ```
//!
//! # Features
//!
//! - `waitexit`: join support (`wait`, per-thread waiter lists)
//! - `dynamic`: heap/pool creation with reference-counted reclamation
//! - `registry`: introspection registry of live threads
//! - `inheritance`: priority-inheritance interaction in `set_priority`
//! - `checks`: fatal contract-violation checks (compiled out when disabled)
//! - `std-shim`: compatibility layer for testing on host

// Core modules
#[macro_use]
mod debug;

pub mod errors;
pub mod kernel;
pub mod mem;
pub mod port;
pub mod sched;
pub mod thread;
pub mod time;

#[cfg(test)]
extern crate std;

#[cfg(feature = "dynamic")]
extern crate alloc;

#[cfg(test)]
mod tests;

// Panic handler for bare-metal
#[cfg(all(not(test), not(feature = "std-shim")))]
use core::panic::PanicInfo;

#[cfg(all(not(test), not(feature = "std-shim")))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    // A panic here is a fatal contract violation; park the CPU.
    loop {
        core::hint::spin_loop();
    }
}

// ============================================================================
// Public API
// ============================================================================

// Kernel
pub use kernel::{Kernel, KernelConfig};

// Scheduler
pub use sched::{priority, PriorityScheduler, ReadyList, Scheduler};

// Threads
pub use thread::{
    AllocKind, EntryFn, Message, Priority, ThreadFlags, ThreadRef, ThreadReference, ThreadState,
    MSG_OK, MSG_RESET, MSG_TIMEOUT,
};
#[cfg(feature = "registry")]
pub use thread::registry::Registry;

// Working areas and allocators
#[cfg(feature = "dynamic")]
pub use mem::ThreadPool;
pub use mem::{
    min_working_area_size, working_area_size, StackSpan, WorkingArea, MIN_STACK_SIZE, WA_ALIGN,
};

// Port seam
pub use port::{DefaultPort, Port, StubPort};

// Time
pub use time::{Duration, Instant, TickCounter, TimerQueue};

// Errors
pub use errors::{SpawnError, SpawnResult};
