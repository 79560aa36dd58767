//! Architecture port seam.
//!
//! Register save/restore, stack frame layout and the actual switch
//! instruction sequence are the port layer's business, not this crate's.
//! The core only needs three things from a port: a saved-context type, a way
//! to arrange a fresh context so that dispatching it enters `entry(arg)`,
//! and the switch primitive itself. Everything else (interrupt vectors,
//! the timer tick source, the idle thread) lives in the embedding image.

use crate::mem::StackSpan;
use crate::thread::EntryFn;

/// Context-switch primitives supplied by the target port.
pub trait Port {
    /// Saved register state for one thread.
    type Context: Default;

    /// Prepare `ctx` so that the first dispatch of this thread begins
    /// execution at `entry(arg)` on the given stack span.
    ///
    /// The port's entry trampoline is expected to pass the value returned
    /// by `entry` to the kernel's exit path, so a thread may terminate by
    /// simply returning from its entry function.
    fn init_context(ctx: &mut Self::Context, stack: StackSpan, entry: EntryFn, arg: *mut ());

    /// Save the current CPU context into `from` and resume execution from
    /// `to`.
    ///
    /// # Safety
    ///
    /// Both pointers must reference live, initialized contexts, and the
    /// caller must hold the critical section for the duration of the
    /// handoff.
    unsafe fn switch(from: *mut Self::Context, to: *const Self::Context);
}

/// No-op port used for host builds and tests.
///
/// The stub records what a real port would program into the initial frame so
/// the setup path stays observable, and its switch does nothing: on the host
/// there is only one real CPU context.
pub struct StubPort;

/// Saved "context" of the stub port.
pub struct StubContext {
    /// Entry point recorded by `init_context`.
    pub entry: Option<EntryFn>,
    /// Entry argument recorded by `init_context`.
    pub arg: *mut (),
    /// Initial stack pointer recorded by `init_context`.
    pub stack_top: *mut u8,
}

impl Default for StubContext {
    fn default() -> Self {
        Self {
            entry: None,
            arg: core::ptr::null_mut(),
            stack_top: core::ptr::null_mut(),
        }
    }
}

impl Port for StubPort {
    type Context = StubContext;

    fn init_context(ctx: &mut Self::Context, stack: StackSpan, entry: EntryFn, arg: *mut ()) {
        ctx.entry = Some(entry);
        ctx.arg = arg;
        ctx.stack_top = stack.top();
    }

    unsafe fn switch(_from: *mut Self::Context, _to: *const Self::Context) {}
}

/// Port selected for the current build.
///
/// Real targets substitute their own implementation at the image level; the
/// stub keeps the core compilable and testable everywhere else.
pub type DefaultPort = StubPort;

/// Saved-context type of the default port, embedded in every TCB.
pub type Context = <DefaultPort as Port>::Context;
