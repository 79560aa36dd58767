//! Error types for the threading core.
//!
//! Almost every failure in this crate is a contract violation and therefore
//! fatal (see the [`kernel_check!`](crate::kernel_check) family). The one
//! genuinely recoverable condition is resource exhaustion while creating a
//! dynamic thread, reported through [`SpawnError`].

use core::fmt;

/// Result type for dynamic thread creation.
pub type SpawnResult<T> = Result<T, SpawnError>;

/// Errors that can occur when creating a dynamic thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Kernel has not been initialized
    NotInitialized,
    /// The global allocator could not provide a working area
    OutOfMemory,
    /// The thread pool has no free working areas
    PoolExhausted,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NotInitialized => write!(f, "threading core not initialized"),
            SpawnError::OutOfMemory => write!(f, "out of memory for thread working area"),
            SpawnError::PoolExhausted => write!(f, "thread pool exhausted"),
        }
    }
}
