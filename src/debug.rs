//! Fatal contract-violation checks.
//!
//! The lifecycle API has no recoverable error paths: an operation either
//! succeeds per its contract or the caller has violated a precondition.
//! Violations are detected by [`kernel_check!`] (API preconditions) and
//! [`kernel_assert!`] (internal invariants). Both panic with diagnostic
//! context while the `checks` feature is enabled and compile to nothing
//! when it is disabled, so production images pay no runtime cost.

/// Check an API precondition.
///
/// Panics with the given message when the condition is false and the
/// `checks` feature is enabled.
#[macro_export]
macro_rules! kernel_check {
    ($cond:expr, $msg:expr) => {
        if cfg!(feature = "checks") && !($cond) {
            panic!(concat!("kernel check failed: ", $msg));
        }
    };
}

/// Check an internal kernel invariant.
///
/// Panics with the given message when the condition is false and the
/// `checks` feature is enabled.
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr, $msg:expr) => {
        if cfg!(feature = "checks") && !($cond) {
            panic!(concat!("kernel assertion failed: ", $msg));
        }
    };
}
