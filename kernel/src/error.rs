//! Recoverable kernel errors.
//!
//! Only conditions the caller can act on live here. Broken invariants
//! never become a `KernelError`; they go straight to `kassert!` and halt.

use core::fmt;

/// A recoverable failure reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A blocking operation gave up before its condition was met.
    TimedOut,
}

impl KernelError {
    /// Numeric status code for C-style callers (`ERR_TIMED_OUT` is -13).
    pub const fn status(self) -> i32 {
        match self {
            KernelError::TimedOut => -13,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::TimedOut => f.write_str("timed out"),
        }
    }
}

impl core::error::Error for KernelError {}

pub type KResult<T> = Result<T, KernelError>;
