//! Kernel error and wait-status types.

use core::fmt;

/// Recoverable failures reported to the immediate caller.
///
/// Broken invariants (unlocking a mutex held by another task, putting a
/// message that is already queued, ...) are not represented here. They are
/// programming errors and halt the system through a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An object table is full or the allocator refused a stack or pool
    /// buffer.
    NoMemory,
    /// The operation only applies to the other queue discipline.
    WrongQueueKind,
    /// The driver queue has no control callback installed.
    NoControl,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMemory => f.write_str("out of memory"),
            Self::WrongQueueKind => f.write_str("operation not supported by this queue type"),
            Self::NoControl => f.write_str("queue has no control callback"),
        }
    }
}

/// Outcome of a bounded wait. A timeout is an expected result, not an
/// error.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The resource was acquired.
    Ok,
    /// The wait gave up: the tick countdown expired, the caller polled an
    /// unavailable resource, or the task was force-woken.
    Timeout,
}

impl Status {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}
