//! # Kernel Error Taxonomy
//!
//! A single typed error enum shared by every fallible kernel entry point.
//! Kernel APIs never panic on a reachable runtime condition; they return
//! this type (or a `bool` for the primitives the original design specified
//! as boolean, per [`crate::sync`]) and record the most recent value in
//! the controller's `last_error` field.

use core::fmt;

/// Errors a kernel API call can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsError {
    /// The task table is already at `config::OS_MAX_TASK` capacity.
    MaxTask,
    /// A requested priority falls outside `[OS_MAX_PRIORITY..=OS_MIN_PRIORITY]`.
    MaxPriority,
    /// A semaphore `take` timed out before the resource became available.
    Timeout,
    /// `delay` was called from interrupt context, where there is no task
    /// to block.
    DelayFromIsr,
    /// `queue_init` was given an `element_size` larger than
    /// `config::MAX_QUEUE_BYTES`.
    InvalidElementSize,
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            OsError::MaxTask => "task table is full",
            OsError::MaxPriority => "priority out of range",
            OsError::Timeout => "wait timed out",
            OsError::DelayFromIsr => "delay called from ISR context",
            OsError::InvalidElementSize => "queue element size exceeds capacity",
        };
        f.write_str(msg)
    }
}
