//! Hand-rolled error types for the allocator's public entry points.
//!
//! No `thiserror`/`anyhow` in the dependency set — every error type
//! here implements `std::fmt::Display` and `std::error::Error` by hand,
//! matching how the rest of the retrieved corpus handles errors.

use std::fmt;

/// Failures from [`crate::Allocator::new`] / [`crate::init`].
#[derive(Debug)]
pub enum InitError {
    /// `init()` was called a second time. Surfaced rather than ignored:
    /// a caller relying on a fresh allocator after a second `init()`
    /// call would otherwise silently observe the first instance.
    AlreadyInitialized,
    /// [`crate::os::RawRegion`] could not reserve its backing address
    /// space (e.g. `mmap`/`VirtualAlloc` failed).
    RawRegionUnavailable,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::AlreadyInitialized => {
                write!(f, "allocator already initialized")
            }
            InitError::RawRegionUnavailable => {
                write!(f, "failed to reserve the raw backing region")
            }
        }
    }
}

impl std::error::Error for InitError {}

/// Diagnostic-only conditions that are never returned as `Result`s from
/// `allocate`/`deallocate` (see SPEC_FULL.md §7) but are logged via
/// [`log`] at the site where they occur.
#[derive(Debug)]
pub enum DiagnosticError {
    /// The raw region has no more address space to commit; `allocate`
    /// returns a null pointer.
    OutOfMemory,
    /// The CPU-affinity query failed; the request falls back to the
    /// global heap.
    AffinityQueryFailure,
}

impl fmt::Display for DiagnosticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticError::OutOfMemory => write!(f, "raw region exhausted"),
            DiagnosticError::AffinityQueryFailure => write!(f, "cpu affinity query failed"),
        }
    }
}

impl std::error::Error for DiagnosticError {}
