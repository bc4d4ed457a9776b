//! # Memory Error Types
//!
//! Every recoverable condition the allocators can report.

use thiserror::Error;

use crate::memory::AllocShape;

/// Errors that can occur in the allocator core.
///
/// None of these abort the process. `OutOfSpace` replaces the null pointer a
/// failed allocation would return; the release diagnostics are reported
/// *after* the underlying memory has already been handed back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// An allocator could not satisfy a request.
    #[error("out of space: requested {requested} bytes, {available} available")]
    OutOfSpace {
        /// Bytes requested, including alignment padding.
        requested: usize,
        /// Bytes that were still available.
        available: usize,
    },

    /// A tracked release used a different shape than its allocation.
    #[error("mismatched release at {file}:{line}: allocated as {expected}, released as {actual}")]
    ShapeMismatch {
        /// Source file of the original allocation.
        file: &'static str,
        /// Source line of the original allocation.
        line: u32,
        /// Shape recorded at allocation time.
        expected: AllocShape,
        /// Shape passed to the release.
        actual: AllocShape,
    },

    /// A tracked release targeted an address that was never recorded.
    #[error("releasing unknown pointer {address:#x}")]
    UnknownRelease {
        /// The untracked address.
        address: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for allocator operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

impl MemoryError {
    /// Shorthand for an out-of-space failure.
    #[inline]
    #[must_use]
    pub const fn out_of_space(requested: usize, available: usize) -> Self {
        Self::OutOfSpace { requested, available }
    }
}
