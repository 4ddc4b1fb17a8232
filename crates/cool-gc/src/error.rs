//! Error types for cool-gc
//!
//! Invariant violations are panics; only resource exhaustion and
//! configuration problems are reported as values.

use thiserror::Error;

/// Errors reported by collectors and their configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GcError {
    /// No free chunk fits the request, even after a collection
    #[error("out of memory: cannot allocate {requested} bytes in a {heap_size}-byte heap")]
    OutOfMemory {
        /// Requested object size
        requested: usize,
        /// Arena size
        heap_size: usize,
    },

    /// The algorithm selector names no implemented collector
    #[error("unsupported GC algorithm selector {0}")]
    UnsupportedAlgorithm(i64),

    /// A heap size string could not be parsed
    #[error("invalid heap size '{0}'")]
    InvalidHeapSize(String),

    /// The arena cannot hold a single object header
    #[error("heap size {size} is smaller than one object header ({min} bytes)")]
    HeapTooSmall {
        /// Requested arena size
        size: usize,
        /// Smallest usable arena size
        min: usize,
    },
}

/// Errors produced while parsing runtime flags.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlagError {
    /// An integer flag received a non-integer value
    #[error("invalid integer value '{value}' for flag {flag}")]
    InvalidInt {
        /// Flag name
        flag: String,
        /// Offending value
        value: String,
    },
}

/// Result type alias for collector operations
pub type GcResult<T> = Result<T, GcError>;
