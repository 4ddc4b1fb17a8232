//! Collector configuration

use crate::error::{GcError, GcResult};
use crate::flags::RuntimeFlags;

/// Collector algorithm, selected by the integer `GCAlgo` flag.
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcAlgorithm {
    /// Bump allocation, never collects
    Zero = 0,
    /// Stop-the-world mark-sweep with a first-fit free list
    MarkSweep = 1,
    /// Reserved for a compacting collector; not implemented
    ThreadedCompaction = 2,
}

impl GcAlgorithm {
    /// Decode a `GCAlgo` selector.
    pub fn from_selector(selector: i64) -> GcResult<Self> {
        match selector {
            0 => Ok(Self::Zero),
            1 => Ok(Self::MarkSweep),
            2 => Ok(Self::ThreadedCompaction),
            other => Err(GcError::UnsupportedAlgorithm(other)),
        }
    }

    /// Integer selector for this algorithm.
    pub const fn selector(self) -> i64 {
        self as i64
    }
}

/// Resolved collector configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Arena size in bytes (default: 6KB)
    pub heap_size: usize,
    /// Collector algorithm (default: mark-sweep)
    pub algorithm: GcAlgorithm,
    /// Log a summary after every collection
    pub print_gc_statistics: bool,
    /// Log every allocated object (debug builds only)
    pub print_allocated_objects: bool,
    /// Merge adjacent free chunks during sweep
    pub coalesce_free_chunks: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            heap_size: 6 * 1024,
            algorithm: GcAlgorithm::MarkSweep,
            print_gc_statistics: false,
            print_allocated_objects: false,
            coalesce_free_chunks: false,
        }
    }
}

impl GcConfig {
    /// Resolve runtime flags into a configuration.
    pub fn from_flags(flags: &RuntimeFlags) -> GcResult<Self> {
        Ok(Self {
            heap_size: parse_heap_size(&flags.max_heap_size)?,
            algorithm: GcAlgorithm::from_selector(flags.gc_algo)?,
            print_gc_statistics: flags.print_gc_statistics,
            print_allocated_objects: flags.print_allocated_objects,
            coalesce_free_chunks: flags.coalesce_free_chunks,
        })
    }

    /// Same configuration with a different heap size.
    pub fn with_heap_size(mut self, heap_size: usize) -> Self {
        self.heap_size = heap_size;
        self
    }

    /// Same configuration with a different algorithm.
    pub fn with_algorithm(mut self, algorithm: GcAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

/// Parse a human-readable size such as `6Kb`, `512`, `2M` or `1gb`.
pub fn parse_heap_size(text: &str) -> GcResult<usize> {
    let invalid = || GcError::InvalidHeapSize(text.to_string());

    let trimmed = text.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(digits_end);

    let value: usize = digits.parse().map_err(|_| invalid())?;
    let multiplier: usize = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        _ => return Err(invalid()),
    };

    match value.checked_mul(multiplier) {
        Some(0) | None => Err(invalid()),
        Some(size) => Ok(size),
    }
}
