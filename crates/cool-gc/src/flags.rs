//! Runtime flags
//!
//! Flags are picked out of the program's argument list before the collector
//! is built:
//!
//! - `+Name` / `-Name` switch a boolean flag on or off
//! - `Name=value` sets an integer or string flag
//!
//! Arguments that match no flag are left for the program.

use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use crate::error::FlagError;

/// Process-wide runtime flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFlags {
    /// `PrintGCStatistics`: log a summary after every collection
    pub print_gc_statistics: bool,
    /// `PrintAllocatedObjects`: log every allocation (debug builds only)
    pub print_allocated_objects: bool,
    /// `CoalesceFreeChunks`: merge adjacent free chunks during sweep
    pub coalesce_free_chunks: bool,
    /// `MaxHeapSize`: arena size, e.g. `6Kb`
    pub max_heap_size: String,
    /// `GCAlgo`: collector selector
    pub gc_algo: i64,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            print_gc_statistics: false,
            print_allocated_objects: false,
            coalesce_free_chunks: false,
            max_heap_size: "6Kb".to_string(),
            // Mark-sweep; selector 2 (compaction) is reserved.
            gc_algo: 1,
        }
    }
}

#[derive(Clone, Copy)]
enum FlagSlot {
    Bool(fn(&mut RuntimeFlags) -> &mut bool),
    Int(fn(&mut RuntimeFlags) -> &mut i64),
    Str(fn(&mut RuntimeFlags) -> &mut String),
}

fn flag_table() -> &'static FxHashMap<&'static str, FlagSlot> {
    static TABLE: OnceLock<FxHashMap<&'static str, FlagSlot>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = FxHashMap::default();
        table.insert(
            "PrintGCStatistics",
            FlagSlot::Bool(|f| &mut f.print_gc_statistics),
        );
        #[cfg(debug_assertions)]
        table.insert(
            "PrintAllocatedObjects",
            FlagSlot::Bool(|f| &mut f.print_allocated_objects),
        );
        table.insert(
            "CoalesceFreeChunks",
            FlagSlot::Bool(|f| &mut f.coalesce_free_chunks),
        );
        table.insert("MaxHeapSize", FlagSlot::Str(|f| &mut f.max_heap_size));
        table.insert("GCAlgo", FlagSlot::Int(|f| &mut f.gc_algo));
        table
    })
}

impl RuntimeFlags {
    /// Apply `arg` if it names a flag. Returns whether it was consumed.
    pub fn maybe_set(&mut self, arg: &str) -> Result<bool, FlagError> {
        let table = flag_table();

        if let Some((sign, name)) = arg.split_at_checked(1)
            && (sign == "+" || sign == "-")
            && let Some(FlagSlot::Bool(slot)) = table.get(name)
        {
            *slot(self) = sign == "+";
            return Ok(true);
        }

        let Some((name, value)) = arg.split_once('=') else {
            return Ok(false);
        };
        match table.get(name) {
            Some(FlagSlot::Int(slot)) => {
                *slot(self) = value.trim().parse().map_err(|_| FlagError::InvalidInt {
                    flag: name.to_string(),
                    value: value.to_string(),
                })?;
                Ok(true)
            }
            Some(FlagSlot::Str(slot)) => {
                *slot(self) = value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Parse flags out of `args`, skipping the program name.
    pub fn process_runtime_args<I, S>(args: I) -> Result<Self, FlagError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flags = Self::default();
        for arg in args.into_iter().skip(1) {
            flags.maybe_set(arg.as_ref())?;
        }
        Ok(flags)
    }
}

static FLAGS: OnceLock<RuntimeFlags> = OnceLock::new();

/// Install the process-wide flags. Fails, handing the flags back, if flags
/// were already installed or read.
pub fn install(flags: RuntimeFlags) -> Result<(), RuntimeFlags> {
    FLAGS.set(flags)
}

/// Process-wide flags; defaults if none were installed.
pub fn global() -> &'static RuntimeFlags {
    FLAGS.get_or_init(RuntimeFlags::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_flags() {
        let mut flags = RuntimeFlags::default();
        assert_eq!(flags.maybe_set("+PrintGCStatistics"), Ok(true));
        assert!(flags.print_gc_statistics);
        assert_eq!(flags.maybe_set("-PrintGCStatistics"), Ok(true));
        assert!(!flags.print_gc_statistics);
        assert_eq!(flags.maybe_set("+CoalesceFreeChunks"), Ok(true));
        assert!(flags.coalesce_free_chunks);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_debug_only_flag() {
        let mut flags = RuntimeFlags::default();
        assert_eq!(flags.maybe_set("+PrintAllocatedObjects"), Ok(true));
        assert!(flags.print_allocated_objects);
    }

    #[test]
    fn test_value_flags() {
        let mut flags = RuntimeFlags::default();
        assert_eq!(flags.maybe_set("MaxHeapSize=64Kb"), Ok(true));
        assert_eq!(flags.max_heap_size, "64Kb");
        assert_eq!(flags.maybe_set("GCAlgo=0"), Ok(true));
        assert_eq!(flags.gc_algo, 0);
    }

    #[test]
    fn test_unknown_arguments_ignored() {
        let mut flags = RuntimeFlags::default();
        for arg in ["program.cl", "+Unknown", "Other=1", "", "=", "+MaxHeapSize"] {
            assert_eq!(flags.maybe_set(arg), Ok(false), "{arg:?}");
        }
        assert_eq!(flags, RuntimeFlags::default());
    }

    #[test]
    fn test_bad_int() {
        let mut flags = RuntimeFlags::default();
        assert_eq!(
            flags.maybe_set("GCAlgo=fast"),
            Err(FlagError::InvalidInt {
                flag: "GCAlgo".to_string(),
                value: "fast".to_string(),
            })
        );
    }

    #[test]
    fn test_process_runtime_args_skips_program_name() {
        let flags = RuntimeFlags::process_runtime_args([
            "+PrintGCStatistics",
            "MaxHeapSize=1Mb",
            "main.cl",
            "GCAlgo=1",
        ])
        .unwrap();
        assert!(!flags.print_gc_statistics);
        assert_eq!(flags.max_heap_size, "1Mb");
        assert_eq!(flags.gc_algo, 1);
    }
}
