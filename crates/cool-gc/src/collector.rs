//! Collector interface and the bump allocator

use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::config::{GcAlgorithm, GcConfig};
use crate::error::{GcError, GcResult};
use crate::heap::{self, Heap};
use crate::mark_sweep::MarkSweepGc;
use crate::object::{Address, Klass, ObjectRef};
#[cfg(debug_assertions)]
use crate::object::{LAYOUT_HEADER_SIZE, LayoutRef};
use crate::roots::{RootStack, StackRecord};

/// Operations generated code uses to manage the heap.
pub trait Gc {
    /// Allocate an object of `klass` followed by `appendix` payload bytes.
    ///
    /// The header is initialized and unmarked; field contents are left to the
    /// caller (see [`ObjectRef::zero_fields`]).
    fn try_allocate_with_appendix(&mut self, klass: &Klass, appendix: usize)
    -> GcResult<Address>;

    /// Read a `T` at `base + offset`.
    ///
    /// # Safety
    /// `base + offset` must lie inside a live object and be aligned for `T`;
    /// offsets come from the object's [`Klass`].
    unsafe fn read<T: Copy>(&self, base: Address, offset: usize) -> T;

    /// Write `src` at `base + offset`.
    ///
    /// # Safety
    /// Same contract as [`read`](Self::read).
    unsafe fn write<T: Copy>(&mut self, base: Address, offset: usize, src: T);

    /// Run a full collection. Returns the number of bytes reclaimed.
    fn collect(&mut self) -> usize;

    /// Root scopes.
    fn root_stack(&self) -> &RootStack;

    /// Mutable root scopes.
    fn root_stack_mut(&mut self) -> &mut RootStack;

    /// Heap arena.
    fn heap(&self) -> &Heap;

    /// Statistics.
    fn stats(&self) -> &GcStats;

    /// Allocate an object of `klass`.
    fn try_allocate(&mut self, klass: &Klass) -> GcResult<Address> {
        self.try_allocate_with_appendix(klass, 0)
    }

    /// Allocate an object of `klass`.
    ///
    /// # Panics
    /// Running out of memory is fatal.
    fn allocate(&mut self, klass: &Klass) -> Address {
        match self.try_allocate(klass) {
            Ok(addr) => addr,
            Err(err) => {
                tracing::error!(target: "cool::gc", error = %err, "allocation failed");
                panic!("{err}");
            }
        }
    }

    /// Open a root scope that lasts until the returned guard is dropped.
    fn enter_scope(&mut self) -> StackRecord<'_, Self>
    where
        Self: Sized,
    {
        StackRecord::new(self)
    }
}

/// GC statistics
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Number of collections
    pub collections: u64,
    /// Number of allocations
    pub allocations: u64,
    /// Total bytes handed out
    pub allocated_bytes: usize,
    /// Bytes held by objects not yet reclaimed
    pub live_bytes: usize,
    /// Bytes reclaimed in last collection
    pub last_reclaimed: usize,
    /// Bytes reclaimed across all collections
    pub total_reclaimed: usize,
    /// Objects freed in last collection
    pub last_freed: usize,
    /// Objects marked in last collection
    pub last_marked: usize,
    /// Pause time of the last collection
    pub last_pause: Duration,
    /// Total pause time
    pub total_pause: Duration,
}

impl GcStats {
    pub(crate) fn record_allocation(&mut self, size: usize) {
        self.allocations += 1;
        self.allocated_bytes += size;
        self.live_bytes += size;
    }
}

/// Count objects per tag, skipping free chunks.
pub(crate) fn census(heap: &Heap, limit: usize) -> FxHashMap<i32, usize> {
    let mut counts = FxHashMap::default();
    for obj in heap.regions(limit).filter(|obj| !obj.is_unused()) {
        *counts.entry(obj.tag()).or_insert(0) += 1;
    }
    counts
}

/// Byte size of a `klass` object with an `appendix` payload.
pub(crate) fn object_size(klass: &Klass, appendix: usize, heap_size: usize) -> GcResult<usize> {
    klass
        .checked_size_with_appendix(appendix)
        .ok_or(GcError::OutOfMemory {
            requested: usize::MAX,
            heap_size,
        })
}

/// Install a header and report the allocation if requested.
pub(crate) fn install_header(
    addr: Address,
    klass: &Klass,
    size: usize,
    #[cfg_attr(not(debug_assertions), allow(unused_variables))] trace: bool,
) -> ObjectRef {
    // SAFETY: callers pass the start of a carved region of `size` bytes
    let obj = unsafe { ObjectRef::from_address(addr) };
    obj.init(klass.ty().tag(), size);

    #[cfg(debug_assertions)]
    if trace {
        let mut dump = Vec::new();
        if dump_object(obj, &mut dump).is_ok() {
            tracing::info!(
                target: "cool::gc",
                object = %String::from_utf8_lossy(&dump),
                "allocated object"
            );
        }
    }

    obj
}

/// Dump `obj` in generated-code shape when it has room for a dispatch table.
#[cfg(debug_assertions)]
fn dump_object(obj: ObjectRef, out: &mut impl std::io::Write) -> std::io::Result<()> {
    if obj.size() >= LAYOUT_HEADER_SIZE {
        LayoutRef::new(obj).dump(out)
    } else {
        obj.dump(out)
    }
}

/// Bump allocator that never collects.
#[derive(Debug)]
pub struct ZeroGc {
    heap: Heap,
    /// Offset of the next allocation
    heap_pos: usize,
    roots: RootStack,
    stats: GcStats,
    print_allocated_objects: bool,
}

impl ZeroGc {
    /// Create a collector over a `heap_size`-byte arena.
    pub fn new(heap_size: usize) -> GcResult<Self> {
        Self::with_config(&GcConfig::default().with_heap_size(heap_size))
    }

    /// Create a collector from a configuration (the algorithm is ignored).
    pub fn with_config(config: &GcConfig) -> GcResult<Self> {
        Ok(Self {
            heap: Heap::new(config.heap_size)?,
            heap_pos: 0,
            roots: RootStack::new(),
            stats: GcStats::default(),
            print_allocated_objects: config.print_allocated_objects,
        })
    }

    /// Address of the next allocation.
    pub fn heap_pos(&self) -> Address {
        self.heap.at(self.heap_pos)
    }

    /// Bytes left before the arena is exhausted.
    pub fn free_bytes(&self) -> usize {
        self.heap.size() - self.heap_pos
    }

    /// Live objects per tag.
    pub fn heap_census(&self) -> FxHashMap<i32, usize> {
        census(&self.heap, self.heap_pos)
    }
}

impl Gc for ZeroGc {
    fn try_allocate_with_appendix(
        &mut self,
        klass: &Klass,
        appendix: usize,
    ) -> GcResult<Address> {
        let size = object_size(klass, appendix, self.heap.size())?;
        if size > self.free_bytes() {
            return Err(GcError::OutOfMemory {
                requested: size,
                heap_size: self.heap.size(),
            });
        }

        let addr = self.heap.at(self.heap_pos);
        install_header(addr, klass, size, self.print_allocated_objects);
        self.heap_pos += size;
        self.stats.record_allocation(size);
        Ok(addr)
    }

    #[inline(always)]
    unsafe fn read<T: Copy>(&self, base: Address, offset: usize) -> T {
        // SAFETY: caller contract
        unsafe { heap::load(base, offset) }
    }

    #[inline(always)]
    unsafe fn write<T: Copy>(&mut self, base: Address, offset: usize, src: T) {
        // SAFETY: caller contract
        unsafe { heap::store(base, offset, src) }
    }

    fn collect(&mut self) -> usize {
        0
    }

    fn root_stack(&self) -> &RootStack {
        &self.roots
    }

    fn root_stack_mut(&mut self) -> &mut RootStack {
        &mut self.roots
    }

    fn heap(&self) -> &Heap {
        &self.heap
    }

    fn stats(&self) -> &GcStats {
        &self.stats
    }
}

/// Collector chosen at startup by [`GcAlgorithm`].
#[derive(Debug)]
pub enum Collector {
    /// Bump allocator
    Zero(ZeroGc),
    /// Mark-sweep collector
    MarkSweep(MarkSweepGc),
}

impl Collector {
    /// Build the collector the configuration selects.
    pub fn from_config(config: &GcConfig) -> GcResult<Self> {
        match config.algorithm {
            GcAlgorithm::Zero => Ok(Self::Zero(ZeroGc::with_config(config)?)),
            GcAlgorithm::MarkSweep => Ok(Self::MarkSweep(MarkSweepGc::with_config(config)?)),
            GcAlgorithm::ThreadedCompaction => Err(GcError::UnsupportedAlgorithm(
                GcAlgorithm::ThreadedCompaction.selector(),
            )),
        }
    }

    /// Algorithm of the active collector.
    pub fn algorithm(&self) -> GcAlgorithm {
        match self {
            Self::Zero(_) => GcAlgorithm::Zero,
            Self::MarkSweep(_) => GcAlgorithm::MarkSweep,
        }
    }

    /// Bytes available for allocation without collecting.
    pub fn free_bytes(&self) -> usize {
        match self {
            Self::Zero(gc) => gc.free_bytes(),
            Self::MarkSweep(gc) => gc.free_bytes(),
        }
    }

    /// Live objects per tag.
    pub fn heap_census(&self) -> FxHashMap<i32, usize> {
        match self {
            Self::Zero(gc) => gc.heap_census(),
            Self::MarkSweep(gc) => gc.heap_census(),
        }
    }
}

impl Gc for Collector {
    fn try_allocate_with_appendix(
        &mut self,
        klass: &Klass,
        appendix: usize,
    ) -> GcResult<Address> {
        match self {
            Self::Zero(gc) => gc.try_allocate_with_appendix(klass, appendix),
            Self::MarkSweep(gc) => gc.try_allocate_with_appendix(klass, appendix),
        }
    }

    #[inline(always)]
    unsafe fn read<T: Copy>(&self, base: Address, offset: usize) -> T {
        // SAFETY: caller contract
        match self {
            Self::Zero(gc) => unsafe { gc.read(base, offset) },
            Self::MarkSweep(gc) => unsafe { gc.read(base, offset) },
        }
    }

    #[inline(always)]
    unsafe fn write<T: Copy>(&mut self, base: Address, offset: usize, src: T) {
        // SAFETY: caller contract
        match self {
            Self::Zero(gc) => unsafe { gc.write(base, offset, src) },
            Self::MarkSweep(gc) => unsafe { gc.write(base, offset, src) },
        }
    }

    fn collect(&mut self) -> usize {
        match self {
            Self::Zero(gc) => gc.collect(),
            Self::MarkSweep(gc) => gc.collect(),
        }
    }

    fn root_stack(&self) -> &RootStack {
        match self {
            Self::Zero(gc) => gc.root_stack(),
            Self::MarkSweep(gc) => gc.root_stack(),
        }
    }

    fn root_stack_mut(&mut self) -> &mut RootStack {
        match self {
            Self::Zero(gc) => gc.root_stack_mut(),
            Self::MarkSweep(gc) => gc.root_stack_mut(),
        }
    }

    fn heap(&self) -> &Heap {
        match self {
            Self::Zero(gc) => gc.heap(),
            Self::MarkSweep(gc) => gc.heap(),
        }
    }

    fn stats(&self) -> &GcStats {
        match self {
            Self::Zero(gc) => gc.stats(),
            Self::MarkSweep(gc) => gc.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{HEADER_SIZE, ObjectType, WORD_SIZE};

    #[test]
    fn test_zero_gc_bumps() {
        let mut gc = ZeroGc::new(256).unwrap();
        let klass = Klass::new(2, ObjectType::Other);

        let start = gc.heap_pos();
        let a = gc.allocate(&klass);
        let b = gc.allocate(&klass);

        assert_eq!(a, start);
        assert_eq!(gc.heap().offset_of(b), klass.size());
        assert_eq!(gc.free_bytes(), 256 - 2 * klass.size());
        assert_eq!(gc.stats().allocations, 2);
    }

    #[test]
    fn test_zero_gc_header() {
        let mut gc = ZeroGc::new(256).unwrap();
        let klass = Klass::new(3, ObjectType::Integer);
        let obj = unsafe { ObjectRef::from_address(gc.allocate(&klass)) };

        assert_eq!(obj.size(), klass.size());
        assert_eq!(obj.tag(), ObjectType::Integer.tag());
        assert!(!obj.is_marked());
    }

    #[test]
    fn test_zero_gc_read_write() {
        let mut gc = ZeroGc::new(256).unwrap();
        let klass = Klass::new(2, ObjectType::Other);
        let obj = gc.allocate(&klass);

        unsafe {
            gc.write(obj, klass.offset(1), -42i64);
            assert_eq!(gc.read::<i64>(obj, klass.offset(1)), -42);
        }
    }

    #[test]
    fn test_zero_gc_collect_is_noop() {
        let mut gc = ZeroGc::new(64).unwrap();
        gc.allocate(&Klass::new(0, ObjectType::Other));
        assert_eq!(gc.collect(), 0);
        assert_eq!(gc.free_bytes(), 64 - HEADER_SIZE);
    }

    #[test]
    fn test_zero_gc_out_of_memory() {
        let mut gc = ZeroGc::new(2 * HEADER_SIZE).unwrap();
        let klass = Klass::new(1, ObjectType::Other);
        gc.allocate(&klass);

        assert_eq!(
            gc.try_allocate(&klass),
            Err(GcError::OutOfMemory {
                requested: HEADER_SIZE + WORD_SIZE,
                heap_size: 2 * HEADER_SIZE,
            })
        );
    }

    #[test]
    #[should_panic(expected = "out of memory")]
    fn test_allocate_out_of_memory_is_fatal() {
        let mut gc = ZeroGc::new(HEADER_SIZE).unwrap();
        let klass = Klass::new(0, ObjectType::Other);
        gc.allocate(&klass);
        gc.allocate(&klass);
    }

    #[test]
    fn test_collector_from_config() {
        let config = GcConfig::default();
        let gc = Collector::from_config(&config).unwrap();
        assert_eq!(gc.algorithm(), GcAlgorithm::MarkSweep);

        let gc = Collector::from_config(&config.clone().with_algorithm(GcAlgorithm::Zero)).unwrap();
        assert_eq!(gc.algorithm(), GcAlgorithm::Zero);

        assert_eq!(
            Collector::from_config(&config.with_algorithm(GcAlgorithm::ThreadedCompaction))
                .unwrap_err(),
            GcError::UnsupportedAlgorithm(2)
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_allocation_dump_shows_dispatch_table() {
        let mut gc = ZeroGc::new(256).unwrap();
        let with_table = gc.allocate(&Klass::new(2, ObjectType::Other));
        let with_table = unsafe { ObjectRef::from_address(with_table) };
        with_table.zero_fields(0);
        let bare = gc.allocate(&Klass::new(0, ObjectType::Other));
        let bare = unsafe { ObjectRef::from_address(bare) };

        let mut out = Vec::new();
        dump_object(with_table, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("DispTable = 0"));
        assert!(text.contains("Field 0 : 0"));
        assert!(!text.contains("Field 1"));

        let mut out = Vec::new();
        dump_object(bare, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("DispTable"));
        assert!(text.contains(&format!("Size = {HEADER_SIZE}")));
    }

    #[test]
    fn test_zero_gc_rejects_overflowing_size() {
        let mut gc = ZeroGc::new(256).unwrap();
        let string = Klass::new(1, ObjectType::String);
        assert_eq!(
            gc.try_allocate_with_appendix(&string, usize::MAX - 3),
            Err(GcError::OutOfMemory {
                requested: usize::MAX,
                heap_size: 256,
            })
        );
        assert_eq!(gc.free_bytes(), 256);
        assert_eq!(gc.stats().allocations, 0);
    }

    #[test]
    fn test_census() {
        let mut gc = Collector::from_config(&GcConfig::default().with_algorithm(GcAlgorithm::Zero))
            .unwrap();
        gc.allocate(&Klass::new(1, ObjectType::Integer));
        gc.allocate(&Klass::new(2, ObjectType::Other));
        gc.allocate(&Klass::new(0, ObjectType::Other));

        let census = gc.heap_census();
        assert_eq!(census.get(&ObjectType::Integer.tag()), Some(&1));
        assert_eq!(census.get(&ObjectType::Other.tag()), Some(&2));
    }
}
