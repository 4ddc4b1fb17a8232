//! Mark/Sweep Garbage Collector
//!
//! Stop-the-world mark-sweep over a single arena, following the classic
//! algorithm from The Garbage Collection Handbook (Jones et al., §2.1).
//!
//! ## Design
//!
//! - **Interleaved heap**: live objects and free chunks share the arena; every
//!   region starts with a header carrying its size, so the heap is walked by
//!   hopping from header to header
//! - **First-fit allocation**: the first free chunk that fits is carved, and
//!   the remainder (if any) becomes a new free chunk
//! - **Collect on exhaustion**: a failed search runs one collection and
//!   retries before giving up
//! - **Optional coalescing**: sweep can merge runs of adjacent free chunks

use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::collector::{Gc, GcStats, census, install_header, object_size};
use crate::config::GcConfig;
use crate::error::{GcError, GcResult};
use crate::heap::{self, Heap};
use crate::marker::Marker;
use crate::object::{Address, HEADER_SIZE, Klass, ObjectRef};
use crate::roots::RootStack;

/// Result of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SweepOutcome {
    reclaimed: usize,
    freed: usize,
}

/// Mark-sweep collector.
#[derive(Debug)]
pub struct MarkSweepGc {
    heap: Heap,
    roots: RootStack,
    marker: Marker,
    stats: GcStats,
    print_gc_statistics: bool,
    print_allocated_objects: bool,
    coalesce_free_chunks: bool,
}

impl MarkSweepGc {
    /// Create a collector over a `heap_size`-byte arena.
    pub fn new(heap_size: usize) -> GcResult<Self> {
        Self::with_config(&GcConfig::default().with_heap_size(heap_size))
    }

    /// Create a collector from a configuration (the algorithm is ignored).
    pub fn with_config(config: &GcConfig) -> GcResult<Self> {
        let heap = Heap::new(config.heap_size)?;

        // The whole arena starts out as one free chunk.
        // SAFETY: the arena holds at least one header
        unsafe { ObjectRef::from_address(heap.start()) }.set_unused(heap.size());

        Ok(Self {
            heap,
            roots: RootStack::new(),
            marker: Marker::new(),
            stats: GcStats::default(),
            print_gc_statistics: config.print_gc_statistics,
            print_allocated_objects: config.print_allocated_objects,
            coalesce_free_chunks: config.coalesce_free_chunks,
        })
    }

    /// Total size of all free chunks.
    pub fn free_bytes(&self) -> usize {
        self.heap
            .regions(self.heap.size())
            .filter(|obj| obj.is_unused())
            .map(|obj| obj.size())
            .sum()
    }

    /// Live objects per tag.
    pub fn heap_census(&self) -> FxHashMap<i32, usize> {
        census(&self.heap, self.heap.size())
    }

    /// First free chunk that can hold `size` bytes.
    ///
    /// A chunk fits when it matches exactly or leaves room for the header of
    /// the remainder chunk.
    fn find_free_chunk(&self, size: usize) -> Option<ObjectRef> {
        self.heap.regions(self.heap.size()).find(|chunk| {
            chunk.is_unused()
                && (chunk.size() == size || chunk.size() >= size.saturating_add(HEADER_SIZE))
        })
    }

    /// Split `size` bytes off the front of `chunk`.
    fn carve(&self, chunk: ObjectRef, size: usize) -> Address {
        let chunk_size = chunk.size();
        if chunk_size > size {
            // SAFETY: find_free_chunk guarantees room for the remainder header
            let rest = unsafe { ObjectRef::from_address(chunk.address().add(size)) };
            rest.set_unused(chunk_size - size);
        }
        chunk.address()
    }

    /// Turn `obj` into a free chunk of the same size.
    fn free(obj: ObjectRef) {
        obj.set_unused(obj.size());
    }

    fn sweep(&self) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        // Start of the free run the current region may be merged into.
        let mut free_run: Option<ObjectRef> = None;

        for obj in self.heap.regions(self.heap.size()) {
            let size = obj.size();

            if obj.is_unused() {
                // A stale reference may have marked a free chunk.
                obj.unset_marked();
            } else if obj.is_marked() {
                obj.unset_marked();
                free_run = None;
                continue;
            } else {
                Self::free(obj);
                outcome.reclaimed += size;
                outcome.freed += 1;
            }

            if !self.coalesce_free_chunks {
                continue;
            }
            match free_run {
                Some(run) => run.set_unused(run.size() + size),
                None => free_run = Some(obj),
            }
        }

        outcome
    }

    #[cfg(debug_assertions)]
    fn verify_heap(&self) {
        let mut end = self.heap.start();
        for obj in self.heap.regions(self.heap.size()) {
            end = obj.next();
        }
        debug_assert_eq!(end, self.heap.end(), "heap walk must end at the heap end");
    }
}

impl Gc for MarkSweepGc {
    fn try_allocate_with_appendix(
        &mut self,
        klass: &Klass,
        appendix: usize,
    ) -> GcResult<Address> {
        let size = object_size(klass, appendix, self.heap.size())?;

        let chunk = match self.find_free_chunk(size) {
            Some(chunk) => chunk,
            None => {
                self.collect();
                self.find_free_chunk(size).ok_or(GcError::OutOfMemory {
                    requested: size,
                    heap_size: self.heap.size(),
                })?
            }
        };

        let addr = self.carve(chunk, size);
        install_header(addr, klass, size, self.print_allocated_objects);
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
        let start = Instant::now();

        tracing::debug!(
            target: "cool::gc",
            roots = self.roots.root_count(),
            scopes = self.roots.depth(),
            live_bytes = self.stats.live_bytes,
            "GC cycle starting"
        );

        // Phase 1: Mark from every root scope
        let marked = self.marker.mark_from_roots(&self.roots, &self.heap);

        // Phase 2: Sweep unmarked objects
        let outcome = self.sweep();

        #[cfg(debug_assertions)]
        self.verify_heap();

        let elapsed = start.elapsed();
        self.stats.collections += 1;
        self.stats.last_marked = marked;
        self.stats.last_freed = outcome.freed;
        self.stats.last_reclaimed = outcome.reclaimed;
        self.stats.total_reclaimed += outcome.reclaimed;
        self.stats.live_bytes -= outcome.reclaimed;
        self.stats.last_pause = elapsed;
        self.stats.total_pause += elapsed;

        if self.print_gc_statistics {
            tracing::info!(
                target: "cool::gc",
                collection = self.stats.collections,
                marked_objects = marked,
                freed_objects = outcome.freed,
                reclaimed_bytes = outcome.reclaimed,
                live_bytes = self.stats.live_bytes,
                pause_us = elapsed.as_micros() as u64,
                "GC cycle complete"
            );
        }

        outcome.reclaimed
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
