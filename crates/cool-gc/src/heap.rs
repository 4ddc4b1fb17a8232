//! Heap arena
//!
//! One contiguous, zero-initialized byte region reserved when a collector is
//! built. Regions inside it are discovered by hopping over each header's
//! recorded size.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{GcError, GcResult};
use crate::object::{Address, HEADER_SIZE, ObjectRef, WORD_SIZE};

/// Fixed-size arena backing a collector.
pub struct Heap {
    start: NonNull<u8>,
    size: usize,
    layout: Layout,
}

impl Heap {
    /// Reserve an arena of `size` bytes, rounded down to whole words.
    pub fn new(size: usize) -> GcResult<Self> {
        let size = size - size % WORD_SIZE;
        if size < HEADER_SIZE {
            return Err(GcError::HeapTooSmall {
                size,
                min: HEADER_SIZE,
            });
        }

        let layout = Layout::from_size_align(size, WORD_SIZE)
            .map_err(|_| GcError::InvalidHeapSize(size.to_string()))?;
        // SAFETY: layout has a non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(start) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout);
        };

        Ok(Self {
            start,
            size,
            layout,
        })
    }

    /// First byte of the arena.
    pub fn start(&self) -> Address {
        self.start.as_ptr()
    }

    /// One past the last byte of the arena.
    pub fn end(&self) -> Address {
        self.start.as_ptr().wrapping_add(self.size)
    }

    /// Arena size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Address at `offset` bytes from the start.
    pub fn at(&self, offset: usize) -> Address {
        assert!(offset <= self.size, "heap offset {offset} out of range");
        self.start.as_ptr().wrapping_add(offset)
    }

    /// Byte offset of `addr` from the arena start.
    pub fn offset_of(&self, addr: Address) -> usize {
        (addr as usize).wrapping_sub(self.start.as_ptr() as usize)
    }

    /// True if `addr` could be the start of an object in this arena:
    /// non-null, word-aligned, and with room for a header before the end.
    pub fn contains(&self, addr: Address) -> bool {
        if addr.is_null() || addr < self.start() {
            return false;
        }
        let offset = self.offset_of(addr);
        offset % WORD_SIZE == 0 && offset < self.size && self.size - offset >= HEADER_SIZE
    }

    /// Iterate over the regions in `[start, start + limit)`, hopping by each
    /// region's recorded size.
    pub fn regions(&self, limit: usize) -> Regions<'_> {
        assert!(limit <= self.size, "region limit {limit} beyond heap end");
        Regions {
            heap: self,
            cursor: 0,
            limit,
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this layout
        unsafe { alloc::dealloc(self.start.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("start", &self.start)
            .field("size", &self.size)
            .finish()
    }
}

/// Linear walk over heap regions (objects and free chunks).
pub struct Regions<'h> {
    heap: &'h Heap,
    cursor: usize,
    limit: usize,
}

impl Iterator for Regions<'_> {
    type Item = ObjectRef;

    fn next(&mut self) -> Option<ObjectRef> {
        if self.cursor >= self.limit {
            return None;
        }

        // SAFETY: every region below the limit starts with a valid header
        let obj = unsafe { ObjectRef::from_address(self.heap.at(self.cursor)) };
        let size = obj.size();
        assert!(
            size >= HEADER_SIZE && self.cursor + size <= self.limit,
            "corrupt heap: region at offset {} has size {size}",
            self.cursor
        );
        self.cursor += size;
        Some(obj)
    }
}

/// Read a `T` at `base + offset`.
///
/// # Safety
/// The range must lie inside a live object and be aligned for `T`.
#[inline(always)]
pub unsafe fn load<T: Copy>(base: Address, offset: usize) -> T {
    // SAFETY: caller contract
    unsafe { base.add(offset).cast::<T>().read() }
}

/// Write `src` at `base + offset`.
///
/// # Safety
/// The range must lie inside a live object and be aligned for `T`.
#[inline(always)]
pub unsafe fn store<T: Copy>(base: Address, offset: usize, src: T) {
    // SAFETY: caller contract
    unsafe { base.add(offset).cast::<T>().write(src) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_creation() {
        let heap = Heap::new(100).unwrap();
        assert_eq!(heap.size(), 100 - 100 % WORD_SIZE);
        assert_eq!(heap.offset_of(heap.end()), heap.size());
    }

    #[test]
    fn test_heap_too_small() {
        let requested = HEADER_SIZE - 1;
        assert_eq!(
            Heap::new(requested).unwrap_err(),
            GcError::HeapTooSmall {
                size: requested - requested % WORD_SIZE,
                min: HEADER_SIZE
            }
        );
    }

    #[test]
    fn test_contains() {
        let heap = Heap::new(64).unwrap();
        assert!(heap.contains(heap.start()));
        assert!(heap.contains(heap.at(64 - HEADER_SIZE)));
        assert!(!heap.contains(heap.at(64 - HEADER_SIZE + WORD_SIZE)));
        assert!(!heap.contains(heap.at(1)));
        assert!(!heap.contains(std::ptr::null_mut()));
        assert!(!heap.contains(heap.end()));
    }

    #[test]
    fn test_regions_hop_by_size() {
        let heap = Heap::new(64).unwrap();
        unsafe {
            ObjectRef::from_address(heap.start()).set_unused(16);
            ObjectRef::from_address(heap.at(16)).set_unused(48);
        }

        let sizes: Vec<usize> = heap.regions(heap.size()).map(|r| r.size()).collect();
        assert_eq!(sizes, vec![16, 48]);
    }

    #[test]
    fn test_load_store() {
        let heap = Heap::new(64).unwrap();
        unsafe {
            store(heap.start(), 8, 0x1234_5678u32);
            assert_eq!(load::<u32>(heap.start(), 8), 0x1234_5678);
        }
    }
}
