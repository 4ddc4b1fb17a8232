//! Mark phase
//!
//! Depth-first trace over an explicit work-list, so traversal depth does not
//! depend on the shape of the object graph. Mark bits live in the object
//! headers; an object already marked is skipped, which handles cycles and
//! shared references.

use crate::heap::Heap;
use crate::object::{Address, ObjectRef};
use crate::roots::RootStack;

/// Marks live objects.
#[derive(Debug, Default)]
pub struct Marker {
    // Popped LIFO: depth-first order.
    worklist: Vec<ObjectRef>,
}

impl Marker {
    /// Create a marker with an empty work-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every object reachable from any scope in `roots`.
    ///
    /// Returns the number of objects newly marked.
    pub fn mark_from_roots(&mut self, roots: &RootStack, heap: &Heap) -> usize {
        for scope in roots.iter() {
            for &root in scope.roots() {
                self.push(root, heap);
            }
        }
        self.mark(heap)
    }

    fn push(&mut self, addr: Address, heap: &Heap) {
        if heap.contains(addr) {
            // SAFETY: roots and traced fields reference object starts in this heap
            self.worklist.push(unsafe { ObjectRef::from_address(addr) });
        }
    }

    fn mark(&mut self, heap: &Heap) -> usize {
        let mut marked = 0;

        while let Some(obj) = self.worklist.pop() {
            if obj.is_marked() {
                continue;
            }
            obj.set_marked();
            marked += 1;

            // Leaf objects hold raw data, never references.
            if obj.has_special_type() {
                continue;
            }

            for i in 0..obj.field_cnt() {
                self.push(obj.field(i), heap);
            }
        }

        marked
    }
}
