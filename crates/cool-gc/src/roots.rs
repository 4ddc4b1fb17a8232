//! Root scopes
//!
//! Generated code opens a scope per frame and registers every reference that
//! must survive the next allocation. Scopes form a LIFO stack owned by the
//! collector; each scope only holds the roots introduced while it was the
//! innermost one, so the marker walks the whole stack.

use std::ops::{Deref, DerefMut};

use crate::collector::Gc;
use crate::object::Address;

/// Roots registered by one frame.
#[derive(Debug, Default, Clone)]
pub struct RootScope {
    objects: Vec<Address>,
}

impl RootScope {
    /// Add a root and return its index.
    #[inline(always)]
    pub fn reg_root(&mut self, obj: Address) -> usize {
        self.objects.push(obj);
        self.objects.len() - 1
    }

    /// Root at index `i`.
    ///
    /// # Panics
    /// Panics if `i` was never returned by [`reg_root`](Self::reg_root).
    #[inline(always)]
    pub fn root(&self, i: usize) -> Address {
        assert!(
            i < self.objects.len(),
            "root index {i} out of range ({} roots)",
            self.objects.len()
        );
        self.objects[i]
    }

    /// Replace the root at index `i`.
    ///
    /// # Panics
    /// Panics if `i` is out of range.
    pub fn set_root(&mut self, i: usize, obj: Address) {
        assert!(
            i < self.objects.len(),
            "root index {i} out of range ({} roots)",
            self.objects.len()
        );
        self.objects[i] = obj;
    }

    /// All roots of this scope, in registration order.
    pub fn roots(&self) -> &[Address] {
        &self.objects
    }

    /// Number of registered roots.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if no roots were registered.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Stack of root scopes; the last one is the current scope.
#[derive(Debug, Default)]
pub struct RootStack {
    scopes: Vec<RootScope>,
}

impl RootStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new scope and return the resulting depth.
    pub fn push_scope(&mut self) -> usize {
        self.scopes.push(RootScope::default());
        self.scopes.len()
    }

    /// Pop the scope at `depth`.
    ///
    /// # Panics
    /// Panics if `depth` is not the current scope.
    pub fn pop_scope(&mut self, depth: usize) {
        assert_eq!(
            self.scopes.len(),
            depth,
            "root scopes must be released innermost first"
        );
        self.scopes.pop();
    }

    /// Number of active scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Innermost scope, if any.
    pub fn current(&self) -> Option<&RootScope> {
        self.scopes.last()
    }

    /// Scope at `depth` (1 is the outermost).
    pub fn scope(&self, depth: usize) -> &RootScope {
        assert!(
            depth >= 1 && depth <= self.scopes.len(),
            "no root scope at depth {depth}"
        );
        &self.scopes[depth - 1]
    }

    /// Mutable scope at `depth` (1 is the outermost).
    pub fn scope_mut(&mut self, depth: usize) -> &mut RootScope {
        assert!(
            depth >= 1 && depth <= self.scopes.len(),
            "no root scope at depth {depth}"
        );
        &mut self.scopes[depth - 1]
    }

    /// Scopes from the innermost outward.
    pub fn iter(&self) -> impl Iterator<Item = &RootScope> {
        self.scopes.iter().rev()
    }

    /// Total roots across all scopes.
    pub fn root_count(&self) -> usize {
        self.scopes.iter().map(RootScope::len).sum()
    }
}

/// Guard for one root scope.
///
/// Created by [`Gc::enter_scope`] or [`StackRecord::enter_scope`]; dropping
/// it pops the scope. The guard dereferences to the collector so the frame
/// allocates through it, and nested guards borrow their parent, which keeps
/// destruction in LIFO order.
pub struct StackRecord<'a, G: Gc> {
    gc: &'a mut G,
    depth: usize,
}

impl<'a, G: Gc> StackRecord<'a, G> {
    /// Push a new scope on `gc`.
    pub fn new(gc: &'a mut G) -> Self {
        let depth = gc.root_stack_mut().push_scope();
        Self { gc, depth }
    }

    /// Open a nested scope.
    pub fn enter_scope(&mut self) -> StackRecord<'_, G> {
        StackRecord::new(&mut *self.gc)
    }

    /// Add a root and return its index.
    #[inline(always)]
    pub fn reg_root(&mut self, obj: Address) -> usize {
        let depth = self.depth;
        self.gc.root_stack_mut().scope_mut(depth).reg_root(obj)
    }

    /// Root at index `i`.
    #[inline(always)]
    pub fn root(&self, i: usize) -> Address {
        self.gc.root_stack().scope(self.depth).root(i)
    }

    /// Replace the root at index `i`.
    pub fn set_root(&mut self, i: usize, obj: Address) {
        let depth = self.depth;
        self.gc.root_stack_mut().scope_mut(depth).set_root(i, obj);
    }

    /// Roots of this scope.
    pub fn roots(&self) -> &[Address] {
        self.gc.root_stack().scope(self.depth).roots()
    }

    /// Enclosing scope, or `None` for the outermost one.
    pub fn parent(&self) -> Option<&RootScope> {
        (self.depth > 1).then(|| self.gc.root_stack().scope(self.depth - 1))
    }

    /// Depth of this scope (1 is the outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<G: Gc> Deref for StackRecord<'_, G> {
    type Target = G;

    fn deref(&self) -> &G {
        self.gc
    }
}

impl<G: Gc> DerefMut for StackRecord<'_, G> {
    fn deref_mut(&mut self) -> &mut G {
        self.gc
    }
}

impl<G: Gc> Drop for StackRecord<'_, G> {
    fn drop(&mut self) {
        self.gc.root_stack_mut().pop_scope(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ZeroGc;

    fn fake(addr: usize) -> Address {
        addr as Address
    }

    #[test]
    fn test_root_indices_are_sequential() {
        let mut scope = RootScope::default();
        assert_eq!(scope.reg_root(fake(0x10)), 0);
        assert_eq!(scope.reg_root(fake(0x20)), 1);
        assert_eq!(scope.reg_root(fake(0x30)), 2);
        assert_eq!(scope.root(1), fake(0x20));
        assert_eq!(scope.roots(), &[fake(0x10), fake(0x20), fake(0x30)]);
    }

    #[test]
    #[should_panic(expected = "root index 1 out of range")]
    fn test_root_out_of_range() {
        let mut scope = RootScope::default();
        scope.reg_root(fake(0x10));
        scope.root(1);
    }

    #[test]
    fn test_stack_iterates_innermost_first() {
        let mut stack = RootStack::new();
        let outer = stack.push_scope();
        stack.scope_mut(outer).reg_root(fake(0x10));
        let inner = stack.push_scope();
        stack.scope_mut(inner).reg_root(fake(0x20));

        let order: Vec<Address> = stack.iter().flat_map(|s| s.roots().to_vec()).collect();
        assert_eq!(order, vec![fake(0x20), fake(0x10)]);
        assert_eq!(stack.root_count(), 2);

        stack.pop_scope(inner);
        stack.pop_scope(outer);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    #[should_panic(expected = "innermost first")]
    fn test_pop_out_of_order() {
        let mut stack = RootStack::new();
        let outer = stack.push_scope();
        stack.push_scope();
        stack.pop_scope(outer);
    }

    #[test]
    fn test_guard_pops_on_drop() {
        let mut gc = ZeroGc::new(256).unwrap();
        {
            let mut outer = gc.enter_scope();
            assert_eq!(outer.reg_root(fake(0x10)), 0);
            assert!(outer.parent().is_none());
            {
                let mut inner = outer.enter_scope();
                assert_eq!(inner.depth(), 2);
                assert_eq!(inner.reg_root(fake(0x20)), 0);
                assert_eq!(inner.parent().unwrap().roots(), &[fake(0x10)]);
                assert_eq!(inner.root_stack().depth(), 2);
            }
            assert_eq!(outer.root_stack().depth(), 1);

            // Registration after the inner scope ended lands in the outer one.
            assert_eq!(outer.reg_root(fake(0x30)), 1);
            assert_eq!(outer.root(1), fake(0x30));
            assert_eq!(outer.root_stack().root_count(), 2);
        }
        assert_eq!(gc.root_stack().depth(), 0);
    }

    #[test]
    fn test_guard_pops_on_early_return() {
        fn frame(gc: &mut ZeroGc, bail: bool) -> Option<usize> {
            let mut scope = gc.enter_scope();
            scope.reg_root(fake(0x10));
            if bail {
                return None;
            }
            Some(scope.roots().len())
        }

        let mut gc = ZeroGc::new(256).unwrap();
        assert_eq!(frame(&mut gc, true), None);
        assert_eq!(gc.root_stack().depth(), 0);
        assert_eq!(frame(&mut gc, false), Some(1));
        assert_eq!(gc.root_stack().depth(), 0);
    }
}
