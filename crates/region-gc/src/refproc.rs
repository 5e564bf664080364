//! Reference processing seam.
//!
//! Weak and soft reference semantics and class unloading live outside the
//! collector. The full collector calls into a [`ReferenceProcessor`] after
//! marking and hands it an [`IsAlive`] predicate backed by the mark bitmap.

use crate::addr::Addr;
use crate::heap::Heap;
use crate::mark::ConcurrentMarkBitmap;
use crate::roots::RootSet;

/// Liveness oracle for the current collection.
pub trait IsAlive {
    fn is_alive(&self, obj: Addr) -> bool;
}

/// [`IsAlive`] answered from the mark bitmap. Objects outside the heap and
/// in closed-archive regions are always alive.
#[derive(Clone, Copy)]
pub struct BitmapIsAlive<'a> {
    heap: &'a Heap,
    bitmap: &'a ConcurrentMarkBitmap,
}

impl<'a> BitmapIsAlive<'a> {
    #[must_use]
    pub const fn new(heap: &'a Heap, bitmap: &'a ConcurrentMarkBitmap) -> Self {
        Self { heap, bitmap }
    }
}

impl IsAlive for BitmapIsAlive<'_> {
    fn is_alive(&self, obj: Addr) -> bool {
        if obj.is_null() {
            return false;
        }
        if !self.heap.is_in_reserved(obj) {
            return true;
        }
        self.heap.region_containing(obj).is_closed_archive() || self.bitmap.is_marked(obj)
    }
}

/// External reference-processing and unloading subsystem.
pub trait ReferenceProcessor: Sync {
    /// Begin discovering references for this collection.
    fn start_discovery(&self, clear_soft_refs: bool);

    /// Process discovered references. Referents that must survive are
    /// passed to `keep_alive`, which marks them.
    fn process_discovered(&self, is_alive: &dyn IsAlive, keep_alive: &dyn Fn(Addr));

    /// Clear weak slots whose referents died.
    fn weak_oops_do(&self, is_alive: &dyn IsAlive);

    /// Unload whatever metadata became unreachable. Returns whether
    /// anything was unloaded.
    fn do_unloading(&self, _is_alive: &dyn IsAlive) -> bool {
        false
    }

    /// Point surviving weak slots at their referents' new addresses.
    fn adjust_weak_roots(&self, _forward: &dyn Fn(Addr) -> Addr) {}
}

/// Processor with nothing to process.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReferenceProcessor;

impl ReferenceProcessor for NoopReferenceProcessor {
    fn start_discovery(&self, _clear_soft_refs: bool) {}

    fn process_discovered(&self, _is_alive: &dyn IsAlive, _keep_alive: &dyn Fn(Addr)) {}

    fn weak_oops_do(&self, _is_alive: &dyn IsAlive) {}
}

/// A table of weak slots: cleared when the referent dies, updated when it
/// moves.
#[derive(Debug, Default)]
pub struct WeakRootTable {
    slots: RootSet,
}

impl WeakRootTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: RootSet::new(),
        }
    }

    pub fn push(&mut self, obj: Addr) -> usize {
        self.slots.push(obj)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Addr {
        self.slots.get(index)
    }
}

impl ReferenceProcessor for WeakRootTable {
    fn start_discovery(&self, _clear_soft_refs: bool) {}

    fn process_discovered(&self, _is_alive: &dyn IsAlive, _keep_alive: &dyn Fn(Addr)) {}

    fn weak_oops_do(&self, is_alive: &dyn IsAlive) {
        for index in 0..self.slots.len() {
            let obj = self.slots.get(index);
            if !obj.is_null() && !is_alive.is_alive(obj) {
                self.slots.set(index, Addr::NULL);
            }
        }
    }

    fn adjust_weak_roots(&self, forward: &dyn Fn(Addr) -> Addr) {
        for index in 0..self.slots.len() {
            let obj = self.slots.get(index);
            if !obj.is_null() {
                self.slots.set(index, forward(obj));
            }
        }
    }
}
