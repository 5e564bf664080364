//! Root slots.
//!
//! Roots are slots outside the heap holding references into it. Marking
//! starts from them and pointer adjustment rewrites them after objects
//! move.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::addr::Addr;

/// A fixed table of root slots.
#[derive(Debug, Default)]
pub struct RootSet {
    slots: Vec<AtomicUsize>,
}

impl RootSet {
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Register a root; returns its slot index.
    pub fn push(&mut self, obj: Addr) -> usize {
        self.slots.push(AtomicUsize::new(obj.as_usize()));
        self.slots.len() - 1
    }

    /// Current value of slot `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Addr {
        Addr::new(self.slots[index].load(Ordering::Acquire))
    }

    /// Overwrite slot `index`.
    pub fn set(&self, index: usize, obj: Addr) {
        self.slots[index].store(obj.as_usize(), Ordering::Release);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot indices handled by `worker_id` out of `num_workers`.
    pub fn indices_for_worker(
        &self,
        worker_id: usize,
        num_workers: usize,
    ) -> impl Iterator<Item = usize> {
        (worker_id..self.slots.len()).step_by(num_workers.max(1))
    }

    /// Iterate all root values.
    pub fn iter(&self) -> impl Iterator<Item = Addr> + '_ {
        self.slots
            .iter()
            .map(|s| Addr::new(s.load(Ordering::Acquire)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_partitioned_across_workers() {
        let mut roots = RootSet::new();
        for i in 1..=7 {
            roots.push(Addr::new(i * 8));
        }
        let mut all: Vec<_> = (0..3)
            .flat_map(|w| roots.indices_for_worker(w, 3).collect::<Vec<_>>())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn set_overwrites_slot() {
        let mut roots = RootSet::new();
        let i = roots.push(Addr::new(8));
        roots.set(i, Addr::new(16));
        assert_eq!(roots.get(i), Addr::new(16));
        assert_eq!(roots.iter().count(), 1);
        assert!(!roots.is_empty());
    }
}
