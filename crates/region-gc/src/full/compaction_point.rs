//! Bump-pointer cursors that hand out forwarding destinations.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::addr::Addr;
use crate::heap::Heap;
use crate::object::ObjectModel;

use super::preserved::PreservedMarks;

/// Final top of every region after compaction, as planned in phase 2.
///
/// Each entry is written only by the worker owning the region.
#[derive(Debug)]
pub struct CompactionTops {
    tops: Box<[AtomicUsize]>,
}

impl CompactionTops {
    /// A table with every region's top at its bottom.
    #[must_use]
    pub fn new(heap: &Heap) -> Self {
        Self {
            tops: heap
                .regions()
                .map(|r| AtomicUsize::new(r.bottom().as_usize()))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, region: usize) -> Addr {
        Addr::new(self.tops[region].load(Ordering::Relaxed))
    }

    pub fn set(&self, region: usize, top: Addr) {
        self.tops[region].store(top.as_usize(), Ordering::Relaxed);
    }
}

/// What a compaction point needs to forward an object.
#[derive(Clone, Copy)]
pub struct ForwardContext<'a> {
    pub heap: &'a Heap,
    pub model: &'a dyn ObjectModel,
    pub tops: &'a CompactionTops,
}

/// A cursor over an ordered list of regions.
///
/// Objects are assigned consecutive addresses starting at the current
/// region's compaction top. When an object does not fit, the region's top
/// is recorded and the cursor moves on to the next region in the list.
#[derive(Debug, Default)]
pub struct CompactionPoint {
    regions: Vec<usize>,
    current: Option<usize>,
    compaction_top: Addr,
}

impl CompactionPoint {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
            current: None,
            compaction_top: Addr::NULL,
        }
    }

    pub fn add(&mut self, region: usize) {
        self.regions.push(region);
    }

    #[must_use]
    pub fn regions(&self) -> &[usize] {
        &self.regions
    }

    #[must_use]
    pub fn has_regions(&self) -> bool {
        !self.regions.is_empty()
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.current.is_some()
    }

    /// Region objects are currently forwarded into.
    #[must_use]
    pub fn current_region(&self) -> Option<usize> {
        self.current.map(|pos| self.regions[pos])
    }

    #[must_use]
    pub const fn compaction_top(&self) -> Addr {
        self.compaction_top
    }

    /// Start forwarding into `region`, continuing at its recorded top.
    ///
    /// # Panics
    ///
    /// Panics if `region` is not in this point's list.
    pub fn initialize(&mut self, region: usize, tops: &CompactionTops) {
        let pos = self
            .regions
            .iter()
            .position(|&r| r == region);
        let Some(pos) = pos else {
            panic!("region {region} is not in the compaction point");
        };
        self.current = Some(pos);
        self.compaction_top = tops.get(region);
    }

    /// Assign `obj` of `size` words its destination. Objects whose
    /// destination equals their address are left unforwarded, and a stale
    /// forwarding pointer from an earlier plan is removed.
    ///
    /// Returns whether the object will move.
    ///
    /// # Panics
    ///
    /// Panics if the regions of this point cannot hold the object.
    pub fn forward(
        &mut self,
        ctx: ForwardContext<'_>,
        preserved: &mut PreservedMarks,
        obj: Addr,
        size: usize,
    ) -> bool {
        if self.current.is_none() {
            let first = self.regions[0];
            self.initialize(first, ctx.tops);
        }
        while !self.object_fits(ctx.heap, size) {
            self.switch_region(ctx);
        }

        let dest = self.compaction_top;
        self.compaction_top = dest.add_words(size);
        // SAFETY: obj is a live object found through the mark bitmap.
        let mark = unsafe { ctx.model.mark_word(obj) };
        if dest == obj {
            if mark.is_forwarded() {
                // SAFETY: as above.
                unsafe { ctx.model.init_mark(obj) };
            }
            return false;
        }
        if !mark.is_forwarded() {
            preserved.push_if_necessary(obj, mark);
        }
        // SAFETY: as above; dest lies in a region owned by this point.
        unsafe { ctx.model.forward_to(obj, dest) };
        true
    }

    fn object_fits(&self, heap: &Heap, size: usize) -> bool {
        let Some(region) = self.current_region() else {
            return false;
        };
        self.compaction_top.add_words(size) <= heap.region(region).end()
    }

    fn switch_region(&mut self, ctx: ForwardContext<'_>) {
        let Some(pos) = self.current else {
            panic!("compaction point used before initialization");
        };
        ctx.tops.set(self.regions[pos], self.compaction_top);
        let next = pos + 1;
        assert!(
            next < self.regions.len(),
            "compaction point ran out of regions after region {}",
            self.regions[pos]
        );
        self.current = Some(next);
        self.compaction_top = ctx.tops.get(self.regions[next]);
    }

    /// Record the current region's top.
    pub fn update(&self, tops: &CompactionTops) {
        if let Some(region) = self.current_region() {
            tops.set(region, self.compaction_top);
        }
    }

    /// Whether some region of this point ends up empty.
    #[must_use]
    pub fn has_free_target(&self, heap: &Heap) -> bool {
        match self.current {
            Some(pos) => {
                pos + 1 < self.regions.len()
                    || self.compaction_top == heap.region(self.regions[pos]).bottom()
            }
            None => self.has_regions(),
        }
    }

    /// Move the current region and everything after it to `other`.
    pub fn truncate_from_current(&mut self, other: &mut Self) {
        let from = self.current.unwrap_or(0);
        other.regions.extend(self.regions.drain(from..));
        self.current = None;
        self.compaction_top = Addr::NULL;
    }

    /// Regions after the current one; they hold nothing once compacted.
    #[must_use]
    pub fn regions_after_current(&self) -> &[usize] {
        match self.current {
            Some(pos) => &self.regions[pos + 1..],
            None => &self.regions,
        }
    }

    /// Sort the region list by index. Only valid before initialization.
    pub fn sort_regions(&mut self) {
        debug_assert!(self.current.is_none());
        self.regions.sort_unstable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::object::SimpleObjectModel;

    fn objects(heap: &Heap, region: usize, count: usize, size: usize) -> Vec<Addr> {
        let model = SimpleObjectModel;
        (0..count)
            .map(|_| {
                let a = heap.allocate_in(region, size).unwrap();
                unsafe { model.init_object(a, size, 0) };
                a
            })
            .collect()
    }

    #[test]
    fn forwards_in_place_objects_nowhere() {
        let heap = Heap::new(GcConfig::new(64, 2)).unwrap();
        let model = SimpleObjectModel;
        let tops = CompactionTops::new(&heap);
        let ctx = ForwardContext {
            heap: &heap,
            model: &model,
            tops: &tops,
        };
        let objs = objects(&heap, 0, 3, 8);
        let mut cp = CompactionPoint::new();
        cp.add(0);
        let mut preserved = PreservedMarks::new();

        // Skip the first object as if it were dead.
        assert!(cp.forward(ctx, &mut preserved, objs[1], 8));
        assert!(cp.forward(ctx, &mut preserved, objs[2], 8));
        assert_eq!(unsafe { model.forwardee(objs[1]) }, Some(objs[0]));
        assert_eq!(unsafe { model.forwardee(objs[2]) }, Some(objs[1]));
        cp.update(&tops);
        assert_eq!(tops.get(0), objs[2]);
    }

    #[test]
    fn switches_region_when_full() {
        let heap = Heap::new(GcConfig::new(64, 3)).unwrap();
        let model = SimpleObjectModel;
        let tops = CompactionTops::new(&heap);
        let ctx = ForwardContext {
            heap: &heap,
            model: &model,
            tops: &tops,
        };
        let a = objects(&heap, 0, 2, 32);
        let b = objects(&heap, 1, 1, 32);
        let mut cp = CompactionPoint::new();
        cp.add(0);
        cp.add(1);
        cp.add(2);
        let mut preserved = PreservedMarks::new();

        assert!(!cp.forward(ctx, &mut preserved, a[0], 32));
        assert!(!cp.forward(ctx, &mut preserved, a[1], 32));
        assert!(!cp.forward(ctx, &mut preserved, b[0], 32));
        assert_eq!(cp.current_region(), Some(1));
        assert_eq!(tops.get(0), heap.region(0).end());
        assert!(cp.has_free_target(&heap));

        let mut serial = CompactionPoint::new();
        cp.truncate_from_current(&mut serial);
        assert_eq!(cp.regions(), &[0]);
        assert_eq!(serial.regions(), &[1, 2]);
    }

    #[test]
    fn stale_forwarding_is_cleared() {
        let heap = Heap::new(GcConfig::new(64, 1)).unwrap();
        let model = SimpleObjectModel;
        let tops = CompactionTops::new(&heap);
        let ctx = ForwardContext {
            heap: &heap,
            model: &model,
            tops: &tops,
        };
        let objs = objects(&heap, 0, 2, 8);
        unsafe { model.forward_to(objs[0], objs[1]) };
        let mut cp = CompactionPoint::new();
        cp.add(0);
        assert!(!cp.forward(ctx, &mut PreservedMarks::new(), objs[0], 8));
        assert_eq!(unsafe { model.forwardee(objs[0]) }, None);
    }

    #[test]
    #[should_panic(expected = "ran out of regions")]
    fn overflow_is_fatal() {
        let heap = Heap::new(GcConfig::new(64, 2)).unwrap();
        let model = SimpleObjectModel;
        let tops = CompactionTops::new(&heap);
        let ctx = ForwardContext {
            heap: &heap,
            model: &model,
            tops: &tops,
        };
        let objs = objects(&heap, 1, 2, 32);
        let mut cp = CompactionPoint::new();
        cp.add(0);
        let mut preserved = PreservedMarks::new();
        // Region 0 is empty, so both objects target it; a third cannot fit.
        cp.forward(ctx, &mut preserved, objs[0], 32);
        cp.forward(ctx, &mut preserved, objs[1], 32);
        cp.forward(ctx, &mut preserved, objs[1], 32);
    }
}
