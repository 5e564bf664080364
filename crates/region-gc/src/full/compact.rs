//! Phase 4: move objects to their planned addresses.

use crate::gc::workers::WorkerTask;
use crate::heap::RegionKind;

use super::{FullCollector, FullGcPhase, HumongousMove};

impl FullCollector<'_> {
    /// Copy objects in parallel, then the serial tail, then humongous
    /// objects.
    pub fn phase4_do_compaction(&mut self) {
        self.begin_phase(FullGcPhase::Compact);
        let _span = crate::tracing::trace_phase(FullGcPhase::Compact);

        self.pool
            .run_task(&CompactTask { collector: self }, self.num_workers);

        for &region in self.serial_compaction_point.regions() {
            self.compact_region(region);
        }
        for &region in self.serial_compaction_point.regions() {
            self.reset_compacted(region);
        }

        for mv in &self.humongous_moves {
            self.compact_humongous(mv);
        }

        self.end_phase(FullGcPhase::Compact);
    }

    fn compact_region(&self, index: usize) {
        let region = self.heap.region(index);
        let bitmap = self.bitmap();
        bitmap.iterate(region.used_region(), self.model, |obj| {
            // SAFETY: obj is marked. Destinations never lie above the
            // object being copied, and every object below it in the same
            // compaction order has already been moved.
            unsafe {
                if let Some(dest) = self.model.forwardee(obj) {
                    let size = self.model.size_words(obj);
                    obj.copy_words_to(dest, size);
                    self.model.init_mark(dest);
                }
            }
            bitmap.clear(obj);
            true
        });
    }

    /// Install the planned top of a compacted region, freeing it if it
    /// ended up empty.
    fn reset_compacted(&self, index: usize) {
        let region = self.heap.region(index);
        let top = self.compaction_tops.get(index);
        if top == region.bottom() {
            self.heap.free_region(index);
        } else {
            region.set_top(top);
            region.set_kind(RegionKind::Old);
        }
    }

    fn compact_humongous(&self, mv: &HumongousMove) {
        let src = self.heap.bottom_addr_for_region(mv.from);
        let dest = self.heap.bottom_addr_for_region(mv.to);
        // SAFETY: the destination run holds nothing live; the copy may
        // overlap the source.
        unsafe {
            src.copy_words_to(dest, mv.words);
            self.model.init_mark(dest);
        }
        self.bitmap().clear(src);
        for index in mv.from..mv.from + mv.num_regions {
            self.heap.region(index).reset_to_free();
        }
        self.heap.setup_humongous(mv.to, mv.words, self.model);
    }
}

/// Compacts each worker's own region list.
struct CompactTask<'c, 'a> {
    collector: &'c FullCollector<'a>,
}

impl WorkerTask for CompactTask<'_, '_> {
    fn name(&self) -> &'static str {
        "Full GC Compact"
    }

    fn work(&self, worker_id: usize) {
        let c = self.collector;
        let cp = c.compaction_points[worker_id].lock();
        for &region in cp.regions() {
            c.compact_region(region);
        }
        for &region in cp.regions() {
            c.reset_compacted(region);
        }
    }
}
