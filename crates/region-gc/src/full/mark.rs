//! Phase 1: mark live objects.

use crate::gc::marker::{MarkContext, MarkRootsTask, ParallelMarker};
use crate::refproc::BitmapIsAlive;
use crate::roots::RootSet;

use super::{FullCollector, FullGcPhase};

impl FullCollector<'_> {
    /// Mark everything reachable from `roots`, then let the reference
    /// processor keep referents alive and clear dead weak slots.
    pub fn phase1_mark_live_objects(&mut self, roots: &RootSet) {
        self.begin_phase(FullGcPhase::Mark);
        let _span = crate::tracing::trace_phase(FullGcPhase::Mark);

        let region_attr = &self.region_attr;
        let skip_marking = |region: usize| region_attr.is_skip_marking(region);
        let marker = ParallelMarker::new(
            MarkContext {
                heap: self.heap,
                bitmap: self.bitmap(),
                model: self.model,
                skip_region: &skip_marking,
                abort: None,
            },
            self.num_workers,
        );
        self.pool.run_task(
            &MarkRootsTask::new("Full GC Mark", &marker, roots),
            self.num_workers,
        );

        let is_alive = BitmapIsAlive::new(self.heap, self.bitmap());
        self.ref_processor.process_discovered(&is_alive, &|obj| {
            marker.mark_and_push(0, obj);
        });
        marker.drain_serial();
        self.ref_processor.weak_oops_do(&is_alive);
        self.ref_processor.do_unloading(&is_alive);

        let objects_marked = marker.marked_objects();
        let live_words = marker.into_live_words();
        self.metrics.objects_marked = objects_marked;
        self.live_words = live_words;
        self.end_phase(FullGcPhase::Mark);
    }

    /// Live words found in `region` by the mark phase.
    #[must_use]
    pub fn live_words(&self, region: usize) -> usize {
        self.live_words.get(region).copied().unwrap_or(0)
    }
}
