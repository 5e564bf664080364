//! Phase 3: point every reference at its target's new address.

use crate::addr::Addr;
use crate::gc::workers::{RegionClaimer, WorkerTask};
use crate::roots::RootSet;

use super::{FullCollector, FullGcPhase};

impl FullCollector<'_> {
    /// Rewrite roots, references inside live objects, preserved-mark
    /// entries and weak roots.
    pub fn phase3_adjust_pointers(&mut self, roots: &RootSet) {
        self.begin_phase(FullGcPhase::AdjustPointers);
        let _span = crate::tracing::trace_phase(FullGcPhase::AdjustPointers);

        let task = AdjustTask {
            collector: self,
            roots,
            claimer: RegionClaimer::new(self.heap.max_regions(), self.num_workers),
        };
        self.pool.run_task(&task, self.num_workers);
        self.ref_processor.adjust_weak_roots(&|obj| self.forwarded(obj));

        self.end_phase(FullGcPhase::AdjustPointers);
    }

    fn adjust_region(&self, index: usize) {
        if self.region_attr.is_free(index) || self.region_attr.is_skip_marking(index) {
            return;
        }
        let region = self.heap.region(index);
        if region.is_continues_humongous() {
            return;
        }
        self.bitmap().iterate(region.used_region(), self.model, |obj| {
            // SAFETY: obj is marked and has not moved yet.
            unsafe {
                self.model.for_each_ref_slot(obj, &mut |slot| {
                    let target = Addr::new(slot.load());
                    let forwarded = self.forwarded(target);
                    if forwarded != target {
                        slot.store(forwarded.as_usize());
                    }
                });
            }
            true
        });
    }
}

struct AdjustTask<'c, 'a> {
    collector: &'c FullCollector<'a>,
    roots: &'c RootSet,
    claimer: RegionClaimer,
}

impl WorkerTask for AdjustTask<'_, '_> {
    fn name(&self) -> &'static str {
        "Full GC Adjust"
    }

    fn work(&self, worker_id: usize) {
        let c = self.collector;
        for index in self.roots.indices_for_worker(worker_id, c.num_workers) {
            let obj = self.roots.get(index);
            let forwarded = c.forwarded(obj);
            if forwarded != obj {
                self.roots.set(index, forwarded);
            }
        }
        c.preserved_marks[worker_id]
            .lock()
            .adjust_during_full_gc(c.model);

        self.claimer
            .par_iterate(worker_id, |region| c.adjust_region(region));
    }
}
