//! Phase 2: choose compaction regions and compute forwarding addresses.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::gc::workers::{RegionClaimer, WorkerTask};

use super::compaction_point::ForwardContext;
use super::region_attr::RegionAttr;
use super::{FullCollector, FullGcPhase, HumongousMove};

impl FullCollector<'_> {
    /// Plan where every live object goes.
    ///
    /// If no compaction point ends with a free region, or maximal
    /// compaction was requested, the last regions of every point are
    /// re-planned serially and humongous objects are moved down into free
    /// runs below them.
    pub fn phase2_prepare_compaction(&mut self) {
        self.begin_phase(FullGcPhase::PrepareCompaction);
        let _span = crate::tracing::trace_phase(FullGcPhase::PrepareCompaction);

        self.determine_worklists();

        let (forwarded, has_free_target) = {
            let task = PrepareTask::new(self);
            self.pool.run_task(&task, self.num_workers);
            (
                task.forwarded.load(Ordering::Relaxed),
                task.has_free_target.load(Ordering::Relaxed),
            )
        };
        self.metrics.objects_forwarded = forwarded;

        if self.scope.do_maximal_compaction || !has_free_target {
            self.prepare_serial_compaction();
            if !self.humongous_start_regions.is_empty() {
                self.prepare_humongous_compaction();
            }
        }
        self.end_phase(FullGcPhase::PrepareCompaction);
    }

    /// Hand compactable regions to the compaction points round-robin,
    /// reclaim dead humongous objects and empty open-archive regions, and
    /// collect the unpinned live humongous objects that may move later.
    fn determine_worklists(&mut self) {
        let threshold = self.policy.region_compaction_threshold();
        let max_regions = self.heap.max_regions();
        let mut next_point = 0;
        let mut regions_compacted = 0;
        let mut index = 0;

        while index < max_regions {
            let attr = self.region_attr.get(index);
            if matches!(attr, RegionAttr::Free | RegionAttr::SkipMarking) {
                index += 1;
                continue;
            }
            let region = self.heap.region(index);
            if region.is_starts_humongous() {
                let run = self.heap.humongous_run_len(index);
                if self.bitmap().is_marked(region.bottom()) {
                    if !region.is_pinned() {
                        self.humongous_start_regions.push(index);
                    }
                } else {
                    self.heap.free_humongous(index);
                    for r in index..index + run {
                        self.region_attr.set(r, RegionAttr::Free);
                    }
                }
                index += run;
                continue;
            }
            if region.is_open_archive() && self.live_words(index) == 0 {
                self.heap.free_region(index);
                self.region_attr.set(index, RegionAttr::Free);
                index += 1;
                continue;
            }
            if attr == RegionAttr::Compacting {
                if self.live_words(index) <= threshold {
                    self.compaction_points[next_point].get_mut().add(index);
                    next_point = (next_point + 1) % self.num_workers;
                    regions_compacted += 1;
                } else {
                    self.region_attr.set(index, RegionAttr::SkipCompacting);
                }
            }
            index += 1;
        }
        self.metrics.regions_compacted = regions_compacted;
    }

    /// Overwrite dead space in a region that stays put with filler objects
    /// so the region remains walkable.
    fn scrub_region(&self, index: usize) {
        if !self.region_attr.is_skip_compacting(index) {
            return;
        }
        let region = self.heap.region(index);
        if region.is_humongous() {
            return;
        }
        let mr = region.used_region();
        let min_fill = self.model.min_fill_words();
        let mut cur = mr.start();
        while cur < mr.end() {
            let next = self.bitmap().get_next_marked_addr(cur, mr.end());
            let gap = next.words_since(cur);
            if gap >= min_fill {
                // SAFETY: [cur, next) holds only dead objects.
                unsafe { self.model.fill_with_object(cur, gap) };
            }
            if next >= mr.end() {
                break;
            }
            // SAFETY: next is marked, so it starts a live object.
            cur = next.add_words(unsafe { self.model.size_words(next) });
        }
    }

    /// Move the tail of every compaction point into one serial point and
    /// re-plan it in ascending region order.
    ///
    /// The lowest tail region keeps its plan. Objects in the other tail
    /// regions are forwarded again unless they already go to a region
    /// outside the re-planned set.
    fn prepare_serial_compaction(&mut self) {
        let mut serial = std::mem::take(&mut self.serial_compaction_point);
        for cp in self.compaction_points.iter_mut() {
            let cp = cp.get_mut();
            if cp.has_regions() {
                cp.truncate_from_current(&mut serial);
            }
        }
        serial.sort_regions();

        let Some((&start, replanned)) = serial.regions().split_first() else {
            self.serial_compaction_point = serial;
            return;
        };
        let replanned = replanned.to_vec();
        for &r in &replanned {
            self.compaction_tops.set(r, self.heap.region(r).bottom());
        }
        serial.initialize(start, &self.compaction_tops);

        let ctx = ForwardContext {
            heap: self.heap,
            model: self.model,
            tops: &self.compaction_tops,
        };
        let bitmap = self.concurrent_mark.bitmap();
        let preserved = self.preserved_marks[0].get_mut();
        let mut forwarded = self.metrics.objects_forwarded;

        for &r in &replanned {
            let region = ctx.heap.region(r);
            bitmap.iterate(region.used_region(), ctx.model, |obj| {
                // SAFETY: obj is marked, so it starts a live object.
                let previous = unsafe { ctx.model.forwardee(obj) };
                if let Some(dest) = previous {
                    if replanned
                        .binary_search(&ctx.heap.addr_to_region(dest))
                        .is_err()
                    {
                        return true;
                    }
                }
                // SAFETY: as above.
                let size = unsafe { ctx.model.size_words(obj) };
                let moves = serial.forward(ctx, preserved, obj, size);
                match (previous.is_some(), moves) {
                    (false, true) => forwarded += 1,
                    (true, false) => forwarded -= 1,
                    _ => {}
                }
                true
            });
        }
        serial.update(&self.compaction_tops);

        self.metrics.objects_forwarded = forwarded;
        self.metrics.serial_regions = serial.regions().len();
        crate::tracing::log_serial_compaction(serial.regions().len());
        self.serial_compaction_point = serial;
    }

    /// Move live humongous objects down into the lowest free run that lies
    /// wholly below them.
    ///
    /// Candidate targets are free regions and the serial regions that end
    /// up empty. A moved object's old regions become targets for
    /// objects after it.
    fn prepare_humongous_compaction(&mut self) {
        let mut targets: BTreeSet<usize> = self
            .serial_compaction_point
            .regions_after_current()
            .iter()
            .copied()
            .collect();
        let serial = &self.serial_compaction_point;
        if let Some(current) = serial.current_region() {
            if serial.compaction_top() == self.heap.region(current).bottom() {
                targets.insert(current);
            }
        }
        targets.extend(
            self.heap
                .committed_regions()
                .map(|r| r.index())
                .filter(|&r| self.region_attr.is_free(r)),
        );

        let starts = std::mem::take(&mut self.humongous_start_regions);
        for &start in &starts {
            let num_regions = self.heap.humongous_run_len(start);
            let Some(to) = find_run(&targets, num_regions, start) else {
                continue;
            };
            for r in to..to + num_regions {
                targets.remove(&r);
            }
            targets.extend(start..start + num_regions);

            let obj = self.heap.region(start).bottom();
            let dest = self.heap.bottom_addr_for_region(to);
            // SAFETY: obj is a marked humongous object.
            let (words, mark) = unsafe { (self.model.size_words(obj), self.model.mark_word(obj)) };
            self.preserved_marks[0].get_mut().push_if_necessary(obj, mark);
            // SAFETY: as above.
            unsafe { self.model.forward_to(obj, dest) };
            self.region_attr.set(start, RegionAttr::Compacting);
            self.humongous_moves.push(HumongousMove {
                from: start,
                to,
                num_regions,
                words,
            });
            crate::tracing::log_humongous_move(start, to, num_regions);
        }
        self.humongous_start_regions = starts;
        self.metrics.humongous_moved = self.humongous_moves.len();
    }
}

/// Lowest run of `len` consecutive indices in `targets` that ends at or
/// below `below`.
fn find_run(targets: &BTreeSet<usize>, len: usize, below: usize) -> Option<usize> {
    let mut run_start = 0;
    let mut run_len = 0;
    let mut prev: Option<usize> = None;
    for &r in targets.range(..below) {
        if prev.is_some_and(|p| p + 1 == r) {
            run_len += 1;
        } else {
            run_start = r;
            run_len = 1;
        }
        if run_len == len {
            return Some(run_start);
        }
        prev = Some(r);
    }
    None
}

/// Forwards the live objects of every compaction point's regions, one
/// point per worker, then scrubs regions that stay in place.
struct PrepareTask<'c, 'a> {
    collector: &'c FullCollector<'a>,
    claimer: RegionClaimer,
    forwarded: AtomicUsize,
    has_free_target: AtomicBool,
}

impl<'c, 'a> PrepareTask<'c, 'a> {
    fn new(collector: &'c FullCollector<'a>) -> Self {
        Self {
            claimer: RegionClaimer::new(collector.heap.max_regions(), collector.num_workers),
            collector,
            forwarded: AtomicUsize::new(0),
            has_free_target: AtomicBool::new(false),
        }
    }
}

impl WorkerTask for PrepareTask<'_, '_> {
    fn name(&self) -> &'static str {
        "Full GC Prepare"
    }

    fn work(&self, worker_id: usize) {
        let c = self.collector;
        let ctx = c.forward_context();
        let mut cp = c.compaction_points[worker_id].lock();
        let mut preserved = c.preserved_marks[worker_id].lock();
        let regions = cp.regions().to_vec();
        let mut forwarded = 0;

        if let Some(&first) = regions.first() {
            cp.initialize(first, ctx.tops);
        }
        for &r in &regions {
            let region = c.heap.region(r);
            c.bitmap().iterate(region.used_region(), c.model, |obj| {
                // SAFETY: obj is marked, so it starts a live object.
                let size = unsafe { c.model.size_words(obj) };
                if cp.forward(ctx, &mut preserved, obj, size) {
                    forwarded += 1;
                }
                true
            });
        }
        cp.update(ctx.tops);

        if cp.has_free_target(c.heap) {
            self.has_free_target.store(true, Ordering::Relaxed);
        }
        self.forwarded.fetch_add(forwarded, Ordering::Relaxed);
        drop(preserved);
        drop(cp);

        self.claimer.par_iterate(worker_id, |r| c.scrub_region(r));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(indices: &[usize]) -> BTreeSet<usize> {
        indices.iter().copied().collect()
    }

    #[test]
    fn find_run_takes_lowest_fit() {
        let targets = set(&[1, 3, 4, 5, 7, 8]);
        assert_eq!(find_run(&targets, 2, 9), Some(3));
        assert_eq!(find_run(&targets, 3, 9), Some(3));
        assert_eq!(find_run(&targets, 1, 9), Some(1));
    }

    #[test]
    fn find_run_must_end_below_limit() {
        let targets = set(&[5, 6, 7]);
        assert_eq!(find_run(&targets, 2, 5), None);
        assert_eq!(find_run(&targets, 2, 6), None);
        assert_eq!(find_run(&targets, 2, 7), Some(5));
    }

    #[test]
    fn find_run_never_overlaps_source() {
        // Object at 4..6 with only region 3 free below it stays put.
        let targets = set(&[3, 4, 5]);
        assert_eq!(find_run(&targets, 2, 4), None);
        let targets = set(&[2, 3, 6]);
        assert_eq!(find_run(&targets, 2, 4), Some(2));
    }

    #[test]
    fn find_run_without_fit() {
        let targets = set(&[0, 2, 4]);
        assert_eq!(find_run(&targets, 2, 10), None);
    }
}
