use std::time::Instant;

use parking_lot::Mutex;

use crate::addr::Addr;
use crate::cset::CollectionSetCandidates;
use crate::gc::workers::{calc_active_workers, WorkerPool};
use crate::heap::Heap;
use crate::mark::{ConcurrentMark, ConcurrentMarkBitmap};
use crate::metrics::{global_metrics, FullGcMetrics, PhaseTimer};
use crate::object::ObjectModel;
use crate::policy::Policy;
use crate::refproc::{NoopReferenceProcessor, ReferenceProcessor};
use crate::roots::RootSet;
use crate::tracing::GcId;

use super::compaction_point::{CompactionPoint, CompactionTops, ForwardContext};
use super::preserved::PreservedMarks;
use super::region_attr::{RegionAttr, RegionAttrTable};
use super::{FullGcPhase, FullGcScope};

static NOOP_REFERENCE_PROCESSOR: NoopReferenceProcessor = NoopReferenceProcessor;

/// A humongous object planned to move down to a free run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HumongousMove {
    /// Start region of the object now.
    pub from: usize,
    /// Start region of the destination run.
    pub to: usize,
    pub num_regions: usize,
    pub words: usize,
}

/// One full collection.
///
/// Built fresh for every collection; [`collect`](Self::collect) runs all
/// phases. The phase methods are public so callers can observe the heap
/// between phases, but must still be called in order.
pub struct FullCollector<'a> {
    pub(super) heap: &'a Heap,
    pub(super) concurrent_mark: &'a ConcurrentMark,
    pub(super) model: &'a dyn ObjectModel,
    pub(super) policy: &'a dyn Policy,
    pub(super) ref_processor: &'a dyn ReferenceProcessor,
    pub(super) pool: &'a WorkerPool,
    pub(super) scope: FullGcScope,
    pub(super) num_workers: usize,
    pub(super) region_attr: RegionAttrTable,
    pub(super) compaction_tops: CompactionTops,
    pub(super) compaction_points: Box<[Mutex<CompactionPoint>]>,
    pub(super) serial_compaction_point: CompactionPoint,
    pub(super) preserved_marks: Box<[Mutex<PreservedMarks>]>,
    pub(super) humongous_start_regions: Vec<usize>,
    pub(super) humongous_moves: Vec<HumongousMove>,
    /// Live words per region found by the mark phase.
    pub(super) live_words: Vec<usize>,
    pub(super) metrics: FullGcMetrics,
    phase: Option<FullGcPhase>,
    gc_id: GcId,
    timer: PhaseTimer,
    started: Instant,
}

impl<'a> FullCollector<'a> {
    /// Set up a collection. The worker count is fixed here for all phases.
    #[must_use]
    pub fn new(
        heap: &'a Heap,
        concurrent_mark: &'a ConcurrentMark,
        model: &'a dyn ObjectModel,
        policy: &'a dyn Policy,
        pool: &'a WorkerPool,
        scope: FullGcScope,
    ) -> Self {
        let num_workers =
            calc_active_workers(heap.config(), heap.max_regions(), heap.num_used_regions())
                .clamp(1, pool.max_workers());

        Self {
            heap,
            concurrent_mark,
            model,
            policy,
            ref_processor: &NOOP_REFERENCE_PROCESSOR,
            pool,
            scope,
            num_workers,
            region_attr: RegionAttrTable::new(heap.max_regions()),
            compaction_tops: CompactionTops::new(heap),
            compaction_points: (0..num_workers)
                .map(|_| Mutex::new(CompactionPoint::new()))
                .collect(),
            serial_compaction_point: CompactionPoint::new(),
            preserved_marks: (0..num_workers)
                .map(|_| Mutex::new(PreservedMarks::new()))
                .collect(),
            humongous_start_regions: Vec::new(),
            humongous_moves: Vec::new(),
            live_words: Vec::new(),
            metrics: FullGcMetrics {
                num_workers,
                ..FullGcMetrics::default()
            },
            phase: None,
            gc_id: crate::tracing::next_gc_id(),
            timer: PhaseTimer::new(),
            started: Instant::now(),
        }
    }

    /// Use `ref_processor` for reference processing and weak roots.
    #[must_use]
    pub fn with_reference_processor(mut self, ref_processor: &'a dyn ReferenceProcessor) -> Self {
        self.ref_processor = ref_processor;
        self
    }

    /// Run every phase and return the collection's statistics.
    pub fn collect(
        &mut self,
        roots: &RootSet,
        candidates: &mut CollectionSetCandidates,
    ) -> FullGcMetrics {
        let _span = crate::tracing::trace_full_gc(self.gc_id, self.num_workers);
        self.prepare(candidates);
        self.phase1_mark_live_objects(roots);
        self.phase2_prepare_compaction();
        self.phase3_adjust_pointers(roots);
        self.phase4_do_compaction();
        self.complete()
    }

    /// Snapshot region attributes and get marking ready.
    pub fn prepare(&mut self, candidates: &mut CollectionSetCandidates) {
        self.begin_phase(FullGcPhase::Prepare);
        let _span = crate::tracing::trace_phase(FullGcPhase::Prepare);

        let aborted = self.concurrent_mark.abort_if_in_progress();
        self.metrics.aborted_concurrent_mark = aborted;
        // A finished concurrent cycle also leaves its marks behind.
        if aborted || !self.bitmap().is_clear() {
            self.bitmap().clear_all();
        }

        candidates.clear(self.heap);
        self.metrics.used_regions_before = self.heap.num_used_regions();

        for region in self.heap.regions() {
            let attr = if !region.is_committed() || region.is_free() {
                RegionAttr::Free
            } else if region.is_closed_archive() {
                RegionAttr::SkipMarking
            } else if region.is_pinned() || region.is_humongous() || region.is_open_archive() {
                RegionAttr::SkipCompacting
            } else {
                RegionAttr::Compacting
            };
            self.region_attr.set(region.index(), attr);
        }

        self.ref_processor
            .start_discovery(self.scope.clear_soft_refs);
        self.end_phase(FullGcPhase::Prepare);
    }

    /// Restore preserved marks, clear the bitmap and hand regions back.
    pub fn complete(&mut self) -> FullGcMetrics {
        self.begin_phase(FullGcPhase::Complete);
        let _span = crate::tracing::trace_phase(FullGcPhase::Complete);

        for marks in self.preserved_marks.iter_mut() {
            marks.get_mut().restore(self.model);
        }
        self.bitmap().clear_all();

        for region in self.heap.committed_regions() {
            region.rem_set().clear(false);
            if region.is_free() {
                continue;
            }
            let live_bytes = if self.region_attr.is_skip_compacting(region.index())
                && !region.is_humongous()
            {
                self.live_words[region.index()] * crate::addr::WORD_SIZE
            } else {
                region.used_bytes()
            };
            region.set_live_bytes(live_bytes);
        }

        if self.heap.config().verify {
            self.verify_after_full_gc();
        }

        self.end_phase(FullGcPhase::Complete);
        self.metrics.used_regions_after = self.heap.num_used_regions();
        self.metrics.duration = self.started.elapsed();
        self.metrics.phases = self.timer;
        global_metrics().record_full_gc(&self.metrics);
        crate::tracing::log_full_gc_end(
            self.gc_id,
            self.metrics.used_regions_before,
            self.metrics.used_regions_after,
            self.metrics.duration,
        );
        self.metrics.clone()
    }

    fn verify_after_full_gc(&self) {
        assert!(self.bitmap().is_clear(), "mark bitmap not clear after full GC");
        for region in self.heap.committed_regions() {
            if region.is_free() {
                assert!(region.is_empty(), "free region {} has top above bottom", region.index());
            }
        }
    }

    pub(super) fn begin_phase(&mut self, phase: FullGcPhase) {
        assert_eq!(
            self.phase,
            phase.predecessor(),
            "full GC phase {phase:?} started out of order"
        );
        self.phase = Some(phase);
        crate::tracing::log_phase_start(phase);
        self.timer.start();
    }

    pub(super) fn end_phase(&mut self, phase: FullGcPhase) {
        let elapsed = self.timer.end(phase);
        crate::tracing::log_phase_end(phase, elapsed);
    }

    /// Last phase started, if any.
    #[must_use]
    pub const fn phase(&self) -> Option<FullGcPhase> {
        self.phase
    }

    #[must_use]
    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }

    #[must_use]
    pub const fn scope(&self) -> FullGcScope {
        self.scope
    }

    #[must_use]
    pub const fn region_attr(&self) -> &RegionAttrTable {
        &self.region_attr
    }

    #[must_use]
    pub const fn compaction_tops(&self) -> &CompactionTops {
        &self.compaction_tops
    }

    /// Regions worker `worker_id` compacts in parallel.
    #[must_use]
    pub fn compaction_regions(&self, worker_id: usize) -> Vec<usize> {
        self.compaction_points[worker_id].lock().regions().to_vec()
    }

    /// Regions compacted serially after the parallel pass.
    #[must_use]
    pub fn serial_compaction_regions(&self) -> &[usize] {
        self.serial_compaction_point.regions()
    }

    #[must_use]
    pub fn humongous_moves(&self) -> &[HumongousMove] {
        &self.humongous_moves
    }

    #[must_use]
    pub const fn metrics(&self) -> &FullGcMetrics {
        &self.metrics
    }

    pub(super) const fn bitmap(&self) -> &'a ConcurrentMarkBitmap {
        self.concurrent_mark.bitmap()
    }

    pub(super) fn forward_context(&self) -> ForwardContext<'_> {
        ForwardContext {
            heap: self.heap,
            model: self.model,
            tops: &self.compaction_tops,
        }
    }

    /// New address of the object at `obj`, or `obj` if it does not move.
    pub(super) fn forwarded(&self, obj: Addr) -> Addr {
        if obj.is_null() || !self.heap.is_in_reserved(obj) {
            return obj;
        }
        if !self.region_attr.is_compacting(self.heap.addr_to_region(obj)) {
            return obj;
        }
        // SAFETY: references held by live objects point at live objects.
        unsafe { self.model.forwardee(obj) }.unwrap_or(obj)
    }
}
