//! Concurrent marking cycle driver.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::gc::marker::{MarkContext, MarkRootsTask, ParallelMarker};
use crate::gc::workers::WorkerPool;
use crate::heap::Heap;
use crate::object::ObjectModel;
use crate::roots::RootSet;

use super::ConcurrentMarkBitmap;

/// Outcome of a completed marking pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkingStats {
    pub marked_objects: usize,
    /// Live words per region.
    pub live_words: Vec<usize>,
}

/// Owns the mark bitmap and the state of the current marking cycle.
///
/// A cycle is `start_cycle`, one or more `mark_from_roots`, then
/// `finish_cycle`. A full collection may abort it at any point through
/// [`abort_if_in_progress`](Self::abort_if_in_progress).
pub struct ConcurrentMark {
    bitmap: ConcurrentMarkBitmap,
    in_progress: AtomicBool,
    abort: AtomicBool,
}

impl ConcurrentMark {
    /// # Errors
    ///
    /// Fails if the bitmap address space cannot be reserved.
    pub fn new(heap: &Heap) -> Result<Self> {
        Ok(Self {
            bitmap: ConcurrentMarkBitmap::new(heap)?,
            in_progress: AtomicBool::new(false),
            abort: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn bitmap(&self) -> &ConcurrentMarkBitmap {
        &self.bitmap
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Begin a cycle with a clean bitmap.
    ///
    /// # Panics
    ///
    /// Panics if a cycle is already running.
    pub fn start_cycle(&self) {
        assert!(
            !self.in_progress.swap(true, Ordering::AcqRel),
            "marking cycle already in progress"
        );
        self.abort.store(false, Ordering::Release);
        self.bitmap.prepare_for_marking();
    }

    /// Mark everything reachable from `roots` on up to `num_workers`
    /// workers. Closed-archive regions are live by definition and skipped.
    /// Returns `None` if the cycle was aborted meanwhile.
    pub fn mark_from_roots(
        &self,
        heap: &Heap,
        model: &dyn ObjectModel,
        roots: &RootSet,
        pool: &WorkerPool,
        num_workers: usize,
    ) -> Option<MarkingStats> {
        let num_workers = num_workers.clamp(1, pool.max_workers());
        let skip_archive = |region: usize| heap.region(region).is_closed_archive();
        let ctx = MarkContext {
            heap,
            bitmap: &self.bitmap,
            model,
            skip_region: &skip_archive,
            abort: Some(&self.abort),
        };
        let marker = ParallelMarker::new(ctx, num_workers);
        pool.run_task(
            &MarkRootsTask::new("Concurrent Mark From Roots", &marker, roots),
            num_workers,
        );
        if self.has_aborted() {
            return None;
        }
        Some(MarkingStats {
            marked_objects: marker.marked_objects(),
            live_words: marker.into_live_words(),
        })
    }

    /// Publish live bytes per region and end the cycle.
    pub fn finish_cycle(&self, heap: &Heap, stats: &MarkingStats) {
        for (region, words) in stats.live_words.iter().enumerate() {
            heap.region(region)
                .set_live_bytes(words * crate::addr::WORD_SIZE);
        }
        self.in_progress.store(false, Ordering::Release);
        crate::metrics::global_metrics().record_concurrent_cycle();
    }

    /// Stop a running cycle. Returns whether one was running. The bitmap
    /// contents are left as they are; callers must clear it before reuse.
    pub fn abort_if_in_progress(&self) -> bool {
        if !self.in_progress.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.abort.store(true, Ordering::Release);
        crate::tracing::log_concurrent_abort();
        true
    }
}
