//! GC tracing support.
//!
//! When the `tracing` feature is enabled, this module emits structured
//! spans and events for heap resizing, marking, candidate selection and
//! full collections. Without the feature every helper is a no-op with the
//! same signature, so call sites need no `cfg` of their own.

#[cfg(feature = "tracing")]
mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use tracing::{span, Level};

    use crate::full::FullGcPhase;

    /// Stable identifier for a GC run.
    ///
    /// Correlates all events of one full collection. Monotonically
    /// increasing, starting at 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    pub type SpanGuard = span::EnteredSpan;

    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Span covering one full collection.
    pub fn trace_full_gc(gc_id: GcId, num_workers: usize) -> SpanGuard {
        span!(Level::DEBUG, "full_gc", gc_id = gc_id.0, num_workers).entered()
    }

    pub fn trace_phase(phase: FullGcPhase) -> SpanGuard {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Span around one parallel task.
    pub fn trace_worker_task(name: &'static str, num_workers: usize) -> SpanGuard {
        span!(Level::TRACE, "worker_task", task = name, num_workers).entered()
    }

    pub fn log_phase_start(phase: FullGcPhase) {
        tracing::debug!(phase = ?phase, "phase_start");
    }

    pub fn log_phase_end(phase: FullGcPhase, elapsed: Duration) {
        tracing::debug!(phase = ?phase, elapsed_us = elapsed.as_micros(), "phase_end");
    }

    pub fn log_full_gc_end(gc_id: GcId, used_before: usize, used_after: usize, elapsed: Duration) {
        tracing::info!(
            gc_id = gc_id.0,
            used_regions_before = used_before,
            used_regions_after = used_after,
            elapsed_ms = elapsed.as_millis(),
            "full_gc_end"
        );
    }

    pub fn log_active_workers(workers: usize, waste_limit: usize, used_limit: usize, max_workers: usize) {
        tracing::debug!(workers, waste_limit, used_limit, max_workers, "active_workers");
    }

    pub fn log_serial_compaction(num_regions: usize) {
        tracing::debug!(num_regions, "serial_compaction");
    }

    pub fn log_humongous_move(from: usize, to: usize, num_regions: usize) {
        tracing::debug!(from, to, num_regions, "humongous_move");
    }

    pub fn log_heap_created(max_regions: usize, region_words: usize) {
        tracing::debug!(max_regions, region_words, "heap_created");
    }

    pub fn log_heap_resize(op: &'static str, num_regions: usize, committed: usize) {
        tracing::debug!(op, num_regions, committed, "heap_resize");
    }

    pub fn log_livemap_committed(region: usize) {
        tracing::trace!(region, "livemap_committed");
    }

    pub fn log_candidates(marking_regions: usize, marking_groups: usize, retained_regions: usize) {
        tracing::debug!(marking_regions, marking_groups, retained_regions, "cset_candidates");
    }

    pub fn log_no_candidates() {
        tracing::debug!("no_cset_candidates");
    }

    pub fn log_concurrent_abort() {
        tracing::info!("concurrent_mark_aborted");
    }
}

#[cfg(not(feature = "tracing"))]
#[allow(clippy::missing_const_for_fn)]
mod internal {
    use std::time::Duration;

    use crate::full::FullGcPhase;

    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    pub type SpanGuard = ();

    pub fn next_gc_id() -> GcId {
        GcId(0)
    }

    pub fn trace_full_gc(_gc_id: GcId, _num_workers: usize) -> SpanGuard {}

    pub fn trace_phase(_phase: FullGcPhase) -> SpanGuard {}

    pub fn trace_worker_task(_name: &'static str, _num_workers: usize) -> SpanGuard {}

    pub fn log_phase_start(_phase: FullGcPhase) {}

    pub fn log_phase_end(_phase: FullGcPhase, _elapsed: Duration) {}

    pub fn log_full_gc_end(_gc_id: GcId, _before: usize, _after: usize, _elapsed: Duration) {}

    pub fn log_active_workers(_workers: usize, _waste: usize, _used: usize, _max: usize) {}

    pub fn log_serial_compaction(_num_regions: usize) {}

    pub fn log_humongous_move(_from: usize, _to: usize, _num_regions: usize) {}

    pub fn log_heap_created(_max_regions: usize, _region_words: usize) {}

    pub fn log_heap_resize(_op: &'static str, _num_regions: usize, _committed: usize) {}

    pub fn log_livemap_committed(_region: usize) {}

    pub fn log_candidates(_marking: usize, _groups: usize, _retained: usize) {}

    pub fn log_no_candidates() {}

    pub fn log_concurrent_abort() {}
}

pub use internal::GcId;
pub(crate) use internal::{
    log_active_workers, log_candidates, log_concurrent_abort, log_full_gc_end, log_heap_created,
    log_heap_resize, log_humongous_move, log_livemap_committed, log_no_candidates, log_phase_end,
    log_phase_start, log_serial_compaction, next_gc_id, trace_full_gc, trace_phase,
    trace_worker_task,
};
