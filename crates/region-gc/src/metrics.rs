//! GC metrics and statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::full::FullGcPhase;

/// Statistics from one full collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullGcMetrics {
    /// Wall time of the whole collection.
    pub duration: Duration,
    /// Per-phase durations.
    pub phases: PhaseTimer,
    /// Workers the collection ran with.
    pub num_workers: usize,
    /// Non-free regions before the collection.
    pub used_regions_before: usize,
    /// Non-free regions after the collection.
    pub used_regions_after: usize,
    /// Regions selected for compaction.
    pub regions_compacted: usize,
    /// Objects found live by the mark phase.
    pub objects_marked: usize,
    /// Objects given a new address.
    pub objects_forwarded: usize,
    /// Regions re-prepared by the serial fallback.
    pub serial_regions: usize,
    /// Humongous objects relocated.
    pub humongous_moved: usize,
    /// Whether a concurrent cycle had to be aborted first.
    pub aborted_concurrent_mark: bool,
}

impl FullGcMetrics {
    /// Regions given back to the allocator.
    #[must_use]
    pub const fn regions_freed(&self) -> usize {
        self.used_regions_before.saturating_sub(self.used_regions_after)
    }
}

/// Per-phase wall-clock timer for a full collection.
///
/// ```
/// use region_gc::full::FullGcPhase;
/// use region_gc::metrics::PhaseTimer;
///
/// let mut timer = PhaseTimer::new();
/// timer.start();
/// // ... mark ...
/// timer.end(FullGcPhase::Mark);
/// assert!(timer.get(FullGcPhase::Compact).is_zero());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimer {
    durations: [Duration; FullGcPhase::COUNT],
    current_start: Option<Instant>,
}

impl PhaseTimer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            durations: [Duration::ZERO; FullGcPhase::COUNT],
            current_start: None,
        }
    }

    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// Stop timing and record the elapsed time against `phase`.
    pub fn end(&mut self, phase: FullGcPhase) -> Duration {
        let elapsed = self
            .current_start
            .take()
            .map_or(Duration::ZERO, |start| start.elapsed());
        self.durations[phase.index()] += elapsed;
        elapsed
    }

    #[must_use]
    pub const fn get(&self, phase: FullGcPhase) -> Duration {
        self.durations[phase.index()]
    }

    #[must_use]
    pub fn total(&self) -> Duration {
        self.durations.iter().sum()
    }
}

/// Process-level cumulative GC statistics.
///
/// ```
/// use region_gc::global_metrics;
///
/// let metrics = global_metrics();
/// println!("Full collections: {}", metrics.total_full_collections());
/// ```
#[derive(Debug)]
pub struct GlobalMetrics {
    full_collections: AtomicUsize,
    concurrent_cycles: AtomicUsize,
    aborted_cycles: AtomicUsize,
    regions_freed: AtomicUsize,
    objects_forwarded: AtomicUsize,
    pause_ns: AtomicU64,
}

impl Default for GlobalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            full_collections: AtomicUsize::new(0),
            concurrent_cycles: AtomicUsize::new(0),
            aborted_cycles: AtomicUsize::new(0),
            regions_freed: AtomicUsize::new(0),
            objects_forwarded: AtomicUsize::new(0),
            pause_ns: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_full_gc(&self, metrics: &FullGcMetrics) {
        self.full_collections.fetch_add(1, Ordering::Relaxed);
        self.regions_freed
            .fetch_add(metrics.regions_freed(), Ordering::Relaxed);
        self.objects_forwarded
            .fetch_add(metrics.objects_forwarded, Ordering::Relaxed);
        let ns = u64::try_from(metrics.duration.as_nanos()).unwrap_or(u64::MAX);
        self.pause_ns.fetch_add(ns, Ordering::Relaxed);
        if metrics.aborted_concurrent_mark {
            self.aborted_cycles.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_concurrent_cycle(&self) {
        self.concurrent_cycles.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    #[must_use]
    pub fn total_full_collections(&self) -> usize {
        self.full_collections.load(Ordering::Relaxed)
    }

    #[inline]
    #[must_use]
    pub fn total_concurrent_cycles(&self) -> usize {
        self.concurrent_cycles.load(Ordering::Relaxed)
    }

    /// Concurrent cycles cut short by a full collection.
    #[inline]
    #[must_use]
    pub fn total_aborted_cycles(&self) -> usize {
        self.aborted_cycles.load(Ordering::Relaxed)
    }

    #[inline]
    #[must_use]
    pub fn total_regions_freed(&self) -> usize {
        self.regions_freed.load(Ordering::Relaxed)
    }

    #[inline]
    #[must_use]
    pub fn total_objects_forwarded(&self) -> usize {
        self.objects_forwarded.load(Ordering::Relaxed)
    }

    /// Total full-GC pause time in nanoseconds.
    #[inline]
    #[must_use]
    pub fn total_pause_ns(&self) -> u64 {
        self.pause_ns.load(Ordering::Relaxed)
    }
}

static GLOBAL_METRICS: GlobalMetrics = GlobalMetrics::new();

/// The process-wide cumulative metrics.
#[must_use]
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_timer_accumulates() {
        let mut timer = PhaseTimer::new();
        timer.start();
        std::thread::sleep(Duration::from_millis(1));
        let mark = timer.end(FullGcPhase::Mark);
        assert!(mark >= Duration::from_millis(1));
        assert_eq!(timer.get(FullGcPhase::Mark), mark);
        assert_eq!(timer.end(FullGcPhase::Compact), Duration::ZERO);
        assert_eq!(timer.total(), mark);
    }

    #[test]
    fn record_full_gc_updates_counters() {
        let global = GlobalMetrics::new();
        let metrics = FullGcMetrics {
            used_regions_before: 10,
            used_regions_after: 4,
            objects_forwarded: 7,
            aborted_concurrent_mark: true,
            duration: Duration::from_nanos(500),
            ..FullGcMetrics::default()
        };
        global.record_full_gc(&metrics);
        assert_eq!(global.total_full_collections(), 1);
        assert_eq!(global.total_regions_freed(), 6);
        assert_eq!(global.total_objects_forwarded(), 7);
        assert_eq!(global.total_aborted_cycles(), 1);
        assert_eq!(global.total_pause_ns(), 500);
    }
}
