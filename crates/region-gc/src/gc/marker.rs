//! Parallel marking engine.
//!
//! Shared by concurrent marking and the full collector's mark phase. Each
//! worker owns a bounded [`StealQueue`]; pushes that do not fit go to a
//! shared overflow queue. Idle workers steal, and a [`TaskTerminator`]
//! decides when every worker has run dry.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::utils::Backoff;
use crossbeam_queue::SegQueue;

use crate::addr::Addr;
use crate::heap::Heap;
use crate::mark::ConcurrentMarkBitmap;
use crate::object::ObjectModel;
use crate::roots::RootSet;

use super::workers::WorkerTask;
use super::worklist::{Steal, StealQueue};

/// Per-worker mark queue capacity.
pub const MARK_QUEUE_CAPACITY: usize = 4096;

/// How often (in processed objects) a worker polls the abort flag.
const ABORT_CHECK_INTERVAL: usize = 64;

/// Termination protocol for a fixed set of workers.
///
/// A worker that runs out of work offers termination. Once all workers
/// have offered, the count is final and everyone exits. A worker that sees
/// new work while waiting withdraws its offer and goes back to work.
#[derive(Debug)]
pub struct TaskTerminator {
    num_workers: usize,
    offered: AtomicUsize,
}

impl TaskTerminator {
    #[must_use]
    pub const fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            offered: AtomicUsize::new(0),
        }
    }

    /// Wait until all workers offer (returns `true`), work shows up
    /// (returns `false`), or `aborted` reports true (returns `true`).
    pub fn offer_termination(
        &self,
        has_work: impl Fn() -> bool,
        aborted: impl Fn() -> bool,
    ) -> bool {
        self.offered.fetch_add(1, Ordering::AcqRel);
        let backoff = Backoff::new();
        loop {
            let offered = self.offered.load(Ordering::Acquire);
            if offered == self.num_workers || aborted() {
                return true;
            }
            if has_work() {
                if self
                    .offered
                    .compare_exchange(offered, offered - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return false;
                }
                continue;
            }
            if backoff.is_completed() {
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Make the terminator reusable for another round.
    pub fn reset(&self) {
        self.offered.store(0, Ordering::Release);
    }
}

/// What the marker needs from its environment.
#[derive(Clone, Copy)]
pub struct MarkContext<'a> {
    pub heap: &'a Heap,
    pub bitmap: &'a ConcurrentMarkBitmap,
    pub model: &'a dyn ObjectModel,
    /// Regions whose objects are live by definition and are neither marked
    /// nor scanned.
    pub skip_region: &'a (dyn Fn(usize) -> bool + Sync),
    /// Polled while marking; set to stop early.
    pub abort: Option<&'a AtomicBool>,
}

/// Parallel marker over a fixed number of workers.
pub struct ParallelMarker<'a> {
    ctx: MarkContext<'a>,
    queues: Box<[StealQueue<MARK_QUEUE_CAPACITY>]>,
    overflow: SegQueue<Addr>,
    terminator: TaskTerminator,
    live_words: Box<[AtomicUsize]>,
    marked_objects: AtomicUsize,
}

impl<'a> ParallelMarker<'a> {
    #[must_use]
    pub fn new(ctx: MarkContext<'a>, num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        Self {
            queues: (0..num_workers).map(|_| StealQueue::new()).collect(),
            overflow: SegQueue::new(),
            terminator: TaskTerminator::new(num_workers),
            live_words: (0..ctx.heap.max_regions())
                .map(|_| AtomicUsize::new(0))
                .collect(),
            marked_objects: AtomicUsize::new(0),
            ctx,
        }
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.queues.len()
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.ctx.abort.is_some_and(|a| a.load(Ordering::Relaxed))
    }

    /// Mark `obj` and queue it for scanning. Returns `true` if this call
    /// marked it.
    pub fn mark_and_push(&self, worker_id: usize, obj: Addr) -> bool {
        if obj.is_null() {
            return false;
        }
        let region = self.ctx.heap.addr_to_region(obj);
        if (self.ctx.skip_region)(region) {
            return false;
        }
        if !self.ctx.bitmap.par_mark(obj) {
            return false;
        }
        // SAFETY: obj is reachable, so it is the start of a live object.
        let size = unsafe { self.ctx.model.size_words(obj) };
        self.live_words[region].fetch_add(size, Ordering::Relaxed);
        self.marked_objects.fetch_add(1, Ordering::Relaxed);
        if !self.queues[worker_id].push(obj) {
            self.overflow.push(obj);
        }
        true
    }

    fn follow_object(&self, worker_id: usize, obj: Addr) {
        // SAFETY: only marked objects are queued.
        unsafe {
            self.ctx.model.for_each_ref_slot(obj, &mut |slot| {
                let target = Addr::new(slot.load());
                self.mark_and_push(worker_id, target);
            });
        }
    }

    fn pop_local(&self, worker_id: usize) -> Option<Addr> {
        self.queues[worker_id].pop().or_else(|| self.overflow.pop())
    }

    fn steal(&self, worker_id: usize) -> Option<Addr> {
        let n = self.queues.len();
        for i in 1..n {
            let victim = &self.queues[(worker_id + i) % n];
            loop {
                match victim.steal() {
                    Steal::Success(obj) => return Some(obj),
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        None
    }

    fn has_work(&self) -> bool {
        !self.overflow.is_empty() || self.queues.iter().any(|q| !q.is_empty())
    }

    /// Process queued objects until all workers run dry. Every worker of
    /// this marker must call it. Returns `false` if marking was aborted.
    pub fn drain(&self, worker_id: usize) -> bool {
        let mut processed = 0usize;
        loop {
            while let Some(obj) = self.pop_local(worker_id).or_else(|| self.steal(worker_id)) {
                self.follow_object(worker_id, obj);
                processed += 1;
                if processed % ABORT_CHECK_INTERVAL == 0 && self.is_aborted() {
                    return false;
                }
            }
            if self.is_aborted() {
                return false;
            }
            if self
                .terminator
                .offer_termination(|| self.has_work(), || self.is_aborted())
            {
                return !self.is_aborted();
            }
        }
    }

    /// Drain on the calling thread alone, taking work from every queue.
    /// Used for serial follow-up marking after the parallel phase.
    pub fn drain_serial(&self) {
        while let Some(obj) = self.pop_local(0).or_else(|| self.steal(0)) {
            self.follow_object(0, obj);
        }
    }

    /// Words marked live per region so far.
    #[must_use]
    pub fn live_words(&self, region: usize) -> usize {
        self.live_words[region].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn marked_objects(&self) -> usize {
        self.marked_objects.load(Ordering::Relaxed)
    }

    /// Per-region live words, consuming the marker.
    #[must_use]
    pub fn into_live_words(self) -> Vec<usize> {
        self.live_words
            .into_vec()
            .into_iter()
            .map(AtomicUsize::into_inner)
            .collect()
    }
}

/// Marks everything reachable from a root set. Each worker takes a
/// stripe of the roots and then helps drain.
pub struct MarkRootsTask<'m, 'a> {
    name: &'static str,
    marker: &'m ParallelMarker<'a>,
    roots: &'m RootSet,
}

impl<'m, 'a> MarkRootsTask<'m, 'a> {
    #[must_use]
    pub const fn new(name: &'static str, marker: &'m ParallelMarker<'a>, roots: &'m RootSet) -> Self {
        Self {
            name,
            marker,
            roots,
        }
    }
}

impl WorkerTask for MarkRootsTask<'_, '_> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn work(&self, worker_id: usize) {
        let num_workers = self.marker.num_workers();
        for index in self.roots.indices_for_worker(worker_id, num_workers) {
            self.marker.mark_and_push(worker_id, self.roots.get(index));
        }
        self.marker.drain(worker_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::RegionKind;
    use crate::object::SimpleObjectModel;

    fn never(_: usize) -> bool {
        false
    }

    #[test]
    fn terminator_single_worker_terminates_immediately() {
        let t = TaskTerminator::new(1);
        assert!(t.offer_termination(|| false, || false));
    }

    #[test]
    fn terminator_withdraws_when_work_appears() {
        let t = TaskTerminator::new(2);
        assert!(!t.offer_termination(|| true, || false));
        t.reset();
        let flag = AtomicBool::new(false);
        std::thread::scope(|s| {
            s.spawn(|| assert!(t.offer_termination(|| false, || false)));
            assert!(t.offer_termination(|| false, || flag.load(Ordering::Relaxed)));
        });
    }

    #[test]
    fn marks_transitive_closure() {
        let heap = Heap::new(GcConfig::new(256, 2)).unwrap();
        let bitmap = ConcurrentMarkBitmap::new(&heap).unwrap();
        let model = SimpleObjectModel;
        let objs: Vec<_> = (0..4)
            .map(|_| {
                let a = heap.allocate(8, RegionKind::Old).unwrap();
                unsafe { model.init_object(a, 8, 1) };
                a
            })
            .collect();
        unsafe {
            model.set_ref(objs[0], 0, objs[1]);
            model.set_ref(objs[1], 0, objs[2]);
        }

        let ctx = MarkContext {
            heap: &heap,
            bitmap: &bitmap,
            model: &model,
            skip_region: &never,
            abort: None,
        };
        let marker = ParallelMarker::new(ctx, 1);
        assert!(marker.mark_and_push(0, objs[0]));
        assert!(marker.drain(0));

        assert!(bitmap.is_marked(objs[2]));
        assert!(!bitmap.is_marked(objs[3]));
        assert_eq!(marker.marked_objects(), 3);
        assert_eq!(marker.live_words(0), 24);
    }

    #[test]
    fn abort_stops_drain() {
        let heap = Heap::new(GcConfig::new(256, 1)).unwrap();
        let bitmap = ConcurrentMarkBitmap::new(&heap).unwrap();
        let model = SimpleObjectModel;
        let a = heap.allocate(4, RegionKind::Old).unwrap();
        unsafe { model.init_object(a, 4, 0) };
        let abort = AtomicBool::new(true);
        let ctx = MarkContext {
            heap: &heap,
            bitmap: &bitmap,
            model: &model,
            skip_region: &never,
            abort: Some(&abort),
        };
        let marker = ParallelMarker::new(ctx, 1);
        marker.mark_and_push(0, a);
        assert!(!marker.drain(0));
    }
}
