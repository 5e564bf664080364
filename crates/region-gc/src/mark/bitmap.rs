//! Heap-wide concurrent mark bitmap.
//!
//! Routes heap addresses to the owning region's [`LiveMap`]. One bit per
//! heap word; a set bit means a live object starts at that word.

use crate::addr::{Addr, MemRegion};
use crate::error::Result;
use crate::heap::{Heap, RegionMappingListener};
use crate::object::ObjectModel;

use super::livemap::{LiveMap, LiveMapState, LiveMapStorage};

/// Mark bitmap covering the whole reserved heap.
pub struct ConcurrentMarkBitmap {
    covered: MemRegion,
    region_words: usize,
    storage: LiveMapStorage,
    livemaps: Box<[LiveMap]>,
}

impl ConcurrentMarkBitmap {
    /// Reserve (but do not commit) bitmap storage for every region of `heap`.
    ///
    /// # Errors
    ///
    /// Fails if the storage reservation fails.
    pub fn new(heap: &Heap) -> Result<Self> {
        let region_words = heap.region_words();
        let storage = LiveMapStorage::reserve(heap.max_regions(), region_words)?;
        let livemaps = (0..heap.max_regions())
            .map(|i| LiveMap::new(i, region_words))
            .collect();
        Ok(Self {
            covered: heap.reserved(),
            region_words,
            storage,
            livemaps,
        })
    }

    /// Region index and bit offset of `addr`.
    fn locate(&self, addr: Addr) -> (usize, usize) {
        assert!(
            self.covered.contains(addr),
            "address {addr} not covered by the mark bitmap"
        );
        let offset = addr.words_since(self.covered.start());
        (offset / self.region_words, offset % self.region_words)
    }

    fn region_bottom(&self, region: usize) -> Addr {
        self.covered.start().add_words(region * self.region_words)
    }

    /// Mark the object starting at `addr`; returns `true` if this call
    /// marked it.
    pub fn par_mark(&self, addr: Addr) -> bool {
        let (region, bit) = self.locate(addr);
        self.livemaps[region].set(&self.storage, bit)
    }

    /// Whether an object starting at `addr` is marked. Never touches
    /// storage of regions without marks.
    #[must_use]
    pub fn is_marked(&self, addr: Addr) -> bool {
        let (region, bit) = self.locate(addr);
        self.livemaps[region].get(&self.storage, bit)
    }

    /// Clear the mark at `addr`.
    pub fn clear(&self, addr: Addr) {
        let (region, bit) = self.locate(addr);
        self.livemaps[region].clear_bit(&self.storage, bit);
    }

    /// Clear all marks in `mr`, which may span regions.
    pub fn clear_range(&self, mr: MemRegion) {
        let mr = mr.intersection(&self.covered);
        if mr.is_empty() {
            return;
        }
        let (first, _) = self.locate(mr.start());
        let (last, _) = self.locate(mr.end().sub_words(1));
        for region in first..=last {
            let bottom = self.region_bottom(region);
            let span = mr.intersection(&MemRegion::with_words(bottom, self.region_words));
            let beg = span.start().words_since(bottom);
            let end = span.end().words_since(bottom);
            self.livemaps[region].clear_range(&self.storage, beg, end);
        }
    }

    /// Clear every mark in `region`; a no-op if it has none.
    pub fn clear_region(&self, region: usize) {
        self.livemaps[region].reset(&self.storage);
    }

    /// Clear regions `[start, start + num)`.
    pub fn clear_regions(&self, start: usize, num: usize) {
        for region in start..start + num {
            self.clear_region(region);
        }
    }

    /// Clear the whole bitmap, keeping committed storage.
    pub fn clear_all(&self) {
        self.clear_regions(0, self.livemaps.len());
    }

    /// Reset every live map ahead of a new marking cycle.
    pub fn prepare_for_marking(&self) {
        self.clear_all();
    }

    /// Release storage of the given regions; only regions that were ever
    /// committed are touched.
    pub fn uncommit_regions(&self, start: usize, num: usize) {
        for livemap in &self.livemaps[start..start + num] {
            // SAFETY: uncommit happens while the heap is resized at a
            // safepoint, so no marker is running.
            unsafe { livemap.uncommit(&self.storage) };
        }
    }

    /// Address of the next marked object in `[addr, limit)`, or `limit`.
    ///
    /// `addr` and `limit` must lie in the same region.
    #[must_use]
    pub fn get_next_marked_addr(&self, addr: Addr, limit: Addr) -> Addr {
        if addr >= limit {
            return limit;
        }
        let (region, beg) = self.locate(addr);
        let livemap = &self.livemaps[region];
        if !livemap.is_marked() {
            return limit;
        }
        let bottom = self.region_bottom(region);
        assert!(
            limit <= bottom.add_words(self.region_words),
            "limit {limit} beyond end of region {region}"
        );
        let end = limit.words_since(bottom);
        let next = livemap.find_first_set_bit(&self.storage, beg, end);
        bottom.add_words(next)
    }

    /// Visit marked objects in `mr` (within one region) in address order.
    /// Stops early, returning `false`, when `f` returns `false`.
    pub fn iterate(
        &self,
        mr: MemRegion,
        model: &dyn ObjectModel,
        mut f: impl FnMut(Addr) -> bool,
    ) -> bool {
        let mut cur = self.get_next_marked_addr(mr.start(), mr.end());
        while cur < mr.end() {
            // SAFETY: a marked address is the start of a live object.
            let size = unsafe { model.size_words(cur) };
            if !f(cur) {
                return false;
            }
            cur = self.get_next_marked_addr(cur.add_words(size), mr.end());
        }
        true
    }

    /// Marked object starts in `region`.
    #[must_use]
    pub fn count_marked(&self, region: usize) -> usize {
        self.livemaps[region].count(&self.storage)
    }

    /// Whether `region` received any mark this cycle.
    #[must_use]
    pub fn is_region_marked(&self, region: usize) -> bool {
        self.livemaps[region].is_marked()
    }

    /// Whether `region` has committed storage.
    #[must_use]
    pub fn is_region_committed(&self, region: usize) -> bool {
        self.livemaps[region].is_initialized()
    }

    #[must_use]
    pub fn livemap_state(&self, region: usize) -> LiveMapState {
        self.livemaps[region].state()
    }

    /// Number of regions with committed storage.
    #[must_use]
    pub fn committed_regions(&self) -> usize {
        self.livemaps.iter().filter(|m| m.is_initialized()).count()
    }

    /// Whether no region has any mark.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.livemaps.iter().all(|m| !m.is_marked())
    }
}

impl RegionMappingListener for ConcurrentMarkBitmap {
    fn on_commit(&self, start: usize, num: usize, zero_filled: bool) {
        if zero_filled {
            return;
        }
        self.clear_regions(start, num);
    }

    fn on_uncommit(&self, start: usize, num: usize) {
        self.uncommit_regions(start, num);
    }
}
