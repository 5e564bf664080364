//! The region heap.
//!
//! One contiguous mapping split into equally sized [`HeapRegion`]s. The heap
//! hands out regions, tracks which are committed, and tells interested
//! side structures (the mark bitmap) when regions come and go.

mod buffer_pool;
mod region;
mod rem_set;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sys_alloc::{Mmap, MmapOptions};

pub use buffer_pool::{BufferPool, BufferPoolStats, CardBuffer};
pub use region::{HeapRegion, RegionKind};
pub use rem_set::{CardSet, RemSet, RemSetState};

use crate::addr::{Addr, MemRegion};
use crate::config::GcConfig;
use crate::error::Result;
use crate::object::ObjectModel;

/// Notified when regions are committed or uncommitted.
pub trait RegionMappingListener {
    /// Regions `[start, start + num)` became usable. `zero_filled` is true
    /// when any side storage for them is known to be zeroed.
    fn on_commit(&self, start: usize, num: usize, zero_filled: bool);

    /// Regions `[start, start + num)` were released.
    fn on_uncommit(&self, start: usize, num: usize);
}

/// Placement of a humongous object over a run of regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HumongousLayout {
    /// Words of the object itself.
    pub object_words: usize,
    /// Words covered by a filler object after it.
    pub filler_words: usize,
    /// Tail words too small for a filler; left above the last region's top.
    pub non_fillable_words: usize,
}

/// The managed heap.
pub struct Heap {
    config: GcConfig,
    // Owns the memory every region points into.
    _memory: Mmap,
    reserved: MemRegion,
    regions: Box<[HeapRegion]>,
    committed: AtomicUsize,
    card_buffer_pool: Arc<BufferPool>,
}

impl Heap {
    /// Map a heap of `config.max_regions` regions and commit
    /// `config.initial_regions` of them.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or if the OS refuses the mapping.
    pub fn new(config: GcConfig) -> Result<Self> {
        config.validate()?;
        let bytes = sys_alloc::align_to_page(config.max_regions * config.region_bytes());
        // SAFETY: a fresh anonymous mapping; all accesses stay inside it.
        let memory = unsafe { MmapOptions::new().len(bytes).no_reserve(true).map_anon()? };
        let base = Addr::new(memory.ptr() as usize);
        let cards_per_region = config.region_bytes().div_ceil(config.card_size);
        let card_buffer_pool = Arc::new(BufferPool::new(
            cards_per_region,
            config.free_list_transfer_threshold,
        ));
        #[allow(clippy::cast_possible_truncation)]
        let regions = (0..config.max_regions)
            .map(|i| {
                HeapRegion::new(
                    i as u32,
                    base.add_words(i * config.region_words),
                    config.region_words,
                    Arc::clone(&card_buffer_pool),
                )
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        for region in regions.iter().take(config.initial_regions) {
            region.set_committed(true);
        }
        crate::tracing::log_heap_created(config.max_regions, config.region_words);
        Ok(Self {
            config,
            _memory: memory,
            reserved: MemRegion::with_words(base, config.max_regions * config.region_words),
            regions,
            committed: AtomicUsize::new(config.initial_regions),
            card_buffer_pool,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &GcConfig {
        &self.config
    }

    #[must_use]
    pub const fn region_words(&self) -> usize {
        self.config.region_words
    }

    #[must_use]
    pub fn max_regions(&self) -> usize {
        self.regions.len()
    }

    /// The whole reserved address range.
    #[must_use]
    pub const fn reserved(&self) -> MemRegion {
        self.reserved
    }

    #[must_use]
    pub const fn is_in_reserved(&self, addr: Addr) -> bool {
        self.reserved.contains(addr)
    }

    /// Pool the card sets of this heap allocate from.
    #[must_use]
    pub const fn card_buffer_pool(&self) -> &Arc<BufferPool> {
        &self.card_buffer_pool
    }

    /// Create an empty card set backed by this heap's buffer pool.
    #[must_use]
    pub fn new_card_set(&self) -> CardSet {
        CardSet::new(Arc::clone(&self.card_buffer_pool))
    }

    /// Region by index.
    #[must_use]
    pub fn region(&self, index: usize) -> &HeapRegion {
        &self.regions[index]
    }

    /// Index of the region containing `addr`.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is outside the heap.
    #[must_use]
    pub fn addr_to_region(&self, addr: Addr) -> usize {
        assert!(
            self.is_in_reserved(addr),
            "address {addr} outside heap [{}, {})",
            self.reserved.start(),
            self.reserved.end()
        );
        addr.words_since(self.reserved.start()) / self.config.region_words
    }

    /// The region containing `addr`.
    #[must_use]
    pub fn region_containing(&self, addr: Addr) -> &HeapRegion {
        self.region(self.addr_to_region(addr))
    }

    #[must_use]
    pub fn bottom_addr_for_region(&self, index: usize) -> Addr {
        self.reserved.start().add_words(index * self.config.region_words)
    }

    /// All regions, committed or not.
    pub fn regions(&self) -> impl Iterator<Item = &HeapRegion> {
        self.regions.iter()
    }

    /// Committed regions in index order.
    pub fn committed_regions(&self) -> impl Iterator<Item = &HeapRegion> {
        self.regions.iter().filter(|r| r.is_committed())
    }

    #[must_use]
    pub fn num_committed_regions(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn num_free_regions(&self) -> usize {
        self.committed_regions().filter(|r| r.is_free()).count()
    }

    #[must_use]
    pub fn num_used_regions(&self) -> usize {
        self.num_committed_regions() - self.num_free_regions()
    }

    /// Allocate `words` words in a region of `kind`, taking a free region
    /// if no region of that kind has room.
    ///
    /// # Panics
    ///
    /// Panics if `kind` is not an ordinary allocation kind or the request
    /// is humongous.
    pub fn allocate(&self, words: usize, kind: RegionKind) -> Option<Addr> {
        assert!(
            matches!(kind, RegionKind::Eden | RegionKind::Survivor | RegionKind::Old),
            "cannot allocate into {kind:?} regions"
        );
        assert!(!self.is_humongous(words), "humongous request of {words} words");
        self.committed_regions()
            .filter(|r| r.kind() == kind)
            .find_map(|r| r.par_allocate(words))
            .or_else(|| {
                let region = self.claim_free_region(kind)?;
                region.par_allocate(words)
            })
    }

    /// Allocate `words` words at the top of region `index`, turning a free
    /// region into an old one.
    pub fn allocate_in(&self, index: usize, words: usize) -> Option<Addr> {
        let region = self.region(index);
        if !region.is_committed() {
            return None;
        }
        if region.is_free() {
            region.set_kind(RegionKind::Old);
        }
        region.par_allocate(words)
    }

    /// Whether an object of `words` words needs its own region run.
    #[must_use]
    pub const fn is_humongous(&self, words: usize) -> bool {
        words > self.config.region_words / 2
    }

    /// Regions spanned by a humongous object of `words` words.
    #[must_use]
    pub const fn humongous_regions(&self, words: usize) -> usize {
        words.div_ceil(self.config.region_words)
    }

    /// Allocate a humongous object over the lowest run of free committed
    /// regions that fits it. The object header is left to the caller; the
    /// tail is formatted with `model`'s filler.
    pub fn allocate_humongous(&self, words: usize, model: &dyn ObjectModel) -> Option<Addr> {
        let n = self.humongous_regions(words);
        let first = self.find_free_run(n)?;
        self.setup_humongous(first, words, model);
        Some(self.bottom_addr_for_region(first))
    }

    fn find_free_run(&self, n: usize) -> Option<usize> {
        let mut run = 0;
        for region in self.regions.iter() {
            if region.is_committed() && region.is_free() {
                run += 1;
                if run == n {
                    return Some(region.index() + 1 - n);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    /// Turn regions starting at `first` into a humongous run for an object
    /// of `words` words at the run's bottom.
    ///
    /// The run's capacity is split into the object, a filler object if the
    /// remaining tail can hold one, and otherwise a non-fillable slack left
    /// above the last region's top.
    pub fn setup_humongous(
        &self,
        first: usize,
        words: usize,
        model: &dyn ObjectModel,
    ) -> HumongousLayout {
        let n = self.humongous_regions(words);
        let capacity = n * self.config.region_words;
        let fill = capacity - words;
        let obj_end = self.bottom_addr_for_region(first).add_words(words);

        let (filler_words, non_fillable_words) = if fill == 0 {
            (0, 0)
        } else if fill >= model.min_fill_words() {
            // SAFETY: the tail lies inside regions now owned by this object.
            unsafe { model.fill_with_object(obj_end, fill) };
            (fill, 0)
        } else {
            (0, fill)
        };

        for index in first..first + n {
            let region = self.region(index);
            let kind = if index == first {
                RegionKind::StartsHumongous
            } else {
                RegionKind::ContinuesHumongous
            };
            region.set_humongous(kind, first);
            region.set_top(region.end());
        }
        let last = self.region(first + n - 1);
        last.set_top(last.end().sub_words(non_fillable_words));

        HumongousLayout {
            object_words: words,
            filler_words,
            non_fillable_words,
        }
    }

    fn claim_free_region(&self, kind: RegionKind) -> Option<&HeapRegion> {
        let region = self.committed_regions().find(|r| r.is_free())?;
        region.set_kind(kind);
        Some(region)
    }

    /// Free region `index`.
    pub fn free_region(&self, index: usize) {
        self.region(index).reset_to_free();
    }

    /// Free every region of the humongous object starting at `start`.
    pub fn free_humongous(&self, start: usize) {
        debug_assert!(self.region(start).is_starts_humongous());
        self.free_region(start);
        for index in start + 1..self.max_regions() {
            let region = self.region(index);
            if !region.is_continues_humongous() || region.humongous_start_index() != start {
                break;
            }
            self.free_region(index);
        }
    }

    /// Number of regions in the humongous run starting at `start`.
    #[must_use]
    pub fn humongous_run_len(&self, start: usize) -> usize {
        1 + self.regions[start + 1..]
            .iter()
            .take_while(|r| r.is_continues_humongous() && r.humongous_start_index() == start)
            .count()
    }

    /// Commit up to `num` uncommitted regions, lowest first. Returns how
    /// many were committed.
    pub fn expand(&self, num: usize, listener: &dyn RegionMappingListener) -> usize {
        let mut done = 0;
        let mut index = 0;
        while done < num && index < self.max_regions() {
            let region = self.region(index);
            if region.is_committed() {
                index += 1;
                continue;
            }
            let start = index;
            while index < self.max_regions() && done < num && !self.region(index).is_committed() {
                self.region(index).reset_to_free();
                self.region(index).set_committed(true);
                index += 1;
                done += 1;
            }
            listener.on_commit(start, index - start, false);
        }
        self.committed.fetch_add(done, Ordering::AcqRel);
        crate::tracing::log_heap_resize("expand", done, self.num_committed_regions());
        done
    }

    /// Uncommit up to `num` free regions, highest first. Returns how many
    /// were uncommitted.
    pub fn shrink(&self, num: usize, listener: &dyn RegionMappingListener) -> usize {
        let mut done = 0;
        let mut index = self.max_regions();
        while done < num && index > 0 {
            let region = self.region(index - 1);
            if !(region.is_committed() && region.is_free()) {
                index -= 1;
                continue;
            }
            let end = index;
            while index > 0 && done < num {
                let region = self.region(index - 1);
                if !(region.is_committed() && region.is_free()) {
                    break;
                }
                region.set_committed(false);
                index -= 1;
                done += 1;
            }
            listener.on_uncommit(index, end - index);
        }
        self.committed.fetch_sub(done, Ordering::AcqRel);
        crate::tracing::log_heap_resize("shrink", done, self.num_committed_regions());
        done
    }
}
