//! Per-region mark bits with lazy backing storage.
//!
//! Every region has a [`LiveMap`] whose bits live in a slice of one big
//! reserved mapping. A region's slice is only committed the first time
//! something in the region is marked, so untouched regions cost no memory.
//!
//! State machine, driven by CAS:
//!
//! ```text
//! Uninitialized --first mark--> Initializing --commit--> Initialized
//! Initialized --first mark this cycle--> Marked --reset/clear--> Initialized
//! Initialized/Marked --uncommit--> Uninitialized
//! ```
//!
//! In `Initialized` all bits are zero. Readers treat anything other than
//! `Marked` as "nothing marked" and never touch the storage.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crossbeam::utils::Backoff;
use sys_alloc::{Mmap, MmapOptions};

use crate::error::Result;

const BITS_PER_WORD: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LiveMapState {
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
    Marked = 3,
}

impl LiveMapState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Initializing,
            2 => Self::Initialized,
            3 => Self::Marked,
            _ => Self::Uninitialized,
        }
    }
}

/// Reserved backing store for all live maps, one page-aligned slice per
/// region.
pub struct LiveMapStorage {
    memory: Mmap,
    stride: usize,
    words_per_region: usize,
}

impl LiveMapStorage {
    /// Reserve storage for `regions` maps of `bits_per_region` bits.
    ///
    /// # Errors
    ///
    /// Fails if the address space cannot be reserved.
    pub fn reserve(regions: usize, bits_per_region: usize) -> Result<Self> {
        let words_per_region = bits_per_region.div_ceil(BITS_PER_WORD);
        let stride = sys_alloc::align_to_page(words_per_region * std::mem::size_of::<u64>());
        // SAFETY: reserve-only mapping; slices are committed before use.
        let memory = unsafe {
            MmapOptions::new()
                .len(stride * regions)
                .reserve_only(true)
                .map_anon()?
        };
        Ok(Self {
            memory,
            stride,
            words_per_region,
        })
    }

    /// Bytes of backing storage per region.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    fn commit(&self, region: usize) {
        if let Err(err) = self.memory.commit(region * self.stride, self.stride) {
            panic!("failed to commit mark bitmap for region {region}: {err}");
        }
    }

    /// # Safety
    ///
    /// No thread may access the region's words until it is committed again.
    unsafe fn decommit(&self, region: usize) {
        // SAFETY: forwarded to the caller.
        if let Err(err) = unsafe { self.memory.decommit(region * self.stride, self.stride) } {
            panic!("failed to uncommit mark bitmap for region {region}: {err}");
        }
    }

    /// # Safety
    ///
    /// The region's slice must be committed.
    unsafe fn words(&self, region: usize) -> &[AtomicU64] {
        // SAFETY: the slice is committed, page aligned and zero initialised
        // on commit; AtomicU64 has the layout of u64.
        unsafe {
            let base = self.memory.ptr().add(region * self.stride).cast::<AtomicU64>();
            std::slice::from_raw_parts(base, self.words_per_region)
        }
    }
}

/// Mark bits of one region.
#[derive(Debug)]
pub struct LiveMap {
    region: usize,
    num_bits: usize,
    state: AtomicU8,
}

impl LiveMap {
    #[must_use]
    pub const fn new(region: usize, num_bits: usize) -> Self {
        Self {
            region,
            num_bits,
            state: AtomicU8::new(LiveMapState::Uninitialized as u8),
        }
    }

    #[must_use]
    pub fn state(&self) -> LiveMapState {
        LiveMapState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Storage is committed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(self.state(), LiveMapState::Initialized | LiveMapState::Marked)
    }

    /// At least one bit was set this cycle.
    #[must_use]
    pub fn is_marked(&self) -> bool {
        self.state() == LiveMapState::Marked
    }

    #[must_use]
    pub const fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Commit storage exactly once. Threads losing the race wait until the
    /// winner has finished.
    pub fn initialize(&self, storage: &LiveMapStorage) {
        if self
            .state
            .compare_exchange(
                LiveMapState::Uninitialized as u8,
                LiveMapState::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            storage.commit(self.region);
            self.state
                .store(LiveMapState::Initialized as u8, Ordering::Release);
            crate::tracing::log_livemap_committed(self.region);
            return;
        }
        let backoff = Backoff::new();
        while self.state() == LiveMapState::Initializing {
            backoff.snooze();
        }
    }

    /// Set bit `index`; returns `true` if this call set it.
    pub fn set(&self, storage: &LiveMapStorage, index: usize) -> bool {
        assert!(
            index < self.num_bits,
            "mark at bit {index} outside region {} ({} bits)",
            self.region,
            self.num_bits
        );
        if !self.is_initialized() {
            self.initialize(storage);
        }
        if !self.is_marked() {
            // Losing this race is fine: someone else moved it to Marked.
            let _ = self.state.compare_exchange(
                LiveMapState::Initialized as u8,
                LiveMapState::Marked as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        debug_assert!(self.is_marked());
        // SAFETY: initialized above, so the slice is committed.
        let words = unsafe { storage.words(self.region) };
        let mask = 1u64 << (index % BITS_PER_WORD);
        words[index / BITS_PER_WORD].fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    /// Whether bit `index` is set this cycle.
    #[must_use]
    pub fn get(&self, storage: &LiveMapStorage, index: usize) -> bool {
        if !self.is_marked() || index >= self.num_bits {
            return false;
        }
        // SAFETY: Marked implies committed.
        let words = unsafe { storage.words(self.region) };
        words[index / BITS_PER_WORD].load(Ordering::Acquire) & (1u64 << (index % BITS_PER_WORD))
            != 0
    }

    /// Clear bit `index`.
    pub fn clear_bit(&self, storage: &LiveMapStorage, index: usize) {
        if !self.is_marked() {
            return;
        }
        // SAFETY: Marked implies committed.
        let words = unsafe { storage.words(self.region) };
        words[index / BITS_PER_WORD]
            .fetch_and(!(1u64 << (index % BITS_PER_WORD)), Ordering::AcqRel);
    }

    /// Clear bits `[beg, end)`. The state is left alone.
    pub fn clear_range(&self, storage: &LiveMapStorage, beg: usize, end: usize) {
        if !self.is_marked() || beg >= end {
            return;
        }
        let end = end.min(self.num_bits);
        // SAFETY: Marked implies committed.
        let words = unsafe { storage.words(self.region) };
        let (first, last) = (beg / BITS_PER_WORD, (end - 1) / BITS_PER_WORD);
        for (i, word) in words.iter().enumerate().take(last + 1).skip(first) {
            let lo = if i == first { beg % BITS_PER_WORD } else { 0 };
            let hi = if i == last {
                (end - 1) % BITS_PER_WORD + 1
            } else {
                BITS_PER_WORD
            };
            let mask = range_mask(lo, hi);
            if mask == u64::MAX {
                word.store(0, Ordering::Release);
            } else {
                word.fetch_and(!mask, Ordering::AcqRel);
            }
        }
    }

    /// Clear all bits and go back to `Initialized`.
    pub fn reset(&self, storage: &LiveMapStorage) {
        if !self.is_marked() {
            return;
        }
        self.clear_range(storage, 0, self.num_bits);
        self.state
            .store(LiveMapState::Initialized as u8, Ordering::Release);
    }

    /// Release the backing storage.
    ///
    /// # Safety
    ///
    /// No other thread may be using this live map.
    pub unsafe fn uncommit(&self, storage: &LiveMapStorage) {
        if !self.is_initialized() {
            return;
        }
        self.state
            .store(LiveMapState::Uninitialized as u8, Ordering::Release);
        // SAFETY: caller guarantees exclusivity; the state now keeps
        // readers away from the slice.
        unsafe { storage.decommit(self.region) };
    }

    /// Index of the first set bit in `[beg, end)`, or `end` if none.
    #[must_use]
    pub fn find_first_set_bit(&self, storage: &LiveMapStorage, beg: usize, end: usize) -> usize {
        if !self.is_marked() || beg >= end {
            return end;
        }
        let limit = end.min(self.num_bits);
        // SAFETY: Marked implies committed.
        let words = unsafe { storage.words(self.region) };
        let mut index = beg;
        while index < limit {
            let word_index = index / BITS_PER_WORD;
            let shift = index % BITS_PER_WORD;
            let word = words[word_index].load(Ordering::Acquire) >> shift;
            if word != 0 {
                let found = index + word.trailing_zeros() as usize;
                return if found < limit { found } else { end };
            }
            index = (word_index + 1) * BITS_PER_WORD;
        }
        end
    }

    /// Number of set bits.
    #[must_use]
    pub fn count(&self, storage: &LiveMapStorage) -> usize {
        if !self.is_marked() {
            return 0;
        }
        // SAFETY: Marked implies committed.
        let words = unsafe { storage.words(self.region) };
        words
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }
}

const fn range_mask(lo: usize, hi: usize) -> u64 {
    let upper = if hi == BITS_PER_WORD {
        u64::MAX
    } else {
        (1u64 << hi) - 1
    };
    upper & !((1u64 << lo) - 1)
}
