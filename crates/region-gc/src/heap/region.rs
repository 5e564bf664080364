//! Heap regions.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use super::buffer_pool::BufferPool;
use super::rem_set::RemSet;
use crate::addr::{Addr, MemRegion, WORD_SIZE};

/// What a region is currently used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RegionKind {
    /// Unused, available for allocation.
    Free = 0,
    /// Young, receiving new allocations.
    Eden = 1,
    /// Young, holding objects that survived a young collection.
    Survivor = 2,
    /// Old generation.
    Old = 3,
    /// First region of a humongous object.
    StartsHumongous = 4,
    /// Later region of a humongous object.
    ContinuesHumongous = 5,
    /// Archive region whose objects may be referenced from outside but are
    /// never moved.
    OpenArchive = 6,
    /// Archive region that only references itself; always live.
    ClosedArchive = 7,
}

impl RegionKind {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Eden,
            2 => Self::Survivor,
            3 => Self::Old,
            4 => Self::StartsHumongous,
            5 => Self::ContinuesHumongous,
            6 => Self::OpenArchive,
            7 => Self::ClosedArchive,
            _ => Self::Free,
        }
    }

    /// Two-letter tag used in region dumps.
    #[must_use]
    pub const fn short_str(self) -> &'static str {
        match self {
            Self::Free => "F",
            Self::Eden => "E",
            Self::Survivor => "S",
            Self::Old => "O",
            Self::StartsHumongous => "HS",
            Self::ContinuesHumongous => "HC",
            Self::OpenArchive => "OA",
            Self::ClosedArchive => "CA",
        }
    }
}

/// A fixed-size slice of the heap and its collector metadata.
#[derive(Debug)]
pub struct HeapRegion {
    index: u32,
    bottom: Addr,
    end: Addr,
    top: AtomicUsize,
    kind: AtomicU8,
    humongous_start: AtomicU32,
    pinned: AtomicBool,
    committed: AtomicBool,
    live_bytes: AtomicUsize,
    rem_set: RemSet,
}

impl HeapRegion {
    pub(crate) fn new(index: u32, bottom: Addr, words: usize, pool: Arc<BufferPool>) -> Self {
        Self {
            index,
            bottom,
            end: bottom.add_words(words),
            top: AtomicUsize::new(bottom.as_usize()),
            kind: AtomicU8::new(RegionKind::Free as u8),
            humongous_start: AtomicU32::new(index),
            pinned: AtomicBool::new(false),
            committed: AtomicBool::new(false),
            live_bytes: AtomicUsize::new(0),
            rem_set: RemSet::new(pool),
        }
    }

    /// Index of this region in the heap's region table.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    #[must_use]
    pub const fn bottom(&self) -> Addr {
        self.bottom
    }

    #[must_use]
    pub const fn end(&self) -> Addr {
        self.end
    }

    #[must_use]
    pub fn top(&self) -> Addr {
        Addr::new(self.top.load(Ordering::Acquire))
    }

    pub fn set_top(&self, top: Addr) {
        debug_assert!(top >= self.bottom && top <= self.end, "top outside region {}", self.index);
        self.top.store(top.as_usize(), Ordering::Release);
    }

    /// The region's full address range.
    #[must_use]
    pub const fn mem_region(&self) -> MemRegion {
        MemRegion::new(self.bottom, self.end)
    }

    /// `[bottom, top)`.
    #[must_use]
    pub fn used_region(&self) -> MemRegion {
        MemRegion::new(self.bottom, self.top())
    }

    #[must_use]
    pub const fn capacity_words(&self) -> usize {
        self.end.words_since(self.bottom)
    }

    #[must_use]
    pub fn used_words(&self) -> usize {
        self.top().words_since(self.bottom)
    }

    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.used_words() * WORD_SIZE
    }

    #[must_use]
    pub fn free_words(&self) -> usize {
        self.end.words_since(self.top())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.top() == self.bottom
    }

    #[must_use]
    pub const fn contains(&self, addr: Addr) -> bool {
        addr.as_usize() >= self.bottom.as_usize() && addr.as_usize() < self.end.as_usize()
    }

    /// Bump-allocate `words` words; lock-free.
    pub fn par_allocate(&self, words: usize) -> Option<Addr> {
        let mut cur = self.top.load(Ordering::Relaxed);
        loop {
            let new_top = Addr::new(cur).add_words(words);
            if new_top > self.end {
                return None;
            }
            match self.top.compare_exchange_weak(
                cur,
                new_top.as_usize(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(Addr::new(cur)),
                Err(actual) => cur = actual,
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> RegionKind {
        RegionKind::from_u8(self.kind.load(Ordering::Acquire))
    }

    pub fn set_kind(&self, kind: RegionKind) {
        self.kind.store(kind as u8, Ordering::Release);
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.kind() == RegionKind::Free
    }

    #[must_use]
    pub fn is_young(&self) -> bool {
        matches!(self.kind(), RegionKind::Eden | RegionKind::Survivor)
    }

    #[must_use]
    pub fn is_old(&self) -> bool {
        self.kind() == RegionKind::Old
    }

    #[must_use]
    pub fn is_humongous(&self) -> bool {
        matches!(
            self.kind(),
            RegionKind::StartsHumongous | RegionKind::ContinuesHumongous
        )
    }

    #[must_use]
    pub fn is_starts_humongous(&self) -> bool {
        self.kind() == RegionKind::StartsHumongous
    }

    #[must_use]
    pub fn is_continues_humongous(&self) -> bool {
        self.kind() == RegionKind::ContinuesHumongous
    }

    #[must_use]
    pub fn is_closed_archive(&self) -> bool {
        self.kind() == RegionKind::ClosedArchive
    }

    #[must_use]
    pub fn is_open_archive(&self) -> bool {
        self.kind() == RegionKind::OpenArchive
    }

    /// Index of the first region of the humongous object this region is
    /// part of.
    #[must_use]
    pub fn humongous_start_index(&self) -> usize {
        self.humongous_start.load(Ordering::Acquire) as usize
    }

    pub(crate) fn set_humongous(&self, kind: RegionKind, start_index: usize) {
        debug_assert!(matches!(
            kind,
            RegionKind::StartsHumongous | RegionKind::ContinuesHumongous
        ));
        #[allow(clippy::cast_possible_truncation)]
        self.humongous_start
            .store(start_index as u32, Ordering::Release);
        self.set_kind(kind);
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    pub fn set_pinned(&self, pinned: bool) {
        self.pinned.store(pinned, Ordering::Release);
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    pub(crate) fn set_committed(&self, committed: bool) {
        self.committed.store(committed, Ordering::Release);
    }

    /// Live bytes recorded by the last marking.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub fn set_live_bytes(&self, bytes: usize) {
        self.live_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Bytes an evacuation of this region would give back.
    #[must_use]
    pub fn reclaimable_bytes(&self) -> usize {
        self.used_bytes().saturating_sub(self.live_bytes())
    }

    #[must_use]
    pub const fn rem_set(&self) -> &RemSet {
        &self.rem_set
    }

    /// Return the region to the free state.
    pub fn reset_to_free(&self) {
        self.set_top(self.bottom);
        self.set_kind(RegionKind::Free);
        self.humongous_start.store(self.index, Ordering::Release);
        self.set_pinned(false);
        self.set_live_bytes(0);
        self.rem_set.uninstall_group_cardset();
        self.rem_set.clear(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(backing: &mut [usize]) -> HeapRegion {
        let bottom = Addr::new(backing.as_mut_ptr() as usize);
        HeapRegion::new(0, bottom, backing.len(), Arc::new(BufferPool::new(8, 4)))
    }

    #[test]
    fn bump_allocation() {
        let mut backing = vec![0usize; 16];
        let r = region(&mut backing);
        let a = r.par_allocate(10).unwrap();
        assert_eq!(a, r.bottom());
        assert_eq!(r.used_words(), 10);
        assert!(r.par_allocate(7).is_none());
        assert_eq!(r.par_allocate(6), Some(r.bottom().add_words(10)));
        assert_eq!(r.free_words(), 0);
    }

    #[test]
    fn reclaimable_bytes_subtracts_live() {
        let mut backing = vec![0usize; 16];
        let r = region(&mut backing);
        r.par_allocate(8).unwrap();
        r.set_live_bytes(3 * WORD_SIZE);
        assert_eq!(r.reclaimable_bytes(), 5 * WORD_SIZE);
    }

    #[test]
    fn reset_to_free_clears_metadata() {
        let mut backing = vec![0usize; 16];
        let r = region(&mut backing);
        r.set_kind(RegionKind::Old);
        r.set_pinned(true);
        r.par_allocate(4).unwrap();
        r.reset_to_free();
        assert!(r.is_free());
        assert!(r.is_empty());
        assert!(!r.is_pinned());
    }

    #[test]
    fn kind_round_trips_through_atomic() {
        let mut backing = vec![0usize; 4];
        let r = region(&mut backing);
        r.set_humongous(RegionKind::ContinuesHumongous, 0);
        assert!(r.is_continues_humongous());
        assert!(r.is_humongous());
        assert_eq!(RegionKind::ClosedArchive.short_str(), "CA");
    }
}
