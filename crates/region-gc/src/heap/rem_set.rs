//! Remembered sets.
//!
//! A [`CardSet`] records which cards (fixed-size chunks of other regions)
//! may hold references into the regions it covers. Each region owns one,
//! and a candidate group installs a shared card set on all its members so
//! the group can be scanned as a unit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::buffer_pool::{BufferPool, CardBuffer};

/// Cards of a set of source regions, stored as pooled per-region bitmaps.
#[derive(Debug)]
pub struct CardSet {
    pool: Arc<BufferPool>,
    inner: Mutex<CardSetInner>,
    scan_cursor: AtomicUsize,
}

#[derive(Debug, Default)]
struct CardSetInner {
    containers: HashMap<u32, Box<CardBuffer>>,
    occupied: usize,
}

impl CardSet {
    /// Create an empty card set drawing buffers from `pool`.
    #[must_use]
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            inner: Mutex::new(CardSetInner::default()),
            scan_cursor: AtomicUsize::new(0),
        }
    }

    /// Record card `card` of source region `region`; returns `true` if new.
    pub fn add_card(&self, region: u32, card: usize) -> bool {
        let mut inner = self.inner.lock();
        let pool = &self.pool;
        let added = inner
            .containers
            .entry(region)
            .or_insert_with(|| pool.allocate())
            .set(card);
        if added {
            inner.occupied += 1;
        }
        added
    }

    /// Whether card `card` of `region` is recorded.
    #[must_use]
    pub fn contains_card(&self, region: u32, card: usize) -> bool {
        self.inner
            .lock()
            .containers
            .get(&region)
            .is_some_and(|buf| buf.get(card))
    }

    /// Number of recorded cards.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.inner.lock().occupied
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Number of source regions with at least one card.
    #[must_use]
    pub fn num_containers(&self) -> usize {
        self.inner.lock().containers.len()
    }

    /// Call `f(region, card)` for every recorded card, regions ascending.
    pub fn for_each_card(&self, mut f: impl FnMut(u32, usize)) {
        let inner = self.inner.lock();
        let mut regions: Vec<_> = inner.containers.keys().copied().collect();
        regions.sort_unstable();
        for region in regions {
            inner.containers[&region].for_each(|card| f(region, card));
        }
    }

    /// Drop all cards, returning buffers to the pool.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for (_, buf) in inner.containers.drain() {
            self.pool.release(buf);
        }
        inner.occupied = 0;
    }

    /// Rewind the parallel scan cursor.
    pub fn reset_table_scanner(&self) {
        self.scan_cursor.store(0, Ordering::Relaxed);
    }

    /// Claim the next `chunk` containers for scanning; returns the first
    /// claimed index.
    pub fn claim_scan_chunk(&self, chunk: usize) -> usize {
        self.scan_cursor.fetch_add(chunk, Ordering::Relaxed)
    }
}

impl Drop for CardSet {
    fn drop(&mut self) {
        for (_, buf) in self.inner.get_mut().containers.drain() {
            self.pool.release(buf);
        }
    }
}

/// Tracking state of a region's remembered set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RemSetState {
    /// Not maintained.
    Untracked = 0,
    /// Being rebuilt after marking.
    Updating = 1,
    /// Complete and usable for evacuation.
    Complete = 2,
}

impl RemSetState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Updating,
            2 => Self::Complete,
            _ => Self::Untracked,
        }
    }
}

/// Per-region remembered set.
#[derive(Debug)]
pub struct RemSet {
    own: Arc<CardSet>,
    group: Mutex<Option<Arc<CardSet>>>,
    state: AtomicU8,
}

impl RemSet {
    pub(crate) fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            own: Arc::new(CardSet::new(pool)),
            group: Mutex::new(None),
            state: AtomicU8::new(RemSetState::Untracked as u8),
        }
    }

    /// The card set references into this region are recorded in: the group
    /// card set while one is installed, otherwise the region's own.
    #[must_use]
    pub fn card_set(&self) -> Arc<CardSet> {
        self.group
            .lock()
            .as_ref()
            .map_or_else(|| Arc::clone(&self.own), Arc::clone)
    }

    /// Make `card_set` this region's remembered set.
    ///
    /// # Panics
    ///
    /// Panics if a group card set is already installed.
    pub fn install_group_cardset(&self, card_set: Arc<CardSet>) {
        let mut group = self.group.lock();
        assert!(group.is_none(), "region already belongs to a candidate group");
        *group = Some(card_set);
    }

    /// Detach the group card set, reverting to the region's own.
    pub fn uninstall_group_cardset(&self) {
        *self.group.lock() = None;
    }

    #[must_use]
    pub fn has_group_cardset(&self) -> bool {
        self.group.lock().is_some()
    }

    /// Record a card of `from_region` referencing into this region.
    pub fn add_reference(&self, from_region: u32, card: usize) -> bool {
        self.card_set().add_card(from_region, card)
    }

    /// Cards in the active card set.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.card_set().occupied()
    }

    /// Clear the region's own cards; unless `only_cardset`, also stop
    /// tracking.
    pub fn clear(&self, only_cardset: bool) {
        self.own.clear();
        if !only_cardset {
            self.set_state(RemSetState::Untracked);
        }
    }

    /// Rewind the scanner of the active card set.
    pub fn reset_table_scanner(&self) {
        self.card_set().reset_table_scanner();
    }

    #[must_use]
    pub fn state(&self) -> RemSetState {
        RemSetState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: RemSetState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.state() != RemSetState::Untracked
    }
}
