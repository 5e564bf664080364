//! Candidate regions and the groups they are evacuated in.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::heap::{CardSet, Heap};
use crate::policy::Policy;

/// A candidate region together with its cached efficiency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateInfo {
    pub region: usize,
    pub gc_efficiency: f64,
    /// Pauses in which the region was selected but could not be reclaimed.
    pub num_unreclaimed: u32,
}

impl CandidateInfo {
    #[must_use]
    pub const fn new(region: usize, gc_efficiency: f64) -> Self {
        Self {
            region,
            gc_efficiency,
            num_unreclaimed: 0,
        }
    }

    /// Count one more failed reclamation. Returns whether the region should
    /// stay a candidate.
    pub fn update_num_unreclaimed(&mut self, keep_pinned: u32) -> bool {
        self.num_unreclaimed += 1;
        self.num_unreclaimed < keep_pinned
    }
}

/// Regions evacuated together in one pause, sharing a single card set.
///
/// Regions added to a group install the group's card set as their active
/// remembered-set storage, so references into any member are recorded once.
///
/// Groups are only touched by the thread owning the candidate registry.
/// The shared card set is the one part marking and evacuation threads see.
pub struct CollectionGroup {
    candidates: RefCell<Vec<CandidateInfo>>,
    card_set: Arc<CardSet>,
    gc_efficiency: Cell<f64>,
}

impl CollectionGroup {
    #[must_use]
    pub fn new(heap: &Heap) -> Self {
        Self {
            candidates: RefCell::new(Vec::new()),
            card_set: Arc::new(heap.new_card_set()),
            gc_efficiency: Cell::new(0.0),
        }
    }

    /// Add a region and point its remembered set at the group card set.
    ///
    /// # Panics
    ///
    /// Panics for young regions and for regions already in another group.
    pub fn add(&self, heap: &Heap, info: CandidateInfo) {
        let region = heap.region(info.region);
        assert!(!region.is_young(), "young region {} in a collection group", info.region);
        region.rem_set().install_group_cardset(Arc::clone(&self.card_set));
        self.candidates.borrow_mut().push(info);
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.candidates.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.borrow().is_empty()
    }

    #[must_use]
    pub fn contains(&self, region: usize) -> bool {
        self.candidates.borrow().iter().any(|c| c.region == region)
    }

    /// Snapshot of the member regions in insertion order.
    #[must_use]
    pub fn regions(&self) -> Vec<usize> {
        self.candidates.borrow().iter().map(|c| c.region).collect()
    }

    #[must_use]
    pub fn candidates(&self) -> Vec<CandidateInfo> {
        self.candidates.borrow().clone()
    }

    #[must_use]
    pub const fn card_set(&self) -> &Arc<CardSet> {
        &self.card_set
    }

    #[must_use]
    pub fn gc_efficiency(&self) -> f64 {
        self.gc_efficiency.get()
    }

    /// Predicted pause time for evacuating the whole group.
    #[must_use]
    pub fn predict_group_total_time_ms(&self, heap: &Heap, policy: &dyn Policy) -> f64 {
        let candidates = self.candidates.borrow();
        let per_region: f64 = candidates
            .iter()
            .map(|c| {
                let region = heap.region(c.region);
                policy.predict_region_copy_time_ms(region)
                    + policy.predict_region_code_root_scan_time_ms(region)
            })
            .sum();
        per_region
            + policy.predict_merge_scan_time_ms(self.card_set.occupied())
            + policy.predict_non_young_other_time_ms(candidates.len())
    }

    /// Recompute the cached efficiency: reclaimable bytes over predicted time.
    pub fn calculate_efficiency(&self, heap: &Heap, policy: &dyn Policy) {
        let reclaimable: usize = self
            .candidates
            .borrow()
            .iter()
            .map(|c| heap.region(c.region).reclaimable_bytes())
            .sum();
        let time = self.predict_group_total_time_ms(heap, policy);
        #[allow(clippy::cast_precision_loss)]
        let bytes = reclaimable as f64;
        let efficiency = if time > 0.0 { bytes / time } else { bytes };
        self.gc_efficiency.set(efficiency);
    }

    /// Bump the miss counter of `region`. Returns `None` if the region is
    /// not a member, otherwise whether it should stay a candidate.
    pub fn update_num_unreclaimed(&self, region: usize, keep_pinned: u32) -> Option<bool> {
        self.candidates
            .borrow_mut()
            .iter_mut()
            .find(|c| c.region == region)
            .map(|c| c.update_num_unreclaimed(keep_pinned))
    }

    /// Drop `region` from the group and give it back its own card set.
    pub fn remove_region(&self, heap: &Heap, region: usize) -> Option<CandidateInfo> {
        let mut candidates = self.candidates.borrow_mut();
        let pos = candidates.iter().position(|c| c.region == region)?;
        heap.region(region).rem_set().uninstall_group_cardset();
        Some(candidates.remove(pos))
    }

    /// Forget all members and cards. The regions keep whatever card set
    /// they currently have installed.
    pub fn clear(&self) {
        self.card_set.clear();
        self.candidates.borrow_mut().clear();
    }

    /// Dissolve the group: members return to their own, emptied, card sets.
    pub fn abandon(&self, heap: &Heap) {
        for c in self.candidates.borrow().iter() {
            let rem_set = heap.region(c.region).rem_set();
            rem_set.uninstall_group_cardset();
            rem_set.clear(true);
        }
        self.clear();
    }
}

impl std::fmt::Debug for CollectionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionGroup")
            .field("regions", &self.regions())
            .field("gc_efficiency", &self.gc_efficiency())
            .field("cards", &self.card_set.occupied())
            .finish()
    }
}

/// Order groups by descending efficiency.
#[must_use]
pub fn compare_gc_efficiency(a: &CollectionGroup, b: &CollectionGroup) -> Ordering {
    b.gc_efficiency().total_cmp(&a.gc_efficiency())
}
