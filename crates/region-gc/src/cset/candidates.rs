//! The collection-set candidate registry.
//!
//! Two group lists are kept: groups built from the regions concurrent
//! marking selected, and single-region groups of regions retained after a
//! failed evacuation. A per-region origin map records which list each
//! region is in so double registration is caught early.

use std::rc::Rc;

use thiserror::Error;

use crate::config::GcConfig;
use crate::heap::Heap;
use crate::policy::Policy;

use super::group::{CandidateInfo, CollectionGroup};
use super::groups_list::CollectionCandidateGroupsList;

/// Why a region is a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CandidateOrigin {
    #[default]
    Invalid,
    Marking,
    Retained,
    /// Scratch value used while verifying.
    Verify,
}

impl CandidateOrigin {
    #[must_use]
    pub const fn short_str(self) -> &'static str {
        match self {
            Self::Invalid => "Ci",
            Self::Marking => "Cm",
            Self::Retained => "Cr",
            Self::Verify => "Cv",
        }
    }
}

/// Disagreement between the origin map and the group lists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OriginMapMismatch {
    #[error("region {region} appears in more than one candidate group")]
    Duplicate { region: usize },
    #[error("region {region}: origin map says {recorded:?}, group lists say {actual:?}")]
    Mismatch {
        region: usize,
        recorded: CandidateOrigin,
        actual: CandidateOrigin,
    },
    #[error("marking list counts {counted} regions but holds {actual}")]
    MarkingCount { counted: usize, actual: usize },
    #[error("retained list counts {counted} regions but holds {actual}")]
    RetainedCount { counted: usize, actual: usize },
}

/// Registry of every region eligible for incremental collection.
#[derive(Debug)]
pub struct CollectionSetCandidates {
    contains_map: Option<Box<[CandidateOrigin]>>,
    marking_groups: CollectionCandidateGroupsList,
    retained_groups: CollectionCandidateGroupsList,
    last_marking_candidates_length: usize,
    group_size: usize,
    keep_pinned: u32,
}

impl CollectionSetCandidates {
    #[must_use]
    pub fn new(config: &GcConfig) -> Self {
        Self {
            contains_map: None,
            marking_groups: CollectionCandidateGroupsList::new(),
            retained_groups: CollectionCandidateGroupsList::new(),
            last_marking_candidates_length: 0,
            group_size: config.group_size.max(1),
            keep_pinned: config.num_collections_keep_pinned,
        }
    }

    /// Size the origin map. Must be called exactly once.
    ///
    /// # Panics
    ///
    /// Panics on a second call.
    pub fn initialize(&mut self, max_regions: usize) {
        assert!(self.contains_map.is_none(), "candidates initialized twice");
        self.contains_map = Some(vec![CandidateOrigin::Invalid; max_regions].into_boxed_slice());
    }

    fn map(&self) -> &[CandidateOrigin] {
        match &self.contains_map {
            Some(map) => map,
            None => panic!("candidates used before initialize"),
        }
    }

    fn map_mut(&mut self) -> &mut [CandidateOrigin] {
        match &mut self.contains_map {
            Some(map) => map,
            None => panic!("candidates used before initialize"),
        }
    }

    /// Abandon all groups and forget every region.
    pub fn clear(&mut self, heap: &Heap) {
        self.marking_groups.abandon(heap);
        self.retained_groups.abandon(heap);
        if let Some(map) = &mut self.contains_map {
            map.fill(CandidateOrigin::Invalid);
        }
        self.last_marking_candidates_length = 0;
    }

    /// Drop the remaining marking candidates, e.g. when the heap shrinks.
    pub fn clear_marking_candidates(&mut self, heap: &Heap) {
        let regions: Vec<usize> = self
            .marking_groups
            .iter()
            .flat_map(|g| g.regions())
            .collect();
        let map = self.map_mut();
        for region in regions {
            map[region] = CandidateOrigin::Invalid;
        }
        self.marking_groups.abandon(heap);
        self.verify();
    }

    /// Partition `candidates`, sorted by descending efficiency, into
    /// marking groups. The first group holds as many regions as the
    /// policy's minimum old collection-set length; later groups hold at
    /// most `group_size` regions.
    ///
    /// # Panics
    ///
    /// Panics if marking groups from an earlier cycle remain, or a region
    /// is already a candidate.
    pub fn set_candidates_from_marking(
        &mut self,
        heap: &Heap,
        policy: &dyn Policy,
        candidates: &[CandidateInfo],
    ) {
        assert!(
            self.marking_groups.is_empty(),
            "marking candidates from a previous cycle remain"
        );
        let num_infos = candidates.len();
        if num_infos == 0 {
            crate::tracing::log_no_candidates();
            return;
        }
        let before = self.length();

        let mut group_limit = policy.calc_min_old_cset_length(num_infos).max(1);
        let mut current = Rc::new(CollectionGroup::new(heap));
        for info in candidates {
            let origin = &mut self.map_mut()[info.region];
            assert_eq!(
                *origin,
                CandidateOrigin::Invalid,
                "region {} is already a candidate",
                info.region
            );
            *origin = CandidateOrigin::Marking;
            current.add(heap, *info);
            if current.length() == group_limit {
                current.calculate_efficiency(heap, policy);
                self.marking_groups.append(current);
                current = Rc::new(CollectionGroup::new(heap));
                group_limit = self.group_size;
            }
        }
        if !current.is_empty() {
            current.calculate_efficiency(heap, policy);
            self.marking_groups.append(current);
        }

        assert_eq!(self.marking_groups.num_regions(), num_infos);
        debug_assert_eq!(self.length(), before + num_infos);
        self.last_marking_candidates_length = num_infos;
        crate::tracing::log_candidates(
            num_infos,
            self.marking_groups.len(),
            self.retained_groups.num_regions(),
        );
        self.verify();
    }

    /// Re-rank the marking groups by freshly computed efficiency.
    pub fn sort_marking_by_efficiency(&mut self, heap: &Heap, policy: &dyn Policy) {
        self.marking_groups.sort_by_efficiency(heap, policy);
        debug_assert!(self.marking_groups.verify());
    }

    /// Re-rank the retained groups by freshly computed efficiency.
    pub fn sort_by_efficiency(&mut self, heap: &Heap, policy: &dyn Policy) {
        self.retained_groups.sort_by_efficiency(heap, policy);
        debug_assert!(self.retained_groups.verify());
    }

    /// Register a region that failed evacuation. The retained list must be
    /// re-sorted afterwards.
    ///
    /// # Panics
    ///
    /// Panics if the region is already a candidate.
    pub fn add_retained_region_unsorted(&mut self, heap: &Heap, policy: &dyn Policy, region: usize) {
        let origin = &mut self.map_mut()[region];
        assert_eq!(
            *origin,
            CandidateOrigin::Invalid,
            "region {region} is already a candidate"
        );
        *origin = CandidateOrigin::Retained;

        let group = Rc::new(CollectionGroup::new(heap));
        let efficiency = policy.predict_gc_efficiency(heap.region(region));
        group.add(heap, CandidateInfo::new(region, efficiency));
        group.calculate_efficiency(heap, policy);
        self.retained_groups.append(group);
    }

    /// Forget the origin of a region that left candidacy.
    ///
    /// # Panics
    ///
    /// Panics if the region is not a candidate.
    pub fn reset_region(&mut self, region: usize) {
        let origin = &mut self.map_mut()[region];
        assert_ne!(*origin, CandidateOrigin::Invalid, "region {region} is not a candidate");
        *origin = CandidateOrigin::Invalid;
    }

    /// Hand the `count` most efficient marking groups to a pause. Their
    /// regions leave the origin map; the caller clears each group once its
    /// regions have been evacuated.
    pub fn take_marking_groups(&mut self, count: usize) -> CollectionCandidateGroupsList {
        let selected = self.marking_groups.select(count);
        self.marking_groups
            .remove_selected(selected.len(), selected.num_regions());
        for group in &selected {
            for region in group.regions() {
                self.reset_region(region);
            }
        }
        selected
    }

    /// Remove groups previously selected from the marking list, wherever
    /// they sit in it.
    pub fn remove_marking_groups(&mut self, groups: &CollectionCandidateGroupsList) {
        self.marking_groups.remove(groups);
        for group in groups {
            for region in group.regions() {
                self.reset_region(region);
            }
        }
    }

    /// Record that retained `region` was selected but could not be
    /// reclaimed. Returns whether it remains a candidate; after
    /// `num_collections_keep_pinned` misses it is dropped.
    pub fn record_unreclaimed(&mut self, heap: &Heap, region: usize) -> bool {
        if self.map()[region] != CandidateOrigin::Retained {
            return false;
        }
        let keep = self
            .retained_groups
            .iter()
            .find_map(|g| g.update_num_unreclaimed(region, self.keep_pinned))
            .unwrap_or(false);
        if !keep {
            self.retained_groups.remove_region(heap, region);
            self.reset_region(region);
        }
        keep
    }

    /// Rewind the card-set scanners of every group.
    pub fn prepare_for_scan(&self) {
        self.marking_groups.prepare_for_scan();
        self.retained_groups.prepare_for_scan();
    }

    #[must_use]
    pub fn origin(&self, region: usize) -> CandidateOrigin {
        self.map()[region]
    }

    #[must_use]
    pub fn contains(&self, region: usize) -> bool {
        self.map()[region] != CandidateOrigin::Invalid
    }

    #[must_use]
    pub fn is_from_marking(&self, region: usize) -> bool {
        self.map()[region] == CandidateOrigin::Marking
    }

    /// Two-letter tag for region listings.
    #[must_use]
    pub fn short_type_str(&self, region: usize) -> &'static str {
        self.map()[region].short_str()
    }

    #[must_use]
    pub const fn marking_groups(&self) -> &CollectionCandidateGroupsList {
        &self.marking_groups
    }

    #[must_use]
    pub const fn retained_groups(&self) -> &CollectionCandidateGroupsList {
        &self.retained_groups
    }

    #[must_use]
    pub const fn marking_regions_length(&self) -> usize {
        self.marking_groups.num_regions()
    }

    #[must_use]
    pub fn marking_groups_length(&self) -> usize {
        self.marking_groups.len()
    }

    #[must_use]
    pub const fn retained_regions_length(&self) -> usize {
        self.retained_groups.num_regions()
    }

    #[must_use]
    pub const fn last_marking_candidates_length(&self) -> usize {
        self.last_marking_candidates_length
    }

    #[must_use]
    pub const fn has_more_marking_candidates(&self) -> bool {
        self.marking_regions_length() != 0
    }

    #[must_use]
    pub const fn length(&self) -> usize {
        self.marking_regions_length() + self.retained_regions_length()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Visit every candidate region, marking groups first.
    pub fn iterate_regions(&self, mut f: impl FnMut(usize)) {
        for group in self.marking_groups.iter().chain(self.retained_groups.iter()) {
            for region in group.regions() {
                f(region);
            }
        }
    }

    /// Rebuild the origin map from the group lists and compare.
    ///
    /// # Errors
    ///
    /// Returns the first disagreement found.
    pub fn check_origin_map(&self) -> Result<(), OriginMapMismatch> {
        let map = self.map();
        let mut rebuilt = vec![CandidateOrigin::Invalid; map.len()];

        let mut tag = |list: &CollectionCandidateGroupsList,
                       origin: CandidateOrigin|
         -> Result<usize, OriginMapMismatch> {
            let mut counted = 0;
            for group in list {
                for region in group.regions() {
                    if rebuilt[region] != CandidateOrigin::Invalid {
                        return Err(OriginMapMismatch::Duplicate { region });
                    }
                    rebuilt[region] = origin;
                    counted += 1;
                }
            }
            Ok(counted)
        };

        let marking = tag(&self.marking_groups, CandidateOrigin::Marking)?;
        if marking != self.marking_groups.num_regions() {
            return Err(OriginMapMismatch::MarkingCount {
                counted: self.marking_groups.num_regions(),
                actual: marking,
            });
        }
        let retained = tag(&self.retained_groups, CandidateOrigin::Retained)?;
        if retained != self.retained_groups.num_regions() {
            return Err(OriginMapMismatch::RetainedCount {
                counted: self.retained_groups.num_regions(),
                actual: retained,
            });
        }

        for (region, (&recorded, &actual)) in map.iter().zip(rebuilt.iter()).enumerate() {
            if recorded != actual {
                return Err(OriginMapMismatch::Mismatch {
                    region,
                    recorded,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Check the origin map. Only active in debug builds.
    ///
    /// # Panics
    ///
    /// Panics on any mismatch.
    pub fn verify(&self) {
        if cfg!(debug_assertions) {
            if let Err(e) = self.check_origin_map() {
                panic!("collection set candidates corrupted: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DefaultPolicy;

    fn setup(regions: usize) -> (Heap, DefaultPolicy, CollectionSetCandidates) {
        let mut config = GcConfig::new(256, regions);
        config.set_group_size(3);
        config.mixed_gc_count_target = 4;
        let heap = Heap::new(config).unwrap();
        for i in 0..regions {
            heap.allocate_in(i, 64).unwrap();
        }
        let policy = DefaultPolicy::new(heap.config());
        let mut candidates = CollectionSetCandidates::new(heap.config());
        candidates.initialize(regions);
        (heap, policy, candidates)
    }

    fn infos(regions: impl IntoIterator<Item = usize>) -> Vec<CandidateInfo> {
        regions
            .into_iter()
            .map(|r| CandidateInfo::new(r, 1.0))
            .collect()
    }

    #[test]
    fn first_group_uses_min_old_cset_length() {
        let (heap, policy, mut c) = setup(16);
        // 10 candidates over 4 pauses: first group of 3, then groups of 3.
        c.set_candidates_from_marking(&heap, &policy, &infos(0..10));
        let sizes: Vec<_> = c.marking_groups().iter().map(|g| g.length()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert_eq!(c.length(), 10);
        assert!(c.is_from_marking(4));
        assert_eq!(c.short_type_str(4), "Cm");
        assert_eq!(c.short_type_str(12), "Ci");
        c.clear(&heap);
    }

    #[test]
    fn empty_marking_result_is_noop() {
        let (heap, policy, mut c) = setup(4);
        c.set_candidates_from_marking(&heap, &policy, &[]);
        assert!(c.is_empty());
        assert!(!c.has_more_marking_candidates());
    }

    #[test]
    #[should_panic(expected = "already a candidate")]
    fn retained_region_cannot_be_marking_candidate() {
        let (heap, policy, mut c) = setup(4);
        c.add_retained_region_unsorted(&heap, &policy, 2);
        c.set_candidates_from_marking(&heap, &policy, &infos([1, 2]));
    }

    #[test]
    #[should_panic(expected = "initialized twice")]
    fn double_initialize_panics() {
        let (_heap, _policy, mut c) = setup(4);
        c.initialize(4);
    }

    #[test]
    fn take_groups_resets_origins() {
        let (heap, policy, mut c) = setup(8);
        c.set_candidates_from_marking(&heap, &policy, &infos(0..6));
        let first = c.marking_groups().at(0).regions();
        let mut taken = c.take_marking_groups(1);
        assert_eq!(taken.num_regions(), first.len());
        for r in &first {
            assert!(!c.contains(*r));
        }
        assert_eq!(c.length(), 6 - first.len());
        assert_eq!(c.check_origin_map(), Ok(()));
        taken.abandon(&heap);
        c.clear(&heap);
    }

    #[test]
    fn retained_region_dropped_after_misses() {
        let (heap, policy, mut c) = setup(4);
        heap.region(1).set_pinned(true);
        c.add_retained_region_unsorted(&heap, &policy, 1);
        c.sort_by_efficiency(&heap, &policy);
        assert_eq!(c.short_type_str(1), "Cr");
        assert!(c.record_unreclaimed(&heap, 1));
        assert!(c.record_unreclaimed(&heap, 1));
        assert!(!c.record_unreclaimed(&heap, 1));
        assert!(!c.contains(1));
        assert_eq!(c.retained_regions_length(), 0);
        assert!(!heap.region(1).rem_set().has_group_cardset());
    }

    #[test]
    fn clear_marking_candidates_keeps_retained() {
        let (heap, policy, mut c) = setup(8);
        c.set_candidates_from_marking(&heap, &policy, &infos(0..4));
        c.add_retained_region_unsorted(&heap, &policy, 6);

        c.clear_marking_candidates(&heap);
        assert!(!c.has_more_marking_candidates());
        assert_eq!(c.marking_groups_length(), 0);
        for r in 0..4 {
            assert!(!c.contains(r));
            assert!(!heap.region(r).rem_set().has_group_cardset());
        }
        assert_eq!(c.origin(6), CandidateOrigin::Retained);
        assert_eq!(c.length(), 1);
        assert_eq!(c.check_origin_map(), Ok(()));

        // A new cycle may install fresh marking candidates.
        c.set_candidates_from_marking(&heap, &policy, &infos(0..2));
        assert_eq!(c.marking_regions_length(), 2);
        c.clear(&heap);
    }

    #[test]
    fn sort_marking_by_efficiency_puts_garbage_first() {
        let (heap, policy, mut c) = setup(8);
        for r in 0..5 {
            heap.region(r).set_live_bytes(heap.region(r).used_bytes());
        }
        // 6 candidates over 4 pauses: groups [0, 1], [2, 3, 4], [5].
        c.set_candidates_from_marking(&heap, &policy, &infos(0..6));
        assert_eq!(c.marking_groups().at(0).regions(), vec![0, 1]);

        c.sort_marking_by_efficiency(&heap, &policy);
        let order: Vec<_> = c.marking_groups().iter().map(|g| g.regions()).collect();
        assert_eq!(order, vec![vec![5], vec![0, 1], vec![2, 3, 4]]);
        assert!(c.marking_groups().verify());
        assert_eq!(c.check_origin_map(), Ok(()));
        c.clear(&heap);
    }

    #[test]
    fn remove_marking_groups_takes_a_subsequence() {
        let (heap, policy, mut c) = setup(16);
        c.set_candidates_from_marking(&heap, &policy, &infos(0..10));
        let mut removed = CollectionCandidateGroupsList::new();
        removed.append(Rc::clone(c.marking_groups().at(1)));
        removed.append(Rc::clone(c.marking_groups().at(3)));

        c.remove_marking_groups(&removed);
        assert_eq!(c.marking_groups_length(), 2);
        assert_eq!(c.marking_regions_length(), 6);
        for group in &removed {
            for r in group.regions() {
                assert!(!c.contains(r));
            }
        }
        assert!(c.is_from_marking(0));
        assert!(c.is_from_marking(6));
        assert_eq!(c.check_origin_map(), Ok(()));
        removed.abandon(&heap);
        c.clear(&heap);
    }

    #[test]
    #[should_panic(expected = "ordered subsequence")]
    fn remove_marking_groups_out_of_order_panics() {
        let (heap, policy, mut c) = setup(16);
        c.set_candidates_from_marking(&heap, &policy, &infos(0..10));
        let mut removed = CollectionCandidateGroupsList::new();
        removed.append(Rc::clone(c.marking_groups().at(2)));
        removed.append(Rc::clone(c.marking_groups().at(0)));
        c.remove_marking_groups(&removed);
    }

    #[test]
    fn origin_map_detects_stale_entry() {
        let (heap, policy, mut c) = setup(4);
        c.add_retained_region_unsorted(&heap, &policy, 0);
        c.map_mut()[3] = CandidateOrigin::Marking;
        assert_eq!(
            c.check_origin_map(),
            Err(OriginMapMismatch::Mismatch {
                region: 3,
                recorded: CandidateOrigin::Marking,
                actual: CandidateOrigin::Invalid,
            })
        );
    }

    #[test]
    fn iterate_covers_both_lists() {
        let (heap, policy, mut c) = setup(8);
        c.set_candidates_from_marking(&heap, &policy, &infos([0, 1]));
        c.add_retained_region_unsorted(&heap, &policy, 5);
        let mut seen = Vec::new();
        c.iterate_regions(|r| seen.push(r));
        assert_eq!(seen, vec![0, 1, 5]);
        c.clear(&heap);
        assert!(!c.contains(5));
        assert!(!heap.region(0).rem_set().has_group_cardset());
    }
}
