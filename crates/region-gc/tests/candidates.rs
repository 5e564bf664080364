//! Collection-set candidate bookkeeping across a marking cycle.

use std::rc::Rc;

use proptest::prelude::*;
use region_gc::cset::select_candidates_from_marking;
use region_gc::{
    CandidateInfo, CandidateOrigin, CollectionCandidateGroupsList, CollectionCandidateList,
    CollectionSetCandidates, DefaultPolicy, GcConfig, Heap, WORD_SIZE,
};

const REGION_WORDS: usize = 256;

fn setup(regions: usize) -> (Heap, DefaultPolicy, CollectionSetCandidates) {
    let mut config = GcConfig::new(REGION_WORDS, regions);
    config.set_group_size(3);
    let heap = Heap::new(config).unwrap();
    for i in 0..regions {
        heap.allocate_in(i, REGION_WORDS).unwrap();
    }
    let policy = DefaultPolicy::new(heap.config());
    let mut candidates = CollectionSetCandidates::new(heap.config());
    candidates.initialize(regions);
    (heap, policy, candidates)
}

fn infos(efficiencies: &[f64]) -> Vec<CandidateInfo> {
    let mut infos: Vec<_> = efficiencies
        .iter()
        .enumerate()
        .map(|(region, &eff)| CandidateInfo::new(region, eff))
        .collect();
    infos.sort_by(|a, b| b.gc_efficiency.total_cmp(&a.gc_efficiency));
    infos
}

proptest! {
    #[test]
    fn marking_candidates_are_partitioned_into_groups(
        efficiencies in prop::collection::vec(0.0f64..1000.0, 1..40),
    ) {
        let n = efficiencies.len();
        let (heap, policy, mut candidates) = setup(n);
        candidates.set_candidates_from_marking(&heap, &policy, &infos(&efficiencies));

        let groups = candidates.marking_groups();
        let first = n.div_ceil(heap.config().mixed_gc_count_target).max(1);
        prop_assert_eq!(groups.at(0).length(), first.min(n));
        for group in groups.iter().skip(1) {
            prop_assert!(group.length() <= 3);
            prop_assert!(!group.is_empty());
        }
        prop_assert_eq!(candidates.marking_regions_length(), n);
        prop_assert_eq!(candidates.last_marking_candidates_length(), n);
        prop_assert!(candidates.check_origin_map().is_ok());
        for region in 0..n {
            prop_assert_eq!(candidates.origin(region), CandidateOrigin::Marking);
            prop_assert!(heap.region(region).rem_set().has_group_cardset());
        }
    }

    #[test]
    fn taking_groups_releases_their_regions(
        efficiencies in prop::collection::vec(0.0f64..1000.0, 1..40),
        take in 0usize..6,
    ) {
        let n = efficiencies.len();
        let (heap, policy, mut candidates) = setup(n);
        candidates.set_candidates_from_marking(&heap, &policy, &infos(&efficiencies));
        let groups_before = candidates.marking_groups_length();

        let taken = candidates.take_marking_groups(take);
        prop_assert_eq!(taken.len(), take.min(groups_before));
        prop_assert_eq!(
            candidates.marking_regions_length() + taken.num_regions(),
            n
        );
        for group in &taken {
            for region in group.regions() {
                prop_assert!(!candidates.contains(region));
            }
        }
        let mut remaining = 0;
        candidates.iterate_regions(|region| {
            assert!(candidates.is_from_marking(region));
            remaining += 1;
        });
        prop_assert_eq!(remaining, candidates.marking_regions_length());
        prop_assert!(candidates.check_origin_map().is_ok());
    }

    #[test]
    fn candidate_list_sort_is_descending_and_stable(
        efficiencies in prop::collection::vec(0u8..4, 0..40),
    ) {
        let mut list: CollectionCandidateList = efficiencies
            .iter()
            .enumerate()
            .map(|(region, &eff)| CandidateInfo::new(region, f64::from(eff)))
            .collect();
        list.sort_by_efficiency();
        prop_assert!(list.verify());
        prop_assert_eq!(list.len(), efficiencies.len());
        for pair in list.as_slice().windows(2) {
            if pair[0].gc_efficiency == pair[1].gc_efficiency {
                prop_assert!(pair[0].region < pair[1].region);
            }
        }
    }

    #[test]
    fn candidate_list_remove_drops_ordered_subsequence(
        efficiencies in prop::collection::vec(0.0f64..100.0, 0..40),
        mask in prop::collection::vec(any::<bool>(), 40),
    ) {
        let mut list: CollectionCandidateList = efficiencies
            .iter()
            .enumerate()
            .map(|(region, &eff)| CandidateInfo::new(region, eff))
            .collect();
        list.sort_by_efficiency();
        let removed: CollectionCandidateList = list
            .iter()
            .zip(&mask)
            .filter(|(_, take)| **take)
            .map(|(c, _)| *c)
            .collect();
        let kept: Vec<usize> = list
            .iter()
            .zip(&mask)
            .filter(|(_, take)| !**take)
            .map(|(c, _)| c.region)
            .collect();

        list.remove(&removed);
        let left: Vec<usize> = list.iter().map(|c| c.region).collect();
        prop_assert_eq!(left, kept);
        prop_assert!(list.verify());
    }

    #[test]
    fn retained_groups_sort_by_fresh_efficiency(
        live_words in prop::collection::vec(0usize..=REGION_WORDS, 1..24),
    ) {
        let n = live_words.len();
        let (heap, policy, mut candidates) = setup(n);
        for (region, &words) in live_words.iter().enumerate() {
            heap.region(region).set_live_bytes(words * WORD_SIZE);
            candidates.add_retained_region_unsorted(&heap, &policy, region);
        }
        candidates.sort_by_efficiency(&heap, &policy);

        prop_assert!(candidates.retained_groups().verify());
        prop_assert_eq!(candidates.retained_regions_length(), n);
        prop_assert!(candidates.check_origin_map().is_ok());
        candidates.verify();
    }

    #[test]
    fn removing_marking_groups_keeps_the_rest(
        efficiencies in prop::collection::vec(0.0f64..1000.0, 1..40),
        mask in prop::collection::vec(any::<bool>(), 40),
    ) {
        let n = efficiencies.len();
        let (heap, policy, mut candidates) = setup(n);
        candidates.set_candidates_from_marking(&heap, &policy, &infos(&efficiencies));
        candidates.sort_marking_by_efficiency(&heap, &policy);
        prop_assert!(candidates.marking_groups().verify());

        let mut removed = CollectionCandidateGroupsList::new();
        let mut kept = Vec::new();
        for (group, &take) in candidates.marking_groups().iter().zip(&mask) {
            if take {
                removed.append(Rc::clone(group));
            } else {
                kept.push(group.regions());
            }
        }

        candidates.remove_marking_groups(&removed);
        let left: Vec<Vec<usize>> = candidates
            .marking_groups()
            .iter()
            .map(|g| g.regions())
            .collect();
        prop_assert_eq!(left, kept);
        prop_assert_eq!(
            candidates.marking_regions_length() + removed.num_regions(),
            n
        );
        for group in &removed {
            for region in group.regions() {
                prop_assert!(!candidates.contains(region));
            }
        }
        prop_assert!(candidates.check_origin_map().is_ok());
    }
}

#[test]
fn chooser_feeds_marking_candidates() {
    let (heap, policy, mut candidates) = setup(6);
    let live_words = [230, 10, 250, 40, 0, 120];
    for (region, words) in live_words.iter().enumerate() {
        heap.region(region).set_live_bytes(words * WORD_SIZE);
    }
    let list = select_candidates_from_marking(&heap, &policy);
    // Regions at or above 85% live are not worth collecting.
    let regions: Vec<_> = list.iter().map(|c| c.region).collect();
    assert_eq!(regions, vec![4, 1, 3, 5]);

    candidates.set_candidates_from_marking(&heap, &policy, list.as_slice());
    assert_eq!(candidates.length(), 4);
    assert!(!candidates.contains(0));
    assert!(!candidates.contains(2));
    assert_eq!(candidates.short_type_str(1), "Cm");
    assert_eq!(candidates.short_type_str(0), "Ci");
}

#[test]
fn retained_regions_are_dropped_after_repeated_misses() {
    let (heap, policy, mut candidates) = setup(4);
    heap.region(2).set_pinned(true);
    candidates.add_retained_region_unsorted(&heap, &policy, 2);
    candidates.add_retained_region_unsorted(&heap, &policy, 3);
    candidates.sort_by_efficiency(&heap, &policy);
    assert_eq!(candidates.retained_regions_length(), 2);
    assert_eq!(candidates.origin(2), CandidateOrigin::Retained);

    let keep = heap.config().num_collections_keep_pinned;
    for _ in 1..keep {
        assert!(candidates.record_unreclaimed(&heap, 2));
    }
    assert!(!candidates.record_unreclaimed(&heap, 2));
    assert!(!candidates.contains(2));
    assert!(!heap.region(2).rem_set().has_group_cardset());
    assert_eq!(candidates.retained_regions_length(), 1);
    assert!(candidates.check_origin_map().is_ok());

    // Marking candidates are never counted as misses.
    assert!(!candidates.record_unreclaimed(&heap, 0));
}

#[test]
#[should_panic(expected = "already a candidate")]
fn region_cannot_be_both_marking_and_retained() {
    let (heap, policy, mut candidates) = setup(2);
    candidates.set_candidates_from_marking(&heap, &policy, &[CandidateInfo::new(1, 1.0)]);
    candidates.add_retained_region_unsorted(&heap, &policy, 1);
}
