//! Properties of the lazily committed mark bitmap.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;
use region_gc::mark::LiveMapState;
use region_gc::{Addr, ConcurrentMarkBitmap, GcConfig, Heap, MemRegion};

const REGION_WORDS: usize = 128;

fn setup(regions: usize) -> (Heap, ConcurrentMarkBitmap) {
    let heap = Heap::new(GcConfig::new(REGION_WORDS, regions)).unwrap();
    let bitmap = ConcurrentMarkBitmap::new(&heap).unwrap();
    (heap, bitmap)
}

fn scan(bitmap: &ConcurrentMarkBitmap, bottom: Addr, end: Addr) -> Vec<usize> {
    let mut found = Vec::new();
    let mut cur = bitmap.get_next_marked_addr(bottom, end);
    while cur < end {
        found.push(cur.words_since(bottom));
        cur = bitmap.get_next_marked_addr(cur.add_words(1), end);
    }
    found
}

proptest! {
    #[test]
    fn scan_finds_exactly_the_marked_words(
        offsets in prop::collection::btree_set(0..REGION_WORDS, 0..48),
    ) {
        let (heap, bitmap) = setup(2);
        let region = heap.region(1);
        for &off in &offsets {
            prop_assert!(bitmap.par_mark(region.bottom().add_words(off)));
        }
        let found = scan(&bitmap, region.bottom(), region.end());
        prop_assert_eq!(found, offsets.iter().copied().collect::<Vec<_>>());
        prop_assert_eq!(bitmap.count_marked(1), offsets.len());
        prop_assert_eq!(bitmap.is_region_marked(1), !offsets.is_empty());
        // Region 0 never saw a mark and must stay uncommitted.
        prop_assert!(!bitmap.is_region_committed(0));
    }

    #[test]
    fn clear_range_removes_only_the_range(
        offsets in prop::collection::btree_set(0..2 * REGION_WORDS, 1..64),
        lo in 0..2 * REGION_WORDS,
        len in 0..2 * REGION_WORDS,
    ) {
        let (heap, bitmap) = setup(2);
        let base = heap.region(0).bottom();
        let hi = (lo + len).min(2 * REGION_WORDS);
        for &off in &offsets {
            bitmap.par_mark(base.add_words(off));
        }
        bitmap.clear_range(MemRegion::new(base.add_words(lo), base.add_words(hi)));

        let expected: BTreeSet<usize> = offsets
            .iter()
            .copied()
            .filter(|off| !(lo..hi).contains(off))
            .collect();
        for off in 0..2 * REGION_WORDS {
            prop_assert_eq!(
                bitmap.is_marked(base.add_words(off)),
                expected.contains(&off),
                "word {}", off
            );
        }
    }
}

#[test]
fn racing_markers_mark_each_word_once() {
    let (heap, bitmap) = setup(4);
    let winners = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for region in 0..4 {
                    let bottom = heap.region(region).bottom();
                    for off in (0..REGION_WORDS).step_by(3) {
                        if bitmap.par_mark(bottom.add_words(off)) {
                            winners.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });
    let per_region = REGION_WORDS.div_ceil(3);
    assert_eq!(winners.load(Ordering::Relaxed), 4 * per_region);
    for region in 0..4 {
        assert_eq!(bitmap.count_marked(region), per_region);
        assert_eq!(bitmap.livemap_state(region), LiveMapState::Marked);
    }
}

#[test]
fn clear_all_keeps_storage_committed() {
    let (heap, bitmap) = setup(3);
    bitmap.par_mark(heap.region(2).bottom().add_words(7));
    assert!(!bitmap.is_clear());
    bitmap.clear_all();
    assert!(bitmap.is_clear());
    assert!(bitmap.is_region_committed(2));
    assert!(!bitmap.is_marked(heap.region(2).bottom().add_words(7)));
}
