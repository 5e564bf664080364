use crate::heap::Heap;
use crate::policy::Policy;

use super::list::CollectionCandidateList;

/// Pick old regions worth evacuating after a marking cycle.
///
/// A region qualifies if it is old, not humongous, not pinned, has
/// something to reclaim and its live bytes are below
/// `mixed_gc_live_threshold_percent` of the region size. The result is
/// sorted by descending efficiency.
#[must_use]
pub fn select_candidates_from_marking(heap: &Heap, policy: &dyn Policy) -> CollectionCandidateList {
    let config = heap.config();
    let live_threshold = config.region_bytes() * config.mixed_gc_live_threshold_percent / 100;
    let mut list = CollectionCandidateList::new();
    for region in heap.committed_regions() {
        if region.is_old()
            && !region.is_humongous()
            && !region.is_pinned()
            && region.live_bytes() < live_threshold
            && region.reclaimable_bytes() > 0
        {
            list.append_unsorted(heap, policy, region.index());
        }
    }
    list.sort_by_efficiency();
    list
}
