use std::slice;
use std::rc::Rc;

use crate::heap::Heap;
use crate::policy::Policy;

use super::group::{compare_gc_efficiency, CollectionGroup};

/// Ordered list of collection groups plus the total number of regions in
/// them.
#[derive(Debug, Default)]
pub struct CollectionCandidateGroupsList {
    groups: Vec<Rc<CollectionGroup>>,
    num_regions: usize,
}

impl CollectionCandidateGroupsList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            groups: Vec::new(),
            num_regions: 0,
        }
    }

    /// # Panics
    ///
    /// Panics if `group` is empty or already listed.
    pub fn append(&mut self, group: Rc<CollectionGroup>) {
        assert!(!group.is_empty(), "appending an empty collection group");
        assert!(
            !self.groups.iter().any(|g| Rc::ptr_eq(g, &group)),
            "collection group appended twice"
        );
        self.num_regions += group.length();
        self.groups.push(group);
    }

    #[must_use]
    pub fn at(&self, index: usize) -> &Rc<CollectionGroup> {
        &self.groups[index]
    }

    #[must_use]
    pub fn first(&self) -> Option<&Rc<CollectionGroup>> {
        self.groups.first()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Regions over all groups.
    #[must_use]
    pub const fn num_regions(&self) -> usize {
        self.num_regions
    }

    pub fn iter(&self) -> slice::Iter<'_, Rc<CollectionGroup>> {
        self.groups.iter()
    }

    /// A new list sharing the first `count` groups.
    #[must_use]
    pub fn select(&self, count: usize) -> Self {
        let mut selected = Self::new();
        for group in self.groups.iter().take(count) {
            selected.append(Rc::clone(group));
        }
        selected
    }

    /// Drop the first `count` groups, which together hold `num_regions`
    /// regions. The groups themselves are left untouched.
    ///
    /// # Panics
    ///
    /// Panics if there are fewer than `count` groups or the region count
    /// does not match.
    pub fn remove_selected(&mut self, count: usize, num_regions: usize) {
        assert!(count <= self.groups.len(), "removing {count} of {} groups", self.groups.len());
        let removed: usize = self.groups.drain(..count).map(|g| g.length()).sum();
        assert_eq!(removed, num_regions, "selected region count mismatch");
        self.num_regions -= num_regions;
    }

    /// Remove every group of `other`, which must be an ordered subsequence
    /// of this list. Groups are compared by identity.
    ///
    /// # Panics
    ///
    /// Panics if some group of `other` is not found in order.
    pub fn remove(&mut self, other: &Self) {
        if other.is_empty() {
            return;
        }
        let mut next = 0;
        let mut removed_regions = 0;
        self.groups.retain(|g| {
            if other.groups.get(next).is_some_and(|o| Rc::ptr_eq(o, g)) {
                next += 1;
                removed_regions += g.length();
                false
            } else {
                true
            }
        });
        assert_eq!(
            next,
            other.len(),
            "removed groups are not an ordered subsequence"
        );
        self.num_regions -= removed_regions;
    }

    /// Drop `region` from whichever group holds it, discarding the group if
    /// it becomes empty. Returns whether the region was found.
    pub fn remove_region(&mut self, heap: &Heap, region: usize) -> bool {
        let Some(pos) = self.groups.iter().position(|g| g.contains(region)) else {
            return false;
        };
        if self.groups[pos].remove_region(heap, region).is_some() {
            self.num_regions -= 1;
        }
        if self.groups[pos].is_empty() {
            self.groups.remove(pos);
        }
        true
    }

    /// Recompute each group's efficiency and sort by it, descending.
    pub fn sort_by_efficiency(&mut self, heap: &Heap, policy: &dyn Policy) {
        for group in &self.groups {
            group.calculate_efficiency(heap, policy);
        }
        self.groups.sort_by(|a, b| compare_gc_efficiency(a, b));
    }

    /// Rewind the card-set scanners of all groups.
    pub fn prepare_for_scan(&self) {
        for group in &self.groups {
            group.card_set().reset_table_scanner();
        }
    }

    /// Clear and drop all groups.
    pub fn clear(&mut self) {
        for group in &self.groups {
            group.clear();
        }
        self.groups.clear();
        self.num_regions = 0;
    }

    /// Abandon and drop all groups, handing members their own card sets back.
    pub fn abandon(&mut self, heap: &Heap) {
        for group in &self.groups {
            group.abandon(heap);
        }
        self.groups.clear();
        self.num_regions = 0;
    }

    /// Whether the groups are in descending efficiency order.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.groups
            .windows(2)
            .all(|w| w[0].gc_efficiency() >= w[1].gc_efficiency())
    }
}

impl<'a> IntoIterator for &'a CollectionCandidateGroupsList {
    type Item = &'a Rc<CollectionGroup>;
    type IntoIter = slice::Iter<'a, Rc<CollectionGroup>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::cset::CandidateInfo;

    fn heap() -> Heap {
        let heap = Heap::new(GcConfig::new(256, 8)).unwrap();
        for i in 0..8 {
            heap.allocate_in(i, 16).unwrap();
        }
        heap
    }

    fn group(heap: &Heap, regions: &[usize]) -> Rc<CollectionGroup> {
        let g = Rc::new(CollectionGroup::new(heap));
        for &r in regions {
            g.add(heap, CandidateInfo::new(r, 0.0));
        }
        g
    }

    #[test]
    fn append_tracks_region_count() {
        let heap = heap();
        let mut list = CollectionCandidateGroupsList::new();
        list.append(group(&heap, &[0, 1]));
        list.append(group(&heap, &[2]));
        assert_eq!(list.len(), 2);
        assert_eq!(list.num_regions(), 3);
        list.abandon(&heap);
        assert!(list.is_empty());
        assert_eq!(list.num_regions(), 0);
    }

    #[test]
    fn remove_by_identity() {
        let heap = heap();
        let mut list = CollectionCandidateGroupsList::new();
        let a = group(&heap, &[0]);
        let b = group(&heap, &[1, 2]);
        let c = group(&heap, &[3]);
        list.append(Rc::clone(&a));
        list.append(Rc::clone(&b));
        list.append(Rc::clone(&c));

        let mut other = CollectionCandidateGroupsList::new();
        other.append(Rc::clone(&b));
        list.remove(&other);

        assert_eq!(list.len(), 2);
        assert_eq!(list.num_regions(), 2);
        assert!(Rc::ptr_eq(list.at(0), &a));
        assert!(Rc::ptr_eq(list.at(1), &c));
        list.abandon(&heap);
        b.abandon(&heap);
    }

    #[test]
    fn remove_selected_drops_prefix() {
        let heap = heap();
        let mut list = CollectionCandidateGroupsList::new();
        list.append(group(&heap, &[0, 1]));
        list.append(group(&heap, &[2]));
        let selected = list.select(1);
        list.remove_selected(1, 2);
        assert_eq!(list.num_regions(), 1);
        assert_eq!(selected.num_regions(), 2);
        list.abandon(&heap);
        let mut selected = selected;
        selected.abandon(&heap);
    }

    #[test]
    #[should_panic(expected = "appended twice")]
    fn duplicate_group_panics() {
        let heap = heap();
        let mut list = CollectionCandidateGroupsList::new();
        let g = group(&heap, &[0]);
        list.append(Rc::clone(&g));
        list.append(g);
    }

    #[test]
    fn remove_region_discards_empty_group() {
        let heap = heap();
        let mut list = CollectionCandidateGroupsList::new();
        list.append(group(&heap, &[4]));
        assert!(list.remove_region(&heap, 4));
        assert!(list.is_empty());
        assert!(!heap.region(4).rem_set().has_group_cardset());
        assert!(!list.remove_region(&heap, 4));
    }
}
