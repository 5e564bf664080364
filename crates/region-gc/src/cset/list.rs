use std::slice;

use crate::heap::Heap;
use crate::policy::Policy;

use super::group::CandidateInfo;

/// Flat list of candidate regions, usually sorted by descending efficiency.
#[derive(Debug, Clone, Default)]
pub struct CollectionCandidateList {
    candidates: Vec<CandidateInfo>,
}

impl CollectionCandidateList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            candidates: Vec::new(),
        }
    }

    /// Append `region` with a freshly predicted efficiency. Order is not
    /// maintained; call [`sort_by_efficiency`](Self::sort_by_efficiency)
    /// afterwards.
    pub fn append_unsorted(&mut self, heap: &Heap, policy: &dyn Policy, region: usize) {
        let efficiency = policy.predict_gc_efficiency(heap.region(region));
        self.candidates.push(CandidateInfo::new(region, efficiency));
    }

    pub fn push(&mut self, info: CandidateInfo) {
        self.candidates.push(info);
    }

    /// Sort by descending efficiency. Equal efficiencies keep their
    /// insertion order.
    pub fn sort_by_efficiency(&mut self) {
        self.candidates
            .sort_by(|a, b| b.gc_efficiency.total_cmp(&a.gc_efficiency));
    }

    /// Remove every entry of `other`, which must be an ordered subsequence
    /// of this list.
    ///
    /// # Panics
    ///
    /// Panics if some entry of `other` is not found in order.
    pub fn remove(&mut self, other: &Self) {
        if other.is_empty() {
            return;
        }
        let mut next = 0;
        self.candidates.retain(|c| {
            if other.candidates.get(next).is_some_and(|o| o.region == c.region) {
                next += 1;
                false
            } else {
                true
            }
        });
        assert_eq!(
            next,
            other.len(),
            "removed list is not an ordered subsequence"
        );
    }

    /// Whether the list is in descending efficiency order.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.candidates
            .windows(2)
            .all(|w| w[0].gc_efficiency >= w[1].gc_efficiency)
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CandidateInfo> {
        self.candidates.get(index)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[CandidateInfo] {
        &self.candidates
    }

    pub fn iter(&self) -> slice::Iter<'_, CandidateInfo> {
        self.candidates.iter()
    }
}

impl<'a> IntoIterator for &'a CollectionCandidateList {
    type Item = &'a CandidateInfo;
    type IntoIter = slice::Iter<'a, CandidateInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<CandidateInfo> for CollectionCandidateList {
    fn from_iter<I: IntoIterator<Item = CandidateInfo>>(iter: I) -> Self {
        Self {
            candidates: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[(usize, f64)]) -> CollectionCandidateList {
        entries
            .iter()
            .map(|&(r, e)| CandidateInfo::new(r, e))
            .collect()
    }

    fn regions(list: &CollectionCandidateList) -> Vec<usize> {
        list.iter().map(|c| c.region).collect()
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let mut l = list(&[(1, 0.5), (2, 2.0), (3, 0.5), (4, 1.0)]);
        l.sort_by_efficiency();
        assert_eq!(regions(&l), vec![2, 4, 1, 3]);
        assert!(l.verify());
    }

    #[test]
    fn remove_subsequence() {
        let mut l = list(&[(1, 4.0), (2, 3.0), (3, 2.0), (4, 1.0)]);
        l.remove(&list(&[(2, 3.0), (4, 1.0)]));
        assert_eq!(regions(&l), vec![1, 3]);
    }

    #[test]
    fn remove_empty_is_noop() {
        let mut l = list(&[(1, 1.0)]);
        l.remove(&CollectionCandidateList::new());
        assert_eq!(l.len(), 1);
    }

    #[test]
    #[should_panic(expected = "ordered subsequence")]
    fn remove_out_of_order_panics() {
        let mut l = list(&[(1, 4.0), (2, 3.0)]);
        l.remove(&list(&[(2, 3.0), (1, 4.0)]));
    }

    #[test]
    fn verify_detects_unsorted() {
        assert!(!list(&[(1, 1.0), (2, 2.0)]).verify());
        assert!(CollectionCandidateList::new().verify());
    }
}
