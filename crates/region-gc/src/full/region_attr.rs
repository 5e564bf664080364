use std::sync::atomic::{AtomicU8, Ordering};

/// How the full collector treats a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RegionAttr {
    /// Nothing to mark or move.
    Free = 0,
    /// Closed archive: always live, neither marked nor moved.
    SkipMarking = 1,
    /// Marked and adjusted but left in place.
    SkipCompacting = 2,
    /// Marked, adjusted and compacted.
    Compacting = 3,
}

impl RegionAttr {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Free,
            1 => Self::SkipMarking,
            2 => Self::SkipCompacting,
            _ => Self::Compacting,
        }
    }
}

/// Per-region [`RegionAttr`] side table.
#[derive(Debug)]
pub struct RegionAttrTable {
    attrs: Box<[AtomicU8]>,
}

impl RegionAttrTable {
    #[must_use]
    pub fn new(num_regions: usize) -> Self {
        Self {
            attrs: (0..num_regions)
                .map(|_| AtomicU8::new(RegionAttr::Free as u8))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, region: usize) -> RegionAttr {
        RegionAttr::from_u8(self.attrs[region].load(Ordering::Relaxed))
    }

    pub fn set(&self, region: usize, attr: RegionAttr) {
        self.attrs[region].store(attr as u8, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_free(&self, region: usize) -> bool {
        self.get(region) == RegionAttr::Free
    }

    #[must_use]
    pub fn is_skip_marking(&self, region: usize) -> bool {
        self.get(region) == RegionAttr::SkipMarking
    }

    #[must_use]
    pub fn is_skip_compacting(&self, region: usize) -> bool {
        self.get(region) == RegionAttr::SkipCompacting
    }

    #[must_use]
    pub fn is_compacting(&self, region: usize) -> bool {
        self.get(region) == RegionAttr::Compacting
    }

    /// Regions currently tagged `attr`.
    #[must_use]
    pub fn count(&self, attr: RegionAttr) -> usize {
        (0..self.attrs.len()).filter(|&r| self.get(r) == attr).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_free_and_round_trips() {
        let table = RegionAttrTable::new(4);
        assert_eq!(table.count(RegionAttr::Free), 4);
        table.set(1, RegionAttr::SkipMarking);
        table.set(2, RegionAttr::SkipCompacting);
        table.set(3, RegionAttr::Compacting);
        assert!(table.is_free(0));
        assert!(table.is_skip_marking(1));
        assert!(table.is_skip_compacting(2));
        assert!(table.is_compacting(3));
    }
}
