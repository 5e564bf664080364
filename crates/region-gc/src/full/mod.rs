//! Parallel full-heap mark-compact.
//!
//! A full collection runs at a global safepoint in strictly ordered phases:
//!
//! 1. **Prepare**: classify every region in a side table, abandon
//!    collection-set candidates, start reference discovery.
//! 2. **Mark**: mark everything reachable into the mark bitmap.
//! 3. **Prepare compaction**: pick regions to compact, hand them to
//!    per-worker compaction points and compute forwarding addresses. If no
//!    region would end up empty, the tail regions are re-planned serially
//!    and humongous objects are moved down into free runs.
//! 4. **Adjust pointers**: rewrite every reference to a moved object.
//! 5. **Compact**: copy objects to their destinations.
//! 6. **Complete**: restore preserved marks and clear the bitmap.
//!
//! Each parallel phase is a [`WorkerPool::run_task`](crate::gc::WorkerPool::run_task)
//! call, so a phase never overlaps the next.

mod adjust;
mod collector;
mod compact;
mod compaction_point;
mod mark;
mod prepare;
mod preserved;
mod region_attr;

pub use collector::{FullCollector, HumongousMove};
pub use compaction_point::{CompactionPoint, CompactionTops, ForwardContext};
pub use preserved::PreservedMarks;
pub use region_attr::{RegionAttr, RegionAttrTable};

/// Phases of a full collection, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FullGcPhase {
    Prepare,
    Mark,
    PrepareCompaction,
    AdjustPointers,
    Compact,
    Complete,
}

impl FullGcPhase {
    pub const COUNT: usize = 6;

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The phase that must have finished before this one starts.
    #[must_use]
    pub const fn predecessor(self) -> Option<Self> {
        match self {
            Self::Prepare => None,
            Self::Mark => Some(Self::Prepare),
            Self::PrepareCompaction => Some(Self::Mark),
            Self::AdjustPointers => Some(Self::PrepareCompaction),
            Self::Compact => Some(Self::AdjustPointers),
            Self::Complete => Some(Self::Compact),
        }
    }
}

/// Per-collection options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FullGcScope {
    /// Always run the serial tail compaction and humongous relocation.
    pub do_maximal_compaction: bool,
    /// Passed to reference discovery.
    pub clear_soft_refs: bool,
}

impl FullGcScope {
    #[must_use]
    pub const fn maximal() -> Self {
        Self {
            do_maximal_compaction: true,
            clear_soft_refs: true,
        }
    }
}
