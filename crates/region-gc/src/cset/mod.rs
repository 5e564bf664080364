//! Collection-set candidates: regions eligible for incremental evacuation,
//! ranked by efficiency and batched into groups.

mod candidates;
mod chooser;
mod group;
mod groups_list;
mod list;

pub use candidates::{CandidateOrigin, CollectionSetCandidates, OriginMapMismatch};
pub use chooser::select_candidates_from_marking;
pub use group::{compare_gc_efficiency, CandidateInfo, CollectionGroup};
pub use groups_list::CollectionCandidateGroupsList;
pub use list::CollectionCandidateList;
