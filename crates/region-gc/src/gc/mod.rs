//! Parallel GC machinery shared by marking and the full collector.

pub mod marker;
pub mod workers;
pub mod worklist;

pub use marker::{MarkContext, MarkRootsTask, ParallelMarker, TaskTerminator, MARK_QUEUE_CAPACITY};
pub use workers::{calc_active_workers, RegionClaimer, WorkerPool, WorkerTask};
pub use worklist::{Steal, StealQueue};
