//! Old-generation core of a region-based garbage collector.
//!
//! `region-gc` manages a heap carved into equally sized regions and
//! provides three collector building blocks on top of it:
//!
//! - **Concurrent mark bitmap**: one bit per heap word, stored in
//!   per-region live maps that commit their backing memory on first mark
//!   and stay idle for regions nobody marks.
//! - **Collection-set candidates**: old regions ranked by GC efficiency,
//!   batched into groups that share one remembered set, and tracked by
//!   origin (marking or retained).
//! - **Parallel full GC**: a stop-the-world mark-compact in four phases
//!   (mark, plan forwarding, adjust pointers, compact) with a serial
//!   fallback that guarantees a free region afterwards and relocation of
//!   humongous objects.
//!
//! Objects are opaque: the collector only needs an [`ObjectModel`] that
//! reports sizes, enumerates reference slots and owns the mark word.
//!
//! # Quick Start
//!
//! ```
//! use region_gc::full::{FullCollector, FullGcScope};
//! use region_gc::{
//!     CollectionSetCandidates, ConcurrentMark, DefaultPolicy, GcConfig, Heap, RegionKind,
//!     RootSet, SimpleObjectModel, WorkerPool,
//! };
//!
//! let mut config = GcConfig::new(256, 8);
//! config.set_parallel_workers(2);
//! let heap = Heap::new(config).unwrap();
//! let cm = ConcurrentMark::new(&heap).unwrap();
//! let model = SimpleObjectModel;
//! let policy = DefaultPolicy::new(&config);
//! let pool = WorkerPool::new(2);
//!
//! let obj = heap.allocate(8, RegionKind::Old).unwrap();
//! unsafe { model.init_object(obj, 8, 0) };
//! let mut roots = RootSet::new();
//! roots.push(obj);
//!
//! let mut candidates = CollectionSetCandidates::new(&config);
//! candidates.initialize(heap.max_regions());
//! let metrics = FullCollector::new(&heap, &cm, &model, &policy, &pool, FullGcScope::default())
//!     .collect(&roots, &mut candidates);
//! assert_eq!(metrics.objects_marked, 1);
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod addr;
pub mod config;
pub mod cset;
mod error;
pub mod full;
pub mod gc;
pub mod heap;
pub mod mark;
pub mod metrics;
pub mod object;
pub mod policy;
pub mod refproc;
pub mod roots;
mod tracing;

pub use addr::{Addr, MemRegion, WORD_SIZE};
pub use config::GcConfig;
pub use cset::{
    CandidateInfo, CandidateOrigin, CollectionCandidateGroupsList, CollectionCandidateList,
    CollectionGroup, CollectionSetCandidates,
};
pub use error::{Error, Result};
pub use full::{FullCollector, FullGcPhase, FullGcScope};
pub use gc::{WorkerPool, WorkerTask};
pub use heap::{Heap, HeapRegion, RegionKind};
pub use mark::{ConcurrentMark, ConcurrentMarkBitmap};
pub use metrics::{global_metrics, FullGcMetrics, GlobalMetrics};
pub use object::{MarkWord, ObjectModel, SimpleObjectModel};
pub use policy::{DefaultPolicy, Policy};
pub use refproc::{IsAlive, NoopReferenceProcessor, ReferenceProcessor, WeakRootTable};
pub use roots::RootSet;
pub use tracing::GcId;
