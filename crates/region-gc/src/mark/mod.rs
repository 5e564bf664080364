//! Concurrent marking: the lazily committed mark bitmap and the cycle
//! driver that fills it.

mod bitmap;
mod concurrent;
mod livemap;

pub use bitmap::ConcurrentMarkBitmap;
pub use concurrent::{ConcurrentMark, MarkingStats};
pub use livemap::{LiveMap, LiveMapState, LiveMapStorage};
