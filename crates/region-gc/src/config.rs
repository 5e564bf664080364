//! Collector configuration.
//!
//! All tuning knobs live here, including the heuristics that only exist to
//! trade pause time against footprint (group size, dead ratio, free list
//! batching).

use crate::error::{Error, Result};

/// Configuration for the region heap and its collectors.
#[derive(Clone, Copy, Debug)]
pub struct GcConfig {
    /// Words per region.
    pub region_words: usize,
    /// Number of regions reserved for the heap.
    pub max_regions: usize,
    /// Number of regions committed when the heap is created.
    pub initial_regions: usize,
    /// Upper bound on worker threads for parallel phases.
    pub parallel_workers: usize,
    /// Scale the full-GC worker count with heap waste and used regions.
    pub use_dynamic_workers: bool,
    /// Percentage of the heap each worker is expected to recover; limits
    /// worker count on small heaps.
    pub heap_waste_percent: usize,
    /// Maximum number of regions per candidate group after the first.
    pub group_size: usize,
    /// Regions whose live data is at most this percentage of capacity are
    /// compacted during a full GC; fuller regions stay in place.
    pub compaction_live_percent: usize,
    /// Old regions with more live data than this percentage are not
    /// worth collecting incrementally.
    pub mixed_gc_live_threshold_percent: usize,
    /// Target number of mixed collections to drain marking candidates.
    pub mixed_gc_count_target: usize,
    /// Collections a pinned retained region may survive before it is dropped
    /// from the candidates.
    pub num_collections_keep_pinned: u32,
    /// Released card buffers accumulated before they are moved to the
    /// free list in one batch.
    pub free_list_transfer_threshold: usize,
    /// Bytes covered by one card.
    pub card_size: usize,
    /// Run candidate verification after every mutation.
    pub verify: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            region_words: 1 << 16,
            max_regions: 256,
            initial_regions: 256,
            parallel_workers: std::thread::available_parallelism()
                .map_or(1, std::num::NonZeroUsize::get)
                .min(8),
            use_dynamic_workers: true,
            heap_waste_percent: 5,
            group_size: 5,
            compaction_live_percent: 95,
            mixed_gc_live_threshold_percent: 85,
            mixed_gc_count_target: 8,
            num_collections_keep_pinned: 3,
            free_list_transfer_threshold: 10,
            card_size: 512,
            verify: cfg!(debug_assertions),
        }
    }
}

impl GcConfig {
    /// Create a configuration for `max_regions` regions of `region_words`
    /// words each, all committed up front.
    #[must_use]
    pub fn new(region_words: usize, max_regions: usize) -> Self {
        Self {
            region_words,
            max_regions,
            initial_regions: max_regions,
            ..Default::default()
        }
    }

    /// Region size in bytes.
    #[must_use]
    pub const fn region_bytes(&self) -> usize {
        self.region_words * crate::addr::WORD_SIZE
    }

    /// Live-word threshold at or below which a region is compacted.
    #[must_use]
    pub const fn region_compaction_threshold(&self) -> usize {
        self.region_words * self.compaction_live_percent / 100
    }

    /// Check that all sizes are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.region_words < 4 {
            return Err(Error::InvalidConfig("region_words must be at least 4"));
        }
        if self.max_regions == 0 || self.max_regions > u32::MAX as usize {
            return Err(Error::InvalidConfig("max_regions out of range"));
        }
        if self.initial_regions > self.max_regions {
            return Err(Error::InvalidConfig("initial_regions exceeds max_regions"));
        }
        if self.group_size == 0 {
            return Err(Error::InvalidConfig("group_size must be non-zero"));
        }
        if self.compaction_live_percent > 100 || self.mixed_gc_live_threshold_percent > 100 {
            return Err(Error::InvalidConfig("percentages must not exceed 100"));
        }
        if self.card_size == 0 || !self.card_size.is_power_of_two() {
            return Err(Error::InvalidConfig("card_size must be a power of two"));
        }
        Ok(())
    }

    /// Set the number of committed regions at startup.
    pub const fn set_initial_regions(&mut self, regions: usize) -> &mut Self {
        self.initial_regions = regions;
        self
    }

    /// Set the maximum number of parallel workers.
    pub const fn set_parallel_workers(&mut self, workers: usize) -> &mut Self {
        self.parallel_workers = if workers < 1 { 1 } else { workers };
        self
    }

    /// Enable or disable dynamic worker sizing.
    pub const fn set_dynamic_workers(&mut self, enabled: bool) -> &mut Self {
        self.use_dynamic_workers = enabled;
        self
    }

    /// Set the per-group region cap.
    pub const fn set_group_size(&mut self, size: usize) -> &mut Self {
        self.group_size = size;
        self
    }

    /// Set the live percentage up to which regions are compacted.
    pub const fn set_compaction_live_percent(&mut self, percent: usize) -> &mut Self {
        self.compaction_live_percent = percent;
        self
    }

    /// Set the card buffer transfer batch size.
    pub const fn set_free_list_transfer_threshold(&mut self, threshold: usize) -> &mut Self {
        self.free_list_transfer_threshold = threshold;
        self
    }

    /// Set how many collections a pinned region stays a candidate.
    pub const fn set_num_collections_keep_pinned(&mut self, n: u32) -> &mut Self {
        self.num_collections_keep_pinned = n;
        self
    }

    /// Enable or disable verification.
    pub const fn set_verify(&mut self, verify: bool) -> &mut Self {
        self.verify = verify;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(GcConfig::default().validate().is_ok());
    }

    #[test]
    fn compaction_threshold_uses_percentage() {
        let mut config = GcConfig::new(100, 10);
        config.set_compaction_live_percent(60);
        assert_eq!(config.region_compaction_threshold(), 60);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = GcConfig::new(100, 10);
        config.set_group_size(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = GcConfig::new(100, 10);
        config.set_initial_regions(11);
        assert!(config.validate().is_err());
    }

    #[test]
    fn setters_chain() {
        let mut config = GcConfig::new(128, 4);
        config.set_parallel_workers(0).set_dynamic_workers(false);
        assert_eq!(config.parallel_workers, 1);
        assert!(!config.use_dynamic_workers);
    }
}
