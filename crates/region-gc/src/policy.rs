//! Cost predictions used to rank collection candidates.
//!
//! The candidate structures treat these as opaque functions; a runtime
//! would back them with measured averages. [`DefaultPolicy`] uses a fixed
//! linear model.

use crate::config::GcConfig;
use crate::heap::HeapRegion;

/// Predictor oracle for collection decisions.
pub trait Policy: Send + Sync {
    /// Predicted time to evacuate the live data of `region`.
    fn predict_region_copy_time_ms(&self, region: &HeapRegion) -> f64;

    /// Predicted time to scan code roots into `region`.
    fn predict_region_code_root_scan_time_ms(&self, _region: &HeapRegion) -> f64 {
        0.0
    }

    /// Predicted time to merge and scan `card_count` remembered-set cards.
    fn predict_merge_scan_time_ms(&self, card_count: usize) -> f64;

    /// Fixed per-pause overhead for `num_regions` old regions.
    fn predict_non_young_other_time_ms(&self, num_regions: usize) -> f64;

    /// Regions that must be collected per mixed pause to drain
    /// `num_candidates` candidates in the target number of pauses.
    fn calc_min_old_cset_length(&self, num_candidates: usize) -> usize;

    /// Live words up to which a region is compacted in a full GC.
    fn region_compaction_threshold(&self) -> usize;

    /// Reclaimable bytes per predicted millisecond for a lone region.
    fn predict_gc_efficiency(&self, region: &HeapRegion) -> f64 {
        let time = self.predict_merge_scan_time_ms(region.rem_set().occupied())
            + self.predict_region_copy_time_ms(region)
            + self.predict_region_code_root_scan_time_ms(region)
            + self.predict_non_young_other_time_ms(1);
        #[allow(clippy::cast_precision_loss)]
        let bytes = region.reclaimable_bytes() as f64;
        if time > 0.0 {
            bytes / time
        } else {
            bytes
        }
    }
}

/// Linear cost model.
#[derive(Debug, Clone, Copy)]
pub struct DefaultPolicy {
    pub copy_ms_per_byte: f64,
    pub merge_scan_ms_per_card: f64,
    pub other_ms_per_region: f64,
    pub mixed_gc_count_target: usize,
    pub compaction_threshold_words: usize,
}

impl DefaultPolicy {
    #[must_use]
    pub fn new(config: &GcConfig) -> Self {
        Self {
            copy_ms_per_byte: 2.0e-6,
            merge_scan_ms_per_card: 1.0e-3,
            other_ms_per_region: 0.05,
            mixed_gc_count_target: config.mixed_gc_count_target.max(1),
            compaction_threshold_words: config.region_compaction_threshold(),
        }
    }

    /// Override the full-GC compaction threshold, in live words.
    #[must_use]
    pub const fn with_compaction_threshold(mut self, words: usize) -> Self {
        self.compaction_threshold_words = words;
        self
    }
}

impl Policy for DefaultPolicy {
    #[allow(clippy::cast_precision_loss)]
    fn predict_region_copy_time_ms(&self, region: &HeapRegion) -> f64 {
        region.live_bytes() as f64 * self.copy_ms_per_byte
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict_merge_scan_time_ms(&self, card_count: usize) -> f64 {
        card_count as f64 * self.merge_scan_ms_per_card
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict_non_young_other_time_ms(&self, num_regions: usize) -> f64 {
        num_regions as f64 * self.other_ms_per_region
    }

    fn calc_min_old_cset_length(&self, num_candidates: usize) -> usize {
        num_candidates.div_ceil(self.mixed_gc_count_target)
    }

    fn region_compaction_threshold(&self) -> usize {
        self.compaction_threshold_words
    }
}
