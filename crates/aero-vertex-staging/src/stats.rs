use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the staging engine.
///
/// Updated on the thread recording draws; safe to read from another thread.
#[derive(Debug, Default)]
pub struct StagingStats {
    gpu_conversion_submissions: AtomicU64,
    gpu_conversion_ranges: AtomicU64,
    cpu_conversions: AtomicU64,
    cpu_fallback_conversions: AtomicU64,

    conversion_cache_hits: AtomicU64,
    conversion_cache_misses: AtomicU64,
    conversion_cache_evictions: AtomicU64,

    streamed_bytes: AtomicU64,
    divisor_emulations: AtomicU64,
    merged_attribute_groups: AtomicU64,

    index_widenings: AtomicU64,
    index_cache_hits: AtomicU64,
    index_cache_misses: AtomicU64,
    line_loop_regenerations: AtomicU64,
}

impl StagingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_gpu_conversion_submissions(&self) {
        self.gpu_conversion_submissions
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Dirty ranges carried by GPU submissions.
    pub fn add_gpu_conversion_ranges(&self, ranges: u64) {
        self.gpu_conversion_ranges
            .fetch_add(ranges, Ordering::Relaxed);
    }

    pub fn inc_cpu_conversions(&self) {
        self.cpu_conversions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cpu_fallback_conversions(&self) {
        self.cpu_fallback_conversions
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conversion_cache_hits(&self) {
        self.conversion_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conversion_cache_misses(&self) {
        self.conversion_cache_misses
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conversion_cache_evictions(&self) {
        self.conversion_cache_evictions
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_streamed_bytes(&self, bytes: u64) {
        self.streamed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_divisor_emulations(&self) {
        self.divisor_emulations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_merged_attribute_groups(&self) {
        self.merged_attribute_groups
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_index_widenings(&self) {
        self.index_widenings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_index_cache_hits(&self) {
        self.index_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_index_cache_misses(&self) {
        self.index_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_line_loop_regenerations(&self) {
        self.line_loop_regenerations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StagingStatsSnapshot {
        StagingStatsSnapshot {
            gpu_conversion_submissions: self.gpu_conversion_submissions.load(Ordering::Relaxed),
            gpu_conversion_ranges: self.gpu_conversion_ranges.load(Ordering::Relaxed),
            cpu_conversions: self.cpu_conversions.load(Ordering::Relaxed),
            cpu_fallback_conversions: self.cpu_fallback_conversions.load(Ordering::Relaxed),

            conversion_cache_hits: self.conversion_cache_hits.load(Ordering::Relaxed),
            conversion_cache_misses: self.conversion_cache_misses.load(Ordering::Relaxed),
            conversion_cache_evictions: self.conversion_cache_evictions.load(Ordering::Relaxed),

            streamed_bytes: self.streamed_bytes.load(Ordering::Relaxed),
            divisor_emulations: self.divisor_emulations.load(Ordering::Relaxed),
            merged_attribute_groups: self.merged_attribute_groups.load(Ordering::Relaxed),

            index_widenings: self.index_widenings.load(Ordering::Relaxed),
            index_cache_hits: self.index_cache_hits.load(Ordering::Relaxed),
            index_cache_misses: self.index_cache_misses.load(Ordering::Relaxed),
            line_loop_regenerations: self.line_loop_regenerations.load(Ordering::Relaxed),
        }
    }

    /// Returns a JSON object as a string.
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingStatsSnapshot {
    pub gpu_conversion_submissions: u64,
    pub gpu_conversion_ranges: u64,
    pub cpu_conversions: u64,
    pub cpu_fallback_conversions: u64,

    pub conversion_cache_hits: u64,
    pub conversion_cache_misses: u64,
    pub conversion_cache_evictions: u64,

    pub streamed_bytes: u64,
    pub divisor_emulations: u64,
    pub merged_attribute_groups: u64,

    pub index_widenings: u64,
    pub index_cache_hits: u64,
    pub index_cache_misses: u64,
    pub line_loop_regenerations: u64,
}

impl StagingStatsSnapshot {
    pub fn to_json(self) -> String {
        // Hand-built; every value is an integer.
        format!(
            "{{\"gpu_conversion_submissions\":{},\"gpu_conversion_ranges\":{},\"cpu_conversions\":{},\"cpu_fallback_conversions\":{},\"conversion_cache_hits\":{},\"conversion_cache_misses\":{},\"conversion_cache_evictions\":{},\"streamed_bytes\":{},\"divisor_emulations\":{},\"merged_attribute_groups\":{},\"index_widenings\":{},\"index_cache_hits\":{},\"index_cache_misses\":{},\"line_loop_regenerations\":{}}}",
            self.gpu_conversion_submissions,
            self.gpu_conversion_ranges,
            self.cpu_conversions,
            self.cpu_fallback_conversions,
            self.conversion_cache_hits,
            self.conversion_cache_misses,
            self.conversion_cache_evictions,
            self.streamed_bytes,
            self.divisor_emulations,
            self.merged_attribute_groups,
            self.index_widenings,
            self.index_cache_hits,
            self.index_cache_misses,
            self.line_loop_regenerations,
        )
    }
}
