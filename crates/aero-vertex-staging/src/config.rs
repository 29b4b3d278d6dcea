//! Engine configuration.
//!
//! Defaults match what a WebGPU-backed context wants; a handful of switches can be flipped from
//! the environment for debugging without rebuilding.

/// Zero-fill the tail of under-produced streaming allocations.
pub const ROBUST_ACCESS_ENV: &str = "AERO_STAGING_ROBUST_ACCESS";
/// Disable merging of client attributes that share byte ranges.
pub const DISABLE_ATTRIB_MERGE_ENV: &str = "AERO_STAGING_DISABLE_ATTRIB_MERGE";
/// Route every conversion through the host path even when the backend has compute.
pub const FORCE_CPU_CONVERSION_ENV: &str = "AERO_STAGING_FORCE_CPU_CONVERSION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingConfig {
    /// Zero-fill the shortfall when divisor emulation produces less data than it allocated.
    pub robust_access: bool,
    /// Coalesce client attributes whose referenced byte ranges overlap into one allocation.
    pub merge_client_attribs: bool,
    pub force_cpu_conversion: bool,
    /// Distinct access patterns kept per source buffer before the least recently used one is
    /// dropped.
    pub max_conversions_per_buffer: usize,
    /// Slots in the short index buffer cache of each vertex array.
    pub index_cache_slots: usize,
    /// Index count that is eligible for the short index buffer cache.
    pub index_cache_count: u32,
    /// Size of one streaming ring segment.
    pub streaming_frame_size: u64,
    pub frames_in_flight: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            robust_access: false,
            merge_client_attribs: true,
            force_cpu_conversion: false,
            max_conversions_per_buffer: 8,
            index_cache_slots: 4,
            index_cache_count: 6,
            streaming_frame_size: 1024 * 1024,
            frames_in_flight: 3,
        }
    }
}

impl StagingConfig {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if env_var_truthy(ROBUST_ACCESS_ENV) {
            self.robust_access = true;
        }
        if env_var_truthy(DISABLE_ATTRIB_MERGE_ENV) {
            self.merge_client_attribs = false;
        }
        if env_var_truthy(FORCE_CPU_CONVERSION_ENV) {
            self.force_cpu_conversion = true;
        }
        self
    }
}

fn env_var_truthy(name: &str) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return false;
    };

    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}
