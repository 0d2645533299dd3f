//! Cache activity counters.

/// Counters accumulated by a [`ProbeFilterCache`](crate::ProbeFilterCache).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `fetch_slice` calls.
    pub fetches: u64,
    /// Fetches answered without baking.
    pub hits: u64,
    /// Bakes that reached the backing store.
    pub bakes: u64,
    /// Sources normalized through the face blit.
    pub conversions: u64,
    /// Sources normalized through direct face copies.
    pub direct_copies: u64,
    /// Slices taken from a previous owner.
    pub evictions: u64,
    /// Fetches that returned an error.
    pub failures: u64,
    /// Bakes since the last `new_frame`.
    pub frame_bakes: u32,
}

impl CacheStats {
    /// Fraction of fetches served without a bake.
    pub fn hit_rate(&self) -> f64 {
        if self.fetches == 0 {
            0.0
        } else {
            self.hits as f64 / self.fetches as f64
        }
    }
}
