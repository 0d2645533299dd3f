//! Probe cache configuration.

use serde::{Deserialize, Serialize};
use specula_core::constants::MAX_PROBE_SIZE;
use specula_core::math::mip_level_count;
use specula_core::CacheFormat;

use crate::error::{ProbeCacheError, Result};

/// Construction parameters of a [`ProbeFilterCache`](crate::ProbeFilterCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeCacheConfig {
    /// Number of cube slices in the backing store.
    pub capacity: u32,
    /// Face edge length of every slice, in pixels.
    pub probe_size: u32,
    /// Storage format of the backing store.
    pub format: CacheFormat,
    /// Allocate a full mip chain per slice.
    pub use_mipmaps: bool,
}

impl Default for ProbeCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            probe_size: 128,
            format: CacheFormat::Rgba16Float,
            use_mipmaps: true,
        }
    }
}

impl ProbeCacheConfig {
    /// Set the slice count.
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the face edge length.
    pub fn with_probe_size(mut self, probe_size: u32) -> Self {
        self.probe_size = probe_size;
        self
    }

    /// Set the storage format.
    pub fn with_format(mut self, format: CacheFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable per-slice mip chains.
    pub fn with_mipmaps(mut self, use_mipmaps: bool) -> Self {
        self.use_mipmaps = use_mipmaps;
        self
    }

    /// Check the configuration can back a cache.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ProbeCacheError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.probe_size == 0 {
            return Err(ProbeCacheError::InvalidConfig(
                "probe size must be at least 1".to_string(),
            ));
        }
        if self.probe_size > MAX_PROBE_SIZE {
            return Err(ProbeCacheError::InvalidConfig(format!(
                "probe size {} exceeds the maximum of {MAX_PROBE_SIZE}",
                self.probe_size
            )));
        }
        Ok(())
    }

    /// Mip levels of each backing store slice.
    pub fn backing_mip_levels(&self) -> u32 {
        if self.use_mipmaps {
            mip_level_count(self.probe_size)
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ProbeCacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backing_mip_levels(), 8);
    }

    #[test]
    fn rejects_degenerate_sizes() {
        let base = ProbeCacheConfig::default();
        for config in [
            base.with_capacity(0),
            base.with_probe_size(0),
            base.with_probe_size(MAX_PROBE_SIZE + 1),
        ] {
            assert!(matches!(
                config.validate(),
                Err(ProbeCacheError::InvalidConfig(_))
            ));
        }
        assert!(base.with_probe_size(MAX_PROBE_SIZE).validate().is_ok());
    }

    #[test]
    fn single_mip_without_mipmaps() {
        let config = ProbeCacheConfig::default()
            .with_probe_size(256)
            .with_mipmaps(false);
        assert_eq!(config.backing_mip_levels(), 1);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: ProbeCacheConfig =
            serde_json::from_str(r#"{ "capacity": 8, "format": "Bc6hUfloat" }"#).unwrap();
        assert_eq!(config.capacity, 8);
        assert_eq!(config.probe_size, 128);
        assert_eq!(config.format, CacheFormat::Bc6hUfloat);
        assert!(config.use_mipmaps);
    }

    #[test]
    fn unsupported_format_does_not_deserialize() {
        assert!(serde_json::from_str::<ProbeCacheConfig>(r#"{ "format": "Rgba8Unorm" }"#).is_err());
    }
}
