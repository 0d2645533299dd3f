//! Probe cache error types.

use specula_core::{TextureDimension, TextureId};
use specula_gpu::GpuError;
use thiserror::Error;

/// Errors returned by the probe cache.
#[derive(Error, Debug)]
pub enum ProbeCacheError {
    /// Rejected configuration.
    #[error("Invalid probe cache configuration: {0}")]
    InvalidConfig(String),

    /// Core type conversion failed (e.g. unsupported cache format).
    #[error(transparent)]
    Core(#[from] specula_core::Error),

    /// A realtime probe source is not a cube render target.
    #[error("Realtime reflection probe {id:?} must be a cube render target, got {dimension:?}")]
    ShapeMismatch {
        id: TextureId,
        dimension: TextureDimension,
    },

    /// Every slice is in use this frame.
    #[error("No free or evictable slice for probe {0:?}")]
    CacheExhausted(TextureId),

    /// `new_frame` has not run since creation or release.
    #[error("Probe cache resources are not initialized")]
    NotInitialized,

    /// Resource creation or command recording failed.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

impl ProbeCacheError {
    /// Per-probe failures the renderer should absorb by skipping the probe this frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ShapeMismatch { .. } | Self::CacheExhausted(_))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ProbeCacheError>;
