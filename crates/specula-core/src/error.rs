//! Error types shared across Specula crates.

use thiserror::Error;

use crate::types::TextureFormat;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Pixel format the cache cannot store
    #[error("Unsupported cache format: {0:?}")]
    UnsupportedFormat(TextureFormat),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
