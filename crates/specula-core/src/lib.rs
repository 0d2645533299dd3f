//! Core types, math, and traits for the Specula reflection probe cache.
//!
//! This crate provides the foundational types shared by every Specula crate:
//! - Texture identities, content hashes and opaque GPU handles
//! - Pixel formats and the cache storage formats
//! - Cube face enumeration and face basis math
//! - Probe source descriptors (baked cubemaps and realtime cube targets)

pub mod cube;
pub mod error;
pub mod math;
pub mod source;
pub mod types;

pub use cube::{CubeFace, FaceBasis};
pub use error::{Error, Result};
pub use source::{BakedCubemap, ProbeSource, RealtimeTarget};
pub use types::{
    CacheFormat, ContentHash, MaterialHandle, TextureDimension, TextureFormat, TextureHandle,
    TextureId,
};

/// Engine-wide constants
pub mod constants {
    /// Number of faces in a cubemap
    pub const CUBE_FACE_COUNT: u32 = 6;
    /// Pixel format every probe is normalized to before convolution
    pub const WORKING_FORMAT: crate::types::TextureFormat =
        crate::types::TextureFormat::Rgba16Float;
    /// Largest probe face edge the cache accepts
    pub const MAX_PROBE_SIZE: u32 = 4096;
    /// Block edge length for BC formats
    pub const BLOCK_DIM: u32 = 4;
}
