//! Texture identities, handles and pixel formats.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::constants::BLOCK_DIM;
use crate::error::{Error, Result};

/// Stable identity of a probe's source texture.
///
/// Two sources with the same id are the same probe texture, even when their
/// content changes between frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TextureId(pub u64);

impl TextureId {
    /// Create a new texture id
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Fingerprint of a probe's source content.
///
/// Used to detect whether a previously baked slice is stale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ContentHash(pub u64);

impl ContentHash {
    /// Hash carried by a slot that has never been tagged by a store.
    pub const NONE: Self = Self(0);

    /// Hash any value deterministically.
    ///
    /// `DefaultHasher::new` uses fixed keys, so the result is stable across
    /// calls and cache instances. Zero is remapped so the result never equals
    /// [`Self::NONE`].
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        match hasher.finish() {
            0 => Self(1),
            h => Self(h),
        }
    }

    /// Returns true if this is the untagged hash
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Opaque handle to a GPU texture owned by a device implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TextureHandle(pub u64);

/// Opaque handle to a fullscreen material (pipeline plus bindings).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct MaterialHandle(pub u64);

/// Shape of a texture resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureDimension {
    /// Single 2D image
    D2,
    /// Array of 2D images
    D2Array,
    /// Volume texture
    D3,
    /// Cubemap (six 2D faces)
    Cube,
    /// Array of cubemaps
    CubeArray,
}

impl TextureDimension {
    /// Returns true for cube-shaped resources
    #[inline]
    pub const fn is_cube(self) -> bool {
        matches!(self, Self::Cube)
    }
}

/// Pixel formats a probe source may arrive in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8Srgb,
    Rgba16Float,
    Rgba32Float,
    Rg11B10Float,
    Bc1RgbaUnorm,
    Bc3RgbaUnorm,
    Bc6hRgbUfloat,
    Bc7RgbaUnorm,
}

impl TextureFormat {
    /// Returns true for block-compressed formats
    #[inline]
    pub const fn is_compressed(self) -> bool {
        matches!(
            self,
            Self::Bc1RgbaUnorm | Self::Bc3RgbaUnorm | Self::Bc6hRgbUfloat | Self::Bc7RgbaUnorm
        )
    }

    /// Bytes per pixel for uncompressed formats, bytes per 4x4 block otherwise.
    pub const fn bytes_per_unit(self) -> u64 {
        match self {
            Self::Rgba8Unorm | Self::Rgba8Srgb | Self::Rg11B10Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
            Self::Bc1RgbaUnorm => 8,
            Self::Bc3RgbaUnorm | Self::Bc6hRgbUfloat | Self::Bc7RgbaUnorm => 16,
        }
    }

    /// Byte size of one `width` x `height` image in this format.
    ///
    /// Compressed images round up to whole blocks, with at least one block.
    pub fn image_size(self, width: u32, height: u32) -> u64 {
        if self.is_compressed() {
            let bw = u64::from(width.div_ceil(BLOCK_DIM).max(1));
            let bh = u64::from(height.div_ceil(BLOCK_DIM).max(1));
            bw * bh * self.bytes_per_unit()
        } else {
            u64::from(width) * u64::from(height) * self.bytes_per_unit()
        }
    }
}

/// Storage format of the cache's backing texture array.
///
/// Only these two formats are valid for the backing store; anything else is
/// a configuration error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheFormat {
    /// Uncompressed half-float RGBA, written with a direct slice copy
    #[default]
    Rgba16Float,
    /// BC6H unsigned float, written by the block encoder
    Bc6hUfloat,
}

impl CacheFormat {
    /// The pixel format of the backing store
    #[inline]
    pub const fn texture_format(self) -> TextureFormat {
        match self {
            Self::Rgba16Float => TextureFormat::Rgba16Float,
            Self::Bc6hUfloat => TextureFormat::Bc6hRgbUfloat,
        }
    }

    /// Whether stores go through the block encoder
    #[inline]
    pub const fn is_block_compressed(self) -> bool {
        matches!(self, Self::Bc6hUfloat)
    }
}

impl TryFrom<TextureFormat> for CacheFormat {
    type Error = Error;

    fn try_from(format: TextureFormat) -> Result<Self> {
        match format {
            TextureFormat::Rgba16Float => Ok(Self::Rgba16Float),
            TextureFormat::Bc6hRgbUfloat => Ok(Self::Bc6hUfloat),
            other => Err(Error::UnsupportedFormat(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(ContentHash::of(&42u64), ContentHash::of(&42u64));
        assert_ne!(ContentHash::of(&42u64), ContentHash::of(&43u64));
        assert!(!ContentHash::of(&0u64).is_none());
    }

    #[test]
    fn cache_format_accepts_only_half_float_and_bc6h() {
        assert_eq!(
            CacheFormat::try_from(TextureFormat::Rgba16Float),
            Ok(CacheFormat::Rgba16Float)
        );
        assert_eq!(
            CacheFormat::try_from(TextureFormat::Bc6hRgbUfloat),
            Ok(CacheFormat::Bc6hUfloat)
        );
        assert_eq!(
            CacheFormat::try_from(TextureFormat::Rgba8Unorm),
            Err(Error::UnsupportedFormat(TextureFormat::Rgba8Unorm))
        );
    }

    #[test]
    fn unknown_cache_format_fails_to_deserialize() {
        assert!(serde_json::from_str::<CacheFormat>("\"Rgba8Unorm\"").is_err());
        assert_eq!(
            serde_json::from_str::<CacheFormat>("\"Bc6hUfloat\"").ok(),
            Some(CacheFormat::Bc6hUfloat)
        );
    }

    #[test]
    fn compressed_image_size_rounds_to_blocks() {
        assert_eq!(TextureFormat::Bc6hRgbUfloat.image_size(4, 4), 16);
        assert_eq!(TextureFormat::Bc6hRgbUfloat.image_size(1, 1), 16);
        assert_eq!(TextureFormat::Bc6hRgbUfloat.image_size(6, 6), 64);
        assert_eq!(TextureFormat::Rgba16Float.image_size(2, 2), 32);
    }
}
