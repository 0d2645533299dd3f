//! Probe source descriptors.
//!
//! A reflection probe reaches the cache either as an offline-baked cubemap
//! asset or as a cube render target the renderer re-draws at runtime.

use crate::types::{ContentHash, TextureDimension, TextureFormat, TextureHandle, TextureId};

/// Offline-baked cubemap asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BakedCubemap {
    /// Identity of the asset.
    pub id: TextureId,
    /// GPU texture holding the six faces.
    pub texture: TextureHandle,
    /// Face edge length in pixels.
    pub face_size: u32,
    /// Mip levels present in the asset.
    pub mip_levels: u32,
    /// Pixel format of the asset.
    pub format: TextureFormat,
    /// Hash of the imported image contents.
    pub content_hash: ContentHash,
}

/// Render target drawn by the renderer, usually once per probe update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RealtimeTarget {
    /// Identity of the render target.
    pub id: TextureId,
    /// GPU texture of the target.
    pub texture: TextureHandle,
    /// Declared shape. Only `Cube` can be filtered.
    pub dimension: TextureDimension,
    /// Face (or image) edge length in pixels.
    pub size: u32,
    /// Mip levels allocated on the target.
    pub mip_levels: u32,
    /// Pixel format of the target.
    pub format: TextureFormat,
    /// Bumped by the renderer every time the target is re-rendered.
    pub update_count: u64,
}

/// A probe texture handed to the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeSource {
    /// Static cubemap asset.
    BakedAsset(BakedCubemap),
    /// Dynamic cube render target.
    RealtimeTarget(RealtimeTarget),
}

impl ProbeSource {
    /// Identity the slice cache keys on.
    #[inline]
    pub fn id(&self) -> TextureId {
        match self {
            Self::BakedAsset(b) => b.id,
            Self::RealtimeTarget(r) => r.id,
        }
    }

    /// GPU texture to read from.
    #[inline]
    pub fn texture(&self) -> TextureHandle {
        match self {
            Self::BakedAsset(b) => b.texture,
            Self::RealtimeTarget(r) => r.texture,
        }
    }

    /// Shape of the source. Baked assets are always cubemaps.
    #[inline]
    pub fn dimension(&self) -> TextureDimension {
        match self {
            Self::BakedAsset(_) => TextureDimension::Cube,
            Self::RealtimeTarget(r) => r.dimension,
        }
    }

    /// Face edge length in pixels.
    #[inline]
    pub fn face_size(&self) -> u32 {
        match self {
            Self::BakedAsset(b) => b.face_size,
            Self::RealtimeTarget(r) => r.size,
        }
    }

    /// Pixel format of the source.
    #[inline]
    pub fn format(&self) -> TextureFormat {
        match self {
            Self::BakedAsset(b) => b.format,
            Self::RealtimeTarget(r) => r.format,
        }
    }

    /// Returns true for realtime render targets.
    #[inline]
    pub fn is_realtime(&self) -> bool {
        matches!(self, Self::RealtimeTarget(_))
    }

    /// Current content fingerprint.
    ///
    /// Baked assets report their import hash. Realtime targets hash their
    /// identity together with the update counter, so every re-render makes
    /// the cached slice stale.
    pub fn content_hash(&self) -> ContentHash {
        match self {
            Self::BakedAsset(b) => b.content_hash,
            Self::RealtimeTarget(r) => ContentHash::of(&(r.id, r.update_count)),
        }
    }
}

impl From<BakedCubemap> for ProbeSource {
    fn from(baked: BakedCubemap) -> Self {
        Self::BakedAsset(baked)
    }
}

impl From<RealtimeTarget> for ProbeSource {
    fn from(target: RealtimeTarget) -> Self {
        Self::RealtimeTarget(target)
    }
}
