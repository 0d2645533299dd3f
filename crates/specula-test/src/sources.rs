//! Probe source builders.

use specula_core::math::mip_level_count;
use specula_core::{
    BakedCubemap, ContentHash, ProbeSource, RealtimeTarget, TextureDimension, TextureFormat,
    TextureHandle, TextureId,
};

/// Baked cubemap with a full mip chain.
///
/// The texture handle equals the id, and the content hash is derived from the id.
pub fn baked_cubemap(id: u64, face_size: u32, format: TextureFormat) -> ProbeSource {
    ProbeSource::BakedAsset(BakedCubemap {
        id: TextureId(id),
        texture: TextureHandle(id),
        face_size,
        mip_levels: mip_level_count(face_size),
        format,
        content_hash: ContentHash::of(&id),
    })
}

/// Realtime render target with one mip.
pub fn realtime_target(
    id: u64,
    size: u32,
    dimension: TextureDimension,
    update_count: u64,
) -> ProbeSource {
    ProbeSource::RealtimeTarget(RealtimeTarget {
        id: TextureId(id),
        texture: TextureHandle(id),
        dimension,
        size,
        mip_levels: 1,
        format: TextureFormat::Rgba16Float,
        update_count,
    })
}

/// Hands out baked probes with unique ids.
#[derive(Debug)]
pub struct ProbeFactory {
    next_id: u64,
    face_size: u32,
    format: TextureFormat,
}

impl ProbeFactory {
    /// Factory producing `face_size` probes in `format`.
    pub fn new(face_size: u32, format: TextureFormat) -> Self {
        Self {
            next_id: 0,
            face_size,
            format,
        }
    }

    /// Next distinct baked probe.
    pub fn next_baked(&mut self) -> ProbeSource {
        self.next_id += 1;
        baked_cubemap(self.next_id, self.face_size, self.format)
    }

    /// `count` distinct baked probes.
    pub fn baked(&mut self, count: usize) -> Vec<ProbeSource> {
        (0..count).map(|_| self.next_baked()).collect()
    }
}
