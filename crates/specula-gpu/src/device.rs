//! Resource creation seam.

use specula_core::{MaterialHandle, TextureFormat, TextureHandle};

use crate::error::Result;

/// A mipmapped cube render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CubeTargetDesc {
    /// Debug name.
    pub label: &'static str,
    /// Face edge length in pixels.
    pub size: u32,
    /// Pixel format.
    pub format: TextureFormat,
    /// Mip levels to allocate.
    pub mip_levels: u32,
}

/// A fixed-size array of cubemaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CubeArrayDesc {
    /// Debug name.
    pub label: &'static str,
    /// Face edge length in pixels.
    pub size: u32,
    /// Pixel format.
    pub format: TextureFormat,
    /// Mip levels per cubemap.
    pub mip_levels: u32,
    /// Number of cubemaps.
    pub cubes: u32,
}

/// Fullscreen materials a device knows how to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaterialKind {
    /// Samples one source cube face and writes it unmodified.
    CubeFaceBlit,
}

/// Creates and destroys the textures and materials the cache owns.
pub trait GpuDevice {
    /// Create a cube render target usable as copy source/target and sampled input.
    fn create_cube_target(&mut self, desc: &CubeTargetDesc) -> Result<TextureHandle>;

    /// Create a sampled cube array.
    fn create_cube_array(&mut self, desc: &CubeArrayDesc) -> Result<TextureHandle>;

    /// Build a fullscreen material.
    fn create_material(&mut self, kind: MaterialKind) -> Result<MaterialHandle>;

    /// Destroy a texture created by this device.
    fn release_texture(&mut self, handle: TextureHandle);

    /// Destroy a material created by this device.
    fn release_material(&mut self, handle: MaterialHandle);
}
