//! Command recording primitives consumed by the probe cache.
//!
//! Every call records work into a command buffer and returns immediately;
//! execution happens later on the GPU timeline in recording order.

use specula_core::{CubeFace, MaterialHandle, TextureHandle};

use crate::error::Result;

/// Inputs of a fullscreen pass that samples one source face.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FullscreenParams {
    /// Texture bound as the shader input.
    pub source: TextureHandle,
    /// Face of the source to sample.
    pub face: CubeFace,
    /// Source mip level to sample.
    pub mip_level: u32,
}

/// Arguments of a block-compression encode into an array slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockEncodeParams {
    /// Filtered cubemap to encode.
    pub source: TextureHandle,
    /// Face edge length of the source at mip 0.
    pub face_size: u32,
    /// Cube array receiving the encoded blocks.
    pub target_array: TextureHandle,
    /// First mip to encode.
    pub base_mip: u32,
    /// Upper bound on encoded mips; clamped to what both textures have.
    pub max_mips: u32,
    /// Cube slice inside the target array.
    pub slice: u32,
}

/// Opaque GPU command recording interface.
pub trait CommandRecorder {
    /// Copy one face at `mip` from a cubemap into the same face of `dst`.
    fn copy_face(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        face: CubeFace,
        mip: u32,
    ) -> Result<()>;

    /// Rebuild every mip of `target` below level 0.
    fn generate_mips(&mut self, target: TextureHandle) -> Result<()>;

    /// Bind one face of a cube target for the following draws. Contents are kept.
    fn set_render_target(&mut self, target: TextureHandle, face: CubeFace) -> Result<()>;

    /// Draw a fullscreen triangle into the bound render target.
    fn draw_fullscreen(&mut self, material: MaterialHandle, params: &FullscreenParams) -> Result<()>;

    /// Block-compress a cubemap into one slice of a compressed cube array.
    fn block_compress_encode(&mut self, params: &BlockEncodeParams) -> Result<()>;

    /// Copy every face and the first `mip_levels` mips of `src` into `slice` of `dst_array`.
    fn copy_to_slice(
        &mut self,
        src: TextureHandle,
        dst_array: TextureHandle,
        slice: u32,
        mip_levels: u32,
    ) -> Result<()>;

    /// Open a named debug region.
    fn begin_region(&mut self, _label: &str) {}

    /// Close the innermost debug region.
    fn end_region(&mut self) {}
}
