//! Convolution filter seam.

use specula_core::TextureHandle;

use crate::error::Result;
use crate::recorder::CommandRecorder;

/// Pre-filters a sharp environment cubemap for specular sampling.
///
/// Implementations write one roughness band per mip of `target`, sampling
/// progressively coarser mips of `source`. `source` always carries a full
/// mip chain when this is called.
pub trait ConvolutionFilter {
    /// Record the convolution of `source` into `target`.
    fn filter<R: CommandRecorder + ?Sized>(
        &mut self,
        recorder: &mut R,
        source: TextureHandle,
        target: TextureHandle,
    ) -> Result<()>;

    /// Extra consecutive slices one probe needs beyond its own (multi-scatter data).
    fn extra_slices(&self) -> u32 {
        0
    }
}
