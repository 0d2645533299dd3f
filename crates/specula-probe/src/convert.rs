//! Face-by-face format and size conversion.

use specula_core::{CubeFace, MaterialHandle, TextureHandle};
use specula_gpu::{CommandRecorder, FullscreenParams, Result};

/// Source mip sampled by the conversion blit.
pub const CONVERSION_SOURCE_MIP: u32 = 0;

/// Re-render every face of `source` into the matching face of `target`.
///
/// Each face gets its own render target binding (contents kept) and one
/// fullscreen draw of `material`. The target's format and size decide the
/// output, so this is the path that changes either.
pub fn blit_cube_faces<R: CommandRecorder + ?Sized>(
    recorder: &mut R,
    material: MaterialHandle,
    source: TextureHandle,
    target: TextureHandle,
) -> Result<()> {
    for face in CubeFace::ALL {
        recorder.set_render_target(target, face)?;
        recorder.draw_fullscreen(
            material,
            &FullscreenParams {
                source,
                face,
                mip_level: CONVERSION_SOURCE_MIP,
            },
        )?;
        tracing::trace!("Blitted face {face:?} of {source:?} into {target:?}");
    }
    Ok(())
}

/// Copy mip 0 of every face of `source` into `target` unchanged.
pub fn copy_cube_faces<R: CommandRecorder + ?Sized>(
    recorder: &mut R,
    source: TextureHandle,
    target: TextureHandle,
) -> Result<()> {
    for face in CubeFace::ALL {
        recorder.copy_face(source, target, face, 0)?;
    }
    Ok(())
}
