//! Per-slot bake state and the normalize, convolve, store pipeline.

use specula_core::constants::WORKING_FORMAT;
use specula_core::math::mip_level_count;
use specula_core::{CacheFormat, MaterialHandle, ProbeSource, TextureHandle};
use specula_gpu::{
    BlockEncodeParams, CommandRecorder, ConvolutionFilter, CubeTargetDesc, GpuDevice, GpuError,
    MaterialKind, Result as GpuResult,
};

use crate::convert::{blit_cube_faces, copy_cube_faces};
use crate::error::{ProbeCacheError, Result};
use crate::slice_cache::SliceAllocator;

/// Lifecycle of one backing store slice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BakeState {
    /// Slice content is missing, stale or mid-bake.
    #[default]
    Convolving,
    /// Slice holds the filtered content of its current owner.
    Ready,
}

/// How a probe source reached the scratch source target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Normalization {
    /// Face copies of mip 0.
    DirectCopy,
    /// Fullscreen blit per face, with the mismatches that forced it.
    Conversion {
        /// Face size differs from the cache probe size
        resized: bool,
        /// Source is block compressed
        decompressed: bool,
        /// Uncompressed source in a format other than the working format
        reformatted: bool,
    },
}

impl Normalization {
    /// Returns true if faces go through the blit material
    #[inline]
    pub const fn is_conversion(self) -> bool {
        matches!(self, Self::Conversion { .. })
    }
}

/// Scratch targets and the blit material shared by every bake.
///
/// Contents never outlive the bake that wrote them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScratchResources {
    /// Normalized source, mipmapped before convolution.
    pub source: TextureHandle,
    /// Filter output, one roughness band per mip.
    pub convolution: TextureHandle,
    /// Face blit used by conversions.
    pub blit_material: MaterialHandle,
}

impl ScratchResources {
    /// Create both scratch targets and the blit material.
    ///
    /// Anything created before a failure is released again.
    pub fn create<D: GpuDevice + ?Sized>(device: &mut D, probe_size: u32) -> GpuResult<Self> {
        let desc = CubeTargetDesc {
            label: "probe-scratch-source",
            size: probe_size,
            format: WORKING_FORMAT,
            mip_levels: mip_level_count(probe_size),
        };
        let source = device.create_cube_target(&desc)?;

        let convolution = match device.create_cube_target(&CubeTargetDesc {
            label: "probe-scratch-convolution",
            ..desc
        }) {
            Ok(texture) => texture,
            Err(e) => {
                device.release_texture(source);
                return Err(e);
            }
        };

        let blit_material = match device.create_material(MaterialKind::CubeFaceBlit) {
            Ok(material) => material,
            Err(e) => {
                device.release_texture(convolution);
                device.release_texture(source);
                return Err(e);
            }
        };

        Ok(Self {
            source,
            convolution,
            blit_material,
        })
    }

    /// Destroy the targets and the material.
    pub fn release<D: GpuDevice + ?Sized>(self, device: &mut D) {
        device.release_texture(self.source);
        device.release_texture(self.convolution);
        device.release_material(self.blit_material);
    }
}

/// Fixed parameters shared by every bake of one cache.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BakeTarget {
    pub probe_size: u32,
    pub format: CacheFormat,
    pub backing_mips: u32,
}

/// Reject realtime sources that are not cube render targets.
pub(crate) fn check_shape(source: &ProbeSource) -> Result<()> {
    let dimension = source.dimension();
    if dimension.is_cube() {
        Ok(())
    } else {
        Err(ProbeCacheError::ShapeMismatch {
            id: source.id(),
            dimension,
        })
    }
}

/// Pick the normalization path for `source`, warning once per mismatch that
/// forces a conversion.
pub(crate) fn plan_normalization(source: &ProbeSource, probe_size: u32) -> Normalization {
    let size = source.face_size();
    let format = source.format();
    let resized = size != probe_size;
    let decompressed = format.is_compressed();
    let reformatted = !decompressed && format != WORKING_FORMAT;
    if !(resized || decompressed || reformatted) {
        return Normalization::DirectCopy;
    }

    let id = source.id();
    if resized {
        tracing::warn!(
            "Reflection probe {id:?} has face size {size} but the cache uses {probe_size}; \
             resampling. Author the probe at the cache size to skip the conversion."
        );
    }
    if decompressed {
        tracing::warn!(
            "Reflection probe {id:?} is stored as compressed {format:?}; decompressing into \
             {WORKING_FORMAT:?} loses quality. Use an uncompressed half-float cubemap."
        );
    }
    if reformatted {
        tracing::warn!(
            "Reflection probe {id:?} is {format:?} instead of {WORKING_FORMAT:?}; converting."
        );
    }
    Normalization::Conversion {
        resized,
        decompressed,
        reformatted,
    }
}

/// Record the full bake of `source` into `slice`.
///
/// Commands are recorded in pipeline order: normalize into the scratch
/// source, rebuild its mips, convolve into the scratch convolution target,
/// then store into the backing store. Nothing reaches the backing store
/// unless every earlier step recorded successfully.
pub(crate) fn bake<R, F, A>(
    recorder: &mut R,
    filter: &mut F,
    allocator: &mut A,
    scratch: &ScratchResources,
    target: &BakeTarget,
    source: &ProbeSource,
    slice: u32,
) -> Result<Normalization>
where
    R: CommandRecorder + ?Sized,
    F: ConvolutionFilter,
    A: SliceAllocator,
{
    let normalization = plan_normalization(source, target.probe_size);
    match normalization {
        Normalization::Conversion { .. } => blit_cube_faces(
            recorder,
            scratch.blit_material,
            source.texture(),
            scratch.source,
        )?,
        Normalization::DirectCopy => copy_cube_faces(recorder, source.texture(), scratch.source)?,
    }

    // Mip provenance of the source is unknown, so always rebuild the chain
    recorder.generate_mips(scratch.source)?;

    filter.filter(recorder, scratch.source, scratch.convolution)?;

    let hash = allocator.texture_hash(source);
    if target.format.is_block_compressed() {
        let backing = allocator.backing_store().ok_or_else(|| {
            GpuError::InvalidState("probe cache backing store is missing".to_string())
        })?;
        recorder.block_compress_encode(&BlockEncodeParams {
            source: scratch.convolution,
            face_size: target.probe_size,
            target_array: backing,
            base_mip: 0,
            max_mips: target.backing_mips,
            slice,
        })?;
        allocator.set_slice_hash(slice, hash);
    } else {
        allocator.update_slice(recorder, slice, scratch.convolution, hash)?;
    }

    Ok(normalization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use specula_core::{TextureDimension, TextureFormat};
    use std::io::{self, Write};
    use std::sync::Arc;
    use specula_test::{baked_cubemap, realtime_target, MockDevice};

    #[test]
    fn scratch_creation_rolls_back() {
        let mut device = MockDevice::new();
        let scratch = ScratchResources::create(&mut device, 64).unwrap();
        assert_eq!(device.live_targets(), 2);
        assert_eq!(device.materials.len(), 1);
        scratch.release(&mut device);
        assert_eq!(device.live_targets(), 0);
        assert!(device.materials.is_empty());

        device.fail_creation = true;
        assert!(ScratchResources::create(&mut device, 64).is_err());
        assert_eq!(device.live_targets(), 0);
    }

    #[test]
    fn only_cube_sources_pass_shape_check() {
        assert!(check_shape(&realtime_target(1, 64, TextureDimension::Cube, 0)).is_ok());
        assert!(check_shape(&baked_cubemap(2, 64, TextureFormat::Rgba8Unorm)).is_ok());
        for dimension in [
            TextureDimension::D2,
            TextureDimension::D2Array,
            TextureDimension::D3,
            TextureDimension::CubeArray,
        ] {
            assert!(matches!(
                check_shape(&realtime_target(3, 64, dimension, 0)),
                Err(ProbeCacheError::ShapeMismatch { .. })
            ));
        }
    }

    #[test]
    fn matching_sources_copy_directly() {
        let source = baked_cubemap(1, 128, TextureFormat::Rgba16Float);
        assert_eq!(plan_normalization(&source, 128), Normalization::DirectCopy);
        assert!(plan_normalization(&source, 64).is_conversion());
    }

    fn conversion(resized: bool, decompressed: bool, reformatted: bool) -> Normalization {
        Normalization::Conversion {
            resized,
            decompressed,
            reformatted,
        }
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Plan `source` against `probe_size`, returning the plan and the warnings logged.
    fn plan_with_warnings(source: &ProbeSource, probe_size: u32) -> (Normalization, Vec<String>) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();
        let plan = tracing::subscriber::with_default(subscriber, || {
            plan_normalization(source, probe_size)
        });
        let output = String::from_utf8_lossy(&buffer.0.lock()).into_owned();
        let warnings = output
            .lines()
            .filter(|line| line.contains("WARN"))
            .map(str::to_owned)
            .collect();
        (plan, warnings)
    }

    #[test]
    fn direct_copy_is_silent() {
        let (plan, warnings) =
            plan_with_warnings(&baked_cubemap(1, 128, TextureFormat::Rgba16Float), 128);
        assert_eq!(plan, Normalization::DirectCopy);
        assert!(warnings.is_empty());
    }

    #[test]
    fn compressed_source_warns_about_quality() {
        let (plan, warnings) =
            plan_with_warnings(&baked_cubemap(1, 128, TextureFormat::Bc6hRgbUfloat), 128);
        assert_eq!(plan, conversion(false, true, false));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("compressed Bc6hRgbUfloat"));
    }

    #[test]
    fn size_mismatch_warns_about_resampling() {
        let (plan, warnings) =
            plan_with_warnings(&baked_cubemap(1, 512, TextureFormat::Rgba16Float), 128);
        assert_eq!(plan, conversion(true, false, false));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("face size 512"));
    }

    #[test]
    fn format_mismatch_warns_about_conversion() {
        let (plan, warnings) =
            plan_with_warnings(&baked_cubemap(1, 128, TextureFormat::Rgba8Unorm), 128);
        assert_eq!(plan, conversion(false, false, true));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Rgba8Unorm instead of Rgba16Float"));
    }

    #[test]
    fn compressed_and_resized_source_warns_twice() {
        let (plan, warnings) =
            plan_with_warnings(&baked_cubemap(1, 512, TextureFormat::Bc6hRgbUfloat), 128);
        assert_eq!(plan, conversion(true, true, false));
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("face size 512")));
        assert!(warnings.iter().any(|w| w.contains("compressed Bc6hRgbUfloat")));
    }
}
