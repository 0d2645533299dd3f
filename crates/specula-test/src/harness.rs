//! Recording mocks of the GPU seam.

use hashbrown::HashMap;
use specula_core::{CubeFace, MaterialHandle, TextureHandle};
use specula_gpu::{
    BlockEncodeParams, CommandRecorder, ConvolutionFilter, CubeArrayDesc, CubeTargetDesc,
    FullscreenParams, GpuDevice, GpuError, MaterialKind, Result,
};

/// A command captured by [`MockRecorder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCommand {
    CopyFace {
        src: TextureHandle,
        dst: TextureHandle,
        face: CubeFace,
        mip: u32,
    },
    GenerateMips {
        target: TextureHandle,
    },
    SetRenderTarget {
        target: TextureHandle,
        face: CubeFace,
    },
    DrawFullscreen {
        material: MaterialHandle,
        params: FullscreenParams,
    },
    BlockEncode(BlockEncodeParams),
    CopyToSlice {
        src: TextureHandle,
        dst_array: TextureHandle,
        slice: u32,
        mip_levels: u32,
    },
    BeginRegion(String),
    EndRegion,
}

type FailurePredicate = Box<dyn Fn(&RecordedCommand) -> bool>;

/// [`CommandRecorder`] that stores every call in order.
#[derive(Default)]
pub struct MockRecorder {
    /// Commands in recording order.
    pub commands: Vec<RecordedCommand>,
    fail_when: Option<FailurePredicate>,
}

impl MockRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command matching `predicate` fail instead of being recorded.
    pub fn fail_when(mut self, predicate: impl Fn(&RecordedCommand) -> bool + 'static) -> Self {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    /// Drain recorded commands.
    pub fn take(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Number of recorded commands matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&RecordedCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }

    /// Number of fullscreen face blits.
    pub fn blit_count(&self) -> usize {
        self.count(|c| matches!(c, RecordedCommand::DrawFullscreen { .. }))
    }

    /// Number of direct face copies.
    pub fn face_copy_count(&self) -> usize {
        self.count(|c| matches!(c, RecordedCommand::CopyFace { .. }))
    }

    /// Number of stores into the backing store, direct or encoded.
    pub fn store_count(&self) -> usize {
        self.count(|c| {
            matches!(
                c,
                RecordedCommand::CopyToSlice { .. } | RecordedCommand::BlockEncode(_)
            )
        })
    }

    /// Position of the first command matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&RecordedCommand) -> bool) -> Option<usize> {
        self.commands.iter().position(predicate)
    }

    fn push(&mut self, command: RecordedCommand) -> Result<()> {
        if self.fail_when.as_ref().is_some_and(|f| f(&command)) {
            return Err(GpuError::Other(format!("injected failure: {command:?}")));
        }
        self.commands.push(command);
        Ok(())
    }
}

impl CommandRecorder for MockRecorder {
    fn copy_face(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        face: CubeFace,
        mip: u32,
    ) -> Result<()> {
        self.push(RecordedCommand::CopyFace {
            src,
            dst,
            face,
            mip,
        })
    }

    fn generate_mips(&mut self, target: TextureHandle) -> Result<()> {
        self.push(RecordedCommand::GenerateMips { target })
    }

    fn set_render_target(&mut self, target: TextureHandle, face: CubeFace) -> Result<()> {
        self.push(RecordedCommand::SetRenderTarget { target, face })
    }

    fn draw_fullscreen(&mut self, material: MaterialHandle, params: &FullscreenParams) -> Result<()> {
        self.push(RecordedCommand::DrawFullscreen {
            material,
            params: *params,
        })
    }

    fn block_compress_encode(&mut self, params: &BlockEncodeParams) -> Result<()> {
        self.push(RecordedCommand::BlockEncode(*params))
    }

    fn copy_to_slice(
        &mut self,
        src: TextureHandle,
        dst_array: TextureHandle,
        slice: u32,
        mip_levels: u32,
    ) -> Result<()> {
        self.push(RecordedCommand::CopyToSlice {
            src,
            dst_array,
            slice,
            mip_levels,
        })
    }

    fn begin_region(&mut self, label: &str) {
        self.commands.push(RecordedCommand::BeginRegion(label.to_string()));
    }

    fn end_region(&mut self) {
        self.commands.push(RecordedCommand::EndRegion);
    }
}

/// What a [`MockDevice`] handle refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockTexture {
    CubeTarget(CubeTargetDesc),
    CubeArray(CubeArrayDesc),
}

/// [`GpuDevice`] tracking live resources in memory.
#[derive(Debug, Default)]
pub struct MockDevice {
    next_id: u64,
    /// Textures created and not yet released.
    pub textures: HashMap<TextureHandle, MockTexture>,
    /// Materials created and not yet released.
    pub materials: HashMap<MaterialHandle, MaterialKind>,
    /// Total textures ever created.
    pub textures_created: usize,
    /// Total release calls, including unknown handles.
    pub textures_released: usize,
    /// Release calls for handles that were not live.
    pub double_releases: usize,
    /// Make every creation fail.
    pub fail_creation: bool,
}

/// Handles issued by [`MockDevice`] start here so they never collide with test sources.
pub const MOCK_HANDLE_BASE: u64 = 1_000_000;

impl MockDevice {
    /// Create an empty device.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&mut self) -> u64 {
        self.next_id += 1;
        MOCK_HANDLE_BASE + self.next_id
    }

    fn check_creation(&self) -> Result<()> {
        if self.fail_creation {
            Err(GpuError::AllocationFailed("mock device out of memory".to_string()))
        } else {
            Ok(())
        }
    }

    /// Live cube render targets.
    pub fn live_targets(&self) -> usize {
        self.textures
            .values()
            .filter(|t| matches!(t, MockTexture::CubeTarget(_)))
            .count()
    }

    /// Live cube arrays.
    pub fn live_arrays(&self) -> usize {
        self.textures
            .values()
            .filter(|t| matches!(t, MockTexture::CubeArray(_)))
            .count()
    }
}

impl GpuDevice for MockDevice {
    fn create_cube_target(&mut self, desc: &CubeTargetDesc) -> Result<TextureHandle> {
        self.check_creation()?;
        let handle = TextureHandle(self.next_handle());
        self.textures.insert(handle, MockTexture::CubeTarget(*desc));
        self.textures_created += 1;
        Ok(handle)
    }

    fn create_cube_array(&mut self, desc: &CubeArrayDesc) -> Result<TextureHandle> {
        self.check_creation()?;
        let handle = TextureHandle(self.next_handle());
        self.textures.insert(handle, MockTexture::CubeArray(*desc));
        self.textures_created += 1;
        Ok(handle)
    }

    fn create_material(&mut self, kind: MaterialKind) -> Result<MaterialHandle> {
        self.check_creation()?;
        let handle = MaterialHandle(self.next_handle());
        self.materials.insert(handle, kind);
        Ok(handle)
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        self.textures_released += 1;
        if self.textures.remove(&handle).is_none() {
            self.double_releases += 1;
        }
    }

    fn release_material(&mut self, handle: MaterialHandle) {
        self.materials.remove(&handle);
    }
}

/// [`ConvolutionFilter`] that only records its inputs.
///
/// Each call shows up in the recorder as a `"mock-ggx"` region so its
/// position relative to other commands can be asserted.
#[derive(Debug, Default)]
pub struct MockFilter {
    /// `(source, target)` of every call.
    pub calls: Vec<(TextureHandle, TextureHandle)>,
    /// Make every call fail.
    pub fail: bool,
    /// Value reported by `extra_slices`.
    pub extra_slices: u32,
}

impl MockFilter {
    /// Create a filter that succeeds.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConvolutionFilter for MockFilter {
    fn filter<R: CommandRecorder + ?Sized>(
        &mut self,
        recorder: &mut R,
        source: TextureHandle,
        target: TextureHandle,
    ) -> Result<()> {
        if self.fail {
            return Err(GpuError::Other("mock filter failure".to_string()));
        }
        recorder.begin_region("mock-ggx");
        recorder.end_region();
        self.calls.push((source, target));
        Ok(())
    }

    fn extra_slices(&self) -> u32 {
        self.extra_slices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specula_core::TextureFormat;

    #[test]
    fn recorder_keeps_order_and_injects_failures() {
        let mut rec = MockRecorder::new()
            .fail_when(|c| matches!(c, RecordedCommand::GenerateMips { .. }));
        rec.set_render_target(TextureHandle(1), CubeFace::PositiveY)
            .unwrap();
        assert!(rec.generate_mips(TextureHandle(1)).is_err());
        assert_eq!(rec.commands.len(), 1);
        assert_eq!(
            rec.commands[0],
            RecordedCommand::SetRenderTarget {
                target: TextureHandle(1),
                face: CubeFace::PositiveY
            }
        );
    }

    #[test]
    fn device_tracks_double_release() {
        let mut device = MockDevice::new();
        let handle = device
            .create_cube_target(&CubeTargetDesc {
                label: "t",
                size: 8,
                format: TextureFormat::Rgba16Float,
                mip_levels: 4,
            })
            .unwrap();
        assert_eq!(device.live_targets(), 1);
        device.release_texture(handle);
        device.release_texture(handle);
        assert_eq!(device.live_targets(), 0);
        assert_eq!(device.double_releases, 1);
    }
}
