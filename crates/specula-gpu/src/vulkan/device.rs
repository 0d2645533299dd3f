//! Texture and material ownership for the Vulkan backend.

use std::sync::Arc;

use ash::vk;
use hashbrown::HashMap;
use parking_lot::Mutex;
use specula_core::constants::{CUBE_FACE_COUNT, WORKING_FORMAT};
use specula_core::{MaterialHandle, TextureFormat, TextureHandle};

use super::{recorder::VulkanRecorder, vk_format};
use crate::descriptors::SampledCubeSets;
use crate::device::{CubeArrayDesc, CubeTargetDesc, GpuDevice, MaterialKind};
use crate::error::{GpuError, Result};
use crate::memory::{GpuAllocator, GpuImage};
use crate::pipeline::{BlitShaders, FaceBlitPipeline};
use crate::recorder::BlockEncodeParams;

/// A texture known to the backend.
pub struct VulkanTexture {
    pub image: vk::Image,
    pub format: vk::Format,
    /// Face edge length at mip 0.
    pub size: u32,
    pub mip_levels: u32,
    /// Total array layers (six per cube).
    pub layers: u32,
    /// Cube or cube array view over every mip.
    pub sampled_view: vk::ImageView,
    /// One 2D view per face at mip 0, present on render targets only.
    pub face_views: Vec<vk::ImageView>,
    /// Descriptor binding `sampled_view` at set 0 binding 0, if sampleable by the blit.
    pub sampled_set: Option<vk::DescriptorSet>,
    pub(crate) layout: vk::ImageLayout,
    owned: Option<GpuImage>,
}

/// Block-compression encoder supplied by the host application.
///
/// The backend has no built-in BC encoder; renderers that store probes
/// compressed register one when building the device.
pub trait BlockEncoder: Send + Sync {
    /// Record the encode of `source` into `target` as described by `params`.
    ///
    /// Both textures rest in [`super::RESTING_LAYOUT`] on entry and must be
    /// left there.
    ///
    /// # Safety
    /// `cmd` must be recording and every handle must be valid.
    unsafe fn encode(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        source: &VulkanTexture,
        target: &VulkanTexture,
        params: &BlockEncodeParams,
    ) -> Result<()>;
}

#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    pub(crate) textures: HashMap<TextureHandle, VulkanTexture>,
    pub(crate) materials: HashMap<MaterialHandle, FaceBlitPipeline>,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub(crate) struct Shared {
    pub(crate) device: Arc<ash::Device>,
    allocator: Arc<Mutex<GpuAllocator>>,
    pub(crate) registry: Mutex<Registry>,
    sampled_sets: SampledCubeSets,
    blit_shaders: Option<BlitShaders>,
    pub(crate) encoder: Option<Box<dyn BlockEncoder>>,
}

impl Shared {
    /// Free everything the backend created for `texture`. Imported images and
    /// views stay with their owner.
    unsafe fn destroy_texture(&self, mut texture: VulkanTexture) {
        if let Some(set) = texture.sampled_set.take() {
            if let Err(e) = self.sampled_sets.free(&self.device, set) {
                tracing::warn!("Failed to free descriptor set: {e}");
            }
        }
        if let Some(mut image) = texture.owned.take() {
            for view in texture.face_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.device.destroy_image_view(texture.sampled_view, None);
            if let Err(e) = self.allocator.lock().free_image(&mut image) {
                tracing::warn!("Failed to free image: {e}");
            }
        }
    }

    unsafe fn sampled_set_for(&self, view: vk::ImageView) -> Result<vk::DescriptorSet> {
        self.sampled_sets.allocate(&self.device, view)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        unsafe {
            let registry = std::mem::take(&mut *self.registry.lock());
            for (_, pipeline) in registry.materials {
                pipeline.destroy(&self.device);
            }
            for (_, texture) in registry.textures {
                self.destroy_texture(texture);
            }
            self.sampled_sets.destroy(&self.device);
        }
    }
}

/// Builder for creating a [`VulkanDevice`].
pub struct VulkanDeviceBuilder {
    max_sampled_textures: u32,
    blit_shaders: Option<BlitShaders>,
    encoder: Option<Box<dyn BlockEncoder>>,
}

impl Default for VulkanDeviceBuilder {
    fn default() -> Self {
        Self {
            max_sampled_textures: 256,
            blit_shaders: None,
            encoder: None,
        }
    }
}

impl VulkanDeviceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound on simultaneously sampleable textures (scratch targets plus imports).
    pub fn max_sampled_textures(mut self, count: u32) -> Self {
        self.max_sampled_textures = count.max(1);
        self
    }

    /// Shaders of the cube face blit material.
    pub fn blit_shaders(mut self, shaders: BlitShaders) -> Self {
        self.blit_shaders = Some(shaders);
        self
    }

    /// Block encoder used for compressed backing stores.
    pub fn block_encoder(mut self, encoder: Box<dyn BlockEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Build the device.
    ///
    /// # Safety
    /// `device` must be a valid Vulkan 1.3 device with dynamic rendering enabled,
    /// and `allocator` must have been created for it.
    pub unsafe fn build(
        self,
        device: Arc<ash::Device>,
        allocator: Arc<Mutex<GpuAllocator>>,
    ) -> Result<VulkanDevice> {
        let sampled_sets = SampledCubeSets::new(&device, self.max_sampled_textures)?;

        Ok(VulkanDevice {
            shared: Arc::new(Shared {
                device,
                allocator,
                registry: Mutex::new(Registry::default()),
                sampled_sets,
                blit_shaders: self.blit_shaders,
                encoder: self.encoder,
            }),
        })
    }
}

/// [`GpuDevice`] backed by Vulkan images.
///
/// Cheap to clone; clones share one texture registry.
#[derive(Clone)]
pub struct VulkanDevice {
    shared: Arc<Shared>,
}

impl VulkanDevice {
    /// Start building a device.
    pub fn builder() -> VulkanDeviceBuilder {
        VulkanDeviceBuilder::new()
    }

    /// Recorder writing into `cmd`, which must be in the recording state.
    pub fn recorder(&self, cmd: vk::CommandBuffer) -> VulkanRecorder {
        VulkanRecorder::new(self.shared.clone(), cmd)
    }

    /// Register an externally owned cubemap so it can be used as a probe source.
    ///
    /// The image must rest in `SHADER_READ_ONLY_OPTIMAL` whenever the cache records
    /// work that reads it. The backend never destroys `image` or `view`.
    ///
    /// # Safety
    /// `image` and `view` must be valid and outlive the returned handle.
    pub unsafe fn import_cube(
        &self,
        image: vk::Image,
        view: vk::ImageView,
        size: u32,
        mip_levels: u32,
        format: TextureFormat,
    ) -> Result<TextureHandle> {
        let sampled_set = self.shared.sampled_set_for(view)?;
        let mut registry = self.shared.registry.lock();
        let handle = TextureHandle(registry.next_id());
        registry.textures.insert(
            handle,
            VulkanTexture {
                image,
                format: vk_format(format),
                size,
                mip_levels,
                layers: CUBE_FACE_COUNT,
                sampled_view: view,
                face_views: Vec::new(),
                sampled_set: Some(sampled_set),
                layout: super::RESTING_LAYOUT,
                owned: None,
            },
        );
        Ok(handle)
    }

    /// Drop an imported texture from the registry.
    pub fn forget(&self, handle: TextureHandle) {
        let texture = self.shared.registry.lock().textures.remove(&handle);
        if let Some(texture) = texture {
            unsafe { self.shared.destroy_texture(texture) };
        }
    }

    /// Sampled view of a texture, e.g. to bind the probe cache's backing store.
    pub fn sampled_view(&self, handle: TextureHandle) -> Option<vk::ImageView> {
        self.shared
            .registry
            .lock()
            .textures
            .get(&handle)
            .map(|t| t.sampled_view)
    }

    fn create_cube_image(
        &self,
        label: &str,
        size: u32,
        format: TextureFormat,
        mip_levels: u32,
        cubes: u32,
        usage: vk::ImageUsageFlags,
    ) -> Result<GpuImage> {
        let info = cube_image_info(size, vk_format(format), mip_levels, cubes, usage);
        self.shared.allocator.lock().create_image(&info, label)
    }

    unsafe fn create_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        view_type: vk::ImageViewType,
        range: vk::ImageSubresourceRange,
    ) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(range);
        Ok(self.shared.device.create_image_view(&info, None)?)
    }

    fn register(&self, texture: VulkanTexture) -> TextureHandle {
        let mut registry = self.shared.registry.lock();
        let handle = TextureHandle(registry.next_id());
        registry.textures.insert(handle, texture);
        handle
    }
}

impl GpuDevice for VulkanDevice {
    fn create_cube_target(&mut self, desc: &CubeTargetDesc) -> Result<TextureHandle> {
        let usage = vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::COLOR_ATTACHMENT;
        let mut image =
            self.create_cube_image(desc.label, desc.size, desc.format, desc.mip_levels, 1, usage)?;

        let built = unsafe { self.cube_target_views(&image) };
        match built {
            Ok((sampled_view, face_views, sampled_set)) => {
                tracing::debug!(
                    "Created cube target '{}' ({}px, {} mips)",
                    desc.label,
                    desc.size,
                    image.mip_levels
                );
                Ok(self.register(VulkanTexture {
                    image: image.image,
                    format: image.format,
                    size: desc.size,
                    mip_levels: image.mip_levels,
                    layers: CUBE_FACE_COUNT,
                    sampled_view,
                    face_views,
                    sampled_set: Some(sampled_set),
                    layout: vk::ImageLayout::UNDEFINED,
                    owned: Some(image),
                }))
            }
            Err(e) => {
                let freed = self.shared.allocator.lock().free_image(&mut image);
                Err(unwound(e, freed))
            }
        }
    }

    fn create_cube_array(&mut self, desc: &CubeArrayDesc) -> Result<TextureHandle> {
        let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        let mut image = self.create_cube_image(
            desc.label,
            desc.size,
            desc.format,
            desc.mip_levels,
            desc.cubes,
            usage,
        )?;

        let range = super::color_range(0, image.array_layers, 0, image.mip_levels);
        let view = unsafe {
            self.create_view(image.image, image.format, vk::ImageViewType::CUBE_ARRAY, range)
        };
        match view {
            Ok(sampled_view) => {
                tracing::debug!(
                    "Created cube array '{}' ({} cubes of {}px)",
                    desc.label,
                    desc.cubes,
                    desc.size
                );
                Ok(self.register(VulkanTexture {
                    image: image.image,
                    format: image.format,
                    size: desc.size,
                    mip_levels: image.mip_levels,
                    layers: image.array_layers,
                    sampled_view,
                    face_views: Vec::new(),
                    sampled_set: None,
                    layout: vk::ImageLayout::UNDEFINED,
                    owned: Some(image),
                }))
            }
            Err(e) => {
                let freed = self.shared.allocator.lock().free_image(&mut image);
                Err(unwound(e, freed))
            }
        }
    }

    fn create_material(&mut self, kind: MaterialKind) -> Result<MaterialHandle> {
        let MaterialKind::CubeFaceBlit = kind;
        let shaders = self.shared.blit_shaders.as_ref().ok_or_else(|| {
            GpuError::Unsupported("no blit shaders registered on the device".to_string())
        })?;

        let pipeline = unsafe {
            FaceBlitPipeline::new(
                &self.shared.device,
                shaders,
                vk_format(WORKING_FORMAT),
                self.shared.sampled_sets.layout(),
            )?
        };

        let mut registry = self.shared.registry.lock();
        let handle = MaterialHandle(registry.next_id());
        registry.materials.insert(handle, pipeline);
        Ok(handle)
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        let texture = self.shared.registry.lock().textures.remove(&handle);
        match texture {
            Some(texture) => unsafe { self.shared.destroy_texture(texture) },
            None => tracing::warn!("Release of unknown texture {handle:?}"),
        }
    }

    fn release_material(&mut self, handle: MaterialHandle) {
        let pipeline = self.shared.registry.lock().materials.remove(&handle);
        if let Some(pipeline) = pipeline {
            unsafe { pipeline.destroy(&self.shared.device) };
        }
    }
}

impl VulkanDevice {
    unsafe fn cube_target_views(
        &self,
        image: &GpuImage,
    ) -> Result<(vk::ImageView, Vec<vk::ImageView>, vk::DescriptorSet)> {
        let device = &self.shared.device;
        let sampled_view = self.create_view(
            image.image,
            image.format,
            vk::ImageViewType::CUBE,
            super::color_range(0, CUBE_FACE_COUNT, 0, image.mip_levels),
        )?;

        let mut face_views = Vec::with_capacity(CUBE_FACE_COUNT as usize);
        for face in 0..CUBE_FACE_COUNT {
            match self.create_view(
                image.image,
                image.format,
                vk::ImageViewType::TYPE_2D,
                super::color_range(face, 1, 0, 1),
            ) {
                Ok(view) => face_views.push(view),
                Err(e) => {
                    for view in face_views {
                        device.destroy_image_view(view, None);
                    }
                    device.destroy_image_view(sampled_view, None);
                    return Err(e);
                }
            }
        }

        match self.shared.sampled_set_for(sampled_view) {
            Ok(set) => Ok((sampled_view, face_views, set)),
            Err(e) => {
                for view in face_views {
                    device.destroy_image_view(view, None);
                }
                device.destroy_image_view(sampled_view, None);
                Err(e)
            }
        }
    }
}

/// Create info of a cube-compatible image holding `cubes` cubemaps.
pub(crate) fn cube_image_info(
    size: u32,
    format: vk::Format,
    mip_levels: u32,
    cubes: u32,
    usage: vk::ImageUsageFlags,
) -> vk::ImageCreateInfo<'static> {
    vk::ImageCreateInfo::default()
        .flags(vk::ImageCreateFlags::CUBE_COMPATIBLE)
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: size,
            height: size,
            depth: 1,
        })
        .mip_levels(mip_levels.max(1))
        .array_layers(cubes.max(1) * CUBE_FACE_COUNT)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
}

/// Keep the error that aborted a creation, logging a failed cleanup after it.
fn unwound(cause: GpuError, cleanup: Result<()>) -> GpuError {
    if let Err(e) = cleanup {
        tracing::warn!("Failed to free image after '{cause}': {e}");
    }
    cause
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_cleanup_keeps_the_original_error() {
        let err = unwound(
            GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            Err(GpuError::AllocationFailed("free rejected".to_string())),
        );
        assert!(matches!(
            err,
            GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        ));

        let err = unwound(GpuError::InvalidState("view".to_string()), Ok(()));
        assert!(matches!(err, GpuError::InvalidState(ref m) if m == "view"));
    }

    #[test]
    fn cube_array_info_has_six_layers_per_cube() {
        let info = cube_image_info(
            128,
            vk::Format::R16G16B16A16_SFLOAT,
            8,
            4,
            vk::ImageUsageFlags::SAMPLED,
        );
        assert_eq!(info.array_layers, 24);
        assert_eq!(info.mip_levels, 8);
        assert!(info.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        assert_eq!(info.extent.width, 128);
    }

    #[test]
    fn cube_info_never_has_zero_mips() {
        let info = cube_image_info(
            16,
            vk::Format::BC6H_UFLOAT_BLOCK,
            0,
            1,
            vk::ImageUsageFlags::SAMPLED,
        );
        assert_eq!(info.mip_levels, 1);
        assert_eq!(info.array_layers, 6);
    }
}
