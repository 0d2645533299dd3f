//! Command recording into a Vulkan command buffer.

use std::sync::Arc;

use ash::vk;
use specula_core::constants::CUBE_FACE_COUNT;
use specula_core::math::mip_extent;
use specula_core::{CubeFace, MaterialHandle, TextureHandle};

use super::device::{Registry, Shared};
use super::{color_layers, color_range, transition_image, RESTING_LAYOUT};
use crate::error::{GpuError, Result};
use crate::pipeline::FaceBlitPushConstants;
use crate::recorder::{BlockEncodeParams, CommandRecorder, FullscreenParams};

/// Resolved image properties, copied out of the registry.
#[derive(Clone, Copy)]
struct ImageInfo {
    image: vk::Image,
    format: vk::Format,
    size: u32,
    mip_levels: u32,
    layers: u32,
}

#[derive(Clone, Copy)]
struct BoundTarget {
    info: ImageInfo,
    view: vk::ImageView,
    face: CubeFace,
}

/// [`CommandRecorder`] writing into one Vulkan command buffer.
pub struct VulkanRecorder {
    shared: Arc<Shared>,
    cmd: vk::CommandBuffer,
    bound: Option<BoundTarget>,
    depth: u32,
}

impl VulkanRecorder {
    pub(crate) fn new(shared: Arc<Shared>, cmd: vk::CommandBuffer) -> Self {
        Self {
            shared,
            cmd,
            bound: None,
            depth: 0,
        }
    }

    /// The command buffer being recorded.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Look up a texture and bring it to the resting layout on first use.
    fn resolve(&self, registry: &mut Registry, handle: TextureHandle) -> Result<ImageInfo> {
        let texture = registry
            .textures
            .get_mut(&handle)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("texture {handle:?}")))?;

        if texture.layout != RESTING_LAYOUT {
            unsafe {
                transition_image(
                    &self.shared.device,
                    self.cmd,
                    texture.image,
                    color_range(0, texture.layers, 0, texture.mip_levels),
                    texture.layout,
                    RESTING_LAYOUT,
                );
            }
            texture.layout = RESTING_LAYOUT;
        }

        Ok(ImageInfo {
            image: texture.image,
            format: texture.format,
            size: texture.size,
            mip_levels: texture.mip_levels,
            layers: texture.layers,
        })
    }

    unsafe fn barrier(
        &self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) {
        unsafe { transition_image(&self.shared.device, self.cmd, image, range, old, new) };
    }
}

impl CommandRecorder for VulkanRecorder {
    fn copy_face(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        face: CubeFace,
        mip: u32,
    ) -> Result<()> {
        let (src_info, dst_info) = {
            let mut registry = self.shared.registry.lock();
            (self.resolve(&mut registry, src)?, self.resolve(&mut registry, dst)?)
        };
        if src_info.size != dst_info.size || src_info.format != dst_info.format {
            return Err(GpuError::InvalidState(format!(
                "face copy between incompatible textures {src:?} -> {dst:?}"
            )));
        }
        if mip >= src_info.mip_levels.min(dst_info.mip_levels) {
            return Err(GpuError::InvalidState(format!("mip {mip} out of range")));
        }

        let layer = face.index();
        let range = color_range(layer, 1, mip, 1);
        let extent = mip_extent(src_info.size, mip);
        let region = vk::ImageCopy::default()
            .src_subresource(color_layers(layer, 1, mip))
            .dst_subresource(color_layers(layer, 1, mip))
            .extent(vk::Extent3D {
                width: extent,
                height: extent,
                depth: 1,
            });

        tracing::trace!("copy_face {src:?} -> {dst:?} {face:?} mip {mip}");
        unsafe {
            self.barrier(src_info.image, range, RESTING_LAYOUT, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            self.barrier(dst_info.image, range, RESTING_LAYOUT, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            self.shared.device.cmd_copy_image(
                self.cmd,
                src_info.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_info.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            self.barrier(src_info.image, range, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, RESTING_LAYOUT);
            self.barrier(dst_info.image, range, vk::ImageLayout::TRANSFER_DST_OPTIMAL, RESTING_LAYOUT);
        }
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn generate_mips(&mut self, target: TextureHandle) -> Result<()> {
        let info = {
            let mut registry = self.shared.registry.lock();
            self.resolve(&mut registry, target)?
        };
        if info.mip_levels <= 1 {
            return Ok(());
        }

        let layers = info.layers;
        tracing::trace!("generate_mips {target:?} ({} levels)", info.mip_levels);
        unsafe {
            self.barrier(
                info.image,
                color_range(0, layers, 0, 1),
                RESTING_LAYOUT,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            );
            // Lower levels are fully overwritten
            self.barrier(
                info.image,
                color_range(0, layers, 1, info.mip_levels - 1),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            for level in 1..info.mip_levels {
                let src_extent = mip_extent(info.size, level - 1) as i32;
                let dst_extent = mip_extent(info.size, level) as i32;
                let blit = vk::ImageBlit::default()
                    .src_subresource(color_layers(0, layers, level - 1))
                    .src_offsets([
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: src_extent,
                            y: src_extent,
                            z: 1,
                        },
                    ])
                    .dst_subresource(color_layers(0, layers, level))
                    .dst_offsets([
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: dst_extent,
                            y: dst_extent,
                            z: 1,
                        },
                    ]);

                self.shared.device.cmd_blit_image(
                    self.cmd,
                    info.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    info.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );

                self.barrier(
                    info.image,
                    color_range(0, layers, level, 1),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                );
            }

            self.barrier(
                info.image,
                color_range(0, layers, 0, info.mip_levels),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                RESTING_LAYOUT,
            );
        }
        Ok(())
    }

    fn set_render_target(&mut self, target: TextureHandle, face: CubeFace) -> Result<()> {
        let mut registry = self.shared.registry.lock();
        let info = self.resolve(&mut registry, target)?;
        let view = registry
            .textures
            .get(&target)
            .and_then(|t| t.face_views.get(face.index() as usize).copied())
            .ok_or_else(|| {
                GpuError::InvalidState(format!("texture {target:?} is not a cube render target"))
            })?;
        drop(registry);

        self.bound = Some(BoundTarget { info, view, face });
        Ok(())
    }

    fn draw_fullscreen(&mut self, material: MaterialHandle, params: &FullscreenParams) -> Result<()> {
        let target = self
            .bound
            .ok_or_else(|| GpuError::InvalidState("no render target bound".to_string()))?;

        let (pipeline, layout, source_set) = {
            let mut registry = self.shared.registry.lock();
            self.resolve(&mut registry, params.source)?;
            let source_set = registry
                .textures
                .get(&params.source)
                .and_then(|t| t.sampled_set)
                .ok_or_else(|| {
                    GpuError::InvalidState(format!("texture {:?} is not sampleable", params.source))
                })?;
            let pipeline = registry
                .materials
                .get(&material)
                .ok_or_else(|| GpuError::ResourceNotFound(format!("material {material:?}")))?;
            (pipeline.pipeline, pipeline.layout, source_set)
        };

        let device = &self.shared.device;
        let range = color_range(target.face.index(), 1, 0, 1);
        let size = target.info.size;
        let push = FaceBlitPushConstants::new(params.face, params.mip_level);

        let attachment = vk::RenderingAttachmentInfo::default()
            .image_view(target.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE);
        let attachments = [attachment];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: size,
                    height: size,
                },
            })
            .layer_count(1)
            .color_attachments(&attachments);

        tracing::trace!("draw_fullscreen {:?} face {:?}", params.source, params.face);
        unsafe {
            self.barrier(
                target.info.image,
                range,
                RESTING_LAYOUT,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );
            device.cmd_begin_rendering(self.cmd, &rendering_info);
            device.cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_set_viewport(
                self.cmd,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: size as f32,
                    height: size as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            device.cmd_set_scissor(
                self.cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: vk::Extent2D {
                        width: size,
                        height: size,
                    },
                }],
            );
            device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[source_set],
                &[],
            );
            device.cmd_push_constants(
                self.cmd,
                layout,
                vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&push),
            );
            device.cmd_draw(self.cmd, 3, 1, 0, 0);
            device.cmd_end_rendering(self.cmd);
            self.barrier(
                target.info.image,
                range,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                RESTING_LAYOUT,
            );
        }
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn block_compress_encode(&mut self, params: &BlockEncodeParams) -> Result<()> {
        let encoder = self.shared.encoder.as_ref().ok_or_else(|| {
            GpuError::Unsupported("no block encoder registered on the device".to_string())
        })?;

        let mut registry = self.shared.registry.lock();
        self.resolve(&mut registry, params.source)?;
        let target_info = self.resolve(&mut registry, params.target_array)?;
        if (params.slice + 1) * CUBE_FACE_COUNT > target_info.layers {
            return Err(GpuError::InvalidState(format!(
                "slice {} out of range",
                params.slice
            )));
        }

        let (Some(source), Some(target)) = (
            registry.textures.get(&params.source),
            registry.textures.get(&params.target_array),
        ) else {
            return Err(GpuError::ResourceNotFound("encode texture".to_string()));
        };

        tracing::trace!("block_compress_encode slice {}", params.slice);
        unsafe { encoder.encode(&self.shared.device, self.cmd, source, target, params) }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn copy_to_slice(
        &mut self,
        src: TextureHandle,
        dst_array: TextureHandle,
        slice: u32,
        mip_levels: u32,
    ) -> Result<()> {
        let (src_info, dst_info) = {
            let mut registry = self.shared.registry.lock();
            (self.resolve(&mut registry, src)?, self.resolve(&mut registry, dst_array)?)
        };
        if src_info.size != dst_info.size || src_info.format != dst_info.format {
            return Err(GpuError::InvalidState(format!(
                "slice copy between incompatible textures {src:?} -> {dst_array:?}"
            )));
        }
        let base_layer = slice * CUBE_FACE_COUNT;
        if base_layer + CUBE_FACE_COUNT > dst_info.layers {
            return Err(GpuError::InvalidState(format!("slice {slice} out of range")));
        }

        let levels = mip_levels
            .min(src_info.mip_levels)
            .min(dst_info.mip_levels)
            .max(1);
        let regions: Vec<vk::ImageCopy> = (0..levels)
            .map(|level| {
                let extent = mip_extent(src_info.size, level);
                vk::ImageCopy::default()
                    .src_subresource(color_layers(0, CUBE_FACE_COUNT, level))
                    .dst_subresource(color_layers(base_layer, CUBE_FACE_COUNT, level))
                    .extent(vk::Extent3D {
                        width: extent,
                        height: extent,
                        depth: 1,
                    })
            })
            .collect();

        let src_range = color_range(0, CUBE_FACE_COUNT, 0, levels);
        let dst_range = color_range(base_layer, CUBE_FACE_COUNT, 0, levels);

        tracing::trace!("copy_to_slice {src:?} -> slice {slice} ({levels} mips)");
        unsafe {
            self.barrier(src_info.image, src_range, RESTING_LAYOUT, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            self.barrier(dst_info.image, dst_range, RESTING_LAYOUT, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            self.shared.device.cmd_copy_image(
                self.cmd,
                src_info.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_info.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
            self.barrier(src_info.image, src_range, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, RESTING_LAYOUT);
            self.barrier(dst_info.image, dst_range, vk::ImageLayout::TRANSFER_DST_OPTIMAL, RESTING_LAYOUT);
        }
        Ok(())
    }

    fn begin_region(&mut self, label: &str) {
        self.depth += 1;
        tracing::trace!(depth = self.depth, "begin region {label}");
    }

    fn end_region(&mut self) {
        tracing::trace!(depth = self.depth, "end region");
        self.depth = self.depth.saturating_sub(1);
    }
}
