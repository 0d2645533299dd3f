//! Vulkan implementation of the recording and device seams.
//!
//! Every texture rests in `SHADER_READ_ONLY_OPTIMAL` between commands; each
//! recorded command transitions the subresources it touches and returns them
//! to that layout before it finishes.

mod device;
mod recorder;

pub use device::{BlockEncoder, VulkanDevice, VulkanDeviceBuilder, VulkanTexture};
pub use recorder::VulkanRecorder;

use ash::vk;
use specula_core::TextureFormat;

/// Layout every texture is left in between recorded commands.
pub const RESTING_LAYOUT: vk::ImageLayout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

/// Vulkan format for a texture format.
pub const fn vk_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Rg11B10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
        TextureFormat::Bc1RgbaUnorm => vk::Format::BC1_RGBA_UNORM_BLOCK,
        TextureFormat::Bc3RgbaUnorm => vk::Format::BC3_UNORM_BLOCK,
        TextureFormat::Bc6hRgbUfloat => vk::Format::BC6H_UFLOAT_BLOCK,
        TextureFormat::Bc7RgbaUnorm => vk::Format::BC7_UNORM_BLOCK,
    }
}

/// Color subresource range over layers and mips.
pub fn color_range(
    base_layer: u32,
    layer_count: u32,
    base_mip: u32,
    mip_count: u32,
) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_array_layer(base_layer)
        .layer_count(layer_count)
        .base_mip_level(base_mip)
        .level_count(mip_count)
}

/// Color subresource layers of one mip.
pub fn color_layers(base_layer: u32, layer_count: u32, mip: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_array_layer(base_layer)
        .layer_count(layer_count)
        .mip_level(mip)
}

/// Access mask matching an image layout, for conservative barriers.
pub const fn access_for_layout(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::GENERAL => vk::AccessFlags::from_raw(
            vk::AccessFlags::SHADER_READ.as_raw() | vk::AccessFlags::SHADER_WRITE.as_raw(),
        ),
        _ => vk::AccessFlags::empty(),
    }
}

/// Record a layout transition for `range` of `image`.
///
/// # Safety
/// The device, command buffer and image must be valid and `cmd` must be recording.
pub unsafe fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .image(image)
        .subresource_range(range)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(access_for_layout(old_layout))
        .dst_access_mask(access_for_layout(new_layout))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);

    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::ALL_COMMANDS,
        vk::PipelineStageFlags::ALL_COMMANDS,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}
