//! Descriptor sets that expose one cube texture to the face blit.

use ash::vk;

use crate::error::Result;

/// Binding of the sampled cube in set 0.
pub const SAMPLED_CUBE_BINDING: u32 = 0;

/// Layout, pool and sampler behind every sampled-cube descriptor set.
///
/// Each sampleable texture gets its own set so a draw only has to bind it.
pub struct SampledCubeSets {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sampler: vk::Sampler,
}

impl SampledCubeSets {
    /// Create room for `max_sets` sampleable textures.
    ///
    /// # Safety
    /// `device` must be valid.
    pub unsafe fn new(device: &ash::Device, max_sets: u32) -> Result<Self> {
        let bindings = [sampled_cube_binding()];
        let layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
                None,
            )?
        };

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: max_sets,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(e.into());
            }
        };

        let sampler = match unsafe { device.create_sampler(&cube_sampler_info(), None) } {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_descriptor_set_layout(layout, None);
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            layout,
            pool,
            sampler,
        })
    }

    /// Layout to build pipelines against.
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Allocate a set sampling `view`, which must rest in `SHADER_READ_ONLY_OPTIMAL` when used.
    ///
    /// # Safety
    /// `device` and `view` must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        view: vk::ImageView,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [self.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let set = unsafe { device.allocate_descriptor_sets(&alloc_info)? }[0];

        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .sampler(self.sampler)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(SAMPLED_CUBE_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { device.update_descriptor_sets(&[write], &[]) };

        Ok(set)
    }

    /// Return a set to the pool.
    ///
    /// # Safety
    /// The set must not be referenced by pending command buffers.
    pub unsafe fn free(&self, device: &ash::Device, set: vk::DescriptorSet) -> Result<()> {
        unsafe { device.free_descriptor_sets(self.pool, &[set])? };
        Ok(())
    }

    /// Destroy the pool, layout and sampler.
    ///
    /// # Safety
    /// No set may still be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_sampler(self.sampler, None);
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

fn sampled_cube_binding() -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(SAMPLED_CUBE_BINDING)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::COMPUTE)
}

/// Trilinear, edge-clamped, every mip reachable.
fn cube_sampler_info() -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .max_lod(vk::LOD_CLAMP_NONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_is_one_combined_sampler() {
        let binding = sampled_cube_binding();
        assert_eq!(binding.binding, SAMPLED_CUBE_BINDING);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(binding.descriptor_count, 1);
        assert!(binding
            .stage_flags
            .contains(vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn sampler_reaches_every_mip() {
        let info = cube_sampler_info();
        assert_eq!(info.max_lod, vk::LOD_CLAMP_NONE);
        assert_eq!(info.mipmap_mode, vk::SamplerMipmapMode::LINEAR);
        assert_eq!(info.address_mode_w, vk::SamplerAddressMode::CLAMP_TO_EDGE);
    }
}
