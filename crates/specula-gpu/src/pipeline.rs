//! The cube face blit pipeline.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use specula_core::CubeFace;

use crate::error::{GpuError, Result};

/// Push constants of the cube face blit shader.
///
/// The fragment shader turns its UV into a sample direction with
/// `forward + u_axis * (2u - 1) + v_axis * (2v - 1)` and reads `lod`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FaceBlitPushConstants {
    pub forward: [f32; 4],
    pub u_axis: [f32; 4],
    pub v_axis: [f32; 4],
    pub lod: f32,
    pub _pad: [f32; 3],
}

impl FaceBlitPushConstants {
    /// Push constants sampling `face` at mip `lod`.
    pub fn new(face: CubeFace, lod: u32) -> Self {
        let basis = face.basis();
        Self {
            forward: basis.forward.extend(0.0).to_array(),
            u_axis: basis.u_axis.extend(0.0).to_array(),
            v_axis: basis.v_axis.extend(0.0).to_array(),
            lod: lod as f32,
            _pad: [0.0; 3],
        }
    }
}

/// SPIR-V of the fullscreen blit stages.
#[derive(Clone, Debug, Default)]
pub struct BlitShaders {
    /// Fullscreen triangle vertex shader, no vertex input.
    pub vertex: Vec<u32>,
    /// Face sampling fragment shader, set 0 binding 0 is the source cube.
    pub fragment: Vec<u32>,
}

/// Destroys shader modules once the pipeline no longer needs them.
struct StageModules<'a> {
    device: &'a ash::Device,
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
}

impl<'a> StageModules<'a> {
    unsafe fn new(device: &'a ash::Device, shaders: &BlitShaders) -> Result<Self> {
        let create = |code: &[u32], stage: &str| {
            let info = vk::ShaderModuleCreateInfo::default().code(code);
            unsafe { device.create_shader_module(&info, None) }
                .map_err(|e| GpuError::ShaderCompilation(format!("face blit {stage}: {e}")))
        };
        let mut modules = Self {
            device,
            vertex: vk::ShaderModule::null(),
            fragment: vk::ShaderModule::null(),
        };
        modules.vertex = create(&shaders.vertex, "vertex")?;
        modules.fragment = create(&shaders.fragment, "fragment")?;
        Ok(modules)
    }
}

impl Drop for StageModules<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.vertex, None);
            self.device.destroy_shader_module(self.fragment, None);
        }
    }
}

/// Push constant range of [`FaceBlitPushConstants`].
pub fn face_blit_push_range() -> vk::PushConstantRange {
    vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .offset(0)
        .size(std::mem::size_of::<FaceBlitPushConstants>() as u32)
}

/// Fullscreen pipeline writing one sampled cube face into a color target.
///
/// Built for dynamic rendering with a single attachment. Viewport and
/// scissor are dynamic so one pipeline serves every target size.
pub struct FaceBlitPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl FaceBlitPipeline {
    /// Build the pipeline for targets of `color_format`.
    ///
    /// # Safety
    /// `device` and `set_layout` must be valid and the shaders valid SPIR-V.
    pub unsafe fn new(
        device: &ash::Device,
        shaders: &BlitShaders,
        color_format: vk::Format,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let modules = unsafe { StageModules::new(device, shaders)? };

        let set_layouts = [set_layout];
        let push_ranges = [face_blit_push_range()];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| GpuError::PipelineCreation(format!("face blit layout: {e}")))?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(modules.vertex)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(modules.fragment)
                .name(c"main"),
        ];

        // The vertex shader derives the triangle from gl_VertexIndex
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .line_width(1.0);
        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);
        let color_formats = [color_format];
        let mut rendering =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering);

        let created = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        match created {
            Ok(pipelines) => Ok(Self {
                pipeline: pipelines[0],
                layout,
            }),
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(GpuError::PipelineCreation(format!("face blit: {e}")))
            }
        }
    }

    /// Destroy the pipeline and its layout.
    ///
    /// # Safety
    /// No pending command buffer may reference the pipeline.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
