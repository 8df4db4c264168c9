//! Vulkan Pipeline - pipeline layouts, compute and graphics pipelines.
//!
//! Graphics pipelines target dynamic rendering, with viewport and scissor
//! always dynamic.

use ash::vk;
use derive_builder::Builder;
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;
use crate::device::{set_debug_name_handle, DebuggableObject, Device, DeviceShared};
use crate::error::{RhiError, VkResultExt};
use crate::shader::ShaderModule;

const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Create the layout both pipeline kinds are built on.
pub fn create_pipeline_layout(
    device: &Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout, RhiError> {
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    unsafe { device.handle().create_pipeline_layout(&layout_info, None).vk("vkCreatePipelineLayout") }
}

fn destroy_pipeline(device: &DeviceShared, layout: vk::PipelineLayout, pipeline: vk::Pipeline) {
    unsafe {
        device.raw.destroy_pipeline(pipeline, None);
        device.raw.destroy_pipeline_layout(layout, None);
    }
}

/// Single compute stage pipeline.
#[DeviceObject(named)]
pub struct ComputePipeline {
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl ComputePipeline {
    pub fn new(
        device: &Device,
        name: &str,
        shader: &ShaderModule,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self, RhiError> {
        let layout = create_pipeline_layout(device, set_layouts, push_constant_ranges)?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.handle())
            .name(ENTRY_POINT);
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);

        let pipelines = unsafe {
            device
                .handle()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)
                .vk("vkCreateComputePipelines")
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err(e) => {
                unsafe { device.handle().destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        log::debug!("Compute pipeline `{name}` created from `{}`", shader.name());

        let pipeline = Self {
            layout,
            pipeline,
            device: device.shared().clone(),
            name: name.to_owned(),
        };
        pipeline.set_debug_name();
        Ok(pipeline)
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline { self.pipeline }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout { self.layout }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        destroy_pipeline(&self.device, self.layout, self.pipeline);
    }
}

impl DebuggableObject for ComputePipeline {
    fn set_debug_name(&self) {
        set_debug_name_handle(&self.device, self.pipeline, &self.name);
        set_debug_name_handle(&self.device, self.layout, &format!("{}.layout", self.name));
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    #[default]
    Disabled,
    Additive,
    AlphaBlend,
}

impl BlendMode {
    fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA);
        let dst_color = match self {
            BlendMode::Disabled => return state.blend_enable(false),
            BlendMode::Additive => vk::BlendFactor::ONE,
            BlendMode::AlphaBlend => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        };
        state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(dst_color)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }
}

/// Fixed-function state and shaders of a graphics pipeline.
#[derive(Clone, Debug, Builder)]
#[builder(setter(into))]
pub struct GraphicsPipelineDesc {
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    #[builder(default)]
    pub color_formats: Vec<vk::Format>,
    #[builder(default, setter(strip_option))]
    pub depth_format: Option<vk::Format>,
    #[builder(default = "vk::PrimitiveTopology::TRIANGLE_LIST")]
    pub topology: vk::PrimitiveTopology,
    #[builder(default = "vk::PolygonMode::FILL")]
    pub polygon_mode: vk::PolygonMode,
    #[builder(default = "vk::CullModeFlags::NONE")]
    pub cull_mode: vk::CullModeFlags,
    #[builder(default = "vk::FrontFace::CLOCKWISE")]
    pub front_face: vk::FrontFace,
    #[builder(default)]
    pub depth_test: bool,
    #[builder(default)]
    pub depth_write: bool,
    #[builder(default = "vk::CompareOp::GREATER_OR_EQUAL")]
    pub depth_compare: vk::CompareOp,
    #[builder(default)]
    pub blend: BlendMode,
}

/// Vertex + fragment pipeline using dynamic rendering (Vulkan 1.3+).
#[DeviceObject(named)]
pub struct GraphicsPipeline {
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    pub fn new(
        device: &Device,
        name: &str,
        desc: &GraphicsPipelineDesc,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self, RhiError> {
        let layout = create_pipeline_layout(device, set_layouts, push_constant_ranges)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_shader)
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment_shader)
                .name(ENTRY_POINT),
        ];

        // Vertices are pulled through buffer device addresses.
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology)
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(desc.polygon_mode)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .line_width(1.0);
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(if desc.depth_test { desc.depth_compare } else { vk::CompareOp::NEVER })
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let blend_attachments = vec![desc.blend.attachment_state(); desc.color_formats.len()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&desc.color_formats)
            .depth_attachment_format(desc.depth_format.unwrap_or(vk::Format::UNDEFINED));

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| result)
                .vk("vkCreateGraphicsPipelines")
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err(e) => {
                unsafe { device.handle().destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        log::debug!("Graphics pipeline `{name}` created");

        let pipeline = Self {
            layout,
            pipeline,
            device: device.shared().clone(),
            name: name.to_owned(),
        };
        pipeline.set_debug_name();
        Ok(pipeline)
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline { self.pipeline }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout { self.layout }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        destroy_pipeline(&self.device, self.layout, self.pipeline);
    }
}

impl DebuggableObject for GraphicsPipeline {
    fn set_debug_name(&self) {
        set_debug_name_handle(&self.device, self.pipeline, &self.name);
        set_debug_name_handle(&self.device, self.layout, &format!("{}.layout", self.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn builder_fills_defaults() {
        let desc = GraphicsPipelineDescBuilder::default()
            .vertex_shader(vk::ShaderModule::from_raw(1))
            .fragment_shader(vk::ShaderModule::from_raw(2))
            .color_formats(vec![vk::Format::R16G16B16A16_SFLOAT])
            .depth_format(vk::Format::D32_SFLOAT)
            .build()
            .unwrap();

        assert_eq!(desc.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(desc.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(desc.depth_format, Some(vk::Format::D32_SFLOAT));
        assert_eq!(desc.blend, BlendMode::Disabled);
        assert!(!desc.depth_test);
    }

    #[test]
    fn builder_requires_shaders() {
        let result = GraphicsPipelineDescBuilder::default()
            .vertex_shader(vk::ShaderModule::from_raw(1))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn blend_modes() {
        assert_eq!(BlendMode::Disabled.attachment_state().blend_enable, vk::FALSE);

        let additive = BlendMode::Additive.attachment_state();
        assert_eq!(additive.blend_enable, vk::TRUE);
        assert_eq!(additive.dst_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(BlendMode::AlphaBlend.attachment_state().dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    }
}
