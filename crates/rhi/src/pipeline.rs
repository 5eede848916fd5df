//! Pipeline layouts and graphics/compute pipeline construction.
//!
//! Graphics pipelines target dynamic rendering, so the attachment formats they
//! render into are part of the pipeline description ([`RenderTargetLayout`])
//! instead of a render pass object.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::descriptor::DescriptorSetLayout;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderStage};

/// Pipeline layout over descriptor set layouts and one push-constant range.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout over `set_layouts` and `push_constant_ranges`.
    pub fn new(
        device: Arc<Device>,
        set_layouts: &[&DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let handles: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(|layout| layout.handle()).collect();
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&handles)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };
        debug!(
            "Created pipeline layout: {} set layout(s), {} push constant range(s)",
            handles.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    /// Get the raw Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Destroyed pipeline layout");
    }
}

/// Graphics or compute pipeline.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    /// Get the raw Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Graphics or compute bind point.
    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Destroyed {:?} pipeline", self.bind_point);
    }
}

/// Attachment formats and sample count a graphics pipeline renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargetLayout {
    /// Color attachment format
    pub color_format: vk::Format,
    /// Depth attachment format, if depth is used
    pub depth_format: Option<vk::Format>,
    /// Sample count of every attachment
    pub samples: vk::SampleCountFlags,
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    #[default]
    Back,
}

impl CullMode {
    /// Converts to Vulkan cull mode flags.
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Depth behaviour of a graphics pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DepthMode {
    /// Test and write, nearest wins.
    #[default]
    ReadWrite,
    /// Test with LESS_OR_EQUAL without writing (skyboxes drawn at the far plane).
    ReadOnly,
    /// No depth test
    Disabled,
}

/// Color blending for the single color attachment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// Overwrite the attachment
    #[default]
    Opaque,
    /// `src * src_alpha + dst * (1 - src_alpha)`
    Alpha,
}

/// Blend state for `mode`.
pub fn blend_attachment(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let state = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    match mode {
        BlendMode::Opaque => state.blend_enable(false),
        BlendMode::Alpha => state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD),
    }
}

/// `(test, write, compare)` for a depth mode.
pub fn depth_settings(mode: DepthMode) -> (bool, bool, vk::CompareOp) {
    match mode {
        DepthMode::ReadWrite => (true, true, vk::CompareOp::LESS),
        DepthMode::ReadOnly => (true, false, vk::CompareOp::LESS_OR_EQUAL),
        DepthMode::Disabled => (false, false, vk::CompareOp::ALWAYS),
    }
}

/// Graphics pipeline description with viewport and scissor as dynamic state.
pub struct GraphicsPipelineBuilder<'a> {
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    cull_mode: CullMode,
    depth_mode: DepthMode,
    blend_mode: BlendMode,
    targets: Option<RenderTargetLayout>,
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    /// Builder with back-face culling, read-write depth and opaque blending.
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            cull_mode: CullMode::Back,
            depth_mode: DepthMode::ReadWrite,
            blend_mode: BlendMode::Opaque,
            targets: None,
        }
    }

    /// Set the vertex and fragment shaders.
    pub fn shaders(mut self, vertex: &'a Shader, fragment: &'a Shader) -> Self {
        self.vertex_shader = Some(vertex);
        self.fragment_shader = Some(fragment);
        self
    }

    /// Set the vertex bindings and attributes.
    pub fn vertex_input(
        mut self,
        binding: vk::VertexInputBindingDescription,
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> Self {
        self.vertex_bindings = vec![binding];
        self.vertex_attributes = attributes.to_vec();
        self
    }

    /// Set the cull mode.
    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    /// Set the depth test behaviour.
    pub fn depth_mode(mut self, mode: DepthMode) -> Self {
        self.depth_mode = mode;
        self
    }

    /// Set the blend mode.
    pub fn blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    /// Set the attachment formats for dynamic rendering.
    pub fn targets(mut self, targets: RenderTargetLayout) -> Self {
        self.targets = Some(targets);
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    /// Fails when shaders are missing or swapped, or targets were not set.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        let (vertex_shader, fragment_shader) = match (self.vertex_shader, self.fragment_shader) {
            (Some(vertex), Some(fragment)) => (vertex, fragment),
            _ => {
                return Err(RhiError::Pipeline(
                    "vertex and fragment shaders are required".to_string(),
                ));
            }
        };
        if vertex_shader.stage() != ShaderStage::Vertex
            || fragment_shader.stage() != ShaderStage::Fragment
        {
            return Err(RhiError::Pipeline("shader stages are swapped".to_string()));
        }
        let targets = self
            .targets
            .ok_or_else(|| RhiError::Pipeline("render target layout is required".to_string()))?;

        let stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(targets.samples);

        let has_depth = targets.depth_format.is_some();
        let (depth_test, depth_write, compare_op) = depth_settings(self.depth_mode);
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth && depth_test)
            .depth_write_enable(has_depth && depth_write)
            .depth_compare_op(compare_op)
            .max_depth_bounds(1.0);

        let blend_attachments = [blend_attachment(self.blend_mode)];
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [targets.color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
        if let Some(depth_format) = targets.depth_format {
            rendering_info = rendering_info.depth_attachment_format(depth_format);
        }

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::Pipeline("driver returned no pipeline".to_string()))?;

        info!(
            "Graphics pipeline created ({:?}, {:?}, {:?} samples)",
            self.depth_mode, self.blend_mode, targets.samples
        );

        Ok(Pipeline {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }
}

/// Builder for a compute pipeline with a single shader.
#[derive(Default)]
pub struct ComputePipelineBuilder<'a> {
    shader: Option<&'a Shader>,
}

impl<'a> ComputePipelineBuilder<'a> {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compute shader.
    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shader = Some(shader);
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    /// Fails when no shader was set.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        let shader = self
            .shader
            .filter(|shader| shader.stage() == ShaderStage::Compute)
            .ok_or_else(|| RhiError::Pipeline("a compute shader is required".to_string()))?;

        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(shader.stage_create_info())
            .layout(layout.handle());

        let pipelines = unsafe {
            device
                .handle()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::Pipeline("driver returned no pipeline".to_string()))?;

        debug!("Compute pipeline created");

        Ok(Pipeline {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cull_mode_to_vk() {
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(CullMode::Front.to_vk(), vk::CullModeFlags::FRONT);
        assert_eq!(CullMode::default().to_vk(), vk::CullModeFlags::BACK);
    }

    #[test]
    fn test_opaque_blend_attachment() {
        let state = blend_attachment(BlendMode::Opaque);
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_alpha_blend_attachment() {
        let state = blend_attachment(BlendMode::Alpha);
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            state.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }

    #[test]
    fn test_depth_settings() {
        assert_eq!(
            depth_settings(DepthMode::ReadWrite),
            (true, true, vk::CompareOp::LESS)
        );
        assert_eq!(
            depth_settings(DepthMode::ReadOnly),
            (true, false, vk::CompareOp::LESS_OR_EQUAL)
        );
        assert_eq!(depth_settings(DepthMode::Disabled).0, false);
    }

    #[test]
    fn test_graphics_builder_defaults() {
        let builder = GraphicsPipelineBuilder::new();
        assert_eq!(builder.cull_mode, CullMode::Back);
        assert_eq!(builder.depth_mode, DepthMode::ReadWrite);
        assert_eq!(builder.blend_mode, BlendMode::Opaque);
        assert!(builder.targets.is_none());
    }

    #[test]
    fn test_graphics_builder_settings() {
        let builder = GraphicsPipelineBuilder::new()
            .cull_mode(CullMode::None)
            .depth_mode(DepthMode::Disabled)
            .blend_mode(BlendMode::Alpha)
            .targets(RenderTargetLayout {
                color_format: vk::Format::R16G16B16A16_SFLOAT,
                depth_format: None,
                samples: vk::SampleCountFlags::TYPE_1,
            });
        assert_eq!(builder.cull_mode, CullMode::None);
        assert_eq!(builder.depth_mode, DepthMode::Disabled);
        assert_eq!(builder.blend_mode, BlendMode::Alpha);
        assert_eq!(
            builder.targets.map(|t| t.color_format),
            Some(vk::Format::R16G16B16A16_SFLOAT)
        );
    }
}
