//! Single-dispatch screen filters.
//!
//! Every filter here follows the same protocol against the scene color image:
//! copy the scene into a storage input, dispatch one compute shader that
//! writes a storage output, then copy the output back over the scene. The
//! scene leaves and re-enters in `COLOR_ATTACHMENT_OPTIMAL`.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use tracing::debug;

use ember_core::FilterKind;
use ember_rhi::barrier::{ImageTransition, record_transitions};
use ember_rhi::command::CommandBuffer;
use ember_rhi::descriptor::{BindingDesc, BindingKind, DescriptorPool, DescriptorSetLayout, DescriptorWriter};
use ember_rhi::device::Device;
use ember_rhi::image::{Image, ImageDesc};
use ember_rhi::pipeline::{ComputePipelineBuilder, Pipeline, PipelineLayout};
use ember_rhi::shader::{Shader, ShaderStage};

use super::{ScreenFilter, dispatch_group_count};
use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::RendererResult;
use crate::targets::SCENE_COLOR_FORMAT;

pub const INPUT_BINDING: u32 = 0;
pub const OUTPUT_BINDING: u32 = 1;

const BINDINGS: [BindingDesc; 2] = [
    BindingDesc::new(INPUT_BINDING, BindingKind::StorageImage, vk::ShaderStageFlags::COMPUTE),
    BindingDesc::new(OUTPUT_BINDING, BindingKind::StorageImage, vk::ShaderStageFlags::COMPUTE),
];

/// Usage of every compute intermediate: written or read by shaders, filled
/// from or copied back to the scene.
pub fn intermediate_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST
}

/// Push constant range covering `T`, visible to the compute stage.
pub fn push_range<T: Pod>() -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::COMPUTE,
        offset: 0,
        size: std::mem::size_of::<T>() as u32,
    }
}

pub fn compute_pipeline(device: &Arc<Device>, code: &[u8], layout: &PipelineLayout) -> RendererResult<Pipeline> {
    let shader = Shader::from_spirv_bytes(device.clone(), code, ShaderStage::Compute)?;
    Ok(ComputePipelineBuilder::new().shader(&shader).build(device.clone(), layout)?)
}

struct SlotImages {
    input: Image,
    output: Image,
    set: vk::DescriptorSet,
    _pool: DescriptorPool,
}

impl SlotImages {
    fn new(device: &Arc<Device>, set_layout: &DescriptorSetLayout, extent: vk::Extent2D) -> RendererResult<Self> {
        let desc = ImageDesc::new(extent, SCENE_COLOR_FORMAT, intermediate_usage());
        let input = Image::new(device.clone(), desc)?;
        let output = Image::new(device.clone(), desc)?;

        let pool = DescriptorPool::for_layout(device.clone(), set_layout, 1)?;
        let [set] = pool.allocate::<1>(set_layout)?;
        DescriptorWriter::new()
            .storage_image(INPUT_BINDING, input.view())
            .storage_image(OUTPUT_BINDING, output.view())
            .apply(device, set);

        Ok(Self {
            input,
            output,
            set,
            _pool: pool,
        })
    }
}

/// Pipeline, layout and per-slot input/output images of one filter.
pub struct ComputeFilter {
    slots: Vec<SlotImages>,
    pipeline: Pipeline,
    layout: PipelineLayout,
    set_layout: DescriptorSetLayout,
    extent: vk::Extent2D,
    label: &'static str,
    device: Arc<Device>,
}

impl ComputeFilter {
    pub fn new(
        device: Arc<Device>,
        label: &'static str,
        code: &[u8],
        push_constants: &[vk::PushConstantRange],
        extent: vk::Extent2D,
    ) -> RendererResult<Self> {
        let set_layout = DescriptorSetLayout::new(device.clone(), &BINDINGS)?;
        let layout = PipelineLayout::new(device.clone(), &[&set_layout], push_constants)?;
        let pipeline = compute_pipeline(&device, code, &layout)?;

        let mut filter = Self {
            slots: Vec::new(),
            pipeline,
            layout,
            set_layout,
            extent,
            label,
            device,
        };
        filter.rebuild(extent)?;
        Ok(filter)
    }

    /// Recreate the intermediates at `extent`. The device must be idle.
    pub fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| SlotImages::new(&self.device, &self.set_layout, extent))
            .collect::<RendererResult<Vec<_>>>()?;
        self.slots = slots;
        self.extent = extent;
        debug!("{} intermediates rebuilt at {}x{}", self.label, extent.width, extent.height);
        Ok(())
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    /// Run the filter over `scene`. `push` records push constants after the
    /// pipeline is bound.
    pub fn record(
        &self,
        cmd: &CommandBuffer,
        slot: usize,
        scene: &Image,
        push: impl FnOnce(&CommandBuffer, vk::PipelineLayout),
    ) {
        let images = &self.slots[slot];
        let extent = self.extent;

        record_transitions(
            cmd,
            &[
                ImageTransition::new(
                    scene.handle(),
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                ),
                ImageTransition::new(
                    images.input.handle(),
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                ),
            ],
        );
        cmd.copy_image(scene.handle(), images.input.handle(), extent);
        record_transitions(
            cmd,
            &[
                ImageTransition::new(
                    images.input.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::GENERAL,
                ),
                ImageTransition::new(
                    images.output.handle(),
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::GENERAL,
                ),
            ],
        );

        cmd.bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline.handle());
        cmd.bind_descriptor_set(vk::PipelineBindPoint::COMPUTE, self.layout.handle(), images.set);
        push(cmd, self.layout.handle());
        let (x, y) = dispatch_group_count(extent);
        cmd.dispatch(x, y, 1);

        copy_back(cmd, &images.output, scene, extent);
    }
}

/// Copy a compute result in `GENERAL` back over the scene, which is in
/// `TRANSFER_SRC_OPTIMAL` from the copy-in, and hand the scene back as a
/// color attachment.
pub fn copy_back(cmd: &CommandBuffer, output: &Image, scene: &Image, extent: vk::Extent2D) {
    record_transitions(
        cmd,
        &[
            ImageTransition::new(
                output.handle(),
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
            ImageTransition::new(
                scene.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
        ],
    );
    cmd.copy_image(output.handle(), scene.handle(), extent);
    ImageTransition::new(
        scene.handle(),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    )
    .record(cmd);
}

// ============================================================================
// Grayscale
// ============================================================================

pub struct GrayscaleFilter {
    filter: ComputeFilter,
}

impl GrayscaleFilter {
    pub fn new(device: Arc<Device>, code: &[u8], extent: vk::Extent2D) -> RendererResult<Self> {
        Ok(Self {
            filter: ComputeFilter::new(device, "grayscale", code, &[], extent)?,
        })
    }
}

impl ScreenFilter for GrayscaleFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Grayscale
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        self.filter.rebuild(extent)
    }

    fn record(&self, cmd: &CommandBuffer, slot: usize, scene: &Image) {
        self.filter.record(cmd, slot, scene, |_, _| {});
    }
}

// ============================================================================
// Tonemap
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TonemapPush {
    pub exposure: f32,
    pub _pad: [f32; 3],
}

impl TonemapPush {
    pub fn new(exposure: f32) -> Self {
        Self {
            exposure,
            _pad: [0.0; 3],
        }
    }
}

/// Exposure-scaled ACES fit from HDR scene color to display range.
pub struct TonemapFilter {
    filter: ComputeFilter,
    pub exposure: f32,
}

impl TonemapFilter {
    pub fn new(device: Arc<Device>, code: &[u8], extent: vk::Extent2D, exposure: f32) -> RendererResult<Self> {
        Ok(Self {
            filter: ComputeFilter::new(device, "tonemap", code, &[push_range::<TonemapPush>()], extent)?,
            exposure,
        })
    }
}

impl ScreenFilter for TonemapFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Tonemap
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        self.filter.rebuild(extent)
    }

    fn record(&self, cmd: &CommandBuffer, slot: usize, scene: &Image) {
        let push = TonemapPush::new(self.exposure);
        self.filter.record(cmd, slot, scene, |cmd, layout| {
            cmd.push_constants(layout, vk::ShaderStageFlags::COMPUTE, &push);
        });
    }
}

// ============================================================================
// Deferred lighting
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightParams {
    /// xyz: direction towards the light
    pub direction: Vec4,
    /// rgb: light color, a: intensity
    pub color: Vec4,
    pub ambient: Vec4,
}

impl Default for LightParams {
    fn default() -> Self {
        Self {
            direction: Vec4::new(0.3, 1.0, 0.5, 0.0).normalize(),
            color: Vec4::new(1.0, 0.96, 0.9, 1.0),
            ambient: Vec4::new(0.08, 0.08, 0.1, 1.0),
        }
    }
}

/// Screen-space light accumulation over the resolved scene color.
pub struct LightingPass {
    filter: ComputeFilter,
    pub params: LightParams,
}

impl LightingPass {
    pub fn new(device: Arc<Device>, code: &[u8], extent: vk::Extent2D) -> RendererResult<Self> {
        Ok(Self {
            filter: ComputeFilter::new(device, "lighting", code, &[push_range::<LightParams>()], extent)?,
            params: LightParams::default(),
        })
    }

    pub fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        self.filter.rebuild(extent)
    }

    pub fn record(&self, cmd: &CommandBuffer, slot: usize, scene: &Image) {
        let params = self.params;
        self.filter.record(cmd, slot, scene, |cmd, layout| {
            cmd.push_constants(layout, vk::ShaderStageFlags::COMPUTE, &params);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_ranges_match_struct_sizes() {
        assert_eq!(push_range::<TonemapPush>().size, 16);
        assert_eq!(push_range::<LightParams>().size, 48);
        assert_eq!(push_range::<LightParams>().stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_bindings_are_two_storage_images() {
        assert_eq!(BINDINGS[0].binding, INPUT_BINDING);
        assert_eq!(BINDINGS[1].binding, OUTPUT_BINDING);
        assert!(BINDINGS.iter().all(|b| b.kind == BindingKind::StorageImage));
    }

    #[test]
    fn test_intermediate_usage_supports_copy_both_ways() {
        let usage = intermediate_usage();
        assert!(usage.contains(vk::ImageUsageFlags::STORAGE));
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn test_default_light_direction_is_normalized() {
        let params = LightParams::default();
        assert!((params.direction.length() - 1.0).abs() < 1e-5);
        assert_eq!(params.direction.w, 0.0);
    }
}
