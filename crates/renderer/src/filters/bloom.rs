//! Physically based bloom.
//!
//! The scene is copied into mip 0 of a chain image, progressively
//! downsampled through [`BLOOM_MIP_LEVELS`] levels, upsampled back with a
//! tent filter that accumulates into each larger level, and finally composited
//! with the untouched scene copy into a separate output image.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::debug;

use ember_core::FilterKind;
use ember_rhi::barrier::{ImageTransition, compute_to_compute, record_transitions};
use ember_rhi::command::CommandBuffer;
use ember_rhi::descriptor::{BindingDesc, BindingKind, DescriptorPool, DescriptorSetLayout, DescriptorWriter};
use ember_rhi::device::Device;
use ember_rhi::image::{Image, ImageDesc, ImageView, mip_level_count};
use ember_rhi::pipeline::{Pipeline, PipelineLayout};

use super::compute::{compute_pipeline, copy_back, intermediate_usage, push_range};
use super::{ScreenFilter, dispatch_group_count};
use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::RendererResult;
use crate::targets::SCENE_COLOR_FORMAT;

/// Depth of the down/up cascade, including the full-resolution level.
pub const BLOOM_MIP_LEVELS: u32 = 6;

const SOURCE_BINDING: u32 = 0;
const TARGET_BINDING: u32 = 1;
const BLOOM_BINDING: u32 = 2;

const BINDINGS: [BindingDesc; 3] = [
    BindingDesc::new(SOURCE_BINDING, BindingKind::StorageImage, vk::ShaderStageFlags::COMPUTE),
    BindingDesc::new(TARGET_BINDING, BindingKind::StorageImage, vk::ShaderStageFlags::COMPUTE),
    BindingDesc::new(BLOOM_BINDING, BindingKind::StorageImage, vk::ShaderStageFlags::COMPUTE),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BloomStage {
    Downsample,
    Upsample,
    Composite,
}

/// One dispatch of the cascade.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BloomStep {
    pub stage: BloomStage,
    /// Mip read through the source binding.
    pub src_mip: u32,
    /// Mip written through the target binding; ignored by the composite,
    /// which writes the output image.
    pub dst_mip: u32,
    pub dst_extent: vk::Extent2D,
    pub texel_size: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BloomPush {
    /// One over the source level's resolution.
    pub texel_size: [f32; 2],
    pub filter_radius: f32,
    pub intensity: f32,
}

pub fn mip_extent(extent: vk::Extent2D, mip: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: (extent.width >> mip).max(1),
        height: (extent.height >> mip).max(1),
    }
}

/// Levels actually used for `extent`: never more than the image can hold.
pub fn cascade_levels(extent: vk::Extent2D) -> u32 {
    BLOOM_MIP_LEVELS.min(mip_level_count(extent.width, extent.height))
}

/// Dispatches in execution order: downsample 0→1→…→n-1, upsample n-1→…→1,
/// then one composite of mip 0 with mip 1 at full resolution.
pub fn bloom_cascade(extent: vk::Extent2D, levels: u32) -> Vec<BloomStep> {
    let texel = |mip: u32| {
        let e = mip_extent(extent, mip);
        [1.0 / e.width as f32, 1.0 / e.height as f32]
    };
    let mut steps = Vec::new();

    for mip in 1..levels {
        steps.push(BloomStep {
            stage: BloomStage::Downsample,
            src_mip: mip - 1,
            dst_mip: mip,
            dst_extent: mip_extent(extent, mip),
            texel_size: texel(mip - 1),
        });
    }
    for mip in (1..levels.saturating_sub(1)).rev() {
        steps.push(BloomStep {
            stage: BloomStage::Upsample,
            src_mip: mip + 1,
            dst_mip: mip,
            dst_extent: mip_extent(extent, mip),
            texel_size: texel(mip + 1),
        });
    }

    let bloom_mip = if levels > 1 { 1 } else { 0 };
    steps.push(BloomStep {
        stage: BloomStage::Composite,
        src_mip: bloom_mip,
        dst_mip: 0,
        dst_extent: extent,
        texel_size: texel(bloom_mip),
    });
    steps
}

struct BloomSlot {
    chain: Image,
    output: Image,
    sets: Vec<vk::DescriptorSet>,
    _views: Vec<ImageView>,
    _pool: DescriptorPool,
}

impl BloomSlot {
    fn new(
        device: &Arc<Device>,
        set_layout: &DescriptorSetLayout,
        extent: vk::Extent2D,
        steps: &[BloomStep],
        levels: u32,
    ) -> RendererResult<Self> {
        let chain = Image::new(
            device.clone(),
            ImageDesc::new(extent, SCENE_COLOR_FORMAT, intermediate_usage()).mip_levels(levels),
        )?;
        let output = Image::new(
            device.clone(),
            ImageDesc::new(extent, SCENE_COLOR_FORMAT, intermediate_usage()),
        )?;
        let views = (0..levels)
            .map(|mip| chain.mip_view(mip))
            .collect::<Result<Vec<_>, _>>()?;

        let pool = DescriptorPool::for_layout(device.clone(), set_layout, steps.len() as u32)?;
        let sets = pool.allocate_many(set_layout, steps.len())?;
        for (step, &set) in steps.iter().zip(&sets) {
            let source = views[step.src_mip as usize].handle();
            let writer = match step.stage {
                BloomStage::Composite => DescriptorWriter::new()
                    .storage_image(SOURCE_BINDING, views[0].handle())
                    .storage_image(TARGET_BINDING, output.view())
                    .storage_image(BLOOM_BINDING, source),
                BloomStage::Downsample | BloomStage::Upsample => {
                    let target = views[step.dst_mip as usize].handle();
                    DescriptorWriter::new()
                        .storage_image(SOURCE_BINDING, source)
                        .storage_image(TARGET_BINDING, target)
                        .storage_image(BLOOM_BINDING, target)
                }
            };
            writer.apply(device, set);
        }

        Ok(Self {
            chain,
            output,
            sets,
            _views: views,
            _pool: pool,
        })
    }
}

/// Compiled shaders of the three cascade stages.
pub struct BloomShaders<'a> {
    pub downsample: &'a [u8],
    pub upsample: &'a [u8],
    pub composite: &'a [u8],
}

pub struct BloomFilter {
    slots: Vec<BloomSlot>,
    steps: Vec<BloomStep>,
    levels: u32,
    extent: vk::Extent2D,
    downsample: Pipeline,
    upsample: Pipeline,
    composite: Pipeline,
    layout: PipelineLayout,
    set_layout: DescriptorSetLayout,
    pub filter_radius: f32,
    pub intensity: f32,
    device: Arc<Device>,
}

impl BloomFilter {
    pub fn new(
        device: Arc<Device>,
        shaders: BloomShaders<'_>,
        extent: vk::Extent2D,
        filter_radius: f32,
        intensity: f32,
    ) -> RendererResult<Self> {
        let set_layout = DescriptorSetLayout::new(device.clone(), &BINDINGS)?;
        let layout = PipelineLayout::new(device.clone(), &[&set_layout], &[push_range::<BloomPush>()])?;
        let downsample = compute_pipeline(&device, shaders.downsample, &layout)?;
        let upsample = compute_pipeline(&device, shaders.upsample, &layout)?;
        let composite = compute_pipeline(&device, shaders.composite, &layout)?;

        let mut filter = Self {
            slots: Vec::new(),
            steps: Vec::new(),
            levels: 0,
            extent,
            downsample,
            upsample,
            composite,
            layout,
            set_layout,
            filter_radius,
            intensity,
            device,
        };
        filter.rebuild(extent)?;
        Ok(filter)
    }

    #[inline]
    pub fn levels(&self) -> u32 {
        self.levels
    }

    fn pipeline_for(&self, stage: BloomStage) -> vk::Pipeline {
        match stage {
            BloomStage::Downsample => self.downsample.handle(),
            BloomStage::Upsample => self.upsample.handle(),
            BloomStage::Composite => self.composite.handle(),
        }
    }
}

impl ScreenFilter for BloomFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Bloom
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        let levels = cascade_levels(extent);
        let steps = bloom_cascade(extent, levels);
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| BloomSlot::new(&self.device, &self.set_layout, extent, &steps, levels))
            .collect::<RendererResult<Vec<_>>>()?;

        self.slots = slots;
        self.steps = steps;
        self.levels = levels;
        self.extent = extent;
        debug!(
            "Bloom rebuilt at {}x{} with {} levels ({} dispatches)",
            extent.width,
            extent.height,
            levels,
            self.steps.len()
        );
        Ok(())
    }

    fn record(&self, cmd: &CommandBuffer, slot: usize, scene: &Image) {
        let bloom = &self.slots[slot];
        let chain = bloom.chain.handle();

        record_transitions(
            cmd,
            &[
                ImageTransition::new(
                    scene.handle(),
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                ),
                ImageTransition::new(chain, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            ],
        );
        cmd.copy_image(scene.handle(), chain, self.extent);

        let mut transitions = vec![
            ImageTransition::new(chain, vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::GENERAL),
            ImageTransition::new(bloom.output.handle(), vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL),
        ];
        if self.levels > 1 {
            transitions.push(
                ImageTransition::new(chain, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)
                    .mips(1, self.levels - 1),
            );
        }
        record_transitions(cmd, &transitions);

        for (index, (step, &set)) in self.steps.iter().zip(&bloom.sets).enumerate() {
            if index > 0 {
                compute_to_compute(cmd);
            }
            cmd.bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline_for(step.stage));
            cmd.bind_descriptor_set(vk::PipelineBindPoint::COMPUTE, self.layout.handle(), set);
            cmd.push_constants(
                self.layout.handle(),
                vk::ShaderStageFlags::COMPUTE,
                &BloomPush {
                    texel_size: step.texel_size,
                    filter_radius: self.filter_radius,
                    intensity: self.intensity,
                },
            );
            let (x, y) = dispatch_group_count(step.dst_extent);
            cmd.dispatch(x, y, 1);
        }

        copy_back(cmd, &bloom.output, scene, self.extent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_mip_extent_never_reaches_zero() {
        assert_eq!(mip_extent(extent(800, 600), 1), extent(400, 300));
        assert_eq!(mip_extent(extent(800, 600), 5), extent(25, 18));
        assert_eq!(mip_extent(extent(3, 1), 4), extent(1, 1));
    }

    #[test]
    fn test_cascade_levels_clamped_by_image_size() {
        assert_eq!(cascade_levels(extent(1920, 1080)), BLOOM_MIP_LEVELS);
        assert_eq!(cascade_levels(extent(8, 8)), 4);
        assert_eq!(cascade_levels(extent(1, 1)), 1);
    }

    #[test]
    fn test_full_cascade_order() {
        let steps = bloom_cascade(extent(800, 600), BLOOM_MIP_LEVELS);
        let plan: Vec<_> = steps.iter().map(|s| (s.stage, s.src_mip, s.dst_mip)).collect();
        use BloomStage::*;
        assert_eq!(
            plan,
            [
                (Downsample, 0, 1),
                (Downsample, 1, 2),
                (Downsample, 2, 3),
                (Downsample, 3, 4),
                (Downsample, 4, 5),
                (Upsample, 5, 4),
                (Upsample, 4, 3),
                (Upsample, 3, 2),
                (Upsample, 2, 1),
                (Composite, 1, 0),
            ]
        );
    }

    #[test]
    fn test_step_extents_and_texel_sizes() {
        let steps = bloom_cascade(extent(800, 600), 3);
        // First downsample reads full resolution and writes half.
        assert_eq!(steps[0].dst_extent, extent(400, 300));
        assert_eq!(steps[0].texel_size, [1.0 / 800.0, 1.0 / 600.0]);
        // Upsample into mip 1 reads mip 2.
        assert_eq!(steps[2].stage, BloomStage::Upsample);
        assert_eq!(steps[2].dst_extent, extent(400, 300));
        assert_eq!(steps[2].texel_size, [1.0 / 200.0, 1.0 / 150.0]);
        // Composite dispatches over the whole image.
        let composite = steps[steps.len() - 1];
        assert_eq!(composite.dst_extent, extent(800, 600));
    }

    #[test]
    fn test_tiny_cascades() {
        let two = bloom_cascade(extent(2, 2), 2);
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].stage, BloomStage::Downsample);
        assert_eq!(two[1].stage, BloomStage::Composite);

        let one = bloom_cascade(extent(1, 1), 1);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].src_mip, 0);
    }

    #[test]
    fn test_push_constant_size() {
        assert_eq!(std::mem::size_of::<BloomPush>(), 16);
    }
}
