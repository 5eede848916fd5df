//! Image layout transitions and memory barriers.
//!
//! Access and stage masks are derived from the layout on each side of the
//! transition, so any pair of supported layouts can be combined without a
//! hand-written case per pair.

use ash::vk;

use crate::command::CommandBuffer;

/// Access/stage masks for one side of a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutUsage {
    /// Access mask
    pub access: vk::AccessFlags,
    /// Pipeline stage mask
    pub stage: vk::PipelineStageFlags,
}

/// Source and destination masks for one layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    /// Side that must finish first
    pub src: LayoutUsage,
    /// Side that waits
    pub dst: LayoutUsage,
}

/// How the GPU touches an image while it sits in `layout`.
pub fn layout_usage(layout: vk::ImageLayout) -> LayoutUsage {
    let (access, stage) = match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::NONE, vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        vk::ImageLayout::GENERAL => (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::AccessFlags::NONE, vk::PipelineStageFlags::BOTTOM_OF_PIPE)
        }
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    };
    LayoutUsage { access, stage }
}

/// Masks for a transition from `old` to `new`.
pub fn layout_transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> TransitionMasks {
    let mut src = layout_usage(old);
    // An image coming back from presentation has no writes to make visible.
    if old == vk::ImageLayout::PRESENT_SRC_KHR {
        src = LayoutUsage {
            access: vk::AccessFlags::NONE,
            stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        };
    }
    TransitionMasks {
        src,
        dst: layout_usage(new),
    }
}

/// Depth formats get the depth aspect (plus stencil when present), the rest color.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// One image layout transition, built with [`ImageTransition::new`].
#[derive(Clone, Copy, Debug)]
pub struct ImageTransition {
    /// Image to transition
    pub image: vk::Image,
    /// Layout before the barrier
    pub old: vk::ImageLayout,
    /// Layout after the barrier
    pub new: vk::ImageLayout,
    /// Aspects covered
    pub aspect: vk::ImageAspectFlags,
    /// First mip covered
    pub base_mip: u32,
    /// Number of mips covered
    pub mip_count: u32,
    /// Number of layers covered, from layer 0
    pub layer_count: u32,
}

impl ImageTransition {
    /// Single-mip, single-layer color transition.
    pub fn new(image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout) -> Self {
        Self {
            image,
            old,
            new,
            aspect: vk::ImageAspectFlags::COLOR,
            base_mip: 0,
            mip_count: 1,
            layer_count: 1,
        }
    }

    /// Override the aspect mask.
    pub fn aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }

    /// Restrict the transition to `mip_count` mips starting at `base_mip`.
    pub fn mips(mut self, base_mip: u32, mip_count: u32) -> Self {
        self.base_mip = base_mip;
        self.mip_count = mip_count;
        self
    }

    /// Cover `layer_count` array layers from layer 0.
    pub fn layers(mut self, layer_count: u32) -> Self {
        self.layer_count = layer_count;
        self
    }

    /// Vulkan barrier for this transition, with masks from [`layout_transition_masks`].
    pub fn barrier(&self) -> vk::ImageMemoryBarrier<'static> {
        let masks = layout_transition_masks(self.old, self.new);
        vk::ImageMemoryBarrier::default()
            .old_layout(self.old)
            .new_layout(self.new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(self.aspect)
                    .base_mip_level(self.base_mip)
                    .level_count(self.mip_count)
                    .base_array_layer(0)
                    .layer_count(self.layer_count),
            )
            .src_access_mask(masks.src.access)
            .dst_access_mask(masks.dst.access)
    }

    /// Record this transition on its own.
    pub fn record(&self, cmd: &CommandBuffer) {
        record_transitions(cmd, std::slice::from_ref(self));
    }
}

/// Record several transitions as one pipeline barrier.
pub fn record_transitions(cmd: &CommandBuffer, transitions: &[ImageTransition]) {
    if transitions.is_empty() {
        return;
    }
    let (src_stage, dst_stage) = transitions.iter().fold(
        (vk::PipelineStageFlags::empty(), vk::PipelineStageFlags::empty()),
        |(src, dst), transition| {
            let masks = layout_transition_masks(transition.old, transition.new);
            (src | masks.src.stage, dst | masks.dst.stage)
        },
    );
    let barriers: Vec<_> = transitions.iter().map(ImageTransition::barrier).collect();
    cmd.pipeline_barrier(src_stage, dst_stage, &[], &[], &barriers);
}

/// Make compute shader writes visible to the next compute dispatch.
pub fn compute_to_compute(cmd: &CommandBuffer) {
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::SHADER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);
    cmd.pipeline_barrier(
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::PipelineStageFlags::COMPUTE_SHADER,
        &[barrier],
        &[],
        &[],
    );
}

/// Make buffer copies visible to vertex and index fetch.
pub fn transfer_to_vertex_input(cmd: &CommandBuffer) {
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ);
    cmd.pipeline_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::VERTEX_INPUT,
        &[barrier],
        &[],
        &[],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transition() {
        let masks = layout_transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(masks.src.access, vk::AccessFlags::NONE);
        assert_eq!(masks.src.stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.dst.access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.dst.stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_transfer_to_shader_read() {
        let masks = layout_transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(masks.src.access, vk::AccessFlags::TRANSFER_WRITE);
        assert!(masks.dst.access.contains(vk::AccessFlags::SHADER_READ));
        assert!(
            masks
                .dst
                .stage
                .contains(vk::PipelineStageFlags::FRAGMENT_SHADER)
        );
    }

    #[test]
    fn test_color_attachment_to_compute() {
        let masks = layout_transition_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::GENERAL,
        );
        assert!(
            masks
                .src
                .access
                .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        );
        assert_eq!(
            masks.src.stage,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(masks.dst.stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert!(masks.dst.access.contains(vk::AccessFlags::SHADER_WRITE));
    }

    #[test]
    fn test_present_transitions() {
        let to_present = layout_transition_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(to_present.dst.stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(to_present.dst.access, vk::AccessFlags::NONE);

        let from_present = layout_transition_masks(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(from_present.src.stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(
            aspect_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for_format(vk::Format::R16G16B16A16_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_image_transition_barrier_range() {
        let barrier = ImageTransition::new(
            vk::Image::null(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )
        .mips(2, 1)
        .layers(6)
        .barrier();
        assert_eq!(barrier.subresource_range.base_mip_level, 2);
        assert_eq!(barrier.subresource_range.level_count, 1);
        assert_eq!(barrier.subresource_range.layer_count, 6);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_READ);
    }
}
