//! Offscreen scene targets for the geometry pass.
//!
//! The geometry pass renders into a half-float scene color image (through an
//! MSAA color image when multisampling is on) plus a depth image. The scene
//! image is in `COLOR_ATTACHMENT_OPTIMAL` between the geometry, lighting and
//! post-process passes; compute passes copy out of it and back into it. The
//! overlay pass blits it onto the swapchain image and leaves it in
//! `TRANSFER_SRC_OPTIMAL`, so [`RenderTargets::begin_geometry`] re-enters
//! it from `UNDEFINED` every frame.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use ember_rhi::barrier::{ImageTransition, record_transitions};
use ember_rhi::command::{CommandBuffer, full_scissor};
use ember_rhi::device::Device;
use ember_rhi::image::{Image, ImageDesc};
use ember_rhi::pipeline::RenderTargetLayout;

use crate::error::RendererResult;

/// Scene color and every compute intermediate use this format.
pub const SCENE_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Depth attachment format.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
/// Scene layout between the geometry, lighting and post-process passes.
pub const SCENE_PASS_LAYOUT: vk::ImageLayout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
/// Scene layout after the overlay blit, until the next frame discards it.
pub const SCENE_BLIT_LAYOUT: vk::ImageLayout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;

/// Usage of the resolved scene image.
pub fn scene_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::COLOR_ATTACHMENT
        | vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::TRANSFER_DST
}

/// Offscreen scene color, depth and optional MSAA color target.
pub struct RenderTargets {
    device: Arc<Device>,
    msaa_color: Option<Image>,
    scene: Image,
    depth: Image,
    samples: vk::SampleCountFlags,
}

impl RenderTargets {
    pub fn new(device: Arc<Device>, extent: vk::Extent2D, samples: vk::SampleCountFlags) -> RendererResult<Self> {
        let msaa_color = if samples != vk::SampleCountFlags::TYPE_1 {
            Some(Image::new(
                device.clone(),
                ImageDesc::new(
                    extent,
                    SCENE_COLOR_FORMAT,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                )
                .samples(samples),
            )?)
        } else {
            None
        };
        let scene = Image::new(
            device.clone(),
            ImageDesc::new(extent, SCENE_COLOR_FORMAT, scene_usage()),
        )?;
        let depth = Image::new(
            device.clone(),
            ImageDesc::new(extent, DEPTH_FORMAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
                .samples(samples),
        )?;

        debug!(
            "Render targets {}x{} ({:?}, msaa: {})",
            extent.width,
            extent.height,
            samples,
            msaa_color.is_some()
        );
        Ok(Self {
            device,
            msaa_color,
            scene,
            depth,
            samples,
        })
    }

    /// Replace every target with one sized to `extent`. Either all targets are
    /// rebuilt or, on error, the old set is kept.
    pub fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        *self = Self::new(self.device.clone(), extent, self.samples)?;
        Ok(())
    }

    /// What geometry pipelines must be built against.
    pub fn layout(&self) -> RenderTargetLayout {
        geometry_layout(self.samples)
    }

    /// Resolved scene color image.
    #[inline]
    pub fn scene(&self) -> &Image {
        &self.scene
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.scene.extent()
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Transition, clear and begin dynamic rendering into the scene targets.
    /// Previous contents are discarded.
    pub fn begin_geometry(&self, cmd: &CommandBuffer, clear_color: [f32; 4]) {
        let mut transitions = vec![
            scene_entry(self.scene.handle()),
            ImageTransition::new(
                self.depth.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            )
            .aspect(self.depth.aspect()),
        ];
        if let Some(msaa) = &self.msaa_color {
            transitions.push(ImageTransition::new(
                msaa.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ));
        }
        record_transitions(cmd, &transitions);

        let clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        };
        let color_attachment = match &self.msaa_color {
            Some(msaa) => vk::RenderingAttachmentInfo::default()
                .image_view(msaa.view())
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                .resolve_image_view(self.scene.view())
                .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(clear),
            None => vk::RenderingAttachmentInfo::default()
                .image_view(self.scene.view())
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(clear),
        };
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.depth.view())
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let rendering_info = vk::RenderingInfo::default()
            .render_area(full_scissor(self.extent()))
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);
        cmd.begin_rendering(&rendering_info);
        cmd.set_full_viewport(self.extent());
    }
}

/// The scene's first transition of a frame. Whatever the last blit left is
/// discarded.
fn scene_entry(scene: vk::Image) -> ImageTransition {
    ImageTransition::new(scene, vk::ImageLayout::UNDEFINED, SCENE_PASS_LAYOUT)
}

/// Attachment layout for pipelines drawn in the geometry pass.
pub fn geometry_layout(samples: vk::SampleCountFlags) -> RenderTargetLayout {
    RenderTargetLayout {
        color_format: SCENE_COLOR_FORMAT,
        depth_format: Some(DEPTH_FORMAT),
        samples,
    }
}

/// Overlay pipelines draw straight onto the swapchain image.
pub fn overlay_layout(swapchain_format: vk::Format) -> RenderTargetLayout {
    RenderTargetLayout {
        color_format: swapchain_format,
        depth_format: None,
        samples: vk::SampleCountFlags::TYPE_1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use ember_rhi::barrier::layout_transition_masks;

    #[test]
    fn test_scene_reenters_from_undefined_after_the_blit() {
        let entry = scene_entry(vk::Image::null());
        assert_eq!(entry.old, vk::ImageLayout::UNDEFINED);
        assert_eq!(entry.new, SCENE_PASS_LAYOUT);
        assert_ne!(SCENE_BLIT_LAYOUT, SCENE_PASS_LAYOUT);

        let masks = layout_transition_masks(entry.old, entry.new);
        assert_eq!(masks.src.access, vk::AccessFlags::NONE);
        assert!(masks.dst.access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_geometry_layout_uses_hdr_and_depth() {
        let layout = geometry_layout(vk::SampleCountFlags::TYPE_4);
        assert_eq!(layout.color_format, vk::Format::R16G16B16A16_SFLOAT);
        assert_eq!(layout.depth_format, Some(vk::Format::D32_SFLOAT));
        assert_eq!(layout.samples, vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn test_overlay_layout_is_single_sample_without_depth() {
        let layout = overlay_layout(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(layout.depth_format, None);
        assert_eq!(layout.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(layout.color_format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_scene_usage_allows_copy_both_ways() {
        let usage = scene_usage();
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }
}
