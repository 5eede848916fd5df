//! Screen-space text drawn onto the swapchain image in the overlay or debug UI pass.
//!
//! Strings are laid out on the CPU against a [`FontAtlas`] into alpha-blended
//! quads. Each frame slot owns its own growable vertex and index buffers, so
//! the buffers of a slot are only rewritten after that slot's fence. New
//! geometry is staged in host memory and copied by the frame's own command
//! buffer; buffers orphaned by growth are retired through a [`DeferredQueue`].

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use glam::{Vec2, Vec4};
use tracing::{debug, info, trace, warn};

use ember_core::DeferredQueue;
use ember_resources::FontAtlas;
use ember_rhi::buffer::{Buffer, BufferUsage};
use ember_rhi::command::CommandBuffer;
use ember_rhi::descriptor::{BindingKind, DescriptorPool, DescriptorSetLayout, DescriptorWriter};
use ember_rhi::growable::GrowableBuffer;
use ember_rhi::pipeline::{Pipeline, PipelineLayout, RenderTargetLayout};
use ember_rhi::upload::UploadContext;
use ember_rhi::vertex::OverlayVertex;

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::{RendererError, RendererResult};
use crate::pass::PassKind;
use crate::pipeline_slot::{
    DirtySlots, PipelineStrategy, RenderPipeline, TextureBinding, UNIFORM_BINDING, build_pipeline,
};
use crate::strategies::{OverlayStrategy, OverlayUniforms, TEXTURE_BINDING};

/// Most glyph quads one batch draws per frame.
pub const MAX_TEXT_CHARS: usize = 4096;

const INITIAL_QUADS: usize = 64;

/// One string to lay out.
#[derive(Clone, Debug, PartialEq)]
pub struct TextItem {
    pub text: String,
    /// Pen start in pixels: left edge, baseline of the first line.
    pub position: Vec2,
    pub scale: f32,
    pub color: Vec4,
}

impl TextItem {
    pub fn new(text: impl Into<String>, position: Vec2) -> Self {
        Self {
            text: text.into(),
            position,
            scale: 1.0,
            color: Vec4::ONE,
        }
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }
}

/// Quads for a set of text items, four vertices and six indices each.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextGeometry {
    pub vertices: Vec<OverlayVertex>,
    pub indices: Vec<u32>,
}

impl TextGeometry {
    #[inline]
    pub fn quad_count(&self) -> usize {
        self.vertices.len() / 4
    }
}

/// Pixel position to normalized device coordinates (y down).
pub fn to_ndc(pixel: Vec2, viewport: vk::Extent2D) -> Vec2 {
    let size = Vec2::new(viewport.width.max(1) as f32, viewport.height.max(1) as f32);
    pixel / size * 2.0 - Vec2::ONE
}

/// Lay out every item into one quad list. Characters missing from the atlas
/// are skipped; whitespace advances the pen without a quad.
pub fn layout_text(
    font: &FontAtlas,
    items: &[TextItem],
    viewport: vk::Extent2D,
) -> RendererResult<TextGeometry> {
    let mut geometry = TextGeometry::default();

    for item in items {
        let mut pen = item.position;
        for ch in item.text.chars() {
            if ch == '\n' {
                pen.x = item.position.x;
                pen.y += font.line_height() * item.scale;
                continue;
            }
            let Some(glyph) = font.glyph(ch) else {
                continue;
            };
            if !glyph.is_blank() {
                let [x0, y0, x1, y1] = glyph.bounds.map(|v| v * item.scale);
                let [u0, v0, u1, v1] = glyph.uv;
                let base = geometry.vertices.len() as u32;
                let corners = [
                    (Vec2::new(x0, y0), Vec2::new(u0, v0)),
                    (Vec2::new(x1, y0), Vec2::new(u1, v0)),
                    (Vec2::new(x1, y1), Vec2::new(u1, v1)),
                    (Vec2::new(x0, y1), Vec2::new(u0, v1)),
                ];
                for (offset, uv) in corners {
                    geometry
                        .vertices
                        .push(OverlayVertex::new(to_ndc(pen + offset, viewport), uv, item.color));
                }
                geometry
                    .indices
                    .extend([0, 1, 2, 2, 3, 0].map(|i| base + i));
            }
            pen.x += glyph.advance * item.scale;
        }
    }

    let requested = geometry.quad_count();
    debug_assert!(
        requested <= MAX_TEXT_CHARS,
        "text batch overflow: {} quads",
        requested
    );
    if requested > MAX_TEXT_CHARS {
        return Err(RendererError::TextCapacityExceeded {
            requested,
            capacity: MAX_TEXT_CHARS,
        });
    }
    Ok(geometry)
}

struct SlotBuffers {
    vertices: GrowableBuffer<OverlayVertex>,
    indices: GrowableBuffer<u32>,
    index_count: u32,
}

/// Text drawn through the overlay pipeline.
///
/// Geometry is rebuilt when the items change and uploaded per frame slot.
pub struct TextBatch {
    retired: DeferredQueue<Buffer>,
    slots: Vec<SlotBuffers>,
    sets: [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT],
    pool: DescriptorPool,
    uniform: Buffer,
    pipeline: Option<Pipeline>,
    layout: PipelineLayout,
    set_layout: DescriptorSetLayout,
    targets: Option<RenderTargetLayout>,
    strategy: OverlayStrategy,
    atlas: TextureBinding,
    font: FontAtlas,
    items: Vec<TextItem>,
    geometry: TextGeometry,
    dirty: DirtySlots,
    viewport: Option<vk::Extent2D>,
    pass: PassKind,
    upload: Arc<UploadContext>,
}

impl TextBatch {
    /// `strategy` supplies the overlay shaders; `atlas` is the glyph texture
    /// `font` describes.
    pub fn new(
        upload: Arc<UploadContext>,
        strategy: OverlayStrategy,
        font: FontAtlas,
        atlas: TextureBinding,
    ) -> RendererResult<Self> {
        let device = upload.device().clone();
        let set_layout = DescriptorSetLayout::new(device.clone(), &strategy.bindings())?;
        let layout = PipelineLayout::new(device.clone(), &[&set_layout], &[])?;

        let uniform = Buffer::new_with_data(
            device.clone(),
            BufferUsage::Uniform,
            bytemuck::bytes_of(&OverlayUniforms::default()),
        )?;
        let pool = DescriptorPool::for_layout(device.clone(), &set_layout, MAX_FRAMES_IN_FLIGHT as u32)?;
        let sets = pool.allocate::<MAX_FRAMES_IN_FLIGHT>(&set_layout)?;
        let writer = DescriptorWriter::new()
            .buffer(
                UNIFORM_BINDING,
                BindingKind::UniformBuffer,
                uniform.handle(),
                uniform.size(),
            )
            .sampled_image(TEXTURE_BINDING, atlas.texture.view(), atlas.sampler.handle());
        for set in sets {
            writer.apply(&device, set);
        }

        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| {
                Ok(SlotBuffers {
                    vertices: GrowableBuffer::new(device.clone(), BufferUsage::Vertex, INITIAL_QUADS * 4)?,
                    indices: GrowableBuffer::new(device.clone(), BufferUsage::Index, INITIAL_QUADS * 6)?,
                    index_count: 0,
                })
            })
            .collect::<RendererResult<Vec<_>>>()?;

        info!("Text batch created ({} glyphs in atlas)", font.glyph_count());
        Ok(Self {
            retired: DeferredQueue::new(),
            slots,
            sets,
            pool,
            uniform,
            pipeline: None,
            layout,
            set_layout,
            targets: None,
            strategy,
            atlas,
            font,
            items: Vec::new(),
            geometry: TextGeometry::default(),
            dirty: DirtySlots::default(),
            viewport: None,
            pass: PassKind::Overlay,
            upload,
        })
    }

    /// Draw in the debug UI pass instead of the overlay pass.
    pub fn on_pass(mut self, pass: PassKind) -> Self {
        debug_assert!(
            matches!(pass, PassKind::Overlay | PassKind::DebugUi),
            "text draws onto the swapchain image, not in the {} pass",
            pass.name()
        );
        self.pass = pass;
        self
    }

    /// Replace everything the batch draws.
    pub fn set_text(&mut self, items: Vec<TextItem>) -> RendererResult<()> {
        if let Some(viewport) = self.viewport {
            self.geometry = layout_text(&self.font, &items, viewport)?;
            self.dirty.mark_all();
        }
        self.items = items;
        Ok(())
    }

    /// Remove every item.
    pub fn clear(&mut self) {
        self.items.clear();
        self.geometry = TextGeometry::default();
        self.dirty.mark_all();
    }

    pub fn quad_count(&self) -> usize {
        self.geometry.quad_count()
    }

    pub fn retired_buffers(&self) -> usize {
        self.retired.len()
    }
}

impl RenderPipeline for TextBatch {
    fn name(&self) -> &str {
        "text"
    }

    fn pass(&self) -> PassKind {
        self.pass
    }

    fn allocate(&mut self, targets: RenderTargetLayout) -> RendererResult<()> {
        if self.pipeline.is_some() && self.targets == Some(targets) {
            return Ok(());
        }
        self.pipeline = Some(build_pipeline(
            self.upload.device(),
            &self.strategy,
            &self.layout,
            targets,
        )?);
        self.targets = Some(targets);
        debug!("Text pipeline allocated for {:?}", targets.color_format);
        Ok(())
    }

    fn update(&mut self, slot: usize) -> RendererResult<()> {
        let released = self.retired.collect(slot);
        if !released.is_empty() {
            trace!("Releasing {} retired text buffer(s)", released.len());
        }
        Ok(())
    }

    fn record_transfers(&mut self, cmd: &CommandBuffer, slot: usize) -> RendererResult<bool> {
        if !self.dirty.take(slot) {
            return Ok(false);
        }
        let buffers = &mut self.slots[slot];
        let grown_vertices = buffers.vertices.write(&self.geometry.vertices)?;
        let grown_indices = buffers.indices.write(&self.geometry.indices)?;
        for orphan in grown_vertices.into_iter().chain(grown_indices) {
            for buffer in orphan.into_buffers() {
                self.retired.push(buffer, slot);
            }
        }
        buffers.index_count = self.geometry.indices.len() as u32;

        let copied_vertices = buffers.vertices.record_upload(cmd);
        let copied_indices = buffers.indices.record_upload(cmd);
        Ok(copied_vertices || copied_indices)
    }

    fn record(&self, cmd: &CommandBuffer, slot: usize, extent: vk::Extent2D) {
        let buffers = &self.slots[slot];
        let Some(pipeline) = &self.pipeline else {
            return;
        };
        if buffers.index_count == 0 {
            return;
        }
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
        cmd.set_full_viewport(extent);
        cmd.bind_vertex_buffer(buffers.vertices.handle());
        cmd.bind_index_buffer(buffers.indices.handle());
        cmd.bind_descriptor_set(vk::PipelineBindPoint::GRAPHICS, self.layout.handle(), self.sets[slot]);
        cmd.draw_indexed(buffers.index_count, 1);
    }

    fn resize(&mut self, extent: vk::Extent2D) {
        self.viewport = Some(extent);
        match layout_text(&self.font, &self.items, extent) {
            Ok(geometry) => {
                self.geometry = geometry;
                self.dirty.mark_all();
            }
            Err(e) => warn!("Text layout failed after resize: {}", e),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWPORT: vk::Extent2D = vk::Extent2D {
        width: 200,
        height: 100,
    };

    fn font() -> FontAtlas {
        // ' ' through '_' in an 8x8 grid of 10x20 cells.
        FontAtlas::grid(' ', 8, 8, 10.0, 20.0).unwrap()
    }

    #[test]
    fn test_to_ndc_corners() {
        assert_eq!(to_ndc(Vec2::ZERO, VIEWPORT), Vec2::new(-1.0, -1.0));
        assert_eq!(to_ndc(Vec2::new(200.0, 100.0), VIEWPORT), Vec2::ONE);
        assert_eq!(to_ndc(Vec2::new(100.0, 50.0), VIEWPORT), Vec2::ZERO);
    }

    #[test]
    fn test_one_quad_per_visible_glyph() {
        let geometry = layout_text(&font(), &[TextItem::new("AB", Vec2::new(0.0, 20.0))], VIEWPORT).unwrap();
        assert_eq!(geometry.quad_count(), 2);
        assert_eq!(geometry.vertices.len(), 8);
        assert_eq!(geometry.indices, [0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4]);

        // Second glyph starts one advance to the right.
        let first = geometry.vertices[0].position;
        let second = geometry.vertices[4].position;
        assert!((second.x - first.x - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_grid_space_is_a_full_cell() {
        // Grid cells are never blank, so ' ' gets a quad like any other glyph.
        let geometry = layout_text(&font(), &[TextItem::new("A B", Vec2::ZERO)], VIEWPORT).unwrap();
        assert_eq!(geometry.quad_count(), 3);
    }

    #[test]
    fn test_newline_moves_down_one_line() {
        let geometry = layout_text(&font(), &[TextItem::new("A\nA", Vec2::new(0.0, 20.0))], VIEWPORT).unwrap();
        assert_eq!(geometry.quad_count(), 2);
        let first = geometry.vertices[0].position;
        let second = geometry.vertices[4].position;
        assert_eq!(first.x, second.x);
        // 20px line height over a 100px viewport is 0.4 in NDC.
        assert!((second.y - first.y - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_characters_are_skipped() {
        let geometry = layout_text(&font(), &[TextItem::new("a\u{1F600}A", Vec2::ZERO)], VIEWPORT).unwrap();
        // Lowercase letters are outside the 64-cell grid starting at ' '.
        assert_eq!(geometry.quad_count(), 1);
    }

    #[test]
    fn test_color_and_scale_carried_to_vertices() {
        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
        let item = TextItem::new("A", Vec2::ZERO).scale(2.0).color(red);
        let geometry = layout_text(&font(), &[item], VIEWPORT).unwrap();
        assert!(geometry.vertices.iter().all(|v| v.color == red));
        // 10px cell at scale 2 spans 20px = 0.2 NDC horizontally.
        let width = geometry.vertices[1].position.x - geometry.vertices[0].position.x;
        assert!((width - 0.2).abs() < 1e-6);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "text batch overflow"))]
    fn test_capacity_exceeded() {
        let text = "A".repeat(MAX_TEXT_CHARS + 1);
        let err = layout_text(&font(), &[TextItem::new(text, Vec2::ZERO)], VIEWPORT).unwrap_err();
        assert!(matches!(
            err,
            RendererError::TextCapacityExceeded {
                requested,
                capacity: MAX_TEXT_CHARS,
            } if requested == MAX_TEXT_CHARS + 1
        ));
    }

    #[test]
    fn test_exactly_at_capacity_is_accepted() {
        let text = "A".repeat(MAX_TEXT_CHARS);
        let geometry = layout_text(&font(), &[TextItem::new(text, Vec2::ZERO)], VIEWPORT).unwrap();
        assert_eq!(geometry.quad_count(), MAX_TEXT_CHARS);
    }
}
