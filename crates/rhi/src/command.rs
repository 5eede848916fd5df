//! Command pools and command buffer recording.
//!
//! [`CommandBuffer`] is a recording handle; the pool that allocated it owns the
//! underlying memory and frees it on drop.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// RAII wrapper for a Vulkan command pool.
///
/// Command buffers allocated from the pool are freed with it.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Pool whose buffers are reset individually and re-recorded every frame.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )
    }

    /// Pool for short-lived one-shot buffers (uploads, readbacks).
    pub fn new_transient(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
        )
    }

    fn with_flags(
        device: Arc<Device>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(flags);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!(
            "Command pool created for queue family {} ({:?})",
            queue_family_index, flags
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    /// Get the raw Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Queue family the pool's buffers are submitted to.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocate `count` primary command buffers.
    pub fn allocate(&self, count: u32) -> RhiResult<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(buffers
            .into_iter()
            .map(|buffer| CommandBuffer {
                device: self.device.clone(),
                buffer,
            })
            .collect())
    }

    /// Allocate a single primary command buffer.
    pub fn allocate_one(&self) -> RhiResult<CommandBuffer> {
        self.allocate(1)?
            .pop()
            .ok_or_else(|| RhiError::InvalidArgument("driver returned no command buffer".to_string()))
    }

    /// Return `buffer` to the pool. It must not be pending execution.
    pub fn free(&self, buffer: CommandBuffer) {
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, &[buffer.buffer]);
        }
    }

    /// Reset every buffer allocated from the pool.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Primary command buffer.
///
/// Recording methods are thin wrappers over the `cmd_*` calls; the buffer
/// must be between [`begin`](Self::begin) and [`end`](Self::end).
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Get the raw Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Device the buffer was allocated on.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    // =========================================================================
    // Recording control
    // =========================================================================

    /// Reset and begin a one-time-submit recording.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    /// Finish recording; the buffer becomes executable.
    pub fn end(&self) -> RhiResult<()> {
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        Ok(())
    }

    // =========================================================================
    // Dynamic rendering
    // =========================================================================

    /// Begin a dynamic rendering scope.
    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo<'_>) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    /// End the current dynamic rendering scope.
    pub fn end_rendering(&self) {
        unsafe { self.device.handle().cmd_end_rendering(self.buffer) };
    }

    /// Viewport and scissor covering the whole of `extent`.
    pub fn set_full_viewport(&self, extent: vk::Extent2D) {
        let viewport = full_viewport(extent);
        let scissor = full_scissor(extent);
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(&viewport));
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(&scissor));
        }
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Bind a graphics or compute pipeline.
    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
        }
    }

    /// Bind `buffer` at vertex binding 0, offset 0.
    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, 0, &[buffer], &[0]);
        }
    }

    /// Bind `buffer` as a `u32` index buffer.
    pub fn bind_index_buffer(&self, buffer: vk::Buffer) {
        unsafe {
            self.device.handle().cmd_bind_index_buffer(
                self.buffer,
                buffer,
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    /// Bind `set` at set index 0.
    pub fn bind_descriptor_set(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                bind_point,
                layout,
                0,
                &[set],
                &[],
            );
        }
    }

    /// Push `data` at offset 0.
    pub fn push_constants<T: Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &T,
    ) {
        unsafe {
            self.device.handle().cmd_push_constants(
                self.buffer,
                layout,
                stages,
                0,
                bytemuck::bytes_of(data),
            );
        }
    }

    // =========================================================================
    // Draw and dispatch
    // =========================================================================

    /// Draw indexed from the first index and instance.
    pub fn draw_indexed(&self, index_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_draw_indexed(self.buffer, index_count, instance_count, 0, 0, 0);
        }
    }

    /// Draw non-indexed from the first vertex and instance.
    pub fn draw(&self, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_draw(self.buffer, vertex_count, instance_count, 0, 0);
        }
    }

    /// Dispatch compute work groups.
    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        unsafe { self.device.handle().cmd_dispatch(self.buffer, x, y, z) };
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Record a pipeline barrier with no dependency flags.
    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        memory_barriers: &[vk::MemoryBarrier<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                memory_barriers,
                buffer_barriers,
                image_barriers,
            );
        }
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    /// Copy the first `size` bytes of `src` to the start of `dst`.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy::default().size(size);
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, &[region]);
        }
    }

    /// Copy buffer regions into `dst`, which must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    /// Whole-image copy between two images of the same extent and format class.
    pub fn copy_image(&self, src: vk::Image, dst: vk::Image, extent: vk::Extent2D) {
        let layers = color_layers(0);
        let region = vk::ImageCopy::default()
            .src_subresource(layers)
            .dst_subresource(layers)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            self.device.handle().cmd_copy_image(
                self.buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Scaled color blit, used for mip generation and format conversion on present.
    pub fn blit_image(
        &self,
        src: vk::Image,
        src_extent: vk::Extent2D,
        src_mip: u32,
        dst: vk::Image,
        dst_extent: vk::Extent2D,
        dst_mip: u32,
        layer_count: u32,
    ) {
        let corner = |extent: vk::Extent2D| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let region = vk::ImageBlit::default()
            .src_subresource(color_layers(src_mip).layer_count(layer_count))
            .src_offsets([vk::Offset3D::default(), corner(src_extent)])
            .dst_subresource(color_layers(dst_mip).layer_count(layer_count))
            .dst_offsets([vk::Offset3D::default(), corner(dst_extent)]);
        unsafe {
            self.device.handle().cmd_blit_image(
                self.buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }
    }
}

fn color_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(mip_level)
        .base_array_layer(0)
        .layer_count(1)
}

/// Viewport covering `extent` with depth 0..1.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_viewport() {
        let viewport = full_viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.height, 600.0);
        assert_eq!(viewport.min_depth, 0.0);
        assert_eq!(viewport.max_depth, 1.0);
    }

    #[test]
    fn test_full_scissor() {
        let extent = vk::Extent2D {
            width: 400,
            height: 300,
        };
        let scissor = full_scissor(extent);
        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.offset.y, 0);
        assert_eq!(scissor.extent, extent);
    }

    #[test]
    fn test_color_layers() {
        let layers = color_layers(3);
        assert_eq!(layers.mip_level, 3);
        assert_eq!(layers.layer_count, 1);
        assert_eq!(layers.aspect_mask, vk::ImageAspectFlags::COLOR);
    }
}
