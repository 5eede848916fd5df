//! Host to device transfers through staging buffers.
//!
//! Device-local memory is never written from the CPU. Data is copied into a
//! host-visible staging buffer and moved by a one-shot command buffer on the
//! graphics queue (which is transfer capable). The CPU waits on a fence before
//! the staging buffer is released.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, trace};

use crate::barrier::{ImageTransition, record_transitions};
use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::Image;
use crate::sync::Fence;

/// Synchronous one-shot command submission for uploads.
///
/// Each submission waits on the fence, bounded by `timeout`.
pub struct UploadContext {
    device: Arc<Device>,
    pool: CommandPool,
    fence: Fence,
    timeout: Duration,
}

impl UploadContext {
    /// Create the transient pool and fence.
    pub fn new(device: Arc<Device>, timeout: Duration) -> RhiResult<Self> {
        let pool = CommandPool::new_transient(device.clone(), device.graphics_family())?;
        let fence = Fence::new(device.clone(), false)?;
        Ok(Self {
            device,
            pool,
            fence,
            timeout,
        })
    }

    /// Device the uploads run on.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Record with `record`, submit, and block until the GPU has finished.
    pub fn one_shot<R>(&self, record: impl FnOnce(&CommandBuffer) -> R) -> RhiResult<R> {
        let cmd = self.pool.allocate_one()?;
        cmd.begin()?;
        let output = record(&cmd);
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        let waited = unsafe { self.device.submit(&[submit], self.fence.handle()) }
            .and_then(|()| self.fence.wait(self.timeout));

        self.pool.free(cmd);
        waited?;
        self.fence.reset()?;
        trace!("One-shot submission complete");
        Ok(output)
    }

    /// Copy `data` into the start of a device-local buffer.
    pub fn upload_buffer(&self, dst: &Buffer, data: &[u8]) -> RhiResult<()> {
        if data.len() as vk::DeviceSize > dst.size() {
            return Err(RhiError::InvalidArgument(format!(
                "{} bytes do not fit a {} buffer of {} bytes",
                data.len(),
                dst.usage().name(),
                dst.size()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, data)?;
        self.one_shot(|cmd| {
            cmd.copy_buffer(staging.handle(), dst.handle(), data.len() as vk::DeviceSize)
        })?;
        debug!(
            "Uploaded {} bytes into {} buffer",
            data.len(),
            dst.usage().name()
        );
        Ok(())
    }

    /// Device-local buffer of exactly `data.len()` bytes filled with `data`.
    pub fn create_device_local(&self, usage: BufferUsage, data: &[u8]) -> RhiResult<Buffer> {
        let buffer = Buffer::new(self.device.clone(), usage, data.len() as vk::DeviceSize)?;
        self.upload_buffer(&buffer, data)?;
        Ok(buffer)
    }

    /// Copy the first `len` bytes of `src` back to the host.
    pub fn read_buffer(&self, src: &Buffer, len: usize) -> RhiResult<Vec<u8>> {
        if len as vk::DeviceSize > src.size() {
            return Err(RhiError::InvalidArgument(format!(
                "cannot read {} bytes from a buffer of {} bytes",
                len,
                src.size()
            )));
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let readback = Buffer::new(
            self.device.clone(),
            BufferUsage::Readback,
            len as vk::DeviceSize,
        )?;
        self.one_shot(|cmd| cmd.copy_buffer(src.handle(), readback.handle(), len as vk::DeviceSize))?;
        readback.read_data(0, len)
    }

    /// Fill mip 0 of every layer from `data` (layers packed back to back), build
    /// the remaining mips by blitting, and leave the image shader-readable.
    pub fn upload_image(&self, image: &Image, data: &[u8]) -> RhiResult<()> {
        let extent = image.extent();
        let layer_size = extent.width as usize * extent.height as usize * 4;
        let layers = image.layer_count();
        if data.len() != layer_size * layers as usize {
            return Err(RhiError::InvalidArgument(format!(
                "expected {} bytes for {} layer(s) of {}x{} RGBA8, got {}",
                layer_size * layers as usize,
                layers,
                extent.width,
                extent.height,
                data.len()
            )));
        }

        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, data)?;
        let regions: Vec<vk::BufferImageCopy> = (0..layers)
            .map(|layer| {
                vk::BufferImageCopy::default()
                    .buffer_offset(layer as vk::DeviceSize * layer_size as vk::DeviceSize)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(0)
                            .base_array_layer(layer)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    })
            })
            .collect();

        self.one_shot(|cmd| {
            ImageTransition::new(
                image.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )
            .mips(0, image.mip_levels())
            .layers(layers)
            .record(cmd);
            cmd.copy_buffer_to_image(staging.handle(), image.handle(), &regions);
            record_mip_chain(cmd, image);
        })?;

        debug!(
            "Uploaded {}x{} image ({} layer(s), {} mips)",
            extent.width,
            extent.height,
            layers,
            image.mip_levels()
        );
        Ok(())
    }
}

fn half(extent: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: (extent.width / 2).max(1),
        height: (extent.height / 2).max(1),
    }
}

/// Every mip is in TRANSFER_DST on entry and SHADER_READ_ONLY on exit.
fn record_mip_chain(cmd: &CommandBuffer, image: &Image) {
    let layers = image.layer_count();
    let mut extent = image.extent();

    for mip in 1..image.mip_levels() {
        let next = half(extent);
        ImageTransition::new(
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )
        .mips(mip - 1, 1)
        .layers(layers)
        .record(cmd);

        cmd.blit_image(
            image.handle(),
            extent,
            mip - 1,
            image.handle(),
            next,
            mip,
            layers,
        );

        ImageTransition::new(
            image.handle(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .mips(mip - 1, 1)
        .layers(layers)
        .record(cmd);

        extent = next;
    }

    let last = image.mip_levels() - 1;
    record_transitions(
        cmd,
        &[ImageTransition::new(
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .mips(last, 1)
        .layers(layers)],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_extent_never_reaches_zero() {
        let extent = half(vk::Extent2D {
            width: 5,
            height: 1,
        });
        assert_eq!((extent.width, extent.height), (2, 1));
        let extent = half(vk::Extent2D {
            width: 1,
            height: 1,
        });
        assert_eq!((extent.width, extent.height), (1, 1));
    }
}
