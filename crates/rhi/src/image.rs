//! Device-local images with a single view.
//!
//! Render targets, filter intermediates and textures all use [`Image`]. The
//! mip count and cubemap flag are fixed at creation.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::barrier::aspect_for_format;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of mip levels in a full chain down to 1x1.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Parameters for [`Image::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    /// Size of mip 0
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Vulkan usage flags
    pub usage: vk::ImageUsageFlags,
    /// Mip count, 1 for no chain
    pub mip_levels: u32,
    /// MSAA sample count
    pub samples: vk::SampleCountFlags,
    /// Six square layers viewed as a cube
    pub cubemap: bool,
}

impl ImageDesc {
    /// Single-sampled, single-mip 2D image.
    pub fn new(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            cubemap: false,
        }
    }

    /// Set the mip count.
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Set the MSAA sample count.
    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Make the image a cubemap.
    pub fn cubemap(mut self, cubemap: bool) -> Self {
        self.cubemap = cubemap;
        self
    }

    /// Array layers: six for cubemaps, otherwise one.
    #[inline]
    pub fn layer_count(&self) -> u32 {
        if self.cubemap { 6 } else { 1 }
    }

    fn validate(&self) -> RhiResult<()> {
        if self.extent.width == 0 || self.extent.height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "image extent must be non-zero, got {}x{}",
                self.extent.width, self.extent.height
            )));
        }
        let max_mips = mip_level_count(self.extent.width, self.extent.height);
        if self.mip_levels == 0 || self.mip_levels > max_mips {
            return Err(RhiError::InvalidArgument(format!(
                "{} mip levels requested, {}x{} allows 1..={}",
                self.mip_levels, self.extent.width, self.extent.height, max_mips
            )));
        }
        if self.cubemap && self.extent.width != self.extent.height {
            return Err(RhiError::InvalidArgument(
                "cubemap faces must be square".to_string(),
            ));
        }
        Ok(())
    }
}

/// Device-local image with a default view over all mips and layers.
///
/// The image starts in `UNDEFINED`; callers track layouts and record the
/// transitions.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    desc: ImageDesc,
}

impl Image {
    /// Create the image, bind gpu-allocator memory and create its view.
    ///
    /// # Errors
    /// Rejects zero extents, mip counts the extent cannot hold and non-square
    /// cubemaps before touching the driver.
    pub fn new(device: Arc<Device>, desc: ImageDesc) -> RhiResult<Self> {
        desc.validate()?;

        let flags = if desc.cubemap {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.layer_count())
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.lock_allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: "image",
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            desc,
        };

        if let Some(allocation) = this.allocation.as_ref() {
            unsafe {
                this.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(if desc.cubemap {
                vk::ImageViewType::CUBE
            } else {
                vk::ImageViewType::TYPE_2D
            })
            .format(desc.format)
            .subresource_range(this.full_range());
        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created image {}x{} {:?} ({} mips, {} layers, {:?})",
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.mip_levels,
            desc.layer_count(),
            desc.samples
        );
        Ok(this)
    }

    /// Subresource range over every mip and layer.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect())
            .base_mip_level(0)
            .level_count(self.desc.mip_levels)
            .base_array_layer(0)
            .layer_count(self.desc.layer_count())
    }

    /// Get the raw Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Default view covering every mip and layer.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Size of mip 0.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Texel format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Number of mip levels.
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    /// Whether the image is a cubemap.
    #[inline]
    pub fn is_cubemap(&self) -> bool {
        self.desc.cubemap
    }

    /// Number of array layers.
    #[inline]
    pub fn layer_count(&self) -> u32 {
        self.desc.layer_count()
    }

    /// Aspect mask derived from the format.
    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_for_format(self.desc.format)
    }

    /// Parameters the image was created with.
    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }
}

/// Extra single-mip view of an [`Image`], for compute passes that read and
/// write individual mip levels.
pub struct ImageView {
    device: Arc<Device>,
    view: vk::ImageView,
}

impl ImageView {
    /// Get the raw Vulkan image view handle.
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
        }
    }
}

impl Image {
    /// 2D view of mip `mip`, layer 0.
    pub fn mip_view(&self, mip: u32) -> RhiResult<ImageView> {
        if mip >= self.desc.mip_levels {
            return Err(RhiError::InvalidArgument(format!(
                "mip {} out of range for image with {} mips",
                mip, self.desc.mip_levels
            )));
        }
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(self.aspect())
                    .base_mip_level(mip)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let view = unsafe { self.device.handle().create_image_view(&view_info, None)? };
        Ok(ImageView {
            device: self.device.clone(),
            view,
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free image allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking image allocation: {}", e),
            }
        }
        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }
        debug!(
            "Destroyed image {}x{} {:?}",
            self.desc.extent.width, self.desc.extent.height, self.desc.format
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 2), 2);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(800, 600), 10);
        assert_eq!(mip_level_count(1024, 1), 11);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_desc_defaults() {
        let desc = ImageDesc::new(
            extent(64, 64),
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED,
        );
        assert_eq!(desc.mip_levels, 1);
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(desc.layer_count(), 1);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_desc_validation() {
        let base = ImageDesc::new(
            extent(64, 32),
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED,
        );
        assert!(base.mip_levels(7).validate().is_ok());
        assert!(base.mip_levels(8).validate().is_err());
        assert!(base.mip_levels(0).validate().is_err());
        assert!(base.cubemap(true).validate().is_err());

        let empty = ImageDesc::new(extent(0, 4), vk::Format::D32_SFLOAT, vk::ImageUsageFlags::SAMPLED);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_cubemap_layers() {
        let desc = ImageDesc::new(
            extent(16, 16),
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED,
        )
        .cubemap(true);
        assert_eq!(desc.layer_count(), 6);
        assert!(desc.validate().is_ok());
    }
}
