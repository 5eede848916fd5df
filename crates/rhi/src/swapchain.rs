//! Swapchain creation, acquisition and presentation.
//!
//! The swapchain is rebuilt wholesale: [`Swapchain::recreate`] waits for the
//! device to go idle, builds a new chain from the old handle and only then
//! releases the previous images and views. Per-image arrays always have the
//! same length as the image list.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// What the surface supports for a given physical device.
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    /// Extent and image count limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Query surface support for `physical_device`.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, min images {}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Outcome of an acquire. `OutOfDate` means nothing was acquired and the
/// swapchain must be rebuilt before the frame can continue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireResult {
    /// An image is ready once the acquire semaphore signals
    Acquired {
        /// Index of the acquired image
        image_index: u32,
        /// The image is usable but the swapchain should be rebuilt
        suboptimal: bool,
    },
    /// Nothing was acquired
    OutOfDate,
}

/// Result of presenting an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentResult {
    /// Presented cleanly
    Presented,
    /// Presented, but the swapchain no longer matches the surface
    Suboptimal,
    /// Not presented; the swapchain must be rebuilt
    OutOfDate,
}

impl PresentResult {
    /// Anything but a clean present calls for a rebuild.
    #[inline]
    pub fn needs_recreate(self) -> bool {
        self != PresentResult::Presented
    }
}

/// Swapchain with one view per image.
///
/// Rebuilt in place by [`recreate`](Self::recreate) when the surface changes.
pub struct Swapchain {
    device: Arc<Device>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    preferred_present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create the swapchain for `surface`, falling back to FIFO when the
    /// preferred present mode is unsupported.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> RhiResult<Self> {
        let mut swapchain = Self {
            loader: ash::khr::swapchain::Device::new(instance.handle(), device.handle()),
            surface_loader: instance.surface_loader(),
            device,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent,
            present_mode: vk::PresentModeKHR::FIFO,
            preferred_present_mode,
        };
        swapchain.build(extent)?;
        Ok(swapchain)
    }

    /// Rebuild every image and view for `extent`.
    pub fn recreate(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        self.device.wait_idle()?;
        info!(
            "Recreating swapchain: {}x{} -> {}x{}",
            self.extent.width, self.extent.height, extent.width, extent.height
        );
        self.build(extent)
    }

    fn build(&mut self, requested: vk::Extent2D) -> RhiResult<()> {
        let support = SwapchainSupport::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )?;
        if !support.is_adequate() {
            return Err(RhiError::Swapchain(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes, self.preferred_present_mode);
        let extent = choose_extent(&support.capabilities, requested);
        let image_count = determine_image_count(&support.capabilities);

        let families = self.device.queue_families();
        let family_indices: Vec<u32> = families.unique_families();
        let sharing_mode = if family_indices.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let shared_families: &[u32] = if family_indices.len() > 1 {
            &family_indices
        } else {
            &[]
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };
        let images = match unsafe { self.loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };
        let image_views = match create_image_views(&self.device, &images, surface_format.format) {
            Ok(views) => views,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        self.destroy_resources();
        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;
        self.format = surface_format.format;
        self.extent = extent;
        self.present_mode = present_mode;

        info!(
            "Swapchain ready: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            self.format,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    /// Acquire the next image, signaling `signal` when it is ready.
    ///
    /// `OUT_OF_DATE` is returned as [`AcquireResult::OutOfDate`] rather than an error.
    pub fn acquire_next_image(
        &self,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireResult> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, nanos, signal, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireResult::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Acquire reported an out-of-date swapchain");
                Ok(AcquireResult::OutOfDate)
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                Err(RhiError::FenceTimeout(timeout.as_millis() as u64))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queue `image_index` for presentation after `wait` is signaled.
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> RhiResult<PresentResult> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.device.present(&self.loader, &present_info)? {
            Ok(false) => Ok(PresentResult::Presented),
            Ok(true) => Ok(PresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the raw Vulkan swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Image extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Present mode in use.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Swapchain image at `index`.
    pub fn image(&self, index: u32) -> Option<vk::Image> {
        self.images.get(index as usize).copied()
    }

    /// View of swapchain image at `index`.
    pub fn image_view(&self, index: u32) -> Option<vk::ImageView> {
        self.image_views.get(index as usize).copied()
    }

    fn destroy_resources(&mut self) {
        for &view in &self.image_views {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
        self.image_views.clear();
        self.images.clear();

        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_resources();
        info!(
            "Swapchain destroyed (was {}x{})",
            self.extent.width, self.extent.height
        );
    }
}

/// Prefer B8G8R8A8_SRGB / SRGB_NONLINEAR, then B8G8R8A8_UNORM, then whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let srgb_nonlinear = |format: vk::Format| {
        formats
            .iter()
            .find(|f| f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .copied()
    };

    if let Some(format) = srgb_nonlinear(vk::Format::B8G8R8A8_SRGB) {
        return Ok(format);
    }
    if let Some(format) = srgb_nonlinear(vk::Format::B8G8R8A8_UNORM) {
        warn!("Falling back to B8G8R8A8_UNORM surface format");
        return Ok(format);
    }

    let first = formats
        .first()
        .copied()
        .ok_or_else(|| RhiError::Swapchain("no surface formats available".to_string()))?;
    warn!("Using first available surface format {:?}", first.format);
    Ok(first)
}

/// `preferred` when available, otherwise FIFO (always supported).
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        debug!("{:?} unavailable, using FIFO", preferred);
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or `requested` clamped to its limits when the
/// surface leaves it to the application.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One above the minimum, capped by the maximum when the surface has one.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(e.into());
            }
        }
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_fallbacks() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );

        let formats = [surface_format(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_choose_surface_format_empty_is_error() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RhiError::Swapchain(_))
        ));
    }

    #[test]
    fn test_choose_present_mode_honours_preference() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_choose_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let clamp = |width, height| {
            let e = choose_extent(&capabilities, vk::Extent2D { width, height });
            (e.width, e.height)
        };
        assert_eq!(clamp(3000, 3000), (2000, 2000));
        assert_eq!(clamp(50, 50), (100, 100));
        assert_eq!(clamp(400, 300), (400, 300));
    }

    #[test]
    fn test_determine_image_count() {
        let count = |min, max| {
            determine_image_count(&vk::SurfaceCapabilitiesKHR {
                min_image_count: min,
                max_image_count: max,
                ..Default::default()
            })
        };
        assert_eq!(count(2, 3), 3);
        assert_eq!(count(2, 2), 2);
        assert_eq!(count(2, 0), 3);
    }

    #[test]
    fn test_present_result_needs_recreate() {
        assert!(!PresentResult::Presented.needs_recreate());
        assert!(PresentResult::Suboptimal.needs_recreate());
        assert!(PresentResult::OutOfDate.needs_recreate());
    }

    #[test]
    fn test_swapchain_support_is_adequate() {
        let support = SwapchainSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![],
        };
        assert!(!support.is_adequate());
    }
}
