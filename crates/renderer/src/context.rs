//! Process-wide GPU context.
//!
//! One [`DeviceContext`] owns the instance, the optional presentation surface,
//! the logical device and the shared upload context. Every other component
//! holds an `Arc<Device>` or borrows the context; none of them duplicates
//! handles. The context must be dropped after everything created from it.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use ember_core::config::{PresentModePreference, RenderConfig};
use ember_platform::{Surface, Window};
use ember_rhi::device::Device;
use ember_rhi::instance::{Instance, InstanceDesc};
use ember_rhi::physical_device::{PresentTarget, select_physical_device};
use ember_rhi::upload::UploadContext;

use crate::error::RendererResult;

const APP_NAME: &str = "ember";

/// Vulkan present mode for a config preference.
pub fn present_mode_for(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// # Destruction order
///
/// 1. upload context (command pool, fence)
/// 2. device (allocator, then `vkDestroyDevice`)
/// 3. surface
/// 4. instance
///
/// The device is only destroyed when the last `Arc<Device>` goes away, so
/// callers must drop their GPU objects before the context.
pub struct DeviceContext {
    upload: ManuallyDrop<Arc<UploadContext>>,
    device: ManuallyDrop<Arc<Device>>,
    surface: ManuallyDrop<Option<Surface>>,
    instance: ManuallyDrop<Instance>,
}

impl DeviceContext {
    /// Context presenting to `window`.
    pub fn new(window: &Window, config: &RenderConfig) -> RendererResult<Self> {
        let extensions = window.required_extensions()?;
        let instance = Instance::new(&InstanceDesc {
            app_name: APP_NAME,
            validation: config.validation,
            surface_extensions: &extensions,
        })?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device = select_physical_device(
            instance.handle(),
            Some(PresentTarget {
                surface: surface.handle(),
                loader: surface.loader(),
            }),
        )?;
        Self::finish(instance, Some(surface), &physical_device, config)
    }

    /// Context without a surface, for uploads and compute work.
    pub fn headless(config: &RenderConfig) -> RendererResult<Self> {
        let instance = Instance::new(&InstanceDesc {
            app_name: APP_NAME,
            validation: config.validation,
            surface_extensions: &[],
        })?;
        let physical_device = select_physical_device(instance.handle(), None)?;
        Self::finish(instance, None, &physical_device, config)
    }

    fn finish(
        instance: Instance,
        surface: Option<Surface>,
        physical_device: &ember_rhi::physical_device::PhysicalDeviceInfo,
        config: &RenderConfig,
    ) -> RendererResult<Self> {
        let device = Device::new(&instance, physical_device)?;
        let upload = Arc::new(UploadContext::new(device.clone(), config.fence_timeout())?);

        info!(
            "Device context ready on {} ({}, presentation: {})",
            physical_device.device_name(),
            physical_device.device_type_name(),
            if surface.is_some() { "yes" } else { "headless" }
        );

        Ok(Self {
            upload: ManuallyDrop::new(upload),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Shared one-shot upload context.
    #[inline]
    pub fn upload(&self) -> &Arc<UploadContext> {
        &self.upload
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Window surface; `None` for headless contexts.
    #[inline]
    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn wait_idle(&self) -> RendererResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("wait_idle failed during context teardown: {}", e);
        }
        unsafe {
            ManuallyDrop::drop(&mut self.upload);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }
        info!("Device context destroyed");
    }
}
