//! Logical device, queues, memory allocator and the queue submission lock.
//!
//! Every component shares the device through `Arc<Device>`; none of them keep
//! their own copies of queue or allocator handles.
//!
//! All work is submitted to a single graphics queue that also presents. Any
//! subsystem that touches that queue (including third-party overlay libraries)
//! must hold [`Device::queue_lock`] for the duration of the call; the helpers
//! [`Device::submit`], [`Device::present`] and [`Device::wait_idle`] do so.

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, clamp_sample_count};

const SWAPCHAIN_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Logical device with its queues and memory allocator.
///
/// Shared through `Arc` by every object that owns Vulkan handles, so the
/// device is destroyed last. Queue access is serialized through an internal
/// lock because the graphics and present queues may be the same queue.
pub struct Device {
    device: ash::Device,
    physical_device: PhysicalDeviceInfo,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: Option<vk::Queue>,
    queue_lock: Mutex<()>,
}

impl Device {
    /// Create the logical device, its queues and the gpu-allocator instance.
    ///
    /// Swapchain support is enabled only when the physical device has a
    /// present-capable family.
    pub fn new(instance: &Instance, physical_device: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let families = physical_device.queue_families;
        let graphics_family = families.graphics.ok_or(RhiError::NoSuitableGpu)?;

        let queue_priorities = [1.0f32];
        let unique_families = families.unique_families();
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let extension_names: Vec<*const std::ffi::c_char> = if families.present.is_some() {
            SWAPCHAIN_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect()
        } else {
            Vec::new()
        };

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device.device, &create_info, None)?
        };

        info!(
            "Logical device created on '{}' ({} queue family/families)",
            physical_device.device_name(),
            unique_families.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = families
            .present
            .map(|family| unsafe { device.get_device_queue(family, 0) });
        debug!(
            "Queues: graphics family {}, present family {:?}",
            graphics_family, families.present
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        debug!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device.clone(),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_lock: Mutex::new(()),
        }))
    }

    /// Get a reference to the ash device.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Get the raw physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device.device
    }

    /// Properties and features of the physical device.
    #[inline]
    pub fn info(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Queue family indices in use.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.physical_device.queue_families
    }

    /// Graphics queue family index.
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        // Device::new refuses to build without a graphics family.
        self.physical_device.queue_families.graphics.unwrap_or_default()
    }

    /// Get the graphics queue handle. Submit through [`submit`](Self::submit).
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue handle, if the device can present.
    #[inline]
    pub fn present_queue(&self) -> Option<vk::Queue> {
        self.present_queue
    }

    /// Lock the memory allocator.
    pub fn lock_allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::LockPoisoned("allocator"))
    }

    /// Exclusive access to the shared graphics/present queue.
    pub fn queue_lock(&self) -> RhiResult<MutexGuard<'_, ()>> {
        self.queue_lock
            .lock()
            .map_err(|_| RhiError::LockPoisoned("queue"))
    }

    /// Largest usable MSAA sample count not above `requested`.
    pub fn sample_count(&self, requested: u32) -> vk::SampleCountFlags {
        clamp_sample_count(self.physical_device.supported_sample_counts(), requested)
    }

    /// Device limit for sampler anisotropy.
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.physical_device.properties.limits.max_sampler_anisotropy
    }

    /// Submit to the graphics queue while holding the queue lock.
    ///
    /// # Safety
    ///
    /// Every handle referenced by `submits` and `fence` must be valid and the
    /// command buffers must be in the executable state.
    pub unsafe fn submit(&self, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> RhiResult<()> {
        let _guard = self.queue_lock()?;
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submits, fence)?;
        }
        Ok(())
    }

    /// Present while holding the queue lock. Returns the raw Vulkan outcome so
    /// callers can tell suboptimal and out-of-date apart from real failures.
    pub fn present(
        &self,
        loader: &ash::khr::swapchain::Device,
        info: &vk::PresentInfoKHR<'_>,
    ) -> RhiResult<Result<bool, vk::Result>> {
        let queue = self
            .present_queue
            .ok_or_else(|| RhiError::Swapchain("device was created without a present queue".to_string()))?;
        let _guard = self.queue_lock()?;
        Ok(unsafe { loader.queue_present(queue, info) })
    }

    /// Block until every queue is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        let _guard = self.queue_lock()?;
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device, so it
            // has to go before the device itself.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// ash::Device is Send + Sync, queue handles are plain values, and the
// allocator and queue are only reached through their mutexes.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_extension_listed() {
        assert!(SWAPCHAIN_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
