//! Semaphores and fences.
//!
//! Semaphores order work between queue submissions and are never waited on by
//! the CPU. Fences are the only CPU-side wait; a wait that exceeds its bound is
//! reported as [`RhiError::FenceTimeout`] and treated by callers as device loss.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::trace;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// GPU-GPU synchronization primitive.
///
/// Signaled by one queue submission and waited on by another.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create an unsignaled binary semaphore.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        trace!("Created semaphore {:?}", semaphore);
        Ok(Self { device, semaphore })
    }

    /// Create `count` semaphores.
    pub fn many(device: &Arc<Device>, count: usize) -> RhiResult<Vec<Self>> {
        (0..count).map(|_| Self::new(device.clone())).collect()
    }

    /// Get the raw Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        trace!("Destroyed semaphore {:?}", self.semaphore);
    }
}

/// GPU-CPU synchronization primitive.
///
/// Signaled by the GPU when a submission completes; the CPU waits on it
/// before reusing anything that submission referenced.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// A fence created signaled lets the first wait on a fresh frame slot return at once.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        trace!("Created fence {:?} (signaled: {})", fence, signaled);
        Ok(Self { device, fence })
    }

    /// Get the raw Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Block until signaled or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> RhiResult<()> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let result = unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, nanos)
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::FenceTimeout(timeout.as_millis() as u64)),
            Err(e) => Err(e.into()),
        }
    }

    /// Return the fence to the unsignaled state.
    ///
    /// Only call this once work that will signal it is certain to be submitted;
    /// otherwise the next wait never returns.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        trace!("Destroyed fence {:?}", self.fence);
    }
}
