//! Per-slot and per-image synchronization objects and command buffers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use ember_rhi::command::{CommandBuffer, CommandPool};
use ember_rhi::device::Device;
use ember_rhi::sync::{Fence, Semaphore};

use crate::error::RendererResult;
use crate::pass::{ChainSemaphore, PassKind, SemaphoreChain};

/// Everything one frame slot records into and synchronizes with.
///
/// The CPU touches `commands` only after `in_flight` has been waited on.
pub struct FrameResources {
    // Command buffers are freed with their pool; keep them first.
    commands: Vec<CommandBuffer>,
    pool: CommandPool,
    image_available: Semaphore,
    pass_complete: Vec<Semaphore>,
    in_flight: Fence,
}

impl FrameResources {
    pub fn new(device: &Arc<Device>) -> RendererResult<Self> {
        let pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let commands = pool.allocate(PassKind::COUNT as u32)?;
        Ok(Self {
            commands,
            pool,
            image_available: Semaphore::new(device.clone())?,
            pass_complete: Semaphore::many(device, SemaphoreChain::INTERMEDIATE_COUNT)?,
            // Signaled so the first wait on a fresh slot returns at once.
            in_flight: Fence::new(device.clone(), true)?,
        })
    }

    /// One set per frame slot.
    pub fn for_slots(device: &Arc<Device>, count: usize) -> RendererResult<Vec<Self>> {
        let frames = (0..count)
            .map(|_| Self::new(device))
            .collect::<RendererResult<Vec<_>>>()?;
        debug!("Created resources for {} frame slot(s)", frames.len());
        Ok(frames)
    }

    /// Command buffer for `pass`.
    #[inline]
    pub fn command(&self, pass: PassKind) -> &CommandBuffer {
        &self.commands[pass.index()]
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    /// Fence signaled by the slot's last submission.
    #[inline]
    pub fn fence(&self) -> &Fence {
        &self.in_flight
    }

    #[inline]
    pub fn pool(&self) -> &CommandPool {
        &self.pool
    }

    /// Resolve a chain role to a handle. `render_finished` belongs to the
    /// acquired image.
    pub fn semaphore(&self, role: ChainSemaphore, render_finished: vk::Semaphore) -> vk::Semaphore {
        match role {
            ChainSemaphore::ImageAvailable => self.image_available.handle(),
            ChainSemaphore::PassComplete(i) => self.pass_complete[i].handle(),
            ChainSemaphore::RenderFinished => render_finished,
        }
    }
}

/// Semaphores owned by one swapchain image; rebuilt with the swapchain.
pub struct ImageSync {
    render_finished: Semaphore,
}

impl ImageSync {
    /// One set per swapchain image.
    pub fn for_images(device: &Arc<Device>, image_count: usize) -> RendererResult<Vec<Self>> {
        let sync = Semaphore::many(device, image_count)?
            .into_iter()
            .map(|render_finished| Self { render_finished })
            .collect();
        Ok(sync)
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }
}
