//! Frame pacing state machine.
//!
//! [`FramePacer`] owns the frame-slot index and decides, once per iteration,
//! whether a frame is rendered, skipped for swapchain recreation or not
//! attempted at all (minimized window). Everything that touches the GPU sits
//! behind [`FrameBackend`], so the protocol itself has no Vulkan dependency.
//!
//! Per iteration:
//! 1. wait on the slot's fence
//! 2. rebuild the swapchain if a resize is pending and skip the frame
//! 3. acquire; a stale swapchain is rebuilt and the frame skipped
//! 4. reset the fence, record every pass, submit the chain
//! 5. present; stale/suboptimal or a late resize rebuilds after presenting
//! 6. advance the slot
//!
//! A skipped iteration submits nothing, leaves the fence signaled and does not
//! advance the slot. Once a close is requested every iteration returns
//! [`FrameOutcome::Closed`] without touching the backend.

use ash::vk;
use tracing::{debug, trace};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::RendererResult;

/// Phase of the frame state machine; `Idle` between iterations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    AcquireImage,
    RecordPasses,
    Submit,
    Present,
    RecreateSwapchain,
}

/// Result of acquiring a swapchain image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32 },
    /// Out of date; nothing was acquired.
    Stale,
}

/// Result of presenting a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented (or not) but the swapchain must be rebuilt.
    Stale,
}

/// Why a frame was dropped after its fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Resized,
    StaleSwapchain,
}

/// What one call to [`FramePacer::run_iteration`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { slot: usize, image_index: u32 },
    Skipped(SkipReason),
    /// Zero-sized framebuffer; nothing was waited on or submitted.
    Minimized,
    /// The window asked to close; nothing was waited on or submitted.
    Closed,
}

/// Frame counters since startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub recreated: u64,
    pub minimized: u64,
}

/// GPU side of one frame iteration.
pub trait FrameBackend {
    /// Block until `slot`'s previous submission has finished.
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()>;

    fn acquire(&mut self, slot: usize) -> RendererResult<AcquireOutcome>;

    /// Rebuild the swapchain and everything sized to it. Returns the extent
    /// actually in use afterwards.
    fn recreate(&mut self, extent: vk::Extent2D) -> RendererResult<vk::Extent2D>;

    /// Work is now certain to be submitted; reset the slot's fence.
    fn begin_slot(&mut self, slot: usize) -> RendererResult<()>;

    fn record(&mut self, slot: usize, image_index: u32) -> RendererResult<()>;

    fn submit(&mut self, slot: usize, image_index: u32) -> RendererResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<PresentOutcome>;
}

/// Backend-agnostic frame state machine.
///
/// Owns the frame slot cursor, the tracked extent and pending resizes. The
/// GPU work itself is delegated to a [`FrameBackend`].
#[derive(Debug)]
pub struct FramePacer {
    slot: usize,
    frame_count: u64,
    extent: vk::Extent2D,
    pending_resize: Option<vk::Extent2D>,
    state: FrameState,
    stats: FrameStats,
    closing: bool,
}

fn is_zero(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

impl FramePacer {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            slot: 0,
            frame_count: 0,
            extent,
            pending_resize: None,
            state: FrameState::Idle,
            stats: FrameStats::default(),
            closing: false,
        }
    }

    /// Stop rendering. Irreversible.
    pub fn request_close(&mut self) {
        if !self.closing {
            debug!("Close requested after {} frame(s)", self.frame_count);
        }
        self.closing = true;
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Schedule a rebuild at `extent`. Requesting the extent already in use
    /// cancels any pending request instead.
    pub fn request_resize(&mut self, extent: vk::Extent2D) {
        if extent == self.extent {
            if self.pending_resize.take().is_some() {
                debug!("Resize back to {}x{} cancelled", extent.width, extent.height);
            }
            return;
        }
        debug!("Resize requested: {}x{}", extent.width, extent.height);
        self.pending_resize = Some(extent);
    }

    /// Force a rebuild at the current extent on the next iteration.
    pub fn invalidate(&mut self) {
        self.pending_resize = Some(self.pending_resize.unwrap_or(self.extent));
    }

    /// Run one frame through `backend`.
    ///
    /// The slot advances only after a frame is presented.
    pub fn run_iteration<B: FrameBackend>(&mut self, backend: &mut B) -> RendererResult<FrameOutcome> {
        let slot = self.slot;
        self.state = FrameState::Idle;

        if self.closing {
            return Ok(FrameOutcome::Closed);
        }

        if is_zero(self.pending_resize.unwrap_or(self.extent)) {
            self.stats.minimized += 1;
            return Ok(FrameOutcome::Minimized);
        }

        backend.wait_for_slot(slot)?;

        if let Some(extent) = self.pending_resize.take() {
            self.recreate(backend, extent)?;
            return Ok(self.skip(SkipReason::Resized));
        }

        self.state = FrameState::AcquireImage;
        let image_index = match backend.acquire(slot)? {
            AcquireOutcome::Ready { image_index } => image_index,
            AcquireOutcome::Stale => {
                self.recreate(backend, self.extent)?;
                return Ok(self.skip(SkipReason::StaleSwapchain));
            }
        };

        backend.begin_slot(slot)?;

        self.state = FrameState::RecordPasses;
        backend.record(slot, image_index)?;

        self.state = FrameState::Submit;
        backend.submit(slot, image_index)?;

        self.state = FrameState::Present;
        let presented = backend.present(slot, image_index)?;

        self.slot = (slot + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frame_count += 1;
        self.stats.presented += 1;
        trace!("Frame {} presented (slot {}, image {})", self.frame_count, slot, image_index);

        let late_resize = self.pending_resize.take();
        if presented == PresentOutcome::Stale || late_resize.is_some() {
            let extent = late_resize.unwrap_or(self.extent);
            if !is_zero(extent) {
                self.recreate(backend, extent)?;
            } else {
                self.pending_resize = Some(extent);
            }
        }

        self.state = FrameState::Idle;
        Ok(FrameOutcome::Presented { slot, image_index })
    }

    fn recreate<B: FrameBackend>(&mut self, backend: &mut B, extent: vk::Extent2D) -> RendererResult<()> {
        self.state = FrameState::RecreateSwapchain;
        self.extent = backend.recreate(extent)?;
        self.stats.recreated += 1;
        Ok(())
    }

    fn skip(&mut self, reason: SkipReason) -> FrameOutcome {
        debug!("Frame skipped on slot {}: {:?}", self.slot, reason);
        self.stats.skipped += 1;
        self.state = FrameState::Idle;
        FrameOutcome::Skipped(reason)
    }

    /// Slot the next iteration will use.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Frames presented so far.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Extent the next iteration will rebuild for, if any.
    #[inline]
    pub fn pending_resize(&self) -> Option<vk::Extent2D> {
        self.pending_resize
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }
}
