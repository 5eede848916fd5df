//! Frame loop behaviour against a simulated swapchain.

use ash::vk;

use ember_renderer::frame::{
    AcquireOutcome, FrameBackend, FrameOutcome, FramePacer, PresentOutcome, SkipReason,
};
use ember_renderer::{MAX_FRAMES_IN_FLIGHT, RendererError, RendererResult};

const IMAGE_COUNT: usize = 3;

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

/// Per-image resource; `generation` changes whenever it is rebuilt.
#[derive(Clone, Copy, Debug, PartialEq)]
struct SimImage {
    extent: vk::Extent2D,
    generation: u32,
}

/// Swapchain, fences and queue with the GPU finishing instantly.
struct SimGpu {
    images: Vec<SimImage>,
    generation: u32,
    next_image: u32,
    fence_signaled: [bool; MAX_FRAMES_IN_FLIGHT],
    stale_acquires: usize,
    stale_presents: usize,
    submitted: Vec<(usize, u32)>,
    recorded: Vec<usize>,
    recreations: usize,
}

impl SimGpu {
    fn new(extent: vk::Extent2D) -> Self {
        let mut gpu = Self {
            images: Vec::new(),
            generation: 0,
            next_image: 0,
            fence_signaled: [true; MAX_FRAMES_IN_FLIGHT],
            stale_acquires: 0,
            stale_presents: 0,
            submitted: Vec::new(),
            recorded: Vec::new(),
            recreations: 0,
        };
        gpu.build(extent);
        gpu
    }

    fn build(&mut self, extent: vk::Extent2D) {
        self.generation += 1;
        let generation = self.generation;
        self.images = (0..IMAGE_COUNT).map(|_| SimImage { extent, generation }).collect();
    }
}

impl FrameBackend for SimGpu {
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
        // A fence reset without a following submit never signals again.
        if self.fence_signaled[slot] {
            Ok(())
        } else {
            Err(RendererError::DeviceLost(format!("slot {} fence never signaled", slot)))
        }
    }

    fn acquire(&mut self, _slot: usize) -> RendererResult<AcquireOutcome> {
        if self.stale_acquires > 0 {
            self.stale_acquires -= 1;
            return Ok(AcquireOutcome::Stale);
        }
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % IMAGE_COUNT as u32;
        Ok(AcquireOutcome::Ready { image_index })
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RendererResult<vk::Extent2D> {
        self.recreations += 1;
        self.build(extent);
        Ok(extent)
    }

    fn begin_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.fence_signaled[slot] = false;
        Ok(())
    }

    fn record(&mut self, slot: usize, _image_index: u32) -> RendererResult<()> {
        self.recorded.push(slot);
        Ok(())
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RendererResult<()> {
        self.submitted.push((slot, image_index));
        self.fence_signaled[slot] = true;
        Ok(())
    }

    fn present(&mut self, _slot: usize, _image_index: u32) -> RendererResult<PresentOutcome> {
        if self.stale_presents > 0 {
            self.stale_presents -= 1;
            return Ok(PresentOutcome::Stale);
        }
        Ok(PresentOutcome::Presented)
    }
}

fn presented_slot(outcome: FrameOutcome) -> usize {
    match outcome {
        FrameOutcome::Presented { slot, .. } => slot,
        other => panic!("expected a presented frame, got {:?}", other),
    }
}

#[test]
fn test_five_frames_cycle_slots_without_recreation() {
    let mut pacer = FramePacer::new(extent(800, 600));
    let mut gpu = SimGpu::new(extent(800, 600));

    let slots: Vec<usize> = (0..5)
        .map(|_| presented_slot(pacer.run_iteration(&mut gpu).unwrap()))
        .collect();

    assert_eq!(slots, [0, 1, 0, 1, 0]);
    assert_eq!(gpu.recreations, 0);
    assert_eq!(pacer.stats().recreated, 0);
    assert_eq!(pacer.frame_count(), 5);
    assert_eq!(gpu.submitted.len(), 5);
    assert!(gpu.images.iter().all(|image| image.generation == 1));
}

#[test]
fn test_resize_skips_frame_and_rebuilds_at_new_extent() {
    let mut pacer = FramePacer::new(extent(800, 600));
    let mut gpu = SimGpu::new(extent(800, 600));

    assert_eq!(presented_slot(pacer.run_iteration(&mut gpu).unwrap()), 0);
    let slot_before = pacer.slot();
    let submitted_before = gpu.submitted.len();
    let recorded_before = gpu.recorded.len();

    pacer.request_resize(extent(400, 300));
    let outcome = pacer.run_iteration(&mut gpu).unwrap();

    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::Resized));
    assert_eq!(gpu.submitted.len(), submitted_before);
    assert_eq!(gpu.recorded.len(), recorded_before);
    assert_eq!(pacer.slot(), slot_before);
    assert_eq!(pacer.extent(), extent(400, 300));
    assert_eq!(gpu.images.len(), IMAGE_COUNT);
    assert!(gpu.images.iter().all(|image| image.extent == extent(400, 300)));
    assert!(gpu.images.iter().all(|image| image.generation == 2));

    // The skipped slot renders next, with its fence still usable.
    assert_eq!(presented_slot(pacer.run_iteration(&mut gpu).unwrap()), slot_before);
}

#[test]
fn test_stale_acquire_never_leaves_a_reset_fence() {
    let mut pacer = FramePacer::new(extent(800, 600));
    let mut gpu = SimGpu::new(extent(800, 600));
    gpu.stale_acquires = 2;

    assert_eq!(
        pacer.run_iteration(&mut gpu).unwrap(),
        FrameOutcome::Skipped(SkipReason::StaleSwapchain)
    );
    assert_eq!(
        pacer.run_iteration(&mut gpu).unwrap(),
        FrameOutcome::Skipped(SkipReason::StaleSwapchain)
    );
    assert!(gpu.submitted.is_empty());

    // Would fail with DeviceLost had the skipped iterations reset the fence.
    let slots: Vec<usize> = (0..3)
        .map(|_| presented_slot(pacer.run_iteration(&mut gpu).unwrap()))
        .collect();
    assert_eq!(slots, [0, 1, 0]);
    assert_eq!(gpu.recreations, 2);
}

#[test]
fn test_out_of_date_present_still_advances() {
    let mut pacer = FramePacer::new(extent(800, 600));
    let mut gpu = SimGpu::new(extent(800, 600));
    gpu.stale_presents = 1;

    assert_eq!(presented_slot(pacer.run_iteration(&mut gpu).unwrap()), 0);
    assert_eq!(gpu.recreations, 1);
    assert_eq!(pacer.slot(), 1);
    assert_eq!(presented_slot(pacer.run_iteration(&mut gpu).unwrap()), 1);
}

#[test]
fn test_same_extent_resize_keeps_image_identity() {
    let mut pacer = FramePacer::new(extent(800, 600));
    let mut gpu = SimGpu::new(extent(800, 600));
    let before = gpu.images.clone();

    pacer.request_resize(extent(800, 600));
    presented_slot(pacer.run_iteration(&mut gpu).unwrap());

    assert_eq!(gpu.images, before);
    assert_eq!(gpu.recreations, 0);
}

#[test]
fn test_minimize_and_restore() {
    let mut pacer = FramePacer::new(extent(800, 600));
    let mut gpu = SimGpu::new(extent(800, 600));

    pacer.request_resize(extent(0, 0));
    assert_eq!(pacer.run_iteration(&mut gpu).unwrap(), FrameOutcome::Minimized);
    assert_eq!(pacer.run_iteration(&mut gpu).unwrap(), FrameOutcome::Minimized);
    assert!(gpu.submitted.is_empty());

    // Restored to the original size: nothing to rebuild.
    pacer.request_resize(extent(800, 600));
    assert_eq!(presented_slot(pacer.run_iteration(&mut gpu).unwrap()), 0);
    assert_eq!(gpu.recreations, 0);
    assert_eq!(pacer.stats().minimized, 2);
}
