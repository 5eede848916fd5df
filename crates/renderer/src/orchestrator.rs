//! Frame orchestration.
//!
//! [`FrameOrchestrator`] owns the swapchain, the per-slot frame resources and
//! render targets, the filter chain and the pipeline registry. Each call to
//! [`FrameOrchestrator::render_frame`] drives one [`FramePacer`] iteration
//! and records the fixed pass order into one command buffer per pass:
//!
//! 1. geometry into the offscreen scene targets
//! 2. deferred lighting (compute)
//! 3. post-process filter chain (compute)
//! 4. scene blit onto the swapchain image, then overlay pipelines
//! 5. debug UI pipelines, then the transition to present
//!
//! Staged buffer uploads of every pipeline are copied at the head of the
//! geometry command buffer, before its rendering scope opens.
//!
//! The five command buffers are submitted together, chained by semaphores.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info};

use ember_core::EngineConfig;
use ember_platform::{Window, WindowStatus};
use ember_rhi::RhiError;
use ember_rhi::barrier::{ImageTransition, record_transitions, transfer_to_vertex_input};
use ember_rhi::command::{CommandBuffer, full_scissor};
use ember_rhi::device::Device;
use ember_rhi::swapchain::{AcquireResult, PresentResult, Swapchain};
use ember_rhi::upload::UploadContext;

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::context::{DeviceContext, present_mode_for};
use crate::error::{RendererError, RendererResult};
use crate::filters::FilterChain;
use crate::frame::{AcquireOutcome, FrameBackend, FrameOutcome, FramePacer, FrameStats, PresentOutcome};
use crate::frame_resources::{FrameResources, ImageSync};
use crate::pass::{PassKind, SemaphoreChain};
use crate::pipeline_slot::{GraphicsPipelineSlot, PipelineStrategy, TextureBinding};
use crate::pipelines::{PassTargets, PipelineHandle, PipelineRegistry};
use crate::targets::{RenderTargets, SCENE_BLIT_LAYOUT, SCENE_PASS_LAYOUT, geometry_layout, overlay_layout};

/// Per-frame application hook.
pub trait Application {
    /// Called once per rendered frame after `frame_index`'s fence has been
    /// waited on and before any command is recorded.
    fn run(&mut self, pipelines: &mut PipelineRegistry, dt: f32, frame_index: usize) -> RendererResult<()>;
}

impl<F> Application for F
where
    F: FnMut(&mut PipelineRegistry, f32, usize) -> RendererResult<()>,
{
    fn run(&mut self, pipelines: &mut PipelineRegistry, dt: f32, frame_index: usize) -> RendererResult<()> {
        self(pipelines, dt, frame_index)
    }
}

/// GPU objects sized to or recorded for the swapchain.
///
/// Fields drop top to bottom: pipelines and per-slot objects go before the
/// swapchain they were sized to.
struct GpuFrameState {
    pipelines: PipelineRegistry,
    filters: FilterChain,
    targets: Vec<RenderTargets>,
    image_sync: Vec<ImageSync>,
    frames: Vec<FrameResources>,
    swapchain: Swapchain,
    clear_color: [f32; 4],
    fence_timeout: Duration,
    device: Arc<Device>,
}

impl GpuFrameState {
    fn pass_targets(&self) -> PassTargets {
        let samples = self.targets.first().map_or(vk::SampleCountFlags::TYPE_1, RenderTargets::samples);
        PassTargets {
            geometry: geometry_layout(samples),
            overlay: overlay_layout(self.swapchain.format()),
        }
    }

    fn record_passes(&mut self, slot: usize, image_index: u32) -> RendererResult<()> {
        let frame = &self.frames[slot];
        let targets = &self.targets[slot];
        let extent = self.swapchain.extent();
        let image = self
            .swapchain
            .image(image_index)
            .ok_or_else(|| RhiError::InvalidArgument(format!("no swapchain image {}", image_index)))?;
        let view = self
            .swapchain
            .image_view(image_index)
            .ok_or_else(|| RhiError::InvalidArgument(format!("no swapchain view {}", image_index)))?;

        for pass in PassKind::ALL {
            let cmd = frame.command(pass);
            cmd.begin()?;
            match pass {
                PassKind::Geometry => {
                    if self.pipelines.record_transfers_all(cmd, slot)? {
                        transfer_to_vertex_input(cmd);
                    }
                    targets.begin_geometry(cmd, self.clear_color);
                    self.pipelines.record_all(cmd, pass, slot, extent);
                    cmd.end_rendering();
                }
                PassKind::Lighting => self.filters.record_lighting(cmd, slot, targets.scene()),
                PassKind::PostProcess => self.filters.record_post(cmd, slot, targets.scene()),
                PassKind::Overlay => {
                    blit_to_swapchain(cmd, targets, image, extent);
                    begin_swapchain_rendering(cmd, view, extent);
                    self.pipelines.record_all(cmd, pass, slot, extent);
                    cmd.end_rendering();
                }
                PassKind::DebugUi => {
                    begin_swapchain_rendering(cmd, view, extent);
                    self.pipelines.record_all(cmd, pass, slot, extent);
                    cmd.end_rendering();
                    ImageTransition::new(
                        image,
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                        vk::ImageLayout::PRESENT_SRC_KHR,
                    )
                    .record(cmd);
                }
            }
            cmd.end()?;
        }
        Ok(())
    }

    fn submit(&self, slot: usize, image_index: u32) -> RendererResult<()> {
        let frame = &self.frames[slot];
        let render_finished = self
            .image_sync
            .get(image_index as usize)
            .map(ImageSync::render_finished)
            .ok_or_else(|| RhiError::InvalidArgument(format!("no semaphores for image {}", image_index)))?;

        let plan = SemaphoreChain::plan();
        let waits = plan.map(|link| [frame.semaphore(link.wait, render_finished)]);
        let stages = plan.map(|link| [link.wait_stage]);
        let signals = plan.map(|link| [frame.semaphore(link.signal, render_finished)]);
        let commands = plan.map(|link| [frame.command(link.pass).handle()]);

        let submits: Vec<vk::SubmitInfo> = (0..PassKind::COUNT)
            .map(|i| {
                vk::SubmitInfo::default()
                    .wait_semaphores(&waits[i])
                    .wait_dst_stage_mask(&stages[i])
                    .command_buffers(&commands[i])
                    .signal_semaphores(&signals[i])
            })
            .collect();

        // SAFETY: every command buffer was recorded this iteration and every
        // semaphore belongs to this slot or to the acquired image.
        unsafe { self.device.submit(&submits, frame.fence().handle())? };
        Ok(())
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RendererResult<vk::Extent2D> {
        let old_format = self.swapchain.format();
        self.swapchain.recreate(extent)?;
        let actual = self.swapchain.extent();

        self.image_sync = ImageSync::for_images(&self.device, self.swapchain.image_count())?;
        for targets in &mut self.targets {
            targets.rebuild(actual)?;
        }
        self.filters.rebuild(actual)?;
        if self.swapchain.format() != old_format {
            info!("Swapchain format changed to {:?}", self.swapchain.format());
        }
        let pass_targets = self.pass_targets();
        self.pipelines.allocate_all(pass_targets)?;
        self.pipelines.resize_all(actual);

        info!("Frame resources rebuilt at {}x{}", actual.width, actual.height);
        Ok(actual)
    }
}

/// Copy the finished scene onto the swapchain image, converting format.
/// Leaves the swapchain image as a color attachment.
fn blit_to_swapchain(cmd: &CommandBuffer, targets: &RenderTargets, image: vk::Image, extent: vk::Extent2D) {
    let scene = targets.scene();
    record_transitions(
        cmd,
        &[
            ImageTransition::new(
                scene.handle(),
                SCENE_PASS_LAYOUT,
                SCENE_BLIT_LAYOUT,
            ),
            ImageTransition::new(image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
        ],
    );
    cmd.blit_image(scene.handle(), targets.extent(), 0, image, extent, 0, 1);
    ImageTransition::new(
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    )
    .record(cmd);
}

/// Draw on top of what the swapchain image already holds.
fn begin_swapchain_rendering(cmd: &CommandBuffer, view: vk::ImageView, extent: vk::Extent2D) {
    let color_attachment = vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE);
    let rendering_info = vk::RenderingInfo::default()
        .render_area(full_scissor(extent))
        .layer_count(1)
        .color_attachments(std::slice::from_ref(&color_attachment));
    cmd.begin_rendering(&rendering_info);
    cmd.set_full_viewport(extent);
}

/// [`FrameBackend`] for one iteration: the GPU state plus the application
/// that runs before recording.
struct FrameDriver<'a> {
    gpu: &'a mut GpuFrameState,
    app: &'a mut dyn Application,
    dt: f32,
}

impl FrameBackend for FrameDriver<'_> {
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.gpu.frames[slot]
            .fence()
            .wait(self.gpu.fence_timeout)
            .map_err(RendererError::from_wait)
    }

    fn acquire(&mut self, slot: usize) -> RendererResult<AcquireOutcome> {
        let signal = self.gpu.frames[slot].image_available().handle();
        match self
            .gpu
            .swapchain
            .acquire_next_image(signal, self.gpu.fence_timeout)
            .map_err(RendererError::from_wait)?
        {
            AcquireResult::Acquired { image_index, suboptimal } => {
                if suboptimal {
                    debug!("Acquired image {} from a suboptimal swapchain", image_index);
                }
                Ok(AcquireOutcome::Ready { image_index })
            }
            AcquireResult::OutOfDate => Ok(AcquireOutcome::Stale),
        }
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RendererResult<vk::Extent2D> {
        self.gpu.recreate(extent)
    }

    fn begin_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.gpu.frames[slot].fence().reset()?;
        Ok(())
    }

    fn record(&mut self, slot: usize, image_index: u32) -> RendererResult<()> {
        self.gpu.pipelines.update_all(slot)?;
        self.app.run(&mut self.gpu.pipelines, self.dt, slot)?;
        self.gpu.record_passes(slot, image_index)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RendererResult<()> {
        self.gpu.submit(slot, image_index)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<PresentOutcome> {
        let render_finished = self.gpu.image_sync[image_index as usize].render_finished();
        let result = self.gpu.swapchain.present(image_index, render_finished)?;
        if result != PresentResult::Presented {
            debug!("Present on slot {} reported {:?}", slot, result);
        }
        Ok(match result {
            PresentResult::Presented => PresentOutcome::Presented,
            PresentResult::Suboptimal | PresentResult::OutOfDate => PresentOutcome::Stale,
        })
    }
}

/// # Destruction order
///
/// Waits for the device to go idle, then drops the GPU frame state before the
/// [`DeviceContext`] it was created from.
pub struct FrameOrchestrator {
    pacer: FramePacer,
    gpu: GpuFrameState,
    context: DeviceContext,
}

impl FrameOrchestrator {
    /// Create the device context for `window` and everything on top of it.
    pub fn from_window(window: &Window, config: &EngineConfig) -> RendererResult<Self> {
        let context = DeviceContext::new(window, &config.render)?;
        let (width, height) = window.framebuffer_extent();
        Self::new(context, config, vk::Extent2D { width, height })
    }

    /// Build the swapchain, render targets, frame slots and post chain over an
    /// existing device context.
    pub fn new(context: DeviceContext, config: &EngineConfig, extent: vk::Extent2D) -> RendererResult<Self> {
        let device = context.device().clone();
        let surface = context
            .surface()
            .ok_or_else(|| RhiError::Swapchain("device context has no presentation surface".to_string()))?;

        let swapchain = Swapchain::new(
            context.instance(),
            device.clone(),
            surface.handle(),
            extent,
            present_mode_for(config.render.present_mode),
        )?;
        let actual = swapchain.extent();
        let samples = device.sample_count(config.render.msaa_samples);

        let frames = FrameResources::for_slots(&device, MAX_FRAMES_IN_FLIGHT)?;
        let image_sync = ImageSync::for_images(&device, swapchain.image_count())?;
        let targets = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| RenderTargets::new(device.clone(), actual, samples))
            .collect::<RendererResult<Vec<_>>>()?;
        let filters = FilterChain::new(&device, &config.post, &config.assets, actual)?;

        let mut gpu = GpuFrameState {
            pipelines: PipelineRegistry::new(),
            filters,
            targets,
            image_sync,
            frames,
            swapchain,
            clear_color: config.render.clear_color,
            fence_timeout: config.render.fence_timeout(),
            device,
        };
        let pass_targets = gpu.pass_targets();
        gpu.pipelines.allocate_all(pass_targets)?;
        gpu.pipelines.resize_all(actual);

        info!(
            "Frame orchestrator ready: {}x{}, {} swapchain images, {:?}, {} frames in flight",
            actual.width,
            actual.height,
            gpu.swapchain.image_count(),
            samples,
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            pacer: FramePacer::new(actual),
            gpu,
            context,
        })
    }

    /// Schedule a swapchain rebuild; applied at the start of the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.pacer.request_resize(vk::Extent2D { width, height });
    }

    /// Run one frame iteration.
    ///
    /// Returns [`FrameOutcome::Closed`] without waiting or submitting once
    /// `window` has asked to close.
    pub fn render_frame(
        &mut self,
        window: &mut dyn WindowStatus,
        app: &mut dyn Application,
        dt: f32,
    ) -> RendererResult<FrameOutcome> {
        if window.should_close() {
            self.pacer.request_close();
        }
        if window.take_resize() {
            let (width, height) = window.framebuffer_extent();
            self.resize(width, height);
        }
        let mut driver = FrameDriver {
            gpu: &mut self.gpu,
            app,
            dt,
        };
        self.pacer.run_iteration(&mut driver)
    }

    /// Register a mesh pipeline built from `strategy`.
    pub fn add_pipeline<S: PipelineStrategy>(
        &mut self,
        strategy: S,
        priority: i32,
        default_texture: Option<TextureBinding>,
    ) -> RendererResult<PipelineHandle<GraphicsPipelineSlot<S>>> {
        let slot = GraphicsPipelineSlot::new(self.context.upload().clone(), strategy, default_texture)?;
        self.gpu.pipelines.add_pipeline(slot, priority)
    }

    /// Registry of graphics pipelines drawn each frame.
    pub fn pipelines_mut(&mut self) -> &mut PipelineRegistry {
        &mut self.gpu.pipelines
    }

    /// Lighting and post-process chain.
    pub fn filters_mut(&mut self) -> &mut FilterChain {
        &mut self.gpu.filters
    }

    pub fn upload(&self) -> &Arc<UploadContext> {
        self.context.upload()
    }

    pub fn device(&self) -> &Arc<Device> {
        self.context.device()
    }

    /// Extent of the swapchain and render targets.
    pub fn extent(&self) -> vk::Extent2D {
        self.pacer.extent()
    }

    pub fn stats(&self) -> FrameStats {
        self.pacer.stats()
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.pacer.frame_count()
    }

    pub fn wait_idle(&self) -> RendererResult<()> {
        self.context.wait_idle()
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            tracing::error!("wait_idle failed during orchestrator teardown: {}", e);
        }
        let stats = self.pacer.stats();
        info!(
            "Frame orchestrator shut down: {} presented, {} skipped, {} recreations",
            stats.presented, stats.skipped, stats.recreated
        );
    }
}
