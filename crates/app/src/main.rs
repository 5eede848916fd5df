//! Ember - demo entry point
//!
//! Opens a window, builds the frame orchestrator and renders a spinning cube
//! in front of a cubemap sky through lighting and the configured post-process
//! chain, with a frame statistics readout in the debug UI pass.
//!
//! Keys: G grayscale, T tonemap, B bloom, L lighting, Esc quit.

mod hud_font;
mod scene;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event_loop::ControlFlow;
use winit::window::WindowId;

use ember_core::{EngineConfig, FilterKind, Timer};
use ember_platform::{ActiveEventLoop, EventLoop, KeyCode, PhysicalKey, Window, WindowEvent};
use ember_renderer::strategies::{MeshStrategy, OverlayStrategy, SkyboxStrategy};
use ember_renderer::{
    FrameOrchestrator, FrameOutcome, PassKind, RendererResult, TextBatch, TextureBinding,
};
use ember_rhi::sampler::{SamplerFilter, TextureSampler};
use ember_rhi::texture::Texture;

use crate::scene::{DemoScene, SceneHandles};

/// Edge length of each generated sky face, in texels.
const SKY_SIZE: u32 = 64;

#[derive(Parser, Debug)]
#[command(name = "ember", about = "Vulkan frame orchestration demo")]
struct Args {
    /// TOML config file; missing files fall back to defaults
    #[arg(short, long, default_value = "ember.toml")]
    config: PathBuf,

    /// Override the window width
    #[arg(long)]
    width: Option<u32>,

    /// Override the window height
    #[arg(long)]
    height: Option<u32>,

    /// Force validation layers on
    #[arg(long)]
    validation: bool,
}

/// What the event loop does after a frame.
#[derive(Debug)]
enum AfterFrame {
    Continue,
    /// Presented or skipped; the extent may have changed.
    Refresh,
    Exit,
    Fatal(anyhow::Error),
}

/// Every render error is fatal: a failed frame may leave its slot's fence
/// unsignaled, and nothing after it can be trusted to make progress.
fn after_frame(result: RendererResult<FrameOutcome>) -> AfterFrame {
    match result {
        Ok(FrameOutcome::Minimized) => AfterFrame::Continue,
        Ok(FrameOutcome::Closed) => AfterFrame::Exit,
        Ok(FrameOutcome::Presented { .. } | FrameOutcome::Skipped(_)) => AfterFrame::Refresh,
        Err(e) => AfterFrame::Fatal(anyhow::Error::new(e).context("rendering a frame")),
    }
}

/// Field order is drop order: the orchestrator releases the surface before
/// the window goes away.
struct App {
    orchestrator: Option<FrameOrchestrator>,
    scene: Option<DemoScene>,
    window: Option<Window>,
    config: EngineConfig,
    timer: Timer,
    /// First unrecoverable error; ends the event loop and the process status.
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            orchestrator: None,
            scene: None,
            window: None,
            config,
            timer: Timer::new(),
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.record_fatal(err);
        event_loop.exit();
    }

    /// Keep the first fatal error; later ones are only logged.
    fn record_fatal(&mut self, err: anyhow::Error) {
        error!("{:#}", err);
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
    }

    /// Process result once the event loop has returned.
    fn finish(&mut self) -> Result<()> {
        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(
            event_loop,
            self.config.window.width,
            self.config.window.height,
            &self.config.window.title,
        )?;
        let mut orchestrator = FrameOrchestrator::from_window(&window, &self.config)?;
        let assets = &self.config.assets;

        let white = Texture::from_rgba8(orchestrator.upload(), 1, 1, &[255; 4], false)?;
        let sampler = Arc::new(TextureSampler::new(
            orchestrator.device().clone(),
            1,
            SamplerFilter::Nearest,
        )?);

        let meshes = orchestrator.add_pipeline(
            MeshStrategy::load(assets)?,
            0,
            Some(TextureBinding::new(white, sampler.clone())),
        )?;
        let cube_mesh = scene::cube()?;
        let cube = orchestrator.pipelines_mut().attach_model(meshes, &cube_mesh, 1)?;

        let faces = scene::sky_faces(SKY_SIZE);
        let cubemap = Texture::from_cubemap_rgba8(
            orchestrator.upload(),
            SKY_SIZE,
            &faces.each_ref().map(Vec::as_slice),
        )?;
        let linear = Arc::new(TextureSampler::new(
            orchestrator.device().clone(),
            1,
            SamplerFilter::Linear,
        )?);
        let sky = orchestrator.add_pipeline(
            SkyboxStrategy::load(assets)?,
            -10,
            Some(TextureBinding::new(cubemap, linear)),
        )?;
        let sky_box = orchestrator.pipelines_mut().attach_model(sky, &cube_mesh, 1)?;

        let font = hud_font::hud_font()?;
        let font_texture = Texture::from_rgba8(
            orchestrator.upload(),
            font.width,
            font.height,
            &font.pixels,
            false,
        )?;
        let hud = TextBatch::new(
            orchestrator.upload().clone(),
            OverlayStrategy::load(assets)?,
            font.atlas,
            TextureBinding::new(font_texture, sampler),
        )?
        .on_pass(PassKind::DebugUi);
        let hud = orchestrator.pipelines_mut().add_pipeline(hud, 100)?;

        let extent = orchestrator.extent();
        let handles = SceneHandles {
            meshes,
            cube,
            sky,
            sky_box,
            hud,
        };
        self.scene = Some(DemoScene::new(handles, extent.width, extent.height));
        self.orchestrator = Some(orchestrator);
        self.window = Some(window);
        info!("Initialization complete, entering main loop");
        Ok(())
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        let Some(orchestrator) = self.orchestrator.as_mut() else {
            return;
        };
        let filter = match key {
            KeyCode::Escape => {
                event_loop.exit();
                return;
            }
            KeyCode::KeyL => {
                let filters = orchestrator.filters_mut();
                let enabled = !filters.has_lighting();
                filters.set_lighting_enabled(enabled);
                info!("Lighting {}", if filters.has_lighting() { "on" } else { "off" });
                return;
            }
            KeyCode::KeyG => FilterKind::Grayscale,
            KeyCode::KeyT => FilterKind::Tonemap,
            KeyCode::KeyB => FilterKind::Bloom,
            _ => return,
        };
        match orchestrator.filters_mut().toggle(filter) {
            Some(enabled) => info!("{} {}", filter.name(), if enabled { "on" } else { "off" }),
            None => warn!("{} is not in the configured post chain", filter.name()),
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let dt = self.timer.delta_secs();
        let (Some(orchestrator), Some(scene), Some(window)) =
            (self.orchestrator.as_mut(), self.scene.as_mut(), self.window.as_mut())
        else {
            return;
        };

        match after_frame(orchestrator.render_frame(window, scene, dt)) {
            AfterFrame::Continue => {}
            AfterFrame::Refresh => {
                let extent = orchestrator.extent();
                scene.resize(extent.width, extent.height);
            }
            AfterFrame::Exit => {
                info!("Window closed after {} frame(s)", orchestrator.stats().presented);
                event_loop.exit();
            }
            AfterFrame::Fatal(err) => self.fail(event_loop, err),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e.context("initialization failed"));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                match self.window.as_mut() {
                    Some(window) => window.request_close(),
                    None => event_loop.exit(),
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.on_resized(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key
                    && event.state.is_pressed()
                    && !event.repeat
                {
                    self.on_key(event_loop, key);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = EngineConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(width) = args.width {
        config.window.width = width;
    }
    if let Some(height) = args.height {
        config.window.height = height;
    }
    config.render.validation |= args.validation;
    config.validate()?;

    ember_core::init_logging(&config.logging);
    info!("Starting Ember");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    info!(
        "Average {:.1} FPS over {} frames",
        app.timer.average_fps(),
        app.timer.frame_count()
    );

    app.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_renderer::RendererError;
    use ember_renderer::frame::SkipReason;

    #[test]
    fn test_every_render_error_is_fatal() {
        let errors = [
            RendererError::DeviceLost("fence not signaled after 5000 ms".to_string()),
            RendererError::UnknownPipeline("PipelineHandle(3)".to_string()),
            RendererError::UnknownMesh(7),
        ];
        for err in errors {
            assert!(matches!(after_frame(Err(err)), AfterFrame::Fatal(_)));
        }
    }

    #[test]
    fn test_frame_outcomes_map_to_loop_actions() {
        assert!(matches!(after_frame(Ok(FrameOutcome::Minimized)), AfterFrame::Continue));
        assert!(matches!(after_frame(Ok(FrameOutcome::Closed)), AfterFrame::Exit));
        assert!(matches!(
            after_frame(Ok(FrameOutcome::Skipped(SkipReason::Resized))),
            AfterFrame::Refresh
        ));
        assert!(matches!(
            after_frame(Ok(FrameOutcome::Presented { slot: 1, image_index: 2 })),
            AfterFrame::Refresh
        ));
    }

    #[test]
    fn test_first_fatal_error_sets_exit_status() {
        let mut app = App::new(EngineConfig::default());
        assert!(app.finish().is_ok());

        app.record_fatal(anyhow::anyhow!("swapchain creation failed"));
        app.record_fatal(anyhow::anyhow!("later failure"));
        let err = app.finish().unwrap_err();
        assert_eq!(err.to_string(), "swapchain creation failed");
        assert!(app.finish().is_ok());
    }
}
