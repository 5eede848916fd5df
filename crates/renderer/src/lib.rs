//! Frame orchestration and pipelines.
//!
//! This crate drives rendering on top of `ember_rhi`:
//! - Frame pacing state machine and the fixed, semaphore-chained pass order
//! - Mesh pipelines with per-slot descriptor sets and deferred detach
//! - Compute lighting and post-process filters
//! - Screen-space text

pub mod context;
mod error;
pub mod filters;
pub mod frame;
pub mod frame_resources;
pub mod orchestrator;
pub mod pass;
pub mod pipeline_slot;
pub mod pipelines;
pub mod registry;
pub mod strategies;
pub mod targets;
pub mod text;

pub use context::DeviceContext;
pub use error::{RendererError, RendererResult};
pub use filters::FilterChain;
pub use frame::{FrameBackend, FrameOutcome, FramePacer, FrameState, FrameStats};
pub use orchestrator::{Application, FrameOrchestrator};
pub use pass::PassKind;
pub use pipeline_slot::{
    DrawCall, GraphicsPipelineSlot, MeshBinding, PipelineStrategy, RenderPipeline, TextureBinding,
};
pub use pipelines::{PipelineHandle, PipelineRegistry};
pub use registry::{MeshId, MeshRegistry};
pub use text::{TextBatch, TextItem};

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
