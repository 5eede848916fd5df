//! Renderer error types.

use ember_resources::ResourceError;
use ember_rhi::RhiError;
use thiserror::Error;

/// Errors from frame orchestration and the pipeline registry.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Core(#[from] ember_core::Error),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Mesh id not registered with the pipeline it was passed to
    #[error("Unknown mesh id {0}")]
    UnknownMesh(u64),

    /// Pipeline handle that does not resolve to a registered pipeline of the expected type
    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    /// Mesh attached while some of its pipeline's bindings have nothing bound
    #[error("Pipeline '{pipeline}' has unbound binding(s) {missing:?}")]
    IncompleteBindings { pipeline: String, missing: Vec<u32> },

    #[error("Text needs {requested} characters, batch capacity is {capacity}")]
    TextCapacityExceeded { requested: usize, capacity: usize },

    /// A fence wait exceeded its bound or the driver reported device loss
    #[error("Device lost: {0}")]
    DeviceLost(String),
}

impl RendererError {
    /// Fence timeouts are reported as device loss; everything else passes through.
    pub fn from_wait(err: RhiError) -> Self {
        match err {
            RhiError::FenceTimeout(ms) => {
                RendererError::DeviceLost(format!("fence not signaled after {} ms", ms))
            }
            RhiError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST) => {
                RendererError::DeviceLost("driver reported VK_ERROR_DEVICE_LOST".to_string())
            }
            other => RendererError::Rhi(other),
        }
    }
}

/// Result alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RendererError>;
