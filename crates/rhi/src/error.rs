//! RHI error types.

use thiserror::Error;

/// Errors from the Vulkan hardware interface.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// Failed to load the Vulkan loader library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// No physical device satisfies the engine's requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A fence wait exceeded its bound; the device is assumed hung or lost
    #[error("Fence wait timed out after {0} ms")]
    FenceTimeout(u64),

    /// Shader module could not be loaded or created
    #[error("Shader error: {0}")]
    Shader(String),

    /// Swapchain creation or use failed
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// Pipeline creation failed
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Caller passed a size, range, or handle that cannot be honoured
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A thread panicked while holding a device-level lock
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Result alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
