//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Thin RAII wrappers over `ash`. Every object holds an `Arc<Device>` and
//! releases its Vulkan handle on drop; the device itself outlives all of them.

mod error;

pub mod barrier;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod growable;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod upload;
pub mod vertex;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
