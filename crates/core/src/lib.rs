//! Core utilities shared by the engine crates.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - TOML configuration
//! - Frame timer
//! - Frame-slot keyed deferred destruction queue

pub mod config;
pub mod deferred;
mod error;
mod logging;
mod timer;

pub use config::{EngineConfig, FilterKind, PresentModePreference};
pub use deferred::DeferredQueue;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
