//! Error types shared by every engine crate.

use thiserror::Error;

/// Engine-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or surface errors
    #[error("Window error: {0}")]
    Window(String),

    /// Configuration file could not be parsed or is inconsistent
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization errors
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;
