//! Error types for CPU-side resource data.

use thiserror::Error;

/// Errors from validating CPU-side resource data.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResourceError {
    /// Mesh has no vertices or no indices.
    #[error("Mesh '{0}' has empty vertex or index data")]
    EmptyMesh(String),

    /// An index points past the end of the vertex array.
    #[error("Mesh '{name}' index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        name: String,
        index: u32,
        vertex_count: usize,
    },

    /// Index count is not a whole number of triangles.
    #[error("Mesh '{name}' has {count} indices, not a multiple of 3")]
    PartialTriangle { name: String, count: usize },

    #[error("Font atlas error: {0}")]
    FontAtlas(String),
}

pub type ResourceResult<T> = Result<T, ResourceError>;
