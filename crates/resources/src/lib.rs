//! CPU-side resource data handed to the renderer by asset loaders.
//!
//! - Triangle mesh vertex/index arrays
//! - Font atlas metadata

mod error;
pub mod font;
pub mod mesh;

pub use error::{ResourceError, ResourceResult};
pub use font::{FontAtlas, Glyph};
pub use mesh::MeshData;
