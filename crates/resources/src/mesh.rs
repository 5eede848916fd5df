//! Triangle meshes as handed over by model loaders.

use crate::error::{ResourceError, ResourceResult};

/// Vertex and 32-bit index arrays for one triangle list.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData<V> {
    pub name: String,
    pub vertices: Vec<V>,
    pub indices: Vec<u32>,
}

impl<V> MeshData<V> {
    /// Build and validate.
    pub fn new(name: impl Into<String>, vertices: Vec<V>, indices: Vec<u32>) -> ResourceResult<Self> {
        let mesh = Self {
            name: name.into(),
            vertices,
            indices,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Check that the mesh is non-empty, made of whole triangles and indexes only
    /// existing vertices.
    pub fn validate(&self) -> ResourceResult<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(ResourceError::EmptyMesh(self.name.clone()));
        }
        if !self.indices.len().is_multiple_of(3) {
            return Err(ResourceError::PartialTriangle {
                name: self.name.clone(),
                count: self.indices.len(),
            });
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&index| index as usize >= self.vertices.len())
        {
            return Err(ResourceError::IndexOutOfRange {
                name: self.name.clone(),
                index,
                vertex_count: self.vertices.len(),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_triangle() {
        let mesh = MeshData::new("tri", vec![0u8, 1, 2], vec![0, 1, 2]).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.index_count(), 3);
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn test_empty_data_rejected() {
        assert_eq!(
            MeshData::<u8>::new("empty", vec![], vec![0, 1, 2]),
            Err(ResourceError::EmptyMesh("empty".to_string()))
        );
        assert!(matches!(
            MeshData::new("no-indices", vec![0u8], vec![]),
            Err(ResourceError::EmptyMesh(_))
        ));
    }

    #[test]
    fn test_index_out_of_range() {
        let err = MeshData::new("bad", vec![0u8, 1, 2], vec![0, 1, 3]).unwrap_err();
        assert_eq!(
            err,
            ResourceError::IndexOutOfRange {
                name: "bad".to_string(),
                index: 3,
                vertex_count: 3,
            }
        );
    }

    #[test]
    fn test_partial_triangle() {
        assert!(matches!(
            MeshData::new("partial", vec![0u8, 1], vec![0, 1]),
            Err(ResourceError::PartialTriangle { count: 2, .. })
        ));
    }
}
