//! Vertex layouts and their pipeline input descriptions.

use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Vertex types that describe their own pipeline input layout.
pub trait VertexLayout: Pod {
    /// Per-vertex binding 0 with the type's size as stride.
    fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// One attribute per field, locations in field order.
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription>;
}

fn attribute(location: u32, format: vk::Format, offset: usize) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        binding: 0,
        location,
        format,
        offset: offset as u32,
    }
}

/// Position, normal/color and UV for lit meshes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Object-space position
    pub position: Vec3,
    /// Object-space normal
    pub normal: Vec3,
    /// Texture coordinates
    pub uv: Vec2,
}

impl MeshVertex {
    /// Create a mesh vertex.
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

impl VertexLayout for MeshVertex {
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(MeshVertex, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(MeshVertex, normal)),
            attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(MeshVertex, uv)),
        ]
    }
}

/// Screen-space quad corner for UI and text.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct OverlayVertex {
    /// Normalized device coordinates
    pub position: Vec2,
    /// Atlas coordinates
    pub uv: Vec2,
    /// Linear RGBA multiplied into the sampled texel
    pub color: Vec4,
}

impl OverlayVertex {
    /// Create an overlay vertex.
    #[inline]
    pub const fn new(position: Vec2, uv: Vec2, color: Vec4) -> Self {
        Self {
            position,
            uv,
            color,
        }
    }
}

impl VertexLayout for OverlayVertex {
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            attribute(0, vk::Format::R32G32_SFLOAT, offset_of!(OverlayVertex, position)),
            attribute(1, vk::Format::R32G32_SFLOAT, offset_of!(OverlayVertex, uv)),
            attribute(2, vk::Format::R32G32B32A32_SFLOAT, offset_of!(OverlayVertex, color)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_vertex_layout() {
        assert_eq!(size_of::<MeshVertex>(), 32);
        let binding = MeshVertex::binding_description();
        assert_eq!(binding.stride, 32);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);

        let attributes = MeshVertex::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_overlay_vertex_layout() {
        assert_eq!(size_of::<OverlayVertex>(), 32);
        let attributes = OverlayVertex::attribute_descriptions();
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);
        assert_eq!(attributes[2].offset, 16);
    }

    #[test]
    fn test_vertices_are_pod() {
        let vertex = MeshVertex::new(Vec3::ONE, Vec3::Z, Vec2::new(0.5, 0.25));
        let bytes = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 32);
        let back: MeshVertex = *bytemuck::from_bytes(bytes);
        assert_eq!(back, vertex);
    }
}
