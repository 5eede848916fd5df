//! Concrete pipeline strategies.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use tracing::debug;

use ember_core::config::AssetConfig;
use ember_rhi::descriptor::{BindingDesc, BindingKind};
use ember_rhi::pipeline::{BlendMode, CullMode, DepthMode};
use ember_rhi::vertex::{MeshVertex, OverlayVertex};

use crate::error::RendererResult;
use crate::pass::PassKind;
use crate::pipeline_slot::{PipelineStrategy, UNIFORM_BINDING};

/// Binding of the base color / cubemap / atlas sampler in every built-in strategy.
pub const TEXTURE_BINDING: u32 = 1;

/// Read a compiled SPIR-V blob from the configured shader directory.
pub fn load_shader_code(assets: &AssetConfig, name: &str) -> RendererResult<Vec<u8>> {
    let path = assets.shader_path(name);
    let code = std::fs::read(&path).map_err(|e| {
        ember_core::Error::Config(format!("cannot read shader {}: {}", path.display(), e))
    })?;
    debug!("Loaded shader {} ({} bytes)", path.display(), code.len());
    Ok(code)
}

struct ShaderPair {
    vertex: Vec<u8>,
    fragment: Vec<u8>,
}

impl ShaderPair {
    fn load(assets: &AssetConfig, stem: &str) -> RendererResult<Self> {
        Ok(Self {
            vertex: load_shader_code(assets, &format!("{}.vert.spv", stem))?,
            fragment: load_shader_code(assets, &format!("{}.frag.spv", stem))?,
        })
    }
}

fn uniform_and_texture() -> Vec<BindingDesc> {
    vec![
        BindingDesc::new(
            UNIFORM_BINDING,
            BindingKind::UniformBuffer,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        ),
        BindingDesc::new(
            TEXTURE_BINDING,
            BindingKind::CombinedImageSampler,
            vk::ShaderStageFlags::FRAGMENT,
        ),
    ]
}

// ============================================================================
// Lit meshes
// ============================================================================

/// Uniform block of the mesh pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshUniforms {
    pub model: Mat4,
    pub view_proj: Mat4,
    /// xyz: direction towards the light, w unused
    pub light_dir: Vec4,
    pub tint: Vec4,
}

impl Default for MeshUniforms {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
            light_dir: Vec4::new(0.0, 1.0, 0.0, 0.0),
            tint: Vec4::ONE,
        }
    }
}

/// Textured, lit, depth-tested opaque geometry.
pub struct MeshStrategy {
    shaders: ShaderPair,
}

impl MeshStrategy {
    pub fn load(assets: &AssetConfig) -> RendererResult<Self> {
        Ok(Self {
            shaders: ShaderPair::load(assets, "mesh")?,
        })
    }

    pub fn from_code(vertex: Vec<u8>, fragment: Vec<u8>) -> Self {
        Self {
            shaders: ShaderPair { vertex, fragment },
        }
    }
}

impl PipelineStrategy for MeshStrategy {
    type Vertex = MeshVertex;
    type Uniform = MeshUniforms;

    fn name(&self) -> &'static str {
        "mesh"
    }

    fn vertex_code(&self) -> &[u8] {
        &self.shaders.vertex
    }

    fn fragment_code(&self) -> &[u8] {
        &self.shaders.fragment
    }

    fn bindings(&self) -> Vec<BindingDesc> {
        uniform_and_texture()
    }
}

// ============================================================================
// Skybox
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SkyboxUniforms {
    /// Projection times the view rotation; translation stripped.
    pub view_proj: Mat4,
}

impl Default for SkyboxUniforms {
    fn default() -> Self {
        Self {
            view_proj: Mat4::IDENTITY,
        }
    }
}

impl SkyboxUniforms {
    pub fn from_view_proj(view: Mat4, proj: Mat4) -> Self {
        let mut rotation = view;
        rotation.w_axis = Vec4::W;
        Self {
            view_proj: proj * rotation,
        }
    }
}

/// Cubemap drawn behind everything: inside faces, depth tested at the far
/// plane without writing.
pub struct SkyboxStrategy {
    shaders: ShaderPair,
}

impl SkyboxStrategy {
    pub fn load(assets: &AssetConfig) -> RendererResult<Self> {
        Ok(Self {
            shaders: ShaderPair::load(assets, "skybox")?,
        })
    }

    pub fn from_code(vertex: Vec<u8>, fragment: Vec<u8>) -> Self {
        Self {
            shaders: ShaderPair { vertex, fragment },
        }
    }
}

impl PipelineStrategy for SkyboxStrategy {
    type Vertex = MeshVertex;
    type Uniform = SkyboxUniforms;

    fn name(&self) -> &'static str {
        "skybox"
    }

    fn vertex_code(&self) -> &[u8] {
        &self.shaders.vertex
    }

    fn fragment_code(&self) -> &[u8] {
        &self.shaders.fragment
    }

    fn bindings(&self) -> Vec<BindingDesc> {
        uniform_and_texture()
    }

    fn cull_mode(&self) -> CullMode {
        CullMode::Front
    }

    fn depth_mode(&self) -> DepthMode {
        DepthMode::ReadOnly
    }
}

// ============================================================================
// 2D overlay
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct OverlayUniforms {
    pub tint: Vec4,
}

impl Default for OverlayUniforms {
    fn default() -> Self {
        Self { tint: Vec4::ONE }
    }
}

/// Alpha-blended 2D quads in normalized device coordinates, drawn onto the
/// swapchain image after the scene blit.
pub struct OverlayStrategy {
    shaders: ShaderPair,
}

impl OverlayStrategy {
    pub fn load(assets: &AssetConfig) -> RendererResult<Self> {
        Ok(Self {
            shaders: ShaderPair::load(assets, "overlay")?,
        })
    }

    pub fn from_code(vertex: Vec<u8>, fragment: Vec<u8>) -> Self {
        Self {
            shaders: ShaderPair { vertex, fragment },
        }
    }
}

impl PipelineStrategy for OverlayStrategy {
    type Vertex = OverlayVertex;
    type Uniform = OverlayUniforms;

    fn name(&self) -> &'static str {
        "overlay"
    }

    fn vertex_code(&self) -> &[u8] {
        &self.shaders.vertex
    }

    fn fragment_code(&self) -> &[u8] {
        &self.shaders.fragment
    }

    fn bindings(&self) -> Vec<BindingDesc> {
        uniform_and_texture()
    }

    fn pass(&self) -> PassKind {
        PassKind::Overlay
    }

    fn cull_mode(&self) -> CullMode {
        CullMode::None
    }

    fn depth_mode(&self) -> DepthMode {
        DepthMode::Disabled
    }

    fn blend_mode(&self) -> BlendMode {
        BlendMode::Alpha
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::mem::size_of;

    #[test]
    fn test_uniform_sizes_are_std140_friendly() {
        assert_eq!(size_of::<MeshUniforms>(), 160);
        assert_eq!(size_of::<SkyboxUniforms>(), 64);
        assert_eq!(size_of::<OverlayUniforms>(), 16);
    }

    #[test]
    fn test_strategy_state() {
        let mesh = MeshStrategy::from_code(vec![], vec![]);
        assert_eq!(mesh.pass(), PassKind::Geometry);
        assert_eq!(mesh.depth_mode(), DepthMode::ReadWrite);

        let skybox = SkyboxStrategy::from_code(vec![], vec![]);
        assert_eq!(skybox.cull_mode(), CullMode::Front);
        assert_eq!(skybox.depth_mode(), DepthMode::ReadOnly);

        let overlay = OverlayStrategy::from_code(vec![], vec![]);
        assert_eq!(overlay.pass(), PassKind::Overlay);
        assert_eq!(overlay.blend_mode(), BlendMode::Alpha);
        assert_eq!(overlay.depth_mode(), DepthMode::Disabled);
    }

    #[test]
    fn test_builtin_bindings() {
        let bindings = MeshStrategy::from_code(vec![], vec![]).bindings();
        assert_eq!(bindings[0].binding, UNIFORM_BINDING);
        assert_eq!(bindings[0].kind, BindingKind::UniformBuffer);
        assert_eq!(bindings[1].binding, TEXTURE_BINDING);
        assert_eq!(bindings[1].kind, BindingKind::CombinedImageSampler);
    }

    #[test]
    fn test_skybox_strips_translation() {
        let view = Mat4::look_at_rh(Vec3::new(5.0, 2.0, 3.0), Vec3::ZERO, Vec3::Y);
        let uniforms = SkyboxUniforms::from_view_proj(view, Mat4::IDENTITY);
        assert_eq!(uniforms.view_proj.w_axis, Vec4::W);
        assert_eq!(
            uniforms.view_proj.transform_vector3(Vec3::X),
            view.transform_vector3(Vec3::X)
        );
    }

    #[test]
    fn test_missing_shader_is_config_error() {
        let assets = AssetConfig {
            shader_dir: "/nonexistent/shader/dir".into(),
        };
        let err = MeshStrategy::load(&assets).err().map(|e| e.to_string());
        assert!(err.is_some_and(|msg| msg.contains("mesh.vert.spv")));
    }
}
