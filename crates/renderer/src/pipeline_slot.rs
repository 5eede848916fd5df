//! Generic graphics pipeline with its own mesh registry.
//!
//! A [`GraphicsPipelineSlot`] is parameterised by a [`PipelineStrategy`]: the
//! strategy supplies shader bytecode, descriptor bindings and fixed-function
//! state, the slot does everything else. Each attached mesh owns its vertex
//! and index buffers, one uniform buffer per frame slot and a descriptor pool
//! sized for exactly `MAX_FRAMES_IN_FLIGHT` sets.
//!
//! Descriptor sets are only rewritten for a slot whose fence has just been
//! waited on: texture and buffer updates mark every slot dirty and each set
//! is refreshed by [`GraphicsPipelineSlot::update`] when its slot comes up.
//! A replaced texture or buffer is retired with the current slot and dropped
//! once that slot's fence has been waited on again.

use std::any::Any;
use std::collections::BTreeMap;
use std::mem::size_of;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use tracing::{debug, info, trace};

use ember_core::DeferredQueue;

use ember_resources::MeshData;
use ember_rhi::buffer::{Buffer, BufferUsage};
use ember_rhi::command::CommandBuffer;
use ember_rhi::descriptor::{
    BindingDesc, BindingKind, DescriptorPool, DescriptorSetLayout, DescriptorWriter,
};
use ember_rhi::device::Device;
use ember_rhi::pipeline::{
    BlendMode, CullMode, DepthMode, GraphicsPipelineBuilder, Pipeline, PipelineLayout,
    RenderTargetLayout,
};
use ember_rhi::sampler::TextureSampler;
use ember_rhi::shader::{Shader, ShaderStage};
use ember_rhi::texture::Texture;
use ember_rhi::upload::UploadContext;
use ember_rhi::vertex::VertexLayout;
use ember_rhi::RhiError;

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::{RendererError, RendererResult};
use crate::pass::PassKind;
use crate::registry::{MeshId, MeshRegistry};

/// Binding every strategy reserves for its per-frame uniform buffer.
pub const UNIFORM_BINDING: u32 = 0;

/// What a concrete pipeline contributes to a [`GraphicsPipelineSlot`].
pub trait PipelineStrategy: 'static {
    /// Vertex type of every mesh attached to the slot.
    type Vertex: VertexLayout;
    /// Per-mesh uniform written through [`GraphicsPipelineSlot::update_uniform`].
    type Uniform: Pod + Default;

    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// SPIR-V bytecode of the vertex stage.
    fn vertex_code(&self) -> &[u8];

    /// SPIR-V bytecode of the fragment stage.
    fn fragment_code(&self) -> &[u8];

    /// Shader bindings. Binding [`UNIFORM_BINDING`] must be a uniform buffer.
    fn bindings(&self) -> Vec<BindingDesc>;

    fn pass(&self) -> PassKind {
        PassKind::Geometry
    }

    fn cull_mode(&self) -> CullMode {
        CullMode::Back
    }

    fn depth_mode(&self) -> DepthMode {
        DepthMode::ReadWrite
    }

    fn blend_mode(&self) -> BlendMode {
        BlendMode::Opaque
    }
}

/// Object-safe face of every pipeline the orchestrator drives.
pub trait RenderPipeline: Any {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Pass this pipeline records into.
    fn pass(&self) -> PassKind;

    /// Build (or rebuild) the GPU pipeline for `targets`. The previous
    /// pipeline must no longer be in use.
    fn allocate(&mut self, targets: RenderTargetLayout) -> RendererResult<()>;

    /// Start of `slot`'s reuse; the slot's fence has been waited on.
    fn update(&mut self, slot: usize) -> RendererResult<()>;

    /// Copy staged data into device buffers before any pass of `slot` runs.
    ///
    /// Recorded into the first command buffer of the frame, outside any
    /// rendering scope. Returns whether anything was recorded.
    fn record_transfers(&mut self, _cmd: &CommandBuffer, _slot: usize) -> RendererResult<bool> {
        Ok(false)
    }

    /// Record draws for `slot` inside the pass's rendering scope.
    fn record(&self, cmd: &CommandBuffer, slot: usize, extent: vk::Extent2D);

    /// The swapchain extent changed. Only screen-space pipelines care.
    fn resize(&mut self, _extent: vk::Extent2D) {}

    /// Downcasting hook for typed pipeline handles.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Compile `strategy`'s shaders and build its pipeline for `targets`.
pub fn build_pipeline<S: PipelineStrategy>(
    device: &Arc<Device>,
    strategy: &S,
    layout: &PipelineLayout,
    targets: RenderTargetLayout,
) -> RendererResult<Pipeline> {
    let vertex = Shader::from_spirv_bytes(device.clone(), strategy.vertex_code(), ShaderStage::Vertex)?;
    let fragment = Shader::from_spirv_bytes(device.clone(), strategy.fragment_code(), ShaderStage::Fragment)?;

    let pipeline = GraphicsPipelineBuilder::new()
        .shaders(&vertex, &fragment)
        .vertex_input(
            S::Vertex::binding_description(),
            &S::Vertex::attribute_descriptions(),
        )
        .cull_mode(strategy.cull_mode())
        .depth_mode(strategy.depth_mode())
        .blend_mode(strategy.blend_mode())
        .targets(targets)
        .build(device.clone(), layout)?;
    Ok(pipeline)
}

/// A texture together with the sampler that reads it.
#[derive(Clone)]
pub struct TextureBinding {
    pub texture: Arc<Texture>,
    pub sampler: Arc<TextureSampler>,
}

impl TextureBinding {
    /// Pair `texture` with `sampler`.
    pub fn new(texture: Arc<Texture>, sampler: Arc<TextureSampler>) -> Self {
        Self { texture, sampler }
    }
}

/// A resource bound to one descriptor binding of a mesh.
#[derive(Clone)]
pub enum MeshBinding {
    /// Combined image sampler.
    Texture(TextureBinding),
    /// Storage or uniform buffer other than the per-frame uniform.
    Buffer(Arc<Buffer>),
}

impl MeshBinding {
    fn kinds(&self) -> &'static [BindingKind] {
        match self {
            MeshBinding::Texture(_) => &[BindingKind::CombinedImageSampler],
            MeshBinding::Buffer(_) => &[BindingKind::StorageBuffer, BindingKind::UniformBuffer],
        }
    }
}

/// One indexed draw of a live mesh for a given slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub mesh: MeshId,
    pub vertices: vk::Buffer,
    pub indices: vk::Buffer,
    pub set: vk::DescriptorSet,
    pub index_count: u32,
    pub instance_count: u32,
}

/// GPU handles a mesh contributes to a draw on `slot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawSource {
    pub vertices: vk::Buffer,
    pub indices: vk::Buffer,
    pub set: vk::DescriptorSet,
    pub index_count: u32,
}

/// Draw list for `slot`: every live mesh in id order, including those with
/// zero instances. Detached meshes are no longer live and never appear.
pub fn draw_calls<M>(
    registry: &MeshRegistry<M>,
    slot: usize,
    source: impl Fn(&M, usize) -> DrawSource,
) -> Vec<DrawCall> {
    registry
        .draws()
        .map(|(id, mesh, instance_count)| {
            let DrawSource {
                vertices,
                indices,
                set,
                index_count,
            } = source(mesh, slot);
            DrawCall {
                mesh: id,
                vertices,
                indices,
                set,
                index_count,
                instance_count,
            }
        })
        .collect()
}

/// Which per-slot descriptor sets still need rewriting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtySlots([bool; MAX_FRAMES_IN_FLIGHT]);

impl DirtySlots {
    /// Every slot dirty.
    pub fn all() -> Self {
        Self([true; MAX_FRAMES_IN_FLIGHT])
    }

    /// Mark every slot for rewriting.
    pub fn mark_all(&mut self) {
        self.0 = [true; MAX_FRAMES_IN_FLIGHT];
    }

    /// Whether `slot` was dirty; clears it.
    pub fn take(&mut self, slot: usize) -> bool {
        std::mem::take(&mut self.0[slot])
    }

    /// Whether any slot still needs rewriting.
    pub fn any(&self) -> bool {
        self.0.iter().any(|&dirty| dirty)
    }
}

/// Bindings of `layout` (other than the uniform) with nothing bound yet.
pub fn missing_bindings(layout: &[BindingDesc], bound: &[u32]) -> Vec<u32> {
    layout
        .iter()
        .filter(|desc| desc.binding != UNIFORM_BINDING && !bound.contains(&desc.binding))
        .map(|desc| desc.binding)
        .collect()
}

/// A mesh must have every non-uniform binding filled before it is drawn.
fn check_complete(pipeline: &str, layout: &[BindingDesc], bound: &[u32]) -> RendererResult<()> {
    let missing = missing_bindings(layout, bound);
    debug_assert!(
        missing.is_empty(),
        "'{}' mesh attached with unbound binding(s) {:?}",
        pipeline,
        missing
    );
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RendererError::IncompleteBindings {
            pipeline: pipeline.to_string(),
            missing,
        })
    }
}

/// Index count as the `u32` an indexed draw takes.
fn draw_index_count(mesh: &str, count: usize) -> RendererResult<u32> {
    u32::try_from(count).map_err(|_| {
        RhiError::InvalidArgument(format!(
            "mesh '{}' has {} indices, more than one draw can address",
            mesh, count
        ))
        .into()
    })
}

fn uniform_not_replaceable() -> RendererError {
    RhiError::InvalidArgument(format!(
        "binding {} holds the per-frame uniform and cannot be replaced",
        UNIFORM_BINDING
    ))
    .into()
}

fn check_bindings(name: &str, bindings: &[BindingDesc]) -> RendererResult<()> {
    let uniform = bindings.iter().find(|desc| desc.binding == UNIFORM_BINDING);
    match uniform {
        Some(desc) if desc.kind == BindingKind::UniformBuffer => Ok(()),
        _ => Err(RhiError::Pipeline(format!(
            "pipeline '{}' must declare a uniform buffer at binding {}",
            name, UNIFORM_BINDING
        ))
        .into()),
    }
}

struct GpuMesh {
    name: String,
    sets: [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT],
    pool: DescriptorPool,
    uniforms: Vec<Buffer>,
    vertices: Buffer,
    indices: Buffer,
    index_count: u32,
    bound: BTreeMap<u32, MeshBinding>,
    dirty: DirtySlots,
}

impl GpuMesh {
    fn write_set(&self, slot: usize, layout: &[BindingDesc], upload: &UploadContext) {
        let mut writer = DescriptorWriter::new().buffer(
            UNIFORM_BINDING,
            BindingKind::UniformBuffer,
            self.uniforms[slot].handle(),
            self.uniforms[slot].size(),
        );
        for desc in layout {
            writer = match (self.bound.get(&desc.binding), desc.kind) {
                (Some(MeshBinding::Texture(binding)), BindingKind::CombinedImageSampler) => writer
                    .sampled_image(
                        desc.binding,
                        binding.texture.view(),
                        binding.sampler.handle(),
                    ),
                (Some(MeshBinding::Buffer(buffer)), kind @ (BindingKind::StorageBuffer | BindingKind::UniformBuffer)) => {
                    writer.buffer(desc.binding, kind, buffer.handle(), buffer.size())
                }
                _ => writer,
            };
        }
        writer.apply(upload.device(), self.sets[slot]);
    }

    fn draw_source(&self, slot: usize) -> DrawSource {
        DrawSource {
            vertices: self.vertices.handle(),
            indices: self.indices.handle(),
            set: self.sets[slot],
            index_count: self.index_count,
        }
    }
}

/// A graphics pipeline built from a [`PipelineStrategy`] together with the
/// meshes it draws.
///
/// The slot owns its descriptor set layout and pipeline layout for its whole
/// life; the pipeline object itself is built by [`RenderPipeline::allocate`]
/// once the render target formats are known.
pub struct GraphicsPipelineSlot<S: PipelineStrategy> {
    registry: MeshRegistry<GpuMesh>,
    retired: DeferredQueue<MeshBinding>,
    pipeline: Option<Pipeline>,
    layout: PipelineLayout,
    set_layout: DescriptorSetLayout,
    default_texture: Option<TextureBinding>,
    targets: Option<RenderTargetLayout>,
    strategy: S,
    upload: Arc<UploadContext>,
}

impl<S: PipelineStrategy> GraphicsPipelineSlot<S> {
    /// `default_texture` is bound to every sampler binding of a new mesh
    /// until [`update_texture`](Self::update_texture) replaces it.
    pub fn new(
        upload: Arc<UploadContext>,
        strategy: S,
        default_texture: Option<TextureBinding>,
    ) -> RendererResult<Self> {
        let bindings = strategy.bindings();
        check_bindings(strategy.name(), &bindings)?;

        let device = upload.device().clone();
        let set_layout = DescriptorSetLayout::new(device.clone(), &bindings)?;
        let layout = PipelineLayout::new(device, &[&set_layout], &[])?;

        info!(
            "Pipeline slot '{}' created ({} binding(s), {} pass)",
            strategy.name(),
            bindings.len(),
            strategy.pass().name()
        );
        Ok(Self {
            registry: MeshRegistry::new(),
            retired: DeferredQueue::new(),
            pipeline: None,
            layout,
            set_layout,
            default_texture,
            targets: None,
            strategy,
            upload,
        })
    }

    /// Upload `mesh` and register it for drawing with `instance_count` instances.
    ///
    /// Sampler bindings take the default texture. Fails if the strategy has
    /// any other binding; use [`attach_model_with`](Self::attach_model_with).
    pub fn attach_model(
        &mut self,
        mesh: &MeshData<S::Vertex>,
        instance_count: u32,
    ) -> RendererResult<MeshId> {
        self.attach_model_with(mesh, instance_count, Vec::new())
    }

    /// Like [`attach_model`](Self::attach_model), with explicit resources for
    /// some bindings. Every non-uniform binding must end up filled, either here
    /// or by the default texture.
    pub fn attach_model_with(
        &mut self,
        mesh: &MeshData<S::Vertex>,
        instance_count: u32,
        resources: Vec<(u32, MeshBinding)>,
    ) -> RendererResult<MeshId> {
        let valid = mesh.validate();
        debug_assert!(valid.is_ok(), "invalid mesh attached: {:?}", valid);
        valid?;

        let mut bound = BTreeMap::new();
        if let Some(texture) = &self.default_texture {
            for desc in self.set_layout.bindings() {
                if desc.kind == BindingKind::CombinedImageSampler {
                    bound.insert(desc.binding, MeshBinding::Texture(texture.clone()));
                }
            }
        }
        for (binding, resource) in resources {
            self.expect_binding(binding, resource.kinds())?;
            if binding == UNIFORM_BINDING {
                return Err(uniform_not_replaceable());
            }
            bound.insert(binding, resource);
        }
        let bound_keys: Vec<u32> = bound.keys().copied().collect();
        check_complete(self.strategy.name(), self.set_layout.bindings(), &bound_keys)?;

        let index_count = draw_index_count(&mesh.name, mesh.index_count())?;

        let vertices = self
            .upload
            .create_device_local(BufferUsage::Vertex, bytemuck::cast_slice(&mesh.vertices))?;
        let indices = self
            .upload
            .create_device_local(BufferUsage::Index, bytemuck::cast_slice(&mesh.indices))?;

        let initial = S::Uniform::default();
        let uniforms = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| {
                Buffer::new_with_data(
                    self.upload.device().clone(),
                    BufferUsage::Uniform,
                    bytemuck::bytes_of(&initial),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pool = DescriptorPool::for_layout(
            self.upload.device().clone(),
            &self.set_layout,
            MAX_FRAMES_IN_FLIGHT as u32,
        )?;
        let sets = pool.allocate::<MAX_FRAMES_IN_FLIGHT>(&self.set_layout)?;

        let gpu = GpuMesh {
            name: mesh.name.clone(),
            sets,
            pool,
            uniforms,
            vertices,
            indices,
            index_count,
            bound,
            dirty: DirtySlots::default(),
        };
        // Fresh sets are not referenced by any command buffer yet.
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            gpu.write_set(slot, self.set_layout.bindings(), &self.upload);
        }

        let name = gpu.name.clone();
        let id = self.registry.attach(gpu, instance_count);
        debug!(
            "{} '{}' attached to '{}' ({} vertices, {} indices, {} instance(s))",
            id,
            name,
            self.strategy.name(),
            mesh.vertex_count(),
            mesh.index_count(),
            instance_count
        );
        Ok(id)
    }

    /// Stop drawing `id` now; GPU objects go when the current slot comes round again.
    pub fn detach_model(&mut self, id: MeshId) -> RendererResult<()> {
        self.registry.detach_current(id)
    }

    /// Change how many instances of `id` are drawn. Zero keeps the draw.
    pub fn set_instance_count(&mut self, id: MeshId, instance_count: u32) -> RendererResult<()> {
        self.registry.set_instance_count(id, instance_count)
    }

    /// Write `data` into the mesh's uniform buffer for the current slot.
    /// Call every frame the value should be visible.
    pub fn update_uniform(&mut self, id: MeshId, data: &S::Uniform) -> RendererResult<()> {
        let slot = self.registry.current_slot();
        let mesh = self.mesh(id)?;
        debug_assert_eq!(mesh.uniforms[slot].size() as usize, size_of::<S::Uniform>());
        mesh.uniforms[slot].write_data(0, bytemuck::bytes_of(data))?;
        Ok(())
    }

    /// Bind `texture` at a sampler binding of `id`. Each slot's set picks
    /// it up when that slot next comes round.
    pub fn update_texture(&mut self, id: MeshId, binding: u32, texture: TextureBinding) -> RendererResult<()> {
        self.bind(id, binding, MeshBinding::Texture(texture))
    }

    /// Bind `buffer` at a storage or uniform binding of `id` other than
    /// [`UNIFORM_BINDING`].
    pub fn update_buffer(&mut self, id: MeshId, binding: u32, buffer: Arc<Buffer>) -> RendererResult<()> {
        self.bind(id, binding, MeshBinding::Buffer(buffer))
    }

    fn bind(&mut self, id: MeshId, binding: u32, resource: MeshBinding) -> RendererResult<()> {
        self.expect_binding(binding, resource.kinds())?;
        if binding == UNIFORM_BINDING {
            return Err(uniform_not_replaceable());
        }
        let slot = self.registry.current_slot();
        let mesh = self.mesh_mut(id)?;
        let replaced = mesh.bound.insert(binding, resource);
        mesh.dirty.mark_all();
        if let Some(old) = replaced {
            self.retired.push(old, slot);
        }
        Ok(())
    }

    fn expect_binding(&self, binding: u32, kinds: &[BindingKind]) -> RendererResult<()> {
        match self.set_layout.bindings().iter().find(|desc| desc.binding == binding) {
            Some(desc) if kinds.contains(&desc.kind) => Ok(()),
            Some(desc) => Err(RhiError::InvalidArgument(format!(
                "binding {} of '{}' is a {:?}",
                binding,
                self.strategy.name(),
                desc.kind
            ))
            .into()),
            None => Err(RhiError::InvalidArgument(format!(
                "'{}' has no binding {}",
                self.strategy.name(),
                binding
            ))
            .into()),
        }
    }

    fn mesh(&self, id: MeshId) -> RendererResult<&GpuMesh> {
        self.registry.get(id).ok_or(RendererError::UnknownMesh(id.raw()))
    }

    fn mesh_mut(&mut self, id: MeshId) -> RendererResult<&mut GpuMesh> {
        self.registry
            .get_mut(id)
            .ok_or(RendererError::UnknownMesh(id.raw()))
    }

    /// Meshes currently drawn.
    pub fn live_meshes(&self) -> usize {
        self.registry.live_count()
    }

    /// Detached meshes whose GPU objects are not yet released.
    pub fn pending_meshes(&self) -> usize {
        self.registry.pending_count()
    }

    /// Replaced textures and buffers not yet released.
    pub fn retired_bindings(&self) -> usize {
        self.retired.len()
    }

    pub fn instance_count(&self, id: MeshId) -> Option<u32> {
        self.registry.instance_count(id)
    }

    /// Per-slot descriptor sets of a live mesh.
    pub fn descriptor_sets(&self, id: MeshId) -> Option<&[vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT]> {
        self.registry.get(id).map(|mesh| &mesh.sets)
    }

    /// Draws [`record`](RenderPipeline::record) issues for `slot`.
    pub fn draw_calls(&self, slot: usize) -> Vec<DrawCall> {
        draw_calls(&self.registry, slot, GpuMesh::draw_source)
    }

    /// Strategy this slot was built from.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Whether the pipeline object currently exists.
    pub fn is_allocated(&self) -> bool {
        self.pipeline.is_some()
    }
}

impl<S: PipelineStrategy> RenderPipeline for GraphicsPipelineSlot<S> {
    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn pass(&self) -> PassKind {
        self.strategy.pass()
    }

    fn allocate(&mut self, targets: RenderTargetLayout) -> RendererResult<()> {
        if self.pipeline.is_some() && self.targets == Some(targets) {
            return Ok(());
        }
        let pipeline = build_pipeline(self.upload.device(), &self.strategy, &self.layout, targets)?;
        self.pipeline = Some(pipeline);
        self.targets = Some(targets);
        info!(
            "Pipeline '{}' allocated for {:?} ({:?})",
            self.strategy.name(),
            targets.color_format,
            targets.samples
        );
        Ok(())
    }

    fn update(&mut self, slot: usize) -> RendererResult<()> {
        for mesh in self.registry.update(slot) {
            trace!("Destroying mesh '{}' of '{}'", mesh.name, self.strategy.name());
        }
        let layout = self.set_layout.bindings();
        for (_, mesh) in self.registry.iter_mut() {
            if mesh.dirty.take(slot) {
                mesh.write_set(slot, layout, &self.upload);
            }
        }
        let released = self.retired.collect(slot);
        if !released.is_empty() {
            trace!(
                "Released {} replaced binding(s) of '{}' on slot {}",
                released.len(),
                self.strategy.name(),
                slot
            );
        }
        Ok(())
    }

    fn record(&self, cmd: &CommandBuffer, slot: usize, extent: vk::Extent2D) {
        let Some(pipeline) = &self.pipeline else {
            return;
        };
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
        cmd.set_full_viewport(extent);

        for draw in self.draw_calls(slot) {
            cmd.bind_vertex_buffer(draw.vertices);
            cmd.bind_index_buffer(draw.indices);
            cmd.bind_descriptor_set(vk::PipelineBindPoint::GRAPHICS, self.layout.handle(), draw.set);
            cmd.draw_indexed(draw.index_count, draw.instance_count);
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::ALL_GRAPHICS;

    #[test]
    fn test_dirty_slots_take_once() {
        let mut dirty = DirtySlots::all();
        assert!(dirty.take(0));
        assert!(!dirty.take(0));
        assert!(dirty.any());
        assert!(dirty.take(1));
        assert!(!dirty.any());

        dirty.mark_all();
        assert_eq!(dirty, DirtySlots::all());
    }

    #[test]
    fn test_missing_bindings_ignores_uniform() {
        let layout = [
            BindingDesc::new(0, BindingKind::UniformBuffer, STAGES),
            BindingDesc::new(1, BindingKind::CombinedImageSampler, STAGES),
            BindingDesc::new(2, BindingKind::StorageBuffer, STAGES),
        ];
        assert_eq!(missing_bindings(&layout, &[]), [1, 2]);
        assert_eq!(missing_bindings(&layout, &[2]), [1]);
        assert!(missing_bindings(&layout, &[1, 2]).is_empty());
    }

    fn fake_source(mesh: &u64, slot: usize) -> DrawSource {
        DrawSource {
            vertices: vk::Buffer::from_raw(*mesh),
            indices: vk::Buffer::from_raw(*mesh + 100),
            set: vk::DescriptorSet::from_raw(*mesh * 10 + slot as u64),
            index_count: 36,
        }
    }

    #[test]
    fn test_draw_list_keeps_zero_instance_meshes() {
        let mut registry = MeshRegistry::new();
        let a = registry.attach(1u64, 3);
        let b = registry.attach(2u64, 0);
        registry.update(0);

        let draws = draw_calls(&registry, 1, fake_source);
        assert_eq!(draws.len(), 2);
        assert_eq!((draws[0].mesh, draws[0].instance_count), (a, 3));
        assert_eq!((draws[1].mesh, draws[1].instance_count), (b, 0));
        assert_eq!(draws[1].set, vk::DescriptorSet::from_raw(21));
        assert_eq!(draws[1].index_count, 36);
    }

    #[test]
    fn test_detached_mesh_leaves_draw_list_immediately() {
        let mut registry = MeshRegistry::new();
        let a = registry.attach(1u64, 1);
        let b = registry.attach(2u64, 1);
        registry.update(1);
        registry.detach_current(a).unwrap();

        // Still pending destruction, but no longer drawn on either slot.
        assert_eq!(registry.pending_count(), 1);
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            let draws = draw_calls(&registry, slot, fake_source);
            assert_eq!(draws.iter().map(|d| d.mesh).collect::<Vec<_>>(), [b]);
        }
    }

    #[test]
    fn test_complete_mesh_passes() {
        let layout = [
            BindingDesc::new(0, BindingKind::UniformBuffer, STAGES),
            BindingDesc::new(1, BindingKind::CombinedImageSampler, STAGES),
        ];
        assert!(check_complete("mesh", &layout, &[1]).is_ok());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "unbound binding(s) [1]"))]
    fn test_incomplete_mesh_is_rejected() {
        let layout = [
            BindingDesc::new(0, BindingKind::UniformBuffer, STAGES),
            BindingDesc::new(1, BindingKind::CombinedImageSampler, STAGES),
        ];
        let err = check_complete("mesh", &layout, &[]).unwrap_err();
        assert!(matches!(
            err,
            RendererError::IncompleteBindings { ref missing, .. } if missing == &[1]
        ));
    }

    #[test]
    fn test_index_count_must_fit_a_draw() {
        assert_eq!(draw_index_count("cube", 36).unwrap(), 36);
        assert_eq!(draw_index_count("max", u32::MAX as usize).unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert!(draw_index_count("huge", u32::MAX as usize + 1).is_err());
    }

    #[test]
    fn test_binding_zero_must_be_uniform() {
        let ok = [BindingDesc::new(0, BindingKind::UniformBuffer, STAGES)];
        assert!(check_bindings("ok", &ok).is_ok());

        let wrong_kind = [BindingDesc::new(0, BindingKind::StorageBuffer, STAGES)];
        assert!(check_bindings("wrong", &wrong_kind).is_err());

        let absent = [BindingDesc::new(1, BindingKind::CombinedImageSampler, STAGES)];
        assert!(check_bindings("absent", &absent).is_err());
    }
}
