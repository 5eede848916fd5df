//! Priority-ordered set of pipelines driven by the orchestrator.
//!
//! Pipelines are kept sorted by `(priority, registration order)`, lowest
//! first, so draw order within a pass is deterministic: a skybox at a low
//! priority draws before opaque meshes, UI pipelines draw last.

use std::any::type_name;
use std::marker::PhantomData;

use ash::vk;
use tracing::info;

use ember_resources::MeshData;
use ember_rhi::command::CommandBuffer;
use ember_rhi::pipeline::RenderTargetLayout;

use crate::error::{RendererError, RendererResult};
use crate::pass::PassKind;
use crate::pipeline_slot::{GraphicsPipelineSlot, PipelineStrategy, RenderPipeline};
use crate::registry::MeshId;

/// Typed reference to a pipeline in a [`PipelineRegistry`].
pub struct PipelineHandle<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for PipelineHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PipelineHandle<T> {}

impl<T> std::fmt::Debug for PipelineHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PipelineHandle<{}>({})", type_name::<T>(), self.id)
    }
}

impl<T> PartialEq for PipelineHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for PipelineHandle<T> {}

/// Render target layouts pipelines are built against, per pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassTargets {
    pub geometry: RenderTargetLayout,
    pub overlay: RenderTargetLayout,
}

impl PassTargets {
    /// Layout of the targets `pass` draws into.
    pub fn for_pass(&self, pass: PassKind) -> RenderTargetLayout {
        match pass {
            PassKind::Overlay | PassKind::DebugUi => self.overlay,
            _ => self.geometry,
        }
    }
}

struct Registered {
    id: u64,
    priority: i32,
    pipeline: Box<dyn RenderPipeline>,
}

/// Position at which an entry with `priority` goes so the list stays sorted
/// and equal priorities keep registration order.
pub fn insertion_index(priorities: &[i32], priority: i32) -> usize {
    priorities.partition_point(|&existing| existing <= priority)
}

/// Graphics pipelines ordered by priority, drawn in their passes each frame.
///
/// Pipelines are never removed. Each one lives until the registry drops,
/// which happens after the device is idle.
pub struct PipelineRegistry {
    entries: Vec<Registered>,
    next_id: u64,
    targets: Option<PassTargets>,
    viewport: Option<vk::Extent2D>,
    current_slot: usize,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
            targets: None,
            viewport: None,
            current_slot: 0,
        }
    }

    /// Register `pipeline`, allocating it right away when target layouts are
    /// known. The pipeline is brought to the current slot before it is
    /// returned, so work it tags with a slot is tagged with the right one
    /// even when it is registered mid-frame.
    pub fn add_pipeline<T: RenderPipeline>(
        &mut self,
        mut pipeline: T,
        priority: i32,
    ) -> RendererResult<PipelineHandle<T>> {
        if let Some(targets) = self.targets {
            pipeline.allocate(targets.for_pass(pipeline.pass()))?;
        }
        if let Some(viewport) = self.viewport {
            pipeline.resize(viewport);
        }
        pipeline.update(self.current_slot)?;

        let id = self.next_id;
        self.next_id += 1;
        info!(
            "Pipeline '{}' registered (priority {}, {} pass)",
            pipeline.name(),
            priority,
            pipeline.pass().name()
        );

        let priorities: Vec<i32> = self.entries.iter().map(|entry| entry.priority).collect();
        let index = insertion_index(&priorities, priority);
        self.entries.insert(
            index,
            Registered {
                id,
                priority,
                pipeline: Box::new(pipeline),
            },
        );
        Ok(PipelineHandle {
            id,
            _marker: PhantomData,
        })
    }

    /// Typed access to a registered pipeline.
    pub fn get_mut<T: RenderPipeline>(&mut self, handle: PipelineHandle<T>) -> RendererResult<&mut T> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == handle.id)
            .and_then(|entry| entry.pipeline.as_any_mut().downcast_mut::<T>())
            .ok_or_else(|| RendererError::UnknownPipeline(format!("{:?}", handle)))
    }

    /// [`GraphicsPipelineSlot::attach_model`] on the pipeline behind `handle`.
    pub fn attach_model<S: PipelineStrategy>(
        &mut self,
        handle: PipelineHandle<GraphicsPipelineSlot<S>>,
        mesh: &MeshData<S::Vertex>,
        instance_count: u32,
    ) -> RendererResult<MeshId> {
        self.get_mut(handle)?.attach_model(mesh, instance_count)
    }

    /// Detach a mesh; its GPU data is released once its slot comes round.
    pub fn detach_model<S: PipelineStrategy>(
        &mut self,
        handle: PipelineHandle<GraphicsPipelineSlot<S>>,
        id: MeshId,
    ) -> RendererResult<()> {
        self.get_mut(handle)?.detach_model(id)
    }

    pub fn set_instance_count<S: PipelineStrategy>(
        &mut self,
        handle: PipelineHandle<GraphicsPipelineSlot<S>>,
        id: MeshId,
        instance_count: u32,
    ) -> RendererResult<()> {
        self.get_mut(handle)?.set_instance_count(id, instance_count)
    }

    /// Write a mesh's uniforms for the current frame slot.
    pub fn update_uniform<S: PipelineStrategy>(
        &mut self,
        handle: PipelineHandle<GraphicsPipelineSlot<S>>,
        id: MeshId,
        data: &S::Uniform,
    ) -> RendererResult<()> {
        self.get_mut(handle)?.update_uniform(id, data)
    }

    /// (Re)build every pipeline whose target layout changed.
    pub fn allocate_all(&mut self, targets: PassTargets) -> RendererResult<()> {
        for entry in &mut self.entries {
            let pass = entry.pipeline.pass();
            entry.pipeline.allocate(targets.for_pass(pass))?;
        }
        self.targets = Some(targets);
        Ok(())
    }

    /// Tell every pipeline the swapchain extent changed.
    pub fn resize_all(&mut self, extent: vk::Extent2D) {
        for entry in &mut self.entries {
            entry.pipeline.resize(extent);
        }
        self.viewport = Some(extent);
    }

    /// Start of `slot`'s reuse, before the application runs.
    pub fn update_all(&mut self, slot: usize) -> RendererResult<()> {
        self.current_slot = slot;
        for entry in &mut self.entries {
            entry.pipeline.update(slot)?;
        }
        Ok(())
    }

    /// Record every pipeline's staged uploads for `slot`, in priority order.
    /// Returns whether any pipeline recorded a copy.
    pub fn record_transfers_all(&mut self, cmd: &CommandBuffer, slot: usize) -> RendererResult<bool> {
        let mut recorded = false;
        for entry in &mut self.entries {
            recorded |= entry.pipeline.record_transfers(cmd, slot)?;
        }
        Ok(recorded)
    }

    /// Record every pipeline targeting `pass`, in priority order.
    pub fn record_all(&self, cmd: &CommandBuffer, pass: PassKind, slot: usize, extent: vk::Extent2D) {
        for entry in self.entries.iter().filter(|entry| entry.pipeline.pass() == pass) {
            entry.pipeline.record(cmd, slot, extent);
        }
    }

    /// Slot of the frame currently being prepared.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Pipeline names in draw order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.pipeline.name()).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
