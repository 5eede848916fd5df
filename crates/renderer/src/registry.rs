//! Live mesh set of one pipeline, with frame-delayed destruction.
//!
//! Detaching removes a mesh from the draw list at once but parks its GPU
//! objects in a [`DeferredQueue`] tagged with the slot that was current at
//! detach time. [`MeshRegistry::update`] hands them back only when that slot
//! comes around again, after its fence has been waited on.

use std::collections::BTreeMap;
use std::fmt;

use ember_core::DeferredQueue;
use tracing::debug;

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::{RendererError, RendererResult};

/// Opaque, monotonically increasing mesh identifier. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeshId(u64);

impl MeshId {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh#{}", self.0)
    }
}

struct Entry<M> {
    mesh: M,
    instance_count: u32,
}

/// Live meshes with instance counts, plus detached meshes awaiting release.
///
/// Iteration follows attach order.
pub struct MeshRegistry<M> {
    next_id: u64,
    live: BTreeMap<MeshId, Entry<M>>,
    pending: DeferredQueue<M>,
    current_slot: usize,
}

impl<M> MeshRegistry<M> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            live: BTreeMap::new(),
            pending: DeferredQueue::new(),
            current_slot: 0,
        }
    }

    /// Attach a mesh under a fresh id.
    pub fn attach(&mut self, mesh: M, instance_count: u32) -> MeshId {
        let id = MeshId(self.next_id);
        self.next_id += 1;
        self.live.insert(
            id,
            Entry {
                mesh,
                instance_count,
            },
        );
        id
    }

    /// Stop drawing `id` now; its objects are released by a later
    /// [`update`](Self::update) on `slot`.
    pub fn detach(&mut self, id: MeshId, slot: usize) -> RendererResult<()> {
        debug_assert!(slot < MAX_FRAMES_IN_FLIGHT, "frame slot {} out of range", slot);
        let entry = self.live.remove(&id);
        debug_assert!(entry.is_some(), "{} is not registered", id);
        let entry = entry.ok_or(RendererError::UnknownMesh(id.0))?;
        self.pending.push(entry.mesh, slot);
        debug!("{} detached at slot {} ({} pending)", id, slot, self.pending.len());
        Ok(())
    }

    /// Detach at the slot last passed to [`update`](Self::update).
    pub fn detach_current(&mut self, id: MeshId) -> RendererResult<()> {
        self.detach(id, self.current_slot)
    }

    pub fn set_instance_count(&mut self, id: MeshId, instance_count: u32) -> RendererResult<()> {
        let entry = self.live.get_mut(&id);
        debug_assert!(entry.is_some(), "{} is not registered", id);
        let entry = entry.ok_or(RendererError::UnknownMesh(id.0))?;
        entry.instance_count = instance_count;
        Ok(())
    }

    /// Start of `slot`'s reuse: returns meshes whose destruction is now safe,
    /// oldest first.
    pub fn update(&mut self, slot: usize) -> Vec<M> {
        self.current_slot = slot;
        let released = self.pending.collect(slot);
        if !released.is_empty() {
            debug!("Releasing {} detached mesh(es) on slot {}", released.len(), slot);
        }
        released
    }

    /// Live meshes in id order with their instance counts.
    pub fn draws(&self) -> impl Iterator<Item = (MeshId, &M, u32)> {
        self.live
            .iter()
            .map(|(id, entry)| (*id, &entry.mesh, entry.instance_count))
    }

    pub fn get(&self, id: MeshId) -> Option<&M> {
        self.live.get(&id).map(|entry| &entry.mesh)
    }

    pub fn get_mut(&mut self, id: MeshId) -> Option<&mut M> {
        self.live.get_mut(&id).map(|entry| &mut entry.mesh)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (MeshId, &mut M)> {
        self.live.iter_mut().map(|(id, entry)| (*id, &mut entry.mesh))
    }

    pub fn instance_count(&self, id: MeshId) -> Option<u32> {
        self.live.get(&id).map(|entry| entry.instance_count)
    }

    pub fn contains(&self, id: MeshId) -> bool {
        self.live.contains_key(&id)
    }

    /// Slot passed to the latest update.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Detached meshes not yet released.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Everything, live and pending. Only valid once the device is idle.
    pub fn drain_all(&mut self) -> Vec<M> {
        let mut all = self.pending.drain_all();
        all.extend(std::mem::take(&mut self.live).into_values().map(|entry| entry.mesh));
        all
    }
}

impl<M> Default for MeshRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
