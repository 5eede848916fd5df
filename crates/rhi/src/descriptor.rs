//! Descriptor set layouts, pools and writes.
//!
//! Pipelines describe their shader bindings as a slice of [`BindingDesc`].
//! The same description drives the set layout and the size of the pool each
//! mesh allocates its per-frame sets from.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Descriptor types the engine's shaders use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Uniform buffer
    UniformBuffer,
    /// Storage buffer
    StorageBuffer,
    /// Sampled image with its sampler
    CombinedImageSampler,
    /// Storage image in `GENERAL` layout
    StorageImage,
}

impl BindingKind {
    /// Converts to Vulkan descriptor type.
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            BindingKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        }
    }
}

/// One binding in a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingDesc {
    /// Binding number in the set
    pub binding: u32,
    /// Descriptor type
    pub kind: BindingKind,
    /// Shader stages that read the binding
    pub stages: vk::ShaderStageFlags,
}

impl BindingDesc {
    /// Describe one binding.
    pub const fn new(binding: u32, kind: BindingKind, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            kind,
            stages,
        }
    }

    /// Converts to a single-descriptor Vulkan layout binding.
    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.kind.to_vk())
            .descriptor_count(1)
            .stage_flags(self.stages)
    }
}

/// Pool sizes needed to allocate `set_count` sets of the given layout.
pub fn pool_sizes(bindings: &[BindingDesc], set_count: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        let ty = binding.kind.to_vk();
        match sizes.iter_mut().find(|size| size.ty == ty) {
            Some(size) => size.descriptor_count += set_count,
            None => sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(ty)
                    .descriptor_count(set_count),
            ),
        }
    }
    sizes
}

/// Descriptor set layout that remembers its bindings.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<BindingDesc>,
}

impl DescriptorSetLayout {
    /// Create a layout with one descriptor per binding.
    pub fn new(device: Arc<Device>, bindings: &[BindingDesc]) -> RhiResult<Self> {
        let vk_bindings: Vec<_> = bindings.iter().map(BindingDesc::to_vk).collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };
        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self {
            device,
            layout,
            bindings: bindings.to_vec(),
        })
    }

    /// Get the raw Vulkan descriptor set layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Bindings the layout was created with.
    #[inline]
    pub fn bindings(&self) -> &[BindingDesc] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Pool sized for `max_sets` sets of one layout.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Create a pool holding `max_sets` sets of `layout`.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
        debug!("Created descriptor pool: max_sets={}", max_sets);

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Pool sized for exactly `set_count` sets of `layout`.
    pub fn for_layout(
        device: Arc<Device>,
        layout: &DescriptorSetLayout,
        set_count: u32,
    ) -> RhiResult<Self> {
        Self::new(device, set_count, &pool_sizes(layout.bindings(), set_count))
    }

    /// Allocate `N` sets that all use `layout`.
    pub fn allocate<const N: usize>(
        &self,
        layout: &DescriptorSetLayout,
    ) -> RhiResult<[vk::DescriptorSet; N]> {
        let sets = self.allocate_many(layout, N)?;
        let count = sets.len();
        sets.try_into().map_err(|_| {
            RhiError::InvalidArgument(format!("expected {} descriptor sets, got {}", N, count))
        })
    }

    /// Allocate `count` sets that all use `layout`, when the count is only
    /// known at runtime.
    pub fn allocate_many(
        &self,
        layout: &DescriptorSetLayout,
        count: usize,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let layouts = vec![layout.handle(); count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }

    /// Return every set to the pool.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    /// Get the raw Vulkan descriptor pool handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Number of sets the pool can hold.
    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool (max_sets={})", self.max_sets);
    }
}

#[derive(Clone, Copy, Debug)]
enum PendingWrite {
    Buffer {
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
    Image {
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
}

/// Batches descriptor writes and applies them to one set.
#[derive(Clone, Debug, Default)]
pub struct DescriptorWriter {
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    /// Empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a uniform or storage buffer write.
    pub fn buffer(mut self, binding: u32, kind: BindingKind, buffer: vk::Buffer, range: vk::DeviceSize) -> Self {
        self.writes.push(PendingWrite::Buffer {
            binding,
            ty: kind.to_vk(),
            info: vk::DescriptorBufferInfo::default()
                .buffer(buffer)
                .offset(0)
                .range(range),
        });
        self
    }

    /// Queue a combined image sampler write; the image must be shader-readable.
    pub fn sampled_image(
        mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Self {
        self.writes.push(PendingWrite::Image {
            binding,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            info: vk::DescriptorImageInfo::default()
                .image_view(view)
                .sampler(sampler)
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        });
        self
    }

    /// Queue a storage image write; the image must be in `GENERAL`.
    pub fn storage_image(mut self, binding: u32, view: vk::ImageView) -> Self {
        self.writes.push(PendingWrite::Image {
            binding,
            ty: vk::DescriptorType::STORAGE_IMAGE,
            info: vk::DescriptorImageInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::GENERAL),
        });
        self
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether no writes are queued.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// The set must not be in use by a pending command buffer.
    pub fn apply(&self, device: &Device, set: vk::DescriptorSet) {
        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .writes
            .iter()
            .map(|write| match write {
                PendingWrite::Buffer { binding, ty, info } => vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .buffer_info(std::slice::from_ref(info)),
                PendingWrite::Image { binding, ty, info } => vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .image_info(std::slice::from_ref(info)),
            })
            .collect();

        unsafe { device.handle().update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_desc_to_vk() {
        let desc = BindingDesc::new(
            2,
            BindingKind::CombinedImageSampler,
            vk::ShaderStageFlags::FRAGMENT,
        );
        let binding = desc.to_vk();
        assert_eq!(binding.binding, 2);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_pool_sizes_merge_by_type() {
        let bindings = [
            BindingDesc::new(0, BindingKind::UniformBuffer, vk::ShaderStageFlags::VERTEX),
            BindingDesc::new(1, BindingKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT),
            BindingDesc::new(2, BindingKind::UniformBuffer, vk::ShaderStageFlags::FRAGMENT),
        ];
        let sizes = pool_sizes(&bindings, 2);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 4);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 2);
    }

    #[test]
    fn test_pool_sizes_empty_layout() {
        assert!(pool_sizes(&[], 2).is_empty());
    }

    #[test]
    fn test_writer_collects_writes() {
        let writer = DescriptorWriter::new()
            .buffer(0, BindingKind::UniformBuffer, vk::Buffer::null(), 64)
            .sampled_image(1, vk::ImageView::null(), vk::Sampler::null())
            .storage_image(2, vk::ImageView::null());
        assert_eq!(writer.len(), 3);
        assert!(!writer.is_empty());
    }
}
