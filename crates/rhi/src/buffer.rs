//! GPU buffers backed by gpu-allocator.
//!
//! Geometry and storage buffers live in device-local memory and are only ever
//! filled through a staging copy (see [`crate::upload`]). Uniform, staging and
//! readback buffers are host-visible and persistently mapped.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Buffer usage type.
///
/// Decides the Vulkan usage flags and where gpu-allocator places the memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex buffer, device-local
    Vertex,
    /// Index buffer, device-local
    Index,
    /// Uniform buffer, host-visible and written every frame
    Uniform,
    /// Storage buffer, device-local
    Storage,
    /// Host-visible copy source.
    Staging,
    /// Host-visible copy destination for reading results back.
    Readback,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        let transfer = vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | transfer,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER | transfer,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER | transfer,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Returns the memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index | BufferUsage::Storage => {
                MemoryLocation::GpuOnly
            }
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
            BufferUsage::Readback => MemoryLocation::GpuToCpu,
        }
    }

    /// Whether the CPU can map this buffer.
    #[inline]
    pub fn is_host_visible(self) -> bool {
        self.memory_location() != MemoryLocation::GpuOnly
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// GPU buffer wrapper with gpu-allocator managed memory.
///
/// Host-visible buffers stay mapped for their whole life. The allocation is
/// returned to the allocator when the buffer is dropped, so the buffer must
/// not be referenced by a command buffer still executing at that point.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Create a buffer of `size` bytes.
    ///
    /// # Errors
    /// Returns [`RhiError::InvalidArgument`] for a zero size, or the allocator
    /// or Vulkan error if creation fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "{} buffer size must be greater than 0",
                usage.name()
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device
            .lock_allocator()
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: usage.name(),
                        requirements,
                        location: usage.memory_location(),
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(RhiError::from)
            });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Host-visible buffer initialised with `data`.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Copy `data` into the mapped memory at `offset`.
    ///
    /// Fails for device-local buffers and for writes past the end.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_range(offset, data.len() as vk::DeviceSize)?;
        let ptr = self.mapped_ptr()?;

        unsafe {
            let dst = ptr.add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    /// Copy `len` bytes at `offset` out of the mapped memory.
    pub fn read_data(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        self.check_range(offset, len as vk::DeviceSize)?;
        let ptr = self.mapped_ptr()?;

        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.add(offset as usize), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    fn check_range(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> RhiResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(RhiError::InvalidArgument(format!(
                "range {}+{} exceeds {} buffer of {} bytes",
                offset,
                len,
                self.usage.name(),
                self.size
            ))),
        }
    }

    fn mapped_ptr(&self) -> RhiResult<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .map(|ptr| ptr.as_ptr() as *mut u8)
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!(
                    "{} buffer is not host visible",
                    self.usage.name()
                ))
            })
    }

    /// Get the raw Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage this buffer was created with.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking {} buffer allocation: {}", self.usage.name(), e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed {} buffer ({} bytes)", self.usage.name(), self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_buffers_are_device_local() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index, BufferUsage::Storage] {
            assert_eq!(usage.memory_location(), MemoryLocation::GpuOnly);
            assert!(!usage.is_host_visible());
            assert!(
                usage
                    .to_vk_usage()
                    .contains(vk::BufferUsageFlags::TRANSFER_DST)
            );
        }
    }

    #[test]
    fn test_host_visible_usages() {
        assert_eq!(
            BufferUsage::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::Uniform.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::Readback.memory_location(),
            MemoryLocation::GpuToCpu
        );
        assert!(BufferUsage::Readback.is_host_visible());
    }

    #[test]
    fn test_usage_flags() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            BufferUsage::Readback.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn test_usage_names() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Readback.name(), "readback");
    }
}
