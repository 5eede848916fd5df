//! Device-local buffers that grow in power-of-two steps.
//!
//! Each buffer keeps a persistently mapped staging buffer of the same
//! capacity. [`GrowableBuffer::write`] only touches host memory; the copy to
//! device memory is recorded into a frame's command buffer by
//! [`GrowableBuffer::record_upload`], so per-frame updates never submit or
//! wait on their own.
//!
//! Growing never resizes in place. New buffers are allocated and the old pair
//! is handed back to the caller, who must keep it alive until every frame that
//! may still reference it has retired.

use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use tracing::{debug, trace};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::RhiResult;

/// Capacity (in elements) needed to hold `requested` elements.
///
/// Unchanged while `requested` fits; otherwise the next power of two at or
/// above `requested`.
pub fn grown_capacity(current: usize, requested: usize) -> usize {
    if requested <= current {
        current
    } else {
        requested.next_power_of_two()
    }
}

/// Buffers replaced by a growth. In-flight frames may still read them.
pub struct Orphaned {
    /// Old device-local buffer
    pub buffer: Buffer,
    /// Old staging buffer
    pub staging: Buffer,
}

impl Orphaned {
    /// Both buffers, for deferred release.
    pub fn into_buffers(self) -> [Buffer; 2] {
        [self.buffer, self.staging]
    }
}

/// Device-local buffer with a mapped staging twin, resized by doubling.
pub struct GrowableBuffer<T: Pod> {
    device: Arc<Device>,
    buffer: Buffer,
    staging: Buffer,
    capacity: usize,
    len: usize,
    /// Bytes staged since the last recorded copy.
    pending: Option<vk::DeviceSize>,
    _marker: PhantomData<T>,
}

impl<T: Pod> GrowableBuffer<T> {
    /// Room for at least `capacity` elements, rounded up to a power of two.
    pub fn new(device: Arc<Device>, usage: BufferUsage, capacity: usize) -> RhiResult<Self> {
        let capacity = capacity.max(1).next_power_of_two();
        let (buffer, staging) = allocate_pair::<T>(&device, usage, capacity)?;
        Ok(Self {
            device,
            buffer,
            staging,
            capacity,
            len: 0,
            pending: None,
            _marker: PhantomData,
        })
    }

    /// Stage `data` as the new contents. Device memory changes only once the
    /// copy recorded by [`record_upload`](Self::record_upload) executes.
    ///
    /// Returns the previous buffers when the contents no longer fit; every
    /// later draw must use [`GrowableBuffer::buffer`]. The staging buffer of
    /// the current capacity must not be read by a copy still in flight.
    pub fn write(&mut self, data: &[T]) -> RhiResult<Option<Orphaned>> {
        let capacity = grown_capacity(self.capacity, data.len());
        let orphan = if capacity != self.capacity {
            let usage = self.buffer.usage();
            let (buffer, staging) = allocate_pair::<T>(&self.device, usage, capacity)?;
            debug!(
                "Growing {} buffer: {} -> {} elements",
                usage.name(),
                self.capacity,
                capacity
            );
            self.capacity = capacity;
            Some(Orphaned {
                buffer: std::mem::replace(&mut self.buffer, buffer),
                staging: std::mem::replace(&mut self.staging, staging),
            })
        } else {
            None
        };

        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.staging.write_data(0, bytes)?;
        self.len = data.len();
        self.pending = (!bytes.is_empty()).then_some(bytes.len() as vk::DeviceSize);
        Ok(orphan)
    }

    /// Record the copy of staged contents into the device buffer. The caller
    /// records the barrier that makes it visible to the reading stage.
    /// Returns whether a copy was recorded.
    pub fn record_upload(&mut self, cmd: &CommandBuffer) -> bool {
        match self.pending.take() {
            Some(size) => {
                cmd.copy_buffer(self.staging.handle(), self.buffer.handle(), size);
                trace!("Recorded {} byte {} upload", size, self.buffer.usage().name());
                true
            }
            None => false,
        }
    }

    /// Whether staged contents are waiting for [`record_upload`](Self::record_upload).
    #[inline]
    pub fn has_pending_upload(&self) -> bool {
        self.pending.is_some()
    }

    /// Current device-local buffer.
    #[inline]
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Get the raw Vulkan handle of the device-local buffer.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Capacity in elements.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Elements written by the last [`write`](Self::write).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn allocate_pair<T>(device: &Arc<Device>, usage: BufferUsage, capacity: usize) -> RhiResult<(Buffer, Buffer)> {
    let size = byte_size::<T>(capacity);
    let buffer = Buffer::new(device.clone(), usage, size)?;
    let staging = Buffer::new(device.clone(), BufferUsage::Staging, size)?;
    Ok((buffer, staging))
}

fn byte_size<T>(elements: usize) -> vk::DeviceSize {
    (elements * size_of::<T>()).max(1) as vk::DeviceSize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_capacity_does_not_grow() {
        assert_eq!(grown_capacity(4, 4), 4);
        assert_eq!(grown_capacity(4, 0), 4);
        assert_eq!(grown_capacity(4, 3), 4);
    }

    #[test]
    fn test_one_past_capacity_grows() {
        assert_eq!(grown_capacity(4, 5), 8);
    }

    #[test]
    fn test_double_capacity() {
        assert_eq!(grown_capacity(8, 16), 16);
        assert_eq!(grown_capacity(8, 17), 32);
    }

    #[test]
    fn test_non_power_of_two_current() {
        assert_eq!(grown_capacity(6, 6), 6);
        assert_eq!(grown_capacity(6, 7), 8);
    }

    #[test]
    fn test_byte_size() {
        assert_eq!(byte_size::<u32>(4), 16);
        assert_eq!(byte_size::<u32>(0), 1);
    }
}
