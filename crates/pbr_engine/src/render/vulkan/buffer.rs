//! Host-visible GPU buffers
//!
//! All buffers here are allocated through VMA in host-visible, coherent memory
//! and filled with a plain map/copy/unmap.

use std::sync::Arc;

use ash::vk;
use vk_mem::Alloc;

use super::context::{VulkanError, VulkanResult};

/// Buffer with its VMA allocation, freed on drop
pub struct AllocatedBuffer {
    allocator: Arc<vk_mem::Allocator>,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
}

impl AllocatedBuffer {
    /// Allocate a CPU-writable buffer of `size` bytes
    pub fn host_visible(
        allocator: Arc<vk_mem::Allocator>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "cannot create an empty buffer".to_string(),
            });
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ..Default::default()
        };

        let (buffer, allocation) = unsafe {
            allocator.create_buffer(&buffer_info, &allocation_info)
                .map_err(VulkanError::Allocation)?
        };

        Ok(Self { allocator, buffer, allocation, size })
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Map the whole buffer; the mapping is released when the guard drops
    pub fn map(&mut self) -> VulkanResult<MappedMemory<'_>> {
        let ptr = unsafe {
            self.allocator.map_memory(&mut self.allocation)
                .map_err(VulkanError::Api)?
        };
        let len = self.size as usize;

        Ok(MappedMemory {
            allocator: &self.allocator,
            allocation: &mut self.allocation,
            ptr,
            len,
        })
    }

    /// Copy `data` into the buffer at `offset`
    pub fn write(&mut self, offset: usize, data: &[u8]) -> VulkanResult<()> {
        let end = offset.checked_add(data.len()).unwrap_or(usize::MAX);
        if end > self.size as usize {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at offset {offset} overflows a {} byte buffer", data.len(), self.size),
            });
        }

        let mut mapped = self.map()?;
        mapped[offset..end].copy_from_slice(data);
        mapped.unmap();
        Ok(())
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        unsafe {
            self.allocator.destroy_buffer(self.buffer, &mut self.allocation);
        }
    }
}

/// Host mapping of a buffer, unmapped on drop
pub struct MappedMemory<'a> {
    allocator: &'a vk_mem::Allocator,
    allocation: &'a mut vk_mem::Allocation,
    ptr: *mut u8,
    len: usize,
}

impl MappedMemory<'_> {
    /// Release the mapping
    pub fn unmap(self) {}
}

impl std::ops::Deref for MappedMemory<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl std::ops::DerefMut for MappedMemory<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        unsafe {
            self.allocator.unmap_memory(self.allocation);
        }
    }
}

/// Vertex data uploaded once at creation
pub struct VertexBuffer {
    buffer: AllocatedBuffer,
}

impl VertexBuffer {
    /// Create a vertex buffer holding `data`
    pub fn new(allocator: Arc<vk_mem::Allocator>, data: &[u8]) -> VulkanResult<Self> {
        let mut buffer = AllocatedBuffer::host_visible(
            allocator,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        buffer.write(0, data)?;
        Ok(Self { buffer })
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}

/// Staging buffer for uploads to images
pub fn staging_buffer(allocator: Arc<vk_mem::Allocator>, data: &[u8]) -> VulkanResult<AllocatedBuffer> {
    let mut buffer = AllocatedBuffer::host_visible(
        allocator,
        data.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    buffer.write(0, data)?;
    Ok(buffer)
}
