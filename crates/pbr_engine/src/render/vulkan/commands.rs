//! Command buffer management
//!
//! Each command buffer owns its command pool so it can be reset independently.
//! [`UploadContext`] provides the blocking one-shot submission used for texture
//! uploads and startup preprocessing.

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};
use super::sync::FRAME_OVERLAP;

fn create_pool(device: &Device, queue_family_index: u32) -> VulkanResult<vk::CommandPool> {
    let pool_create_info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(queue_family_index);

    unsafe {
        device.create_command_pool(&pool_create_info, None)
            .map_err(VulkanError::Api)
    }
}

fn allocate_primary(device: &Device, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe {
        device.allocate_command_buffers(&alloc_info)
            .map_err(VulkanError::Api)?
    };

    buffers.into_iter().next().ok_or(VulkanError::InvalidOperation {
        reason: "driver returned no command buffer".to_string(),
    })
}

/// Reset `cmd` and begin a one-time-submit recording
pub fn begin_one_time(device: &Device, cmd: vk::CommandBuffer) -> VulkanResult<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    unsafe {
        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .map_err(VulkanError::Api)?;
        device.begin_command_buffer(cmd, &begin_info)
            .map_err(VulkanError::Api)
    }
}

/// Finish recording `cmd`
pub fn end(device: &Device, cmd: vk::CommandBuffer) -> VulkanResult<()> {
    unsafe {
        device.end_command_buffer(cmd)
            .map_err(VulkanError::Api)
    }
}

/// A single command buffer with its own pool
pub struct CommandBuffer {
    device: Device,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Create a pool on `queue_family_index` and allocate one primary buffer
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool = create_pool(&device, queue_family_index)?;
        let buffer = match allocate_primary(&device, pool) {
            Ok(buffer) => buffer,
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(e);
            }
        };

        Ok(Self { device, pool, buffer })
    }

    /// Command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Reset the owning pool
    pub fn reset_pool(&self) -> VulkanResult<()> {
        unsafe {
            self.device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// One command buffer per frame slot, each with its own pool
pub struct FrameBasedCommandBuffer {
    device: Device,
    pools: [vk::CommandPool; FRAME_OVERLAP],
    buffers: [vk::CommandBuffer; FRAME_OVERLAP],
}

impl FrameBasedCommandBuffer {
    /// Create a pool and a primary buffer for every frame slot
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let mut pools = [vk::CommandPool::null(); FRAME_OVERLAP];
        let mut buffers = [vk::CommandBuffer::null(); FRAME_OVERLAP];

        for slot in 0..FRAME_OVERLAP {
            let created = create_pool(&device, queue_family_index).and_then(|pool| {
                pools[slot] = pool;
                allocate_primary(&device, pool)
            });
            match created {
                Ok(buffer) => buffers[slot] = buffer,
                Err(e) => {
                    for pool in pools.iter().filter(|p| **p != vk::CommandPool::null()) {
                        unsafe { device.destroy_command_pool(*pool, None) };
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self { device, pools, buffers })
    }

    /// Command buffer of a slot
    pub fn handle(&self, frame_index: usize) -> vk::CommandBuffer {
        self.buffers[frame_index % FRAME_OVERLAP]
    }
}

impl Drop for FrameBasedCommandBuffer {
    fn drop(&mut self) {
        unsafe {
            for pool in self.pools {
                self.device.destroy_command_pool(pool, None);
            }
        }
    }
}

/// Pool and fence for blocking one-shot submissions
pub struct UploadContext {
    device: Device,
    pool: vk::CommandPool,
    fence: vk::Fence,
}

impl UploadContext {
    /// Create the upload pool on `queue_family_index`
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool = create_pool(&device, queue_family_index)?;
        let fence = match unsafe { device.create_fence(&vk::FenceCreateInfo::builder(), None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self { device, pool, fence })
    }

    /// Record commands with `record`, submit them to `queue` and block until they finish
    pub fn submit_with<F>(&self, queue: vk::Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer) -> VulkanResult<()>,
    {
        let cmd = allocate_primary(&self.device, self.pool)?;

        let result = begin_one_time(&self.device, cmd)
            .and_then(|()| record(&self.device, cmd))
            .and_then(|()| end(&self.device, cmd))
            .and_then(|()| self.submit_and_wait(queue, cmd));

        unsafe {
            self.device.free_command_buffers(self.pool, &[cmd]);
            self.device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .map_err(VulkanError::Api)?;
        }

        result
    }

    /// Submit an already recorded command buffer and block until it finishes
    pub fn submit_recorded(&self, queue: vk::Queue, command_buffer: &CommandBuffer) -> VulkanResult<()> {
        self.submit_and_wait(queue, command_buffer.handle())?;
        command_buffer.reset_pool()
    }

    fn submit_and_wait(&self, queue: vk::Queue, cmd: vk::CommandBuffer) -> VulkanResult<()> {
        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();

        unsafe {
            self.device.queue_submit(queue, &[submit], self.fence)
                .map_err(VulkanError::Api)?;
            self.device.wait_for_fences(&[self.fence], true, u64::MAX)
                .map_err(VulkanError::Api)?;
            self.device.reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for UploadContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}
