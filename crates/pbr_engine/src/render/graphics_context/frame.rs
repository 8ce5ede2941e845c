//! Frame sequencing and submission

use ash::{vk, Device};

use crate::foundation::collections::{CommandBufferHandle, FenceHandle, FrameCommandBufferHandle, SemaphoreHandle};
use crate::render::vulkan::context::{VulkanError, VulkanResult};
use crate::render::vulkan::swapchain::{classify_acquire, present_needs_rebuild, AcquireOutcome};
use crate::render::vulkan::sync::FrameToken;
use super::GraphicsContext;

impl GraphicsContext {
    /// Wait for the fence of the slot `frame_offset` frames ahead, then reset it
    ///
    /// Times out after the configured fence timeout. The returned token
    /// authorises descriptor buffer writes for the current slot until the next
    /// [`present`](Self::present).
    pub fn wait_on_fence(&self, fence: FenceHandle, frame_offset: u64) -> VulkanResult<FrameToken> {
        let fences = self.fences.get(fence).ok_or(VulkanError::InvalidHandle("fence"))?;
        let index = self.frames.index_with_offset(frame_offset);

        fences.wait_and_reset(index, self.config.fence_timeout_ns)?;

        Ok(self.frames.issue_token(frame_offset, fence))
    }

    /// Acquire the next swapchain image, signalling `image_available` when it is ready
    ///
    /// An out-of-date swapchain is rebuilt on the spot and the acquire retried
    /// once. A suboptimal one is used for this frame and rebuilt after present.
    pub fn new_frame(&mut self, image_available: SemaphoreHandle) -> VulkanResult<u32> {
        let semaphore = self
            .semaphores
            .get(image_available)
            .ok_or(VulkanError::InvalidHandle("semaphore"))?
            .handle(self.frames.current_index());
        let timeout = self.config.fence_timeout_ns;

        let mut outcome = classify_acquire(self.swapchain()?.acquire_next_image(semaphore, timeout))?;
        if outcome == AcquireOutcome::OutOfDate {
            self.logger.info("Swapchain out of date on acquire, rebuilding");
            self.rebuild_swapchain()?;
            outcome = classify_acquire(self.swapchain()?.acquire_next_image(semaphore, timeout))?;
        }

        match outcome {
            AcquireOutcome::Ready { image_index, suboptimal } => {
                if suboptimal {
                    self.logger.info("Swapchain suboptimal, rebuilding after present");
                    self.resize.request_rebuild();
                }
                Ok(image_index)
            }
            AcquireOutcome::OutOfDate => Err(VulkanError::InvalidOperation {
                reason: "swapchain still out of date after rebuild".to_string(),
            }),
        }
    }

    /// Submit this frame's command buffer to the graphics queue
    ///
    /// Waits on `wait` at color-attachment output, signals `signal` and the
    /// current slot of `fence`. Later tokens for this slot must come from
    /// waiting on `fence`.
    pub fn submit(
        &mut self,
        command_buffer: FrameCommandBufferHandle,
        wait: SemaphoreHandle,
        signal: SemaphoreHandle,
        fence: FenceHandle,
    ) -> VulkanResult<()> {
        let index = self.frames.current_index();

        let command_buffers = [self
            .frame_command_buffers
            .get(command_buffer)
            .ok_or(VulkanError::InvalidHandle("frame command buffer"))?
            .handle(index)];
        let wait_semaphores = [self.semaphores.get(wait).ok_or(VulkanError::InvalidHandle("semaphore"))?.handle(index)];
        let signal_semaphores = [self.semaphores.get(signal).ok_or(VulkanError::InvalidHandle("semaphore"))?.handle(index)];
        let fence_handle = fence;
        let fence = self.fences.get(fence).ok_or(VulkanError::InvalidHandle("fence"))?.handle(index);
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device.device.queue_submit(self.device.graphics_queue, &[submit_info], fence)
                .map_err(VulkanError::Api)?;
        }

        self.frames.record_submit(fence_handle);
        Ok(())
    }

    /// Present `image_index` once `render_finished` signals, then advance the frame
    ///
    /// A stale swapchain, or one flagged suboptimal at acquire, is rebuilt here.
    pub fn present(&mut self, image_index: u32, render_finished: SemaphoreHandle) -> VulkanResult<()> {
        let semaphore = self
            .semaphores
            .get(render_finished)
            .ok_or(VulkanError::InvalidHandle("semaphore"))?
            .handle(self.frames.current_index());

        let result = self.swapchain()?.present(self.device.present_queue, image_index, semaphore);
        self.frames.advance();

        if present_needs_rebuild(result)? || self.resize.rebuild_pending() {
            self.logger.info("Swapchain stale on present, rebuilding");
            self.rebuild_swapchain()?;
        }

        Ok(())
    }

    /// Submit a recorded command buffer and block until the GPU finishes it
    ///
    /// Resets the buffer's pool afterwards. Startup use only.
    pub fn immediate_submit(&self, command_buffer: CommandBufferHandle) -> VulkanResult<()> {
        let command_buffer = self
            .command_buffers
            .get(command_buffer)
            .ok_or(VulkanError::InvalidHandle("command buffer"))?;

        self.upload.submit_recorded(self.device.graphics_queue, command_buffer)
    }

    /// Record commands with `record` into a one-shot buffer, submit and block
    pub fn immediate_submit_with<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer) -> VulkanResult<()>,
    {
        self.upload.submit_with(self.device.graphics_queue, record)
    }
}
