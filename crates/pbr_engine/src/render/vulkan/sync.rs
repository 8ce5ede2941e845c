//! Frame pacing and synchronization primitives
//!
//! Every per-frame object exists [`FRAME_OVERLAP`] times. The slot used for a
//! frame is `(frame_counter + offset) % FRAME_OVERLAP`, and the CPU may only
//! touch a slot after waiting on that slot's fence. Waiting yields a
//! [`FrameToken`], which descriptor buffer writes must present; the token
//! expires when the frame is presented.

use ash::{vk, Device};

use crate::foundation::collections::FenceHandle;
use super::conversions::{vk_access_flags, vk_image_layout, AccessType, ImageLayout};
use super::context::{VulkanError, VulkanResult};

/// Number of frames the CPU may record ahead of the GPU
pub const FRAME_OVERLAP: usize = 2;

/// Slot index for a frame counter and offset
pub fn frame_index(frame_counter: u64, offset: u64) -> usize {
    (frame_counter.wrapping_add(offset) % FRAME_OVERLAP as u64) as usize
}

/// Proof that the fence guarding a frame slot has signalled
///
/// Only `GraphicsContext::wait_on_fence` creates tokens. A token authorises
/// CPU writes to the current frame's slot until the next `present`, provided
/// it was issued by the fence the slot's last submission signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken {
    frame_index: usize,
    frame_counter: u64,
    fence: FenceHandle,
}

impl FrameToken {
    /// Fence that was waited on
    pub fn fence(&self) -> FenceHandle {
        self.fence
    }

    /// Slot the token was issued for
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Frame counter at the time of the wait
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }
}

/// Frame counter bookkeeping
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    counter: u64,
    slot_fences: [Option<FenceHandle>; FRAME_OVERLAP],
}

impl FrameCounter {
    /// Number of frames presented so far
    pub fn value(&self) -> u64 {
        self.counter
    }

    /// Slot of the frame being recorded
    pub fn current_index(&self) -> usize {
        frame_index(self.counter, 0)
    }

    /// Slot `offset` frames ahead of the current one
    pub fn index_with_offset(&self, offset: u64) -> usize {
        frame_index(self.counter, offset)
    }

    /// Advance to the next frame, expiring outstanding tokens
    pub fn advance(&mut self) {
        self.counter = self.counter.wrapping_add(1);
    }

    /// Token for the slot `offset` frames ahead, issued after its fence was waited on
    pub(crate) fn issue_token(&self, offset: u64, fence: FenceHandle) -> FrameToken {
        FrameToken {
            frame_index: self.index_with_offset(offset),
            frame_counter: self.counter,
            fence,
        }
    }

    /// Remember that the current slot's submission signals `fence`
    pub(crate) fn record_submit(&mut self, fence: FenceHandle) {
        self.slot_fences[self.current_index()] = Some(fence);
    }

    /// Check that `token` authorises writes to the current slot
    pub fn validate(&self, token: &FrameToken) -> VulkanResult<usize> {
        if token.frame_counter != self.counter {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "frame token from frame {} used during frame {}",
                    token.frame_counter, self.counter
                ),
            });
        }
        if token.frame_index != self.current_index() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "frame token guards slot {} but the current slot is {}",
                    token.frame_index,
                    self.current_index()
                ),
            });
        }
        if let Some(expected) = self.slot_fences[token.frame_index] {
            if token.fence != expected {
                return Err(VulkanError::InvalidOperation {
                    reason: format!("frame token was issued by a fence that does not guard slot {}", token.frame_index),
                });
            }
        }
        Ok(token.frame_index)
    }
}

/// One fence per frame slot
pub struct FrameBasedFence {
    device: Device,
    fences: [vk::Fence; FRAME_OVERLAP],
}

impl FrameBasedFence {
    /// Create the fences, optionally already signalled
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let mut fences = [vk::Fence::null(); FRAME_OVERLAP];
        for slot in 0..FRAME_OVERLAP {
            match unsafe { device.create_fence(&create_info, None) } {
                Ok(fence) => fences[slot] = fence,
                Err(e) => {
                    for fence in &fences[..slot] {
                        unsafe { device.destroy_fence(*fence, None) };
                    }
                    return Err(VulkanError::Api(e));
                }
            }
        }

        Ok(Self { device, fences })
    }

    /// Fence of a slot
    pub fn handle(&self, frame_index: usize) -> vk::Fence {
        self.fences[frame_index % FRAME_OVERLAP]
    }

    /// Wait for a slot's fence then reset it
    pub fn wait_and_reset(&self, frame_index: usize, timeout_ns: u64) -> VulkanResult<()> {
        let fence = [self.handle(frame_index)];
        unsafe {
            self.device.wait_for_fences(&fence, true, timeout_ns)
                .map_err(VulkanError::Api)?;
            self.device.reset_fences(&fence)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for FrameBasedFence {
    fn drop(&mut self) {
        unsafe {
            for fence in self.fences {
                self.device.destroy_fence(fence, None);
            }
        }
    }
}

/// One binary semaphore per frame slot
pub struct FrameBasedSemaphore {
    device: Device,
    semaphores: [vk::Semaphore; FRAME_OVERLAP],
}

impl FrameBasedSemaphore {
    /// Create the semaphores
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let mut semaphores = [vk::Semaphore::null(); FRAME_OVERLAP];
        for slot in 0..FRAME_OVERLAP {
            match unsafe { device.create_semaphore(&create_info, None) } {
                Ok(semaphore) => semaphores[slot] = semaphore,
                Err(e) => {
                    for semaphore in &semaphores[..slot] {
                        unsafe { device.destroy_semaphore(*semaphore, None) };
                    }
                    return Err(VulkanError::Api(e));
                }
            }
        }

        Ok(Self { device, semaphores })
    }

    /// Semaphore of a slot
    pub fn handle(&self, frame_index: usize) -> vk::Semaphore {
        self.semaphores[frame_index % FRAME_OVERLAP]
    }
}

impl Drop for FrameBasedSemaphore {
    fn drop(&mut self) {
        unsafe {
            for semaphore in self.semaphores {
                self.device.destroy_semaphore(semaphore, None);
            }
        }
    }
}

/// Subresource range covering `level_count` mips starting at `base_mip`
pub fn subresource_range(
    aspect: vk::ImageAspectFlags,
    base_mip: u32,
    level_count: u32,
    base_layer: u32,
    layer_count: u32,
) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: base_mip,
        level_count,
        base_array_layer: base_layer,
        layer_count,
    }
}

/// Record an image layout transition with explicit access masks
///
/// Both stage masks are `ALL_COMMANDS`.
pub fn image_barrier(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    (old_layout, src_access): (vk::ImageLayout, vk::AccessFlags),
    (new_layout, dst_access): (vk::ImageLayout, vk::AccessFlags),
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Record a transition between two renderer layouts
pub fn transition_image(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    from: ImageLayout,
    to: ImageLayout,
    is_depth: bool,
) {
    image_barrier(
        device,
        cmd,
        image,
        range,
        (vk_image_layout(from, is_depth), vk_access_flags(from, AccessType::Src, is_depth)),
        (vk_image_layout(to, is_depth), vk_access_flags(to, AccessType::Dst, is_depth)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::SlotMap;

    fn fences(count: usize) -> Vec<FenceHandle> {
        let mut arena: SlotMap<FenceHandle, ()> = SlotMap::with_key();
        (0..count).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn test_frame_index_alternates() {
        let indices: Vec<usize> = (0..6).map(|frame| frame_index(frame, 0)).collect();
        assert_eq!(indices, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(frame_index(3, 1), 0);
        assert_eq!(frame_index(u64::MAX, 1), 0);
    }

    #[test]
    fn test_token_expires_on_advance() {
        let fence = fences(1)[0];
        let mut counter = FrameCounter::default();
        let token = counter.issue_token(0, fence);
        assert_eq!(counter.validate(&token).unwrap(), 0);

        counter.advance();
        assert!(counter.validate(&token).is_err());

        let next = counter.issue_token(0, fence);
        assert_eq!(counter.validate(&next).unwrap(), 1);
    }

    #[test]
    fn test_offset_token_does_not_unlock_current_slot() {
        let counter = FrameCounter::default();
        let token = counter.issue_token(1, fences(1)[0]);
        assert_eq!(token.frame_index(), 1);
        assert!(counter.validate(&token).is_err());
    }

    #[test]
    fn test_slot_reuse_requires_wait_of_previous_occupant() {
        // Model of the frame loop: each slot remembers which frame last
        // submitted into it; a write is only legal once that frame's fence
        // has been waited on, which is the frame FRAME_OVERLAP earlier.
        let fence = fences(1)[0];
        let mut counter = FrameCounter::default();
        let mut last_submit: [Option<u64>; FRAME_OVERLAP] = [None; FRAME_OVERLAP];
        let mut waited: Vec<u64> = Vec::new();

        for _ in 0..10 {
            let token = counter.issue_token(0, fence);
            let slot = counter.validate(&token).unwrap();
            if let Some(previous) = last_submit[slot] {
                waited.push(previous);
                assert_eq!(previous + FRAME_OVERLAP as u64, counter.value());
            }
            last_submit[slot] = Some(counter.value());
            counter.record_submit(fence);
            counter.advance();
        }

        assert_eq!(waited, (0..8).collect::<Vec<u64>>());
    }

    #[test]
    fn test_token_from_unrelated_fence_is_rejected() {
        let handles = fences(2);
        let (frame_fence, other_fence) = (handles[0], handles[1]);
        let mut counter = FrameCounter::default();

        // Nothing submitted yet, so any fence wait unlocks the slot.
        assert!(counter.validate(&counter.issue_token(0, other_fence)).is_ok());

        for _ in 0..FRAME_OVERLAP {
            counter.record_submit(frame_fence);
            counter.advance();
        }

        assert!(counter.validate(&counter.issue_token(0, other_fence)).is_err());
        assert!(counter.validate(&counter.issue_token(0, frame_fence)).is_ok());
    }
}
