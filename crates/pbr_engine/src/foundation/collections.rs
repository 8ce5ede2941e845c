//! Handle types for GPU resources owned by the graphics context
//!
//! Every resource created through the context lives in a `SlotMap` arena and is
//! addressed by one of the keys below. Keys are `Copy`, carry a generation and
//! never own the resource, so a handle that outlives its resource is detected
//! on lookup instead of dereferencing freed GPU memory.

pub use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Handle to a 2D texture or cubemap
    pub struct TextureHandle;
    /// Handle to a host-visible vertex buffer
    pub struct VertexBufferHandle;
    /// Handle to an off-screen render pass with its attachments
    pub struct RenderPassHandle;
    /// Handle to a graphics pipeline and its layouts
    pub struct PipelineHandle;
    /// Handle to a double-buffered descriptor set
    pub struct DescriptorSetHandle;
    /// Handle to a single command buffer
    pub struct CommandBufferHandle;
    /// Handle to a per-frame command buffer pair
    pub struct FrameCommandBufferHandle;
    /// Handle to a per-frame fence pair
    pub struct FenceHandle;
    /// Handle to a per-frame semaphore pair
    pub struct SemaphoreHandle;
}

/// Arena of resources addressed by a typed handle
pub type HandleMap<K, T> = SlotMap<K, T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut textures: HandleMap<TextureHandle, u32> = HandleMap::with_key();
        let first = textures.insert(7);
        assert_eq!(textures.remove(first), Some(7));

        let second = textures.insert(9);
        assert!(textures.get(first).is_none());
        assert_eq!(textures.get(second), Some(&9));
    }
}
