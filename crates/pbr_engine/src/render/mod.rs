//! Rendering
//!
//! `vulkan` holds the native object wrappers; [`GraphicsContext`] ties them
//! together behind handle-based resource creation and command recording.

pub mod graphics_context;
pub mod vulkan;

pub use graphics_context::{CommandTarget, GraphicsContext};
pub use vulkan::{
    AttachmentDescription, ColorSpace, DescriptorType, Format, FrameToken, ImageLayout, Key, LoadOp,
    PipelineCreateInfo, StoreOp, VulkanError, VulkanResult, Window, WindowError, FRAME_OVERLAP,
};
