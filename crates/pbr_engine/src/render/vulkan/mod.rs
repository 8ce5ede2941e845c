//! Vulkan backend
//!
//! Thin RAII wrappers over native objects. Each wrapper keeps the device or
//! allocator handle it needs and frees itself on drop; the
//! [`GraphicsContext`](crate::render::GraphicsContext) decides when.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod conversions;
pub mod descriptor_set;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod window;

pub use context::{LogicalDevice, PhysicalDeviceInfo, QueueFamilies, VulkanError, VulkanInstance, VulkanResult};
pub use conversions::{AttachmentDescription, ColorSpace, DescriptorType, Format, ImageLayout, LoadOp, StoreOp};
pub use pipeline::PipelineCreateInfo;
pub use sync::{FrameToken, FRAME_OVERLAP};
pub use window::{Key, Window, WindowError};
