//! # PBR Engine
//!
//! A Vulkan graphics context for physically based rendering.
//!
//! ## Features
//!
//! - **Handle-based resources**: pipelines, descriptor sets, render passes,
//!   textures and sync objects live in generation-checked arenas owned by the
//!   [`GraphicsContext`](render::GraphicsContext)
//! - **Reflection-driven pipelines**: vertex inputs, descriptor set layouts and
//!   push-constant ranges come from the shaders themselves
//! - **Frame pacing**: two frames in flight, with buffer writes gated by a
//!   [`FrameToken`](render::FrameToken) from the frame's fence wait
//! - **Image-based lighting**: environment, irradiance, prefilter and BRDF maps
//!   generated on the GPU from one HDR image
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pbr_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let window = Window::new("PBR", 1280, 720)?;
//!     let mut context = GraphicsContext::create(window, GraphicsConfig::default(), Arc::new(LogCrateLogger))?;
//!
//!     let fence = context.create_fence(true)?;
//!     let image_available = context.create_semaphore()?;
//!     let render_finished = context.create_semaphore()?;
//!     let commands = context.create_frame_command_buffer()?;
//!
//!     while !context.window().should_close() {
//!         context.window_mut().poll();
//!         context.wait_on_fence(fence, 0)?;
//!         let image_index = context.new_frame(image_available)?;
//!
//!         context.begin_recording(commands)?;
//!         context.begin_swapchain_render_pass(commands, image_index, [0.0, 0.0, 0.0, 1.0])?;
//!         context.end_render_pass(commands)?;
//!         context.end_recording(commands)?;
//!
//!         context.submit(commands, image_available, render_finished, fence)?;
//!         context.present(image_index, render_finished)?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod assets;
pub mod config;
pub mod foundation;
pub mod ibl;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::{AssetError, HdrImageData, ImageData},
        config::{Config, GraphicsConfig, IblConfig},
        foundation::{
            logging::{LogCrateLogger, RenderLogger},
            math::{Mat4, Mat4Ext, Vec3},
        },
        ibl::{IblMaps, IblPreprocessor},
        render::{
            AttachmentDescription, ColorSpace, CommandTarget, DescriptorType, Format, FrameToken, GraphicsContext,
            ImageLayout, Key, LoadOp, PipelineCreateInfo, StoreOp, VulkanError, VulkanResult, Window,
        },
    };
}
