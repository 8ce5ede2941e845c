//! Graphics context
//!
//! [`GraphicsContext`] owns the instance, device, swapchain, allocator and every
//! resource created through it. Callers hold `Copy` handles; the context looks
//! them up in generation-checked arenas, so a destroyed resource can never be
//! reached through an old handle.
//!
//! The per-frame loop is:
//!
//! ```text
//! wait_on_fence -> new_frame -> record -> submit -> present
//! ```
//!
//! Startup work (texture uploads, image-based-lighting preprocessing) goes
//! through the blocking `immediate_submit*` calls instead.

mod frame;
mod recording;
mod resources;
mod transfer;

use std::sync::Arc;

use ash::vk;

use crate::config::GraphicsConfig;
use crate::foundation::collections::{
    CommandBufferHandle, DescriptorSetHandle, FenceHandle, FrameCommandBufferHandle, HandleMap,
    PipelineHandle, RenderPassHandle, SemaphoreHandle, TextureHandle, VertexBufferHandle,
};
use crate::foundation::logging::RenderLogger;
use super::vulkan::buffer::VertexBuffer;
use super::vulkan::commands::{CommandBuffer, FrameBasedCommandBuffer, UploadContext};
use super::vulkan::context::{
    LogicalDevice, PhysicalDeviceInfo, QueueFamilies, VulkanError, VulkanInstance, VulkanResult,
};
use super::vulkan::descriptor_set::{DescriptorPool, DescriptorSet, Sampler};
use super::vulkan::pipeline::Pipeline;
use super::vulkan::render_pass::OffscreenRenderPass;
use super::vulkan::swapchain::{ResizeState, Surface, Swapchain};
use super::vulkan::sync::{FrameBasedFence, FrameBasedSemaphore, FrameCounter};
use super::vulkan::texture::Texture;
use super::vulkan::window::Window;

pub use recording::CommandTarget;

/// Device-level state and the arenas of every GPU resource
pub struct GraphicsContext {
    // Field order is drop order.
    descriptor_sets: HandleMap<DescriptorSetHandle, DescriptorSet>,
    pipelines: HandleMap<PipelineHandle, Pipeline>,
    render_passes: HandleMap<RenderPassHandle, OffscreenRenderPass>,
    textures: HandleMap<TextureHandle, Texture>,
    vertex_buffers: HandleMap<VertexBufferHandle, VertexBuffer>,
    command_buffers: HandleMap<CommandBufferHandle, CommandBuffer>,
    frame_command_buffers: HandleMap<FrameCommandBufferHandle, FrameBasedCommandBuffer>,
    fences: HandleMap<FenceHandle, FrameBasedFence>,
    semaphores: HandleMap<SemaphoreHandle, FrameBasedSemaphore>,

    swapchain: Option<Swapchain>,
    upload: UploadContext,
    sampler: Sampler,
    descriptor_pool: DescriptorPool,
    allocator: Arc<vk_mem::Allocator>,
    device: LogicalDevice,
    surface: Surface,
    instance: VulkanInstance,
    window: Window,

    physical_device: PhysicalDeviceInfo,
    frames: FrameCounter,
    resize: ResizeState,
    config: GraphicsConfig,
    logger: Arc<dyn RenderLogger>,
}

impl GraphicsContext {
    /// Bring up Vulkan for `window`
    ///
    /// Creates the instance, surface, device, allocator, swapchain and the
    /// shared descriptor pool, sampler and upload structures. Any failure is
    /// returned; nothing is left half-initialised.
    pub fn create(window: Window, config: GraphicsConfig, logger: Arc<dyn RenderLogger>) -> VulkanResult<Self> {
        config.validate().map_err(VulkanError::InitializationFailed)?;

        logger.info("Creating graphics context");
        logger.info(&format!(" - validation layers: {}", config.enable_validation));

        let instance = VulkanInstance::new(&window, &config, logger.as_ref())?;

        let raw_surface = window.create_surface(instance.instance.handle())?;
        let surface = Surface::new(&instance.entry, &instance.instance, raw_surface);

        let physical_device = PhysicalDeviceInfo::select_suitable_device(
            &instance.instance,
            surface.handle(),
            surface.loader(),
            config.prefer_discrete_gpu,
            logger.as_ref(),
        )?;
        logger.info(&format!(
            " - minimum uniform buffer alignment: {}",
            physical_device.properties.limits.min_uniform_buffer_offset_alignment
        ));

        let device = LogicalDevice::new(&instance.instance, &physical_device)?;
        logger.info(&format!(" - graphics queue family: {}", device.families.graphics));

        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance.instance,
            &device.device,
            physical_device.device,
        ))
        .map_err(VulkanError::Allocation)?;
        let allocator = Arc::new(allocator);

        let swapchain = Swapchain::new(
            device.device.clone(),
            device.swapchain_loader.clone(),
            allocator.clone(),
            physical_device.device,
            &surface,
            window_extent(&window),
        )?;

        let descriptor_pool = DescriptorPool::new(device.device.clone(), &config.descriptor_pool)?;
        let sampler = Sampler::new_linear_repeat(device.device.clone())?;
        let upload = UploadContext::new(device.device.clone(), device.families.graphics)?;

        logger.info("Graphics context created");

        Ok(Self {
            descriptor_sets: HandleMap::with_key(),
            pipelines: HandleMap::with_key(),
            render_passes: HandleMap::with_key(),
            textures: HandleMap::with_key(),
            vertex_buffers: HandleMap::with_key(),
            command_buffers: HandleMap::with_key(),
            frame_command_buffers: HandleMap::with_key(),
            fences: HandleMap::with_key(),
            semaphores: HandleMap::with_key(),
            swapchain: Some(swapchain),
            upload,
            sampler,
            descriptor_pool,
            allocator,
            device,
            surface,
            instance,
            window,
            physical_device,
            frames: FrameCounter::default(),
            resize: ResizeState::default(),
            config,
            logger,
        })
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device.device.device_wait_idle()
                .map_err(VulkanError::Api)
        }
    }

    /// New swapchain extent if the swapchain was rebuilt since the last poll
    ///
    /// Also drains the window's resize events; a reported resize schedules a
    /// rebuild at the next present. Call once per frame and recreate every
    /// viewport-sized pipeline and descriptor set when this returns `Some`.
    pub fn poll_resize(&mut self) -> Option<(u32, u32)> {
        if self.window.poll_resize().is_some() {
            self.resize.request_rebuild();
        }

        if self.resize.take_resized() {
            Some(self.swapchain_extent())
        } else {
            None
        }
    }

    /// Whether the swapchain was rebuilt since the last poll; clears the flag
    pub fn is_swapchain_resized(&mut self) -> bool {
        self.poll_resize().is_some()
    }

    /// Current swapchain size in pixels
    pub fn swapchain_extent(&self) -> (u32, u32) {
        self.swapchain
            .as_ref()
            .map_or((0, 0), |swapchain| (swapchain.extent().width, swapchain.extent().height))
    }

    /// Number of frames presented so far
    pub fn frame_counter(&self) -> u64 {
        self.frames.value()
    }

    /// Frame slot currently being recorded
    pub fn current_frame_index(&self) -> usize {
        self.frames.current_index()
    }

    /// The window the context renders to
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Mutable access to the window, for polling and input
    pub fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    /// Selected physical device properties
    pub fn device_properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.physical_device.properties
    }

    /// Queue families chosen at creation
    pub fn queue_families(&self) -> QueueFamilies {
        self.device.families
    }

    /// Configuration the context was created with
    pub fn config(&self) -> &GraphicsConfig {
        &self.config
    }

    /// Injected logger
    pub fn logger(&self) -> &Arc<dyn RenderLogger> {
        &self.logger
    }

    fn swapchain(&self) -> VulkanResult<&Swapchain> {
        self.swapchain.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "swapchain is unavailable after a failed rebuild".to_string(),
        })
    }

    fn texture(&self, handle: TextureHandle) -> VulkanResult<&Texture> {
        self.textures.get(handle).ok_or(VulkanError::InvalidHandle("texture"))
    }

    /// Drain the GPU and replace the swapchain bundle with one sized to the window
    fn rebuild_swapchain(&mut self) -> VulkanResult<()> {
        while self.window.is_minimized() && !self.window.should_close() {
            self.window.wait_events();
        }

        self.wait_idle()?;

        // The old swapchain must be gone before a new one binds the surface.
        self.swapchain = None;
        let swapchain = Swapchain::new(
            self.device.device.clone(),
            self.device.swapchain_loader.clone(),
            self.allocator.clone(),
            self.physical_device.device,
            &self.surface,
            window_extent(&self.window),
        )?;

        let extent = swapchain.extent();
        self.logger.info(&format!("Swapchain rebuilt at {}x{}", extent.width, extent.height));

        self.swapchain = Some(swapchain);
        self.resize.mark_rebuilt();
        Ok(())
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        // Field order is drop order.
        if let Err(e) = self.wait_idle() {
            self.logger.error(&format!("Device wait failed during shutdown: {e}"));
        }
        self.logger.info("Destroying graphics context");
    }
}

fn window_extent(window: &Window) -> vk::Extent2D {
    let (width, height) = window.framebuffer_size();
    vk::Extent2D { width, height }
}
