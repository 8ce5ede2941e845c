//! Resource creation, destruction and descriptor updates

use ash::vk;

use crate::foundation::collections::{
    CommandBufferHandle, DescriptorSetHandle, FenceHandle, FrameCommandBufferHandle, PipelineHandle,
    RenderPassHandle, SemaphoreHandle, TextureHandle, VertexBufferHandle,
};
use crate::render::vulkan::buffer::{MappedMemory, VertexBuffer};
use crate::render::vulkan::commands::{CommandBuffer, FrameBasedCommandBuffer};
use crate::render::vulkan::context::{VulkanError, VulkanResult};
use crate::render::vulkan::conversions::{AttachmentDescription, DescriptorType};
use crate::render::vulkan::descriptor_set::{ensure_pipeline_unreferenced, DescriptorSet};
use crate::render::vulkan::pipeline::{Pipeline, PipelineCreateInfo};
use crate::render::vulkan::render_pass::OffscreenRenderPass;
use crate::render::vulkan::sync::{FrameBasedFence, FrameBasedSemaphore, FrameToken};
use super::GraphicsContext;

impl GraphicsContext {
    /// Single command buffer with its own pool on the graphics family
    pub fn create_command_buffer(&mut self) -> VulkanResult<CommandBufferHandle> {
        let buffer = CommandBuffer::new(self.device.device.clone(), self.device.families.graphics)?;
        Ok(self.command_buffers.insert(buffer))
    }

    /// One command buffer per frame slot
    pub fn create_frame_command_buffer(&mut self) -> VulkanResult<FrameCommandBufferHandle> {
        let buffer = FrameBasedCommandBuffer::new(self.device.device.clone(), self.device.families.graphics)?;
        Ok(self.frame_command_buffers.insert(buffer))
    }

    /// One fence per frame slot
    ///
    /// Create signalled when the first wait happens before the first submit.
    pub fn create_fence(&mut self, signaled: bool) -> VulkanResult<FenceHandle> {
        let fence = FrameBasedFence::new(self.device.device.clone(), signaled)?;
        Ok(self.fences.insert(fence))
    }

    /// One semaphore per frame slot
    pub fn create_semaphore(&mut self) -> VulkanResult<SemaphoreHandle> {
        let semaphore = FrameBasedSemaphore::new(self.device.device.clone())?;
        Ok(self.semaphores.insert(semaphore))
    }

    /// Off-screen render pass with one image per attachment
    ///
    /// Color attachments come first, the optional depth attachment last. All
    /// attachments must have the same size.
    pub fn create_render_pass(
        &mut self,
        colors: &[AttachmentDescription],
        depth: Option<&AttachmentDescription>,
    ) -> VulkanResult<RenderPassHandle> {
        let pass = OffscreenRenderPass::new(self.device.device.clone(), self.allocator.clone(), colors, depth)?;
        log::debug!(
            "Created render pass {}x{} with {} color attachment(s), depth: {}",
            pass.extent().width,
            pass.extent().height,
            pass.color_count(),
            pass.has_depth()
        );
        Ok(self.render_passes.insert(pass))
    }

    /// Compile, reflect and build a graphics pipeline
    ///
    /// Targets `info.render_pass`, or the swapchain pass when it is `None`.
    pub fn create_pipeline(&mut self, info: &PipelineCreateInfo) -> VulkanResult<PipelineHandle> {
        let (render_pass, color_attachment_count) = match info.render_pass {
            Some(handle) => {
                let pass = self.render_passes.get(handle).ok_or(VulkanError::InvalidHandle("render pass"))?;
                (pass.handle(), pass.color_count())
            }
            None => (self.swapchain()?.render_pass(), 1),
        };

        let pipeline = Pipeline::new(self.device.device.clone(), info, render_pass, color_attachment_count)
            .map_err(|e| {
                self.logger.error(&format!(
                    "Failed to create pipeline from {} and {}: {e}",
                    info.vertex_shader_path.display(),
                    info.fragment_shader_path.display()
                ));
                e
            })?;

        Ok(self.pipelines.insert(pipeline))
    }

    /// Allocate a double-buffered descriptor set for layout `set_index` of `pipeline`
    ///
    /// The pipeline cannot be destroyed while the set exists.
    pub fn create_descriptor_set(&mut self, pipeline_handle: PipelineHandle, set_index: u32) -> VulkanResult<DescriptorSetHandle> {
        let pipeline = self.pipelines.get(pipeline_handle).ok_or(VulkanError::InvalidHandle("pipeline"))?;
        let set_layout = pipeline.set_layout(set_index).map_err(|e| {
            self.logger.error("Invalid descriptor set index specified");
            e
        })?;
        let bindings = pipeline.set_bindings(set_index)?.to_vec();

        let set = DescriptorSet::new(
            self.device.device.clone(),
            self.descriptor_pool.handle(),
            set_layout,
            pipeline_handle,
            bindings,
        )?;
        Ok(self.descriptor_sets.insert(set))
    }

    /// Vertex buffer holding `data`, written once through a host mapping
    pub fn create_vertex_buffer(&mut self, data: &[u8]) -> VulkanResult<VertexBufferHandle> {
        let buffer = VertexBuffer::new(self.allocator.clone(), data)?;
        Ok(self.vertex_buffers.insert(buffer))
    }

    /// Give `binding` its own `size`-byte buffer in every frame slot
    pub fn descriptor_set_add_buffer(
        &mut self,
        descriptor_set: DescriptorSetHandle,
        binding: u32,
        descriptor_type: DescriptorType,
        size: u64,
    ) -> VulkanResult<()> {
        let set = self
            .descriptor_sets
            .get_mut(descriptor_set)
            .ok_or(VulkanError::InvalidHandle("descriptor set"))?;

        set.add_buffer(&self.allocator, binding, descriptor_type, size)
    }

    /// Point `binding` at a texture, sampled with the main sampler
    pub fn descriptor_set_add_image(
        &mut self,
        descriptor_set: DescriptorSetHandle,
        binding: u32,
        texture: TextureHandle,
    ) -> VulkanResult<()> {
        let view = self.texture(texture)?.view();
        let set = self
            .descriptor_sets
            .get(descriptor_set)
            .ok_or(VulkanError::InvalidHandle("descriptor set"))?;

        set.add_image(binding, view, self.sampler.handle())
    }

    /// Point `binding` at a render pass attachment, which must be in SHADER_READ when sampled
    pub fn descriptor_set_add_render_pass_attachment(
        &mut self,
        descriptor_set: DescriptorSetHandle,
        binding: u32,
        render_pass: RenderPassHandle,
        attachment_index: usize,
    ) -> VulkanResult<()> {
        let view = self
            .render_passes
            .get(render_pass)
            .ok_or(VulkanError::InvalidHandle("render pass"))?
            .attachment(attachment_index)?
            .view();
        let set = self
            .descriptor_sets
            .get(descriptor_set)
            .ok_or(VulkanError::InvalidHandle("descriptor set"))?;

        set.add_image(binding, view, self.sampler.handle())
    }

    /// Map the current frame's buffer at `binding`
    ///
    /// `token` must come from this frame's [`wait_on_fence`](Self::wait_on_fence).
    pub fn map_descriptor_buffer(
        &mut self,
        token: &FrameToken,
        descriptor_set: DescriptorSetHandle,
        binding: u32,
    ) -> VulkanResult<MappedMemory<'_>> {
        let frame_index = self.frames.validate(token)?;
        self.descriptor_sets
            .get_mut(descriptor_set)
            .ok_or(VulkanError::InvalidHandle("descriptor set"))?
            .buffer_mut(frame_index, binding)?
            .map()
    }

    /// Copy `data` into the current frame's buffer at `binding`, starting at `offset`
    pub fn write_descriptor_buffer(
        &mut self,
        token: &FrameToken,
        descriptor_set: DescriptorSetHandle,
        binding: u32,
        offset: usize,
        data: &[u8],
    ) -> VulkanResult<()> {
        let frame_index = self.frames.validate(token)?;
        self.descriptor_sets
            .get_mut(descriptor_set)
            .ok_or(VulkanError::InvalidHandle("descriptor set"))?
            .buffer_mut(frame_index, binding)?
            .write(offset, data)
    }

    /// Size of a texture in pixels
    pub fn texture_extent(&self, texture: TextureHandle) -> VulkanResult<vk::Extent2D> {
        Ok(self.texture(texture)?.extent())
    }

    /// Free a command buffer and its pool
    pub fn destroy_command_buffer(&mut self, handle: CommandBufferHandle) -> VulkanResult<()> {
        self.command_buffers.remove(handle).map(drop).ok_or(VulkanError::InvalidHandle("command buffer"))
    }

    /// Free a per-frame command buffer
    pub fn destroy_frame_command_buffer(&mut self, handle: FrameCommandBufferHandle) -> VulkanResult<()> {
        self.frame_command_buffers
            .remove(handle)
            .map(drop)
            .ok_or(VulkanError::InvalidHandle("frame command buffer"))
    }

    /// Destroy a fence pair
    pub fn destroy_fence(&mut self, handle: FenceHandle) -> VulkanResult<()> {
        self.fences.remove(handle).map(drop).ok_or(VulkanError::InvalidHandle("fence"))
    }

    /// Destroy a semaphore pair
    pub fn destroy_semaphore(&mut self, handle: SemaphoreHandle) -> VulkanResult<()> {
        self.semaphores.remove(handle).map(drop).ok_or(VulkanError::InvalidHandle("semaphore"))
    }

    /// Destroy a render pass, its attachments and framebuffer
    pub fn destroy_render_pass(&mut self, handle: RenderPassHandle) -> VulkanResult<()> {
        self.render_passes.remove(handle).map(drop).ok_or(VulkanError::InvalidHandle("render pass"))
    }

    /// Destroy a pipeline and its layouts
    ///
    /// Fails with `InvalidOperation` while descriptor sets allocated from it
    /// are still alive.
    pub fn destroy_pipeline(&mut self, handle: PipelineHandle) -> VulkanResult<()> {
        if !self.pipelines.contains_key(handle) {
            return Err(VulkanError::InvalidHandle("pipeline"));
        }
        ensure_pipeline_unreferenced(handle, self.descriptor_sets.values().map(DescriptorSet::pipeline))?;
        self.pipelines.remove(handle).map(drop).ok_or(VulkanError::InvalidHandle("pipeline"))
    }

    /// Free a descriptor set and its buffers
    pub fn destroy_descriptor_set(&mut self, handle: DescriptorSetHandle) -> VulkanResult<()> {
        self.descriptor_sets.remove(handle).map(drop).ok_or(VulkanError::InvalidHandle("descriptor set"))
    }

    /// Free a vertex buffer
    pub fn destroy_vertex_buffer(&mut self, handle: VertexBufferHandle) -> VulkanResult<()> {
        self.vertex_buffers.remove(handle).map(drop).ok_or(VulkanError::InvalidHandle("vertex buffer"))
    }

    /// Free a texture
    pub fn destroy_texture(&mut self, handle: TextureHandle) -> VulkanResult<()> {
        self.textures.remove(handle).map(drop).ok_or(VulkanError::InvalidHandle("texture"))
    }
}
