//! Command recording
//!
//! Every recording call accepts either a single command buffer or a per-frame
//! one through [`CommandTarget`]. Per-frame buffers record into the slot of the
//! current frame, and descriptor sets bind the current slot as well.

use ash::vk;

use crate::foundation::collections::{
    CommandBufferHandle, DescriptorSetHandle, FrameCommandBufferHandle, PipelineHandle, RenderPassHandle,
    TextureHandle, VertexBufferHandle,
};
use crate::render::vulkan::commands::{begin_one_time, end};
use crate::render::vulkan::context::{VulkanError, VulkanResult};
use crate::render::vulkan::conversions::ImageLayout;
use crate::render::vulkan::pipeline::push_constant_stages;
use crate::render::vulkan::render_pass::Attachment;
use crate::render::vulkan::sync::{image_barrier, subresource_range, transition_image};
use crate::render::vulkan::texture::Texture;
use super::GraphicsContext;

/// Command buffer a recording call writes into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTarget {
    /// Single buffer, typically for blocking startup work
    Single(CommandBufferHandle),
    /// Per-frame buffer; the current frame's slot is used
    Frame(FrameCommandBufferHandle),
}

impl From<CommandBufferHandle> for CommandTarget {
    fn from(handle: CommandBufferHandle) -> Self {
        Self::Single(handle)
    }
}

impl From<FrameCommandBufferHandle> for CommandTarget {
    fn from(handle: FrameCommandBufferHandle) -> Self {
        Self::Frame(handle)
    }
}

/// Clear values for an off-screen pass: opaque black colors, depth 1.0
fn offscreen_clear_values(attachments: &[Attachment]) -> Vec<vk::ClearValue> {
    attachments
        .iter()
        .map(|attachment| {
            if attachment.is_depth() {
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                }
            } else {
                vk::ClearValue {
                    color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] },
                }
            }
        })
        .collect()
}

/// Clear values for the swapchain pass: `clear_color` then depth 1.0
fn swapchain_clear_values(clear_color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
        },
    ]
}

fn full_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

impl GraphicsContext {
    fn command_buffer(&self, target: CommandTarget) -> VulkanResult<vk::CommandBuffer> {
        match target {
            CommandTarget::Single(handle) => self
                .command_buffers
                .get(handle)
                .map(|buffer| buffer.handle())
                .ok_or(VulkanError::InvalidHandle("command buffer")),
            CommandTarget::Frame(handle) => self
                .frame_command_buffers
                .get(handle)
                .map(|buffer| buffer.handle(self.frames.current_index()))
                .ok_or(VulkanError::InvalidHandle("frame command buffer")),
        }
    }

    /// Reset and begin a one-time-submit recording
    pub fn begin_recording(&self, target: impl Into<CommandTarget>) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        begin_one_time(&self.device.device, cmd)
    }

    /// Finish a recording
    pub fn end_recording(&self, target: impl Into<CommandTarget>) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        end(&self.device.device, cmd)
    }

    /// Begin the swapchain render pass on the framebuffer of `image_index`
    pub fn begin_swapchain_render_pass(
        &self,
        target: impl Into<CommandTarget>,
        image_index: u32,
        clear_color: [f32; 4],
    ) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        let swapchain = self.swapchain()?;
        let clear_values = swapchain_clear_values(clear_color);

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(swapchain.render_pass())
            .framebuffer(swapchain.framebuffer(image_index)?)
            .render_area(full_area(swapchain.extent()))
            .clear_values(&clear_values);

        unsafe {
            self.device.device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    /// Begin an off-screen render pass over its full extent
    pub fn begin_render_pass(&self, target: impl Into<CommandTarget>, render_pass: RenderPassHandle) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        let pass = self.render_passes.get(render_pass).ok_or(VulkanError::InvalidHandle("render pass"))?;
        let clear_values = offscreen_clear_values(pass.attachments());

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(pass.handle())
            .framebuffer(pass.framebuffer())
            .render_area(full_area(pass.extent()))
            .clear_values(&clear_values);

        unsafe {
            self.device.device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    /// End the current render pass
    pub fn end_render_pass(&self, target: impl Into<CommandTarget>) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        unsafe { self.device.device.cmd_end_render_pass(cmd) };
        Ok(())
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&self, target: impl Into<CommandTarget>, pipeline: PipelineHandle) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        let pipeline = self.pipelines.get(pipeline).ok_or(VulkanError::InvalidHandle("pipeline"))?;

        unsafe {
            self.device.device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
        }
        Ok(())
    }

    /// Bind the current frame's copy of `descriptor_set` at `set_index`
    ///
    /// Uses the layout of the pipeline the set was allocated from.
    pub fn bind_descriptor_set(
        &self,
        target: impl Into<CommandTarget>,
        set_index: u32,
        descriptor_set: DescriptorSetHandle,
    ) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        let set = self
            .descriptor_sets
            .get(descriptor_set)
            .ok_or(VulkanError::InvalidHandle("descriptor set"))?;
        let pipeline = self.pipelines.get(set.pipeline()).ok_or(VulkanError::InvalidHandle("pipeline"))?;

        unsafe {
            self.device.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                set_index,
                &[set.handle(self.frames.current_index())],
                &[],
            );
        }
        Ok(())
    }

    /// Push `data` at byte `offset`
    ///
    /// The push reaches the stages whose ranges hold those bytes.
    pub fn push_constants(
        &self,
        target: impl Into<CommandTarget>,
        pipeline: PipelineHandle,
        offset: u32,
        data: &[u8],
    ) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        let pipeline = self.pipelines.get(pipeline).ok_or(VulkanError::InvalidHandle("pipeline"))?;

        let size = u32::try_from(data.len()).map_err(|_| VulkanError::InvalidOperation {
            reason: "push constant data too large".to_string(),
        })?;
        let stages = push_constant_stages(pipeline.push_constant_ranges(), offset, size)?;

        unsafe {
            self.device.device.cmd_push_constants(
                cmd,
                pipeline.layout(),
                stages,
                offset,
                data,
            );
        }
        Ok(())
    }

    /// Bind a vertex buffer at binding 0
    pub fn bind_vertex_buffer(&self, target: impl Into<CommandTarget>, vertex_buffer: VertexBufferHandle) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        let buffer = self
            .vertex_buffers
            .get(vertex_buffer)
            .ok_or(VulkanError::InvalidHandle("vertex buffer"))?;

        unsafe {
            self.device.device.cmd_bind_vertex_buffers(cmd, 0, &[buffer.handle()], &[0]);
        }
        Ok(())
    }

    /// Non-indexed draw
    pub fn draw(
        &self,
        target: impl Into<CommandTarget>,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        unsafe {
            self.device.device.cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance);
        }
        Ok(())
    }

    /// Transition every attachment of a render pass between two layouts
    ///
    /// Depth attachments use the depth aspect and depth access masks.
    pub fn transition_render_pass_images(
        &self,
        target: impl Into<CommandTarget>,
        render_pass: RenderPassHandle,
        from: ImageLayout,
        to: ImageLayout,
    ) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        let pass = self.render_passes.get(render_pass).ok_or(VulkanError::InvalidHandle("render pass"))?;

        for attachment in pass.attachments() {
            transition_image(
                &self.device.device,
                cmd,
                attachment.image(),
                subresource_range(attachment.aspect(), 0, 1, 0, 1),
                from,
                to,
                attachment.is_depth(),
            );
        }
        Ok(())
    }

    /// Copy a color attachment into one face and mip of a cubemap
    ///
    /// The attachment must already be in TRANSFER_SRC; it is returned to
    /// ATTACHMENT afterwards and the cubemap face is left in SHADER_READ.
    /// Source and destination must both be `width` x `height`.
    pub fn copy_render_pass_image_to_cubemap(
        &self,
        target: impl Into<CommandTarget>,
        render_pass: RenderPassHandle,
        attachment_index: usize,
        cubemap: TextureHandle,
        face: u32,
        mip_level: u32,
        width: u32,
        height: u32,
    ) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        let pass = self.render_passes.get(render_pass).ok_or(VulkanError::InvalidHandle("render pass"))?;
        let attachment = pass.attachment(attachment_index)?;
        let cubemap = self.texture(cubemap)?;
        check_cube_target(cubemap, face, mip_level)?;

        self.cube_face_to_transfer_dst(cmd, cubemap, face, mip_level);

        let region = vk::ImageCopy::builder()
            .src_subresource(color_layer(0, 0))
            .src_offset(vk::Offset3D::default())
            .dst_subresource(color_layer(mip_level, face))
            .dst_offset(vk::Offset3D::default())
            .extent(vk::Extent3D { width, height, depth: 1 })
            .build();

        unsafe {
            self.device.device.cmd_copy_image(
                cmd,
                attachment.image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                cubemap.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        self.finish_cube_face_transfer(cmd, attachment, cubemap, face, mip_level);
        Ok(())
    }

    /// Linearly blit a color attachment into one face and mip of a cubemap
    ///
    /// Same layout contract as
    /// [`copy_render_pass_image_to_cubemap`](Self::copy_render_pass_image_to_cubemap),
    /// but the source and destination sizes may differ.
    pub fn blit_render_pass_image_to_cubemap(
        &self,
        target: impl Into<CommandTarget>,
        render_pass: RenderPassHandle,
        attachment_index: usize,
        cubemap: TextureHandle,
        face: u32,
        mip_level: u32,
        (src_width, src_height): (u32, u32),
        (dst_width, dst_height): (u32, u32),
    ) -> VulkanResult<()> {
        let cmd = self.command_buffer(target.into())?;
        let pass = self.render_passes.get(render_pass).ok_or(VulkanError::InvalidHandle("render pass"))?;
        let attachment = pass.attachment(attachment_index)?;
        let cubemap = self.texture(cubemap)?;
        check_cube_target(cubemap, face, mip_level)?;

        self.cube_face_to_transfer_dst(cmd, cubemap, face, mip_level);

        let blit = vk::ImageBlit::builder()
            .src_subresource(color_layer(0, 0))
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D { x: src_width as i32, y: src_height as i32, z: 1 },
            ])
            .dst_subresource(color_layer(mip_level, face))
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D { x: dst_width as i32, y: dst_height as i32, z: 1 },
            ])
            .build();

        unsafe {
            self.device.device.cmd_blit_image(
                cmd,
                attachment.image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                cubemap.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        self.finish_cube_face_transfer(cmd, attachment, cubemap, face, mip_level);
        Ok(())
    }

    fn cube_face_to_transfer_dst(&self, cmd: vk::CommandBuffer, cubemap: &Texture, face: u32, mip_level: u32) {
        image_barrier(
            &self.device.device,
            cmd,
            cubemap.image(),
            subresource_range(vk::ImageAspectFlags::COLOR, mip_level, 1, face, 1),
            (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::AccessFlags::SHADER_READ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE),
        );
    }

    fn finish_cube_face_transfer(
        &self,
        cmd: vk::CommandBuffer,
        attachment: &Attachment,
        cubemap: &Texture,
        face: u32,
        mip_level: u32,
    ) {
        transition_image(
            &self.device.device,
            cmd,
            attachment.image(),
            subresource_range(attachment.aspect(), 0, 1, 0, 1),
            ImageLayout::TransferSrc,
            ImageLayout::Attachment,
            attachment.is_depth(),
        );

        image_barrier(
            &self.device.device,
            cmd,
            cubemap.image(),
            subresource_range(vk::ImageAspectFlags::COLOR, mip_level, 1, face, 1),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE),
            (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::AccessFlags::SHADER_READ),
        );
    }
}

fn color_layer(mip_level: u32, base_array_layer: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer,
        layer_count: 1,
    }
}

fn check_cube_target(cubemap: &Texture, face: u32, mip_level: u32) -> VulkanResult<()> {
    if cubemap.layers() != 6 {
        return Err(VulkanError::InvalidOperation {
            reason: "destination texture is not a cubemap".to_string(),
        });
    }
    if face >= 6 || mip_level >= cubemap.mip_levels() {
        return Err(VulkanError::InvalidOperation {
            reason: format!(
                "cubemap face {face} mip {mip_level} out of range ({} mips)",
                cubemap.mip_levels()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_clear_values_keep_color_and_clear_depth_to_far() {
        let values = swapchain_clear_values([0.1, 0.2, 0.3, 1.0]);
        unsafe {
            assert_eq!(values[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
        }
    }

    #[test]
    fn test_full_area_starts_at_origin() {
        let area = full_area(vk::Extent2D { width: 32, height: 16 });
        assert_eq!(area.offset.x, 0);
        assert_eq!(area.offset.y, 0);
        assert_eq!(area.extent.width, 32);
        assert_eq!(area.extent.height, 16);
    }

    #[test]
    fn test_target_from_handles() {
        let single = CommandBufferHandle::default();
        let frame = FrameCommandBufferHandle::default();
        assert_eq!(CommandTarget::from(single), CommandTarget::Single(single));
        assert_eq!(CommandTarget::from(frame), CommandTarget::Frame(frame));
    }
}
