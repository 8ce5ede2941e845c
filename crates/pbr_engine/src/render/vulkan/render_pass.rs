//! Render pass management
//!
//! Two kinds of passes exist: the swapchain pass, whose images belong to the
//! swapchain, and off-screen passes, which own one image per attachment and a
//! framebuffer binding them. Color attachments always precede the optional
//! depth attachment.

use std::sync::Arc;

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};
use super::conversions::{
    vk_format, vk_image_layout, vk_load_op, vk_store_op, AttachmentDescription,
};
use super::sync::subresource_range;
use super::texture::{create_image_view, image_create_info, AllocatedImage};

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    /// Create the pass used to draw into swapchain images
    ///
    /// Color is cleared and ends in PRESENT; depth is cleared and ends in the
    /// depth attachment layout.
    pub fn new_swapchain_pass(device: Device, color_format: vk::Format, depth_format: vk::Format) -> VulkanResult<Self> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let depth_attachment = vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let attachments = [color_attachment, depth_attachment];

        let color_attachment_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_attachment_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_ref)
            .depth_stencil_attachment(&depth_attachment_ref)
            .build();
        let subpasses = [subpass];

        // The image-acquired semaphore is waited on at COLOR_ATTACHMENT_OUTPUT;
        // the layout transition must not start earlier.
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .build();
        let dependencies = [dependency];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe {
            device.create_render_pass(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, render_pass })
    }

    /// Create a single-subpass pass from attachment descriptions
    pub fn from_descriptions(
        device: Device,
        colors: &[AttachmentDescription],
        depth: Option<&AttachmentDescription>,
    ) -> VulkanResult<Self> {
        let layout = PassLayout::new(colors, depth);

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&layout.color_references);
        if let Some(depth_reference) = layout.depth_reference.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_reference);
        }
        let subpasses = [subpass.build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&layout.descriptions)
            .subpasses(&subpasses);

        let render_pass = unsafe {
            device.create_render_pass(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, render_pass })
    }

    /// Get the render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Native attachment descriptions and subpass references for a pass
#[derive(Debug, Clone)]
pub(crate) struct PassLayout {
    pub descriptions: Vec<vk::AttachmentDescription>,
    pub color_references: Vec<vk::AttachmentReference>,
    pub depth_reference: Option<vk::AttachmentReference>,
}

impl PassLayout {
    pub fn new(colors: &[AttachmentDescription], depth: Option<&AttachmentDescription>) -> Self {
        let mut descriptions: Vec<vk::AttachmentDescription> = colors
            .iter()
            .map(|color| native_description(color, false))
            .collect();

        let color_references = (0..colors.len())
            .map(|index| vk::AttachmentReference {
                attachment: index as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();

        let depth_reference = depth.map(|depth| {
            descriptions.push(native_description(depth, true));
            vk::AttachmentReference {
                attachment: colors.len() as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        Self { descriptions, color_references, depth_reference }
    }
}

fn native_description(desc: &AttachmentDescription, is_depth: bool) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(vk_format(desc.format))
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk_load_op(desc.load_op))
        .store_op(vk_store_op(desc.store_op))
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk_image_layout(desc.initial_layout, is_depth))
        .final_layout(vk_image_layout(desc.final_layout, is_depth))
        .build()
}

/// Image owned by an off-screen pass
pub struct Attachment {
    device: Device,
    view: vk::ImageView,
    image: AllocatedImage,
    format: vk::Format,
    extent: vk::Extent2D,
    is_depth: bool,
}

impl Attachment {
    fn new(device: Device, allocator: Arc<vk_mem::Allocator>, desc: &AttachmentDescription, is_depth: bool) -> VulkanResult<Self> {
        let format = vk_format(desc.format);
        let (usage, aspect) = if is_depth {
            (vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT, vk::ImageAspectFlags::DEPTH)
        } else {
            (vk::ImageUsageFlags::COLOR_ATTACHMENT, vk::ImageAspectFlags::COLOR)
        };
        let usage = usage | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC;

        let info = image_create_info(format, usage, desc.width, desc.height, 1, 1, vk::ImageCreateFlags::empty());
        let image = AllocatedImage::new(allocator, &info)?;
        let view = create_image_view(
            &device,
            image.handle(),
            format,
            vk::ImageViewType::TYPE_2D,
            subresource_range(aspect, 0, 1, 0, 1),
        )?;

        Ok(Self {
            device,
            view,
            image,
            format,
            extent: vk::Extent2D { width: desc.width, height: desc.height },
            is_depth,
        })
    }

    /// Image handle
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    /// Image view
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Native format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Whether this is the depth attachment
    pub fn is_depth(&self) -> bool {
        self.is_depth
    }

    /// Aspect used for views and barriers
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if self.is_depth {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

/// Extent shared by every attachment of a pass
pub(crate) fn common_extent(
    colors: &[AttachmentDescription],
    depth: Option<&AttachmentDescription>,
) -> VulkanResult<vk::Extent2D> {
    let mut all = colors.iter().chain(depth);
    let first = all.next().ok_or_else(|| VulkanError::InvalidOperation {
        reason: "render pass needs at least one attachment".to_string(),
    })?;

    if first.width == 0 || first.height == 0 {
        return Err(VulkanError::InvalidOperation {
            reason: "render pass attachments must be non-empty".to_string(),
        });
    }

    for other in all {
        if (other.width, other.height) != (first.width, first.height) {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "attachment of {}x{} does not match {}x{}",
                    other.width, other.height, first.width, first.height
                ),
            });
        }
    }

    Ok(vk::Extent2D { width: first.width, height: first.height })
}

/// Render pass with its own attachment images and framebuffer
pub struct OffscreenRenderPass {
    device: Device,
    framebuffer: vk::Framebuffer,
    attachments: Vec<Attachment>,
    render_pass: RenderPass,
    extent: vk::Extent2D,
    color_count: usize,
}

impl OffscreenRenderPass {
    /// Create the pass, one image per attachment and a framebuffer of their common size
    pub fn new(
        device: Device,
        allocator: Arc<vk_mem::Allocator>,
        colors: &[AttachmentDescription],
        depth: Option<&AttachmentDescription>,
    ) -> VulkanResult<Self> {
        let extent = common_extent(colors, depth)?;

        let render_pass = RenderPass::from_descriptions(device.clone(), colors, depth)?;

        let mut attachments = Vec::with_capacity(colors.len() + usize::from(depth.is_some()));
        for color in colors {
            attachments.push(Attachment::new(device.clone(), allocator.clone(), color, false)?);
        }
        if let Some(depth) = depth {
            attachments.push(Attachment::new(device.clone(), allocator, depth, true)?);
        }

        let views: Vec<vk::ImageView> = attachments.iter().map(Attachment::view).collect();
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device.create_framebuffer(&framebuffer_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            framebuffer,
            attachments,
            render_pass,
            extent,
            color_count: colors.len(),
        })
    }

    /// Render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    /// Framebuffer handle
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Framebuffer size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// All attachments, colors first
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Attachment at `index`, bounds-checked
    pub fn attachment(&self, index: usize) -> VulkanResult<&Attachment> {
        self.attachments.get(index).ok_or(VulkanError::InvalidAttachmentIndex {
            index,
            count: self.attachments.len(),
        })
    }

    /// Number of color attachments
    pub fn color_count(&self) -> usize {
        self.color_count
    }

    /// Whether the pass has a depth attachment
    pub fn has_depth(&self) -> bool {
        self.attachments.len() > self.color_count
    }
}

impl Drop for OffscreenRenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::conversions::{Format, ImageLayout, LoadOp, StoreOp};

    fn color(format: Format) -> AttachmentDescription {
        AttachmentDescription {
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::Attachment,
            format,
            width: 512,
            height: 512,
        }
    }

    #[test]
    fn test_depth_attachment_follows_colors() {
        let colors = [color(Format::RGBA16_FLOAT), color(Format::RG16_FLOAT)];
        let depth = AttachmentDescription {
            load_op: LoadOp::Clear,
            store_op: StoreOp::DontCare,
            format: Format::D32_FLOAT,
            ..color(Format::D32_FLOAT)
        };

        let layout = PassLayout::new(&colors, Some(&depth));

        assert_eq!(layout.descriptions.len(), 3);
        assert_eq!(layout.color_references.len(), 2);
        let depth_ref = layout.depth_reference.unwrap();
        assert_eq!(depth_ref.attachment, 2);
        assert_eq!(depth_ref.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let native_depth = layout.descriptions[2];
        assert_eq!(native_depth.format, vk::Format::D32_SFLOAT);
        assert_eq!(native_depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(native_depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(native_depth.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(native_depth.final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_attachments_must_share_extent() {
        let colors = [color(Format::RGBA16_FLOAT)];
        let extent = common_extent(&colors, None).unwrap();
        assert_eq!((extent.width, extent.height), (512, 512));

        let small_depth = AttachmentDescription {
            width: 256,
            ..color(Format::D32_FLOAT)
        };
        assert!(matches!(
            common_extent(&colors, Some(&small_depth)),
            Err(VulkanError::InvalidOperation { .. })
        ));
        assert!(common_extent(&[], None).is_err());
    }

    #[test]
    fn test_color_only_pass() {
        let layout = PassLayout::new(&[color(Format::RG16_FLOAT)], None);

        assert!(layout.depth_reference.is_none());
        assert_eq!(layout.descriptions[0].format, vk::Format::R16G16_SFLOAT);
        assert_eq!(layout.descriptions[0].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(layout.color_references[0].layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }
}
