//! GPU images, textures and the transfer commands that fill them
//!
//! The recording functions take a command buffer that is already recording;
//! the graphics context wraps them in an immediate submission.

use std::sync::Arc;

use ash::{vk, Device};
use vk_mem::Alloc;

use super::context::{VulkanError, VulkanResult};
use super::sync::{image_barrier, subresource_range};

/// Image with its VMA allocation, freed on drop
pub struct AllocatedImage {
    allocator: Arc<vk_mem::Allocator>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
}

impl AllocatedImage {
    /// Allocate a device-local image
    pub fn new(allocator: Arc<vk_mem::Allocator>, info: &vk::ImageCreateInfo) -> VulkanResult<Self> {
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            ..Default::default()
        };

        let (image, allocation) = unsafe {
            allocator.create_image(info, &allocation_info)
                .map_err(VulkanError::Allocation)?
        };

        Ok(Self { allocator, image, allocation })
    }

    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        unsafe {
            self.allocator.destroy_image(self.image, &mut self.allocation);
        }
    }
}

/// Create info for a single-sample, optimally tiled 2D image
pub fn image_create_info(
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    width: u32,
    height: u32,
    mip_levels: u32,
    array_layers: u32,
    flags: vk::ImageCreateFlags,
) -> vk::ImageCreateInfo {
    vk::ImageCreateInfo::builder()
        .flags(flags)
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D { width, height, depth: 1 })
        .mip_levels(mip_levels)
        .array_layers(array_layers)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .build()
}

/// Create a view over `range` of `image`
pub fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    view_type: vk::ImageViewType,
    range: vk::ImageSubresourceRange,
) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(view_type)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(range);

    unsafe {
        device.create_image_view(&create_info, None)
            .map_err(VulkanError::Api)
    }
}

/// Sampled image: a 2D texture or a cubemap
pub struct Texture {
    device: Device,
    view: vk::ImageView,
    image: AllocatedImage,
    format: vk::Format,
    extent: vk::Extent2D,
    mip_levels: u32,
    layers: u32,
}

impl Texture {
    /// Wrap an image and create its view
    pub fn new(
        device: Device,
        image: AllocatedImage,
        format: vk::Format,
        extent: vk::Extent2D,
        mip_levels: u32,
        layers: u32,
    ) -> VulkanResult<Self> {
        let view_type = if layers == 6 {
            vk::ImageViewType::CUBE
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let range = subresource_range(vk::ImageAspectFlags::COLOR, 0, mip_levels, 0, layers);
        let view = create_image_view(&device, image.handle(), format, view_type, range)?;

        Ok(Self { device, view, image, format, extent, mip_levels, layers })
    }

    /// Image handle
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    /// View over every mip and layer
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size of mip 0
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Number of array layers (6 for cubemaps)
    pub fn layers(&self) -> u32 {
        self.layers
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

fn mip_extent(size: u32, level: u32) -> i32 {
    (size >> level).max(1) as i32
}

fn color_layers(mip_level: u32, base_array_layer: u32, layer_count: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer,
        layer_count,
    }
}

/// Copy a staging buffer into mip 0 of `image`, leaving every mip in TRANSFER_DST
pub fn record_buffer_to_image(
    device: &Device,
    cmd: vk::CommandBuffer,
    staging: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
) {
    image_barrier(
        device,
        cmd,
        image,
        subresource_range(vk::ImageAspectFlags::COLOR, 0, mip_levels, 0, 1),
        (vk::ImageLayout::UNDEFINED, vk::AccessFlags::empty()),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE),
    );

    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(color_layers(0, 0, 1))
        .image_extent(vk::Extent3D { width, height, depth: 1 })
        .build();

    unsafe {
        device.cmd_copy_buffer_to_image(
            cmd,
            staging,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }
}

/// Fill mips `1..mip_levels` by successive linear blits and move every level to SHADER_READ
///
/// Expects all levels in TRANSFER_DST with mip 0 populated.
pub fn record_mip_chain(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
) {
    for level in 1..mip_levels {
        let source = subresource_range(vk::ImageAspectFlags::COLOR, level - 1, 1, 0, 1);

        image_barrier(
            device,
            cmd,
            image,
            source,
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE),
            (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::AccessFlags::TRANSFER_READ),
        );

        let blit = vk::ImageBlit::builder()
            .src_subresource(color_layers(level - 1, 0, 1))
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D { x: mip_extent(width, level - 1), y: mip_extent(height, level - 1), z: 1 },
            ])
            .dst_subresource(color_layers(level, 0, 1))
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D { x: mip_extent(width, level), y: mip_extent(height, level), z: 1 },
            ])
            .build();

        unsafe {
            device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        image_barrier(
            device,
            cmd,
            image,
            source,
            (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::AccessFlags::TRANSFER_READ),
            (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::AccessFlags::SHADER_READ),
        );
    }

    image_barrier(
        device,
        cmd,
        image,
        subresource_range(vk::ImageAspectFlags::COLOR, mip_levels.saturating_sub(1), 1, 0, 1),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE),
        (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::AccessFlags::SHADER_READ),
    );
}

/// Blit a TRANSFER_DST float image into a lower-precision image and leave the result in SHADER_READ
pub fn record_format_downcast(
    device: &Device,
    cmd: vk::CommandBuffer,
    source: vk::Image,
    destination: vk::Image,
    width: u32,
    height: u32,
) {
    let range = subresource_range(vk::ImageAspectFlags::COLOR, 0, 1, 0, 1);

    image_barrier(
        device,
        cmd,
        source,
        range,
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE),
        (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::AccessFlags::TRANSFER_READ),
    );
    image_barrier(
        device,
        cmd,
        destination,
        range,
        (vk::ImageLayout::UNDEFINED, vk::AccessFlags::empty()),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE),
    );

    let full = vk::Offset3D { x: width as i32, y: height as i32, z: 1 };
    let blit = vk::ImageBlit::builder()
        .src_subresource(color_layers(0, 0, 1))
        .src_offsets([vk::Offset3D::default(), full])
        .dst_subresource(color_layers(0, 0, 1))
        .dst_offsets([vk::Offset3D::default(), full])
        .build();

    unsafe {
        device.cmd_blit_image(
            cmd,
            source,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            destination,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[blit],
            vk::Filter::LINEAR,
        );
    }

    image_barrier(
        device,
        cmd,
        destination,
        range,
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE),
        (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::AccessFlags::SHADER_READ),
    );
}

/// Move every mip and layer of a fresh image to SHADER_READ
pub fn record_initial_shader_read(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    mip_levels: u32,
    layers: u32,
) {
    image_barrier(
        device,
        cmd,
        image,
        subresource_range(vk::ImageAspectFlags::COLOR, 0, mip_levels, 0, layers),
        (vk::ImageLayout::UNDEFINED, vk::AccessFlags::empty()),
        (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::AccessFlags::SHADER_READ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_extent_never_reaches_zero() {
        assert_eq!(mip_extent(512, 0), 512);
        assert_eq!(mip_extent(512, 3), 64);
        assert_eq!(mip_extent(300, 9), 1);
        assert_eq!(mip_extent(1, 4), 1);
    }

    #[test]
    fn test_cubemap_create_info() {
        let info = image_create_info(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            128,
            128,
            8,
            6,
            vk::ImageCreateFlags::CUBE_COMPATIBLE,
        );
        assert_eq!(info.array_layers, 6);
        assert_eq!(info.mip_levels, 8);
        assert_eq!(info.extent.depth, 1);
        assert!(info.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
    }
}
