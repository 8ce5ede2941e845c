//! Texture factories
//!
//! Uploads go through a host-visible staging buffer and a blocking
//! `immediate_submit_with`. Every texture leaves here in SHADER_READ layout.

use ash::vk;

use crate::foundation::collections::TextureHandle;
use crate::foundation::math::utils::mip_level_count;
use crate::render::vulkan::buffer::staging_buffer;
use crate::render::vulkan::context::{VulkanError, VulkanResult};
use crate::render::vulkan::conversions::{hdr_texture_formats, texture_format, vk_format, ColorSpace, Format};
use crate::render::vulkan::texture::{
    image_create_info, record_buffer_to_image, record_format_downcast, record_initial_shader_read,
    record_mip_chain, AllocatedImage, Texture,
};
use super::GraphicsContext;

/// Expected byte length of `width * height * components` texels of `texel_size` bytes each
fn expected_len(width: u32, height: u32, components: u32, texel_size: usize) -> usize {
    width as usize * height as usize * components as usize * texel_size
}

fn check_upload_len(actual: usize, expected: usize) -> VulkanResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(VulkanError::InvalidOperation {
            reason: format!("texture data is {actual} bytes, expected {expected}"),
        })
    }
}

/// Mip count for a `width` x `height` cubemap asking for `mip_levels` levels
///
/// Faces must be square and the chain cannot go below 1x1.
pub(crate) fn cubemap_mip_levels(width: u32, height: u32, mip_levels: u32) -> VulkanResult<u32> {
    if width == 0 || width != height {
        return Err(VulkanError::InvalidOperation {
            reason: format!("cubemap faces must be square and non-empty, got {width}x{height}"),
        });
    }

    let full_chain = mip_level_count(width, height);
    if mip_levels == 0 || mip_levels > full_chain {
        return Err(VulkanError::InvalidOperation {
            reason: format!("a {width}x{width} cubemap holds 1 to {full_chain} mips, not {mip_levels}"),
        });
    }
    Ok(mip_levels)
}

impl GraphicsContext {
    /// Upload 8-bit texel data as a sampled 2D texture
    ///
    /// `components` must be 3 or 4. With `generate_mipmaps` the full chain is
    /// built by successive linear blits.
    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        components: u32,
        color_space: ColorSpace,
        data: &[u8],
        generate_mipmaps: bool,
    ) -> VulkanResult<TextureHandle> {
        let format = texture_format(components, color_space).ok_or_else(|| {
            self.logger.error(&format!("Invalid texture component count: {components}"));
            VulkanError::InvalidComponentCount(components)
        })?;
        check_upload_len(data.len(), expected_len(width, height, components, 1))?;

        let mip_levels = if generate_mipmaps { mip_level_count(width, height) } else { 1 };

        let staging = staging_buffer(self.allocator.clone(), data)?;
        let image = AllocatedImage::new(
            self.allocator.clone(),
            &image_create_info(
                format,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
                width,
                height,
                mip_levels,
                1,
                vk::ImageCreateFlags::empty(),
            ),
        )?;

        let target = image.handle();
        self.immediate_submit_with(|device, cmd| {
            record_buffer_to_image(device, cmd, staging.handle(), target, width, height, mip_levels);
            record_mip_chain(device, cmd, target, width, height, mip_levels);
            Ok(())
        })?;

        let texture = Texture::new(
            self.device.device.clone(),
            image,
            format,
            vk::Extent2D { width, height },
            mip_levels,
            1,
        )?;

        log::debug!("Uploaded {width}x{height} texture ({format:?}, {mip_levels} mips)");
        Ok(self.textures.insert(texture))
    }

    /// Upload 32-bit float texel data as a 16-bit float 2D texture
    ///
    /// The data is staged into a 32-bit float image and blitted into the final
    /// half-float image. `components` must be 3 or 4.
    pub fn create_hdr_texture(
        &mut self,
        width: u32,
        height: u32,
        components: u32,
        data: &[f32],
    ) -> VulkanResult<TextureHandle> {
        let (transfer_format, final_format) = hdr_texture_formats(components).ok_or_else(|| {
            self.logger.error(&format!("Invalid HDR texture component count: {components}"));
            VulkanError::InvalidComponentCount(components)
        })?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        check_upload_len(bytes.len(), expected_len(width, height, components, 4))?;

        let staging = staging_buffer(self.allocator.clone(), bytes)?;
        let transfer_image = AllocatedImage::new(
            self.allocator.clone(),
            &image_create_info(
                transfer_format,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
                width,
                height,
                1,
                1,
                vk::ImageCreateFlags::empty(),
            ),
        )?;
        let image = AllocatedImage::new(
            self.allocator.clone(),
            &image_create_info(
                final_format,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                width,
                height,
                1,
                1,
                vk::ImageCreateFlags::empty(),
            ),
        )?;

        let (source, destination) = (transfer_image.handle(), image.handle());
        self.immediate_submit_with(|device, cmd| {
            record_buffer_to_image(device, cmd, staging.handle(), source, width, height, 1);
            record_format_downcast(device, cmd, source, destination, width, height);
            Ok(())
        })?;

        let texture = Texture::new(
            self.device.device.clone(),
            image,
            final_format,
            vk::Extent2D { width, height },
            1,
            1,
        )?;

        log::debug!("Uploaded {width}x{height} HDR texture ({final_format:?})");
        Ok(self.textures.insert(texture))
    }

    /// Empty cube-compatible image, already in SHADER_READ layout
    ///
    /// `mip_levels` levels are allocated for later copies and blits. Faces must
    /// be square.
    pub fn create_cubemap(
        &mut self,
        format: Format,
        width: u32,
        height: u32,
        mip_levels: u32,
    ) -> VulkanResult<TextureHandle> {
        let mip_levels = cubemap_mip_levels(width, height, mip_levels)?;
        let format = vk_format(format);

        let image = AllocatedImage::new(
            self.allocator.clone(),
            &image_create_info(
                format,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                width,
                height,
                mip_levels,
                6,
                vk::ImageCreateFlags::CUBE_COMPATIBLE,
            ),
        )?;

        let target = image.handle();
        self.immediate_submit_with(|device, cmd| {
            record_initial_shader_read(device, cmd, target, mip_levels, 6);
            Ok(())
        })?;

        let texture = Texture::new(
            self.device.device.clone(),
            image,
            format,
            vk::Extent2D { width, height },
            mip_levels,
            6,
        )?;

        log::debug!("Created {width}x{height} cubemap ({format:?}, {mip_levels} mips)");
        Ok(self.textures.insert(texture))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IblConfig;

    #[test]
    fn test_expected_len_accounts_for_texel_size() {
        assert_eq!(expected_len(4, 2, 4, 1), 32);
        assert_eq!(expected_len(4, 2, 3, 4), 96);
    }

    #[test]
    fn test_cubemap_faces_must_be_square() {
        assert_eq!(cubemap_mip_levels(128, 128, 1).unwrap(), 1);
        assert!(cubemap_mip_levels(128, 64, 1).is_err());
        assert!(cubemap_mip_levels(0, 0, 1).is_err());
    }

    #[test]
    fn test_cubemap_mips_bounded_by_chain() {
        assert_eq!(cubemap_mip_levels(128, 128, 8).unwrap(), 8);
        assert!(cubemap_mip_levels(128, 128, 9).is_err());
        assert!(cubemap_mip_levels(128, 128, 0).is_err());
    }

    #[test]
    fn test_prefilter_settings_allocate_exactly_their_levels() {
        for levels in 2..=8 {
            let config = IblConfig {
                prefilter_size: 128,
                prefilter_mip_levels: levels,
                ..IblConfig::default()
            };
            assert!(config.validate().is_ok());
            assert_eq!(cubemap_mip_levels(128, 128, levels).unwrap(), levels);
        }

        let too_many = IblConfig {
            prefilter_size: 128,
            prefilter_mip_levels: 9,
            ..IblConfig::default()
        };
        assert!(too_many.validate().is_err());
        assert!(cubemap_mip_levels(128, 128, 9).is_err());
    }

    #[test]
    fn test_upload_len_mismatch_is_rejected() {
        assert!(check_upload_len(32, 32).is_ok());
        assert!(matches!(
            check_upload_len(31, 32),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }
}
