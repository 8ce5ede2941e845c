//! Renderer vocabulary and its mapping onto Vulkan enums
//!
//! Render pass descriptions are written in a small API-agnostic vocabulary
//! (formats, load/store ops, layouts). The functions here translate it to the
//! native types and provide the byte size of every uncompressed `vk::Format`.

use ash::vk;

/// Whether an access mask is for the source or destination side of a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    /// Accesses that must complete before the barrier
    Src,
    /// Accesses that wait on the barrier
    Dst,
}

/// Image layouts used by render pass attachments and textures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    /// Contents are discarded
    Undefined,
    /// Color or depth attachment, depending on the image
    Attachment,
    /// Sampled from shaders
    ShaderRead,
    /// Ready for presentation
    Present,
    /// Source of a copy or blit
    TransferSrc,
    /// Destination of a copy or blit
    TransferDst,
}

/// Attachment load operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    /// Previous contents are irrelevant
    DontCare,
    /// Keep previous contents
    Load,
    /// Clear at the start of the pass
    Clear,
}

/// Attachment store operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    /// Contents may be discarded
    DontCare,
    /// Contents are written back
    Store,
}

/// Color space of 8-bit texture data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    /// Linear data such as normals or material parameters
    Linear,
    /// Gamma-encoded color
    Srgb,
}

/// Attachment and cubemap formats
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One 16-bit float channel
    R16_FLOAT,
    /// One 32-bit float channel
    R32_FLOAT,
    /// Two 16-bit float channels
    RG16_FLOAT,
    /// Two 32-bit float channels
    RG32_FLOAT,
    /// Three 16-bit float channels
    RGB16_FLOAT,
    /// Three 32-bit float channels
    RGB32_FLOAT,
    /// Four 16-bit float channels
    RGBA16_FLOAT,
    /// Four 32-bit float channels
    RGBA32_FLOAT,
    /// 32-bit float depth
    D32_FLOAT,
}

impl Format {
    /// Whether the format holds depth
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32_FLOAT)
    }
}

/// Buffer-backed descriptor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    /// `uniform` block
    UniformBuffer,
    /// `buffer` block
    StorageBuffer,
}

/// Description of one render pass attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDescription {
    /// Load operation at the start of the pass
    pub load_op: LoadOp,
    /// Store operation at the end of the pass
    pub store_op: StoreOp,
    /// Layout the image is in when the pass begins
    pub initial_layout: ImageLayout,
    /// Layout the pass leaves the image in
    pub final_layout: ImageLayout,
    /// Pixel format
    pub format: Format,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Native load op
pub fn vk_load_op(load_op: LoadOp) -> vk::AttachmentLoadOp {
    match load_op {
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
    }
}

/// Native store op
pub fn vk_store_op(store_op: StoreOp) -> vk::AttachmentStoreOp {
    match store_op {
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
    }
}

/// Native image layout; `Attachment` resolves to the depth layout for depth images
pub fn vk_image_layout(layout: ImageLayout, is_depth: bool) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::Attachment if is_depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::Attachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    }
}

/// Access mask for one side of a barrier on an image in `layout`
pub fn vk_access_flags(layout: ImageLayout, access: AccessType, is_depth: bool) -> vk::AccessFlags {
    match (layout, access) {
        (ImageLayout::Undefined, _) => vk::AccessFlags::empty(),
        (ImageLayout::Attachment, AccessType::Src) if is_depth => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        (ImageLayout::Attachment, AccessType::Dst) if is_depth => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        (ImageLayout::Attachment, AccessType::Src) => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        (ImageLayout::Attachment, AccessType::Dst) => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        (ImageLayout::ShaderRead, _) => vk::AccessFlags::SHADER_READ,
        (ImageLayout::TransferSrc, _) => vk::AccessFlags::TRANSFER_READ,
        (ImageLayout::TransferDst, _) => vk::AccessFlags::TRANSFER_WRITE,
        (ImageLayout::Present, AccessType::Src) => vk::AccessFlags::empty(),
        (ImageLayout::Present, AccessType::Dst) => vk::AccessFlags::MEMORY_READ,
    }
}

/// Native format
pub fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::R16_FLOAT => vk::Format::R16_SFLOAT,
        Format::R32_FLOAT => vk::Format::R32_SFLOAT,
        Format::RG16_FLOAT => vk::Format::R16G16_SFLOAT,
        Format::RG32_FLOAT => vk::Format::R32G32_SFLOAT,
        Format::RGB16_FLOAT => vk::Format::R16G16B16_SFLOAT,
        Format::RGB32_FLOAT => vk::Format::R32G32B32_SFLOAT,
        Format::RGBA16_FLOAT => vk::Format::R16G16B16A16_SFLOAT,
        Format::RGBA32_FLOAT => vk::Format::R32G32B32A32_SFLOAT,
        Format::D32_FLOAT => vk::Format::D32_SFLOAT,
    }
}

/// Native descriptor type
pub fn vk_descriptor_type(descriptor_type: DescriptorType) -> vk::DescriptorType {
    match descriptor_type {
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
    }
}

/// Size in bytes of one texel (or vertex attribute) of `format`
///
/// Compressed and unknown formats report 0.
pub fn vk_format_size(format: vk::Format) -> u32 {
    use vk::Format as F;

    match format {
        F::R4G4_UNORM_PACK8
        | F::R8_UNORM | F::R8_SNORM | F::R8_USCALED | F::R8_SSCALED
        | F::R8_UINT | F::R8_SINT | F::R8_SRGB
        | F::S8_UINT => 1,

        F::R4G4B4A4_UNORM_PACK16 | F::B4G4R4A4_UNORM_PACK16
        | F::R5G6B5_UNORM_PACK16 | F::B5G6R5_UNORM_PACK16
        | F::R5G5B5A1_UNORM_PACK16 | F::B5G5R5A1_UNORM_PACK16 | F::A1R5G5B5_UNORM_PACK16
        | F::R8G8_UNORM | F::R8G8_SNORM | F::R8G8_USCALED | F::R8G8_SSCALED
        | F::R8G8_UINT | F::R8G8_SINT | F::R8G8_SRGB
        | F::R16_UNORM | F::R16_SNORM | F::R16_USCALED | F::R16_SSCALED
        | F::R16_UINT | F::R16_SINT | F::R16_SFLOAT
        | F::D16_UNORM => 2,

        F::R8G8B8_UNORM | F::R8G8B8_SNORM | F::R8G8B8_USCALED | F::R8G8B8_SSCALED
        | F::R8G8B8_UINT | F::R8G8B8_SINT | F::R8G8B8_SRGB
        | F::B8G8R8_UNORM | F::B8G8R8_SNORM | F::B8G8R8_USCALED | F::B8G8R8_SSCALED
        | F::B8G8R8_UINT | F::B8G8R8_SINT | F::B8G8R8_SRGB
        | F::D16_UNORM_S8_UINT => 3,

        F::R8G8B8A8_UNORM | F::R8G8B8A8_SNORM | F::R8G8B8A8_USCALED | F::R8G8B8A8_SSCALED
        | F::R8G8B8A8_UINT | F::R8G8B8A8_SINT | F::R8G8B8A8_SRGB
        | F::B8G8R8A8_UNORM | F::B8G8R8A8_SNORM | F::B8G8R8A8_USCALED | F::B8G8R8A8_SSCALED
        | F::B8G8R8A8_UINT | F::B8G8R8A8_SINT | F::B8G8R8A8_SRGB
        | F::A8B8G8R8_UNORM_PACK32 | F::A8B8G8R8_SNORM_PACK32 | F::A8B8G8R8_USCALED_PACK32
        | F::A8B8G8R8_SSCALED_PACK32 | F::A8B8G8R8_UINT_PACK32 | F::A8B8G8R8_SINT_PACK32
        | F::A8B8G8R8_SRGB_PACK32
        | F::A2R10G10B10_UNORM_PACK32 | F::A2R10G10B10_SNORM_PACK32 | F::A2R10G10B10_USCALED_PACK32
        | F::A2R10G10B10_SSCALED_PACK32 | F::A2R10G10B10_UINT_PACK32 | F::A2R10G10B10_SINT_PACK32
        | F::A2B10G10R10_UNORM_PACK32 | F::A2B10G10R10_SNORM_PACK32 | F::A2B10G10R10_USCALED_PACK32
        | F::A2B10G10R10_SSCALED_PACK32 | F::A2B10G10R10_UINT_PACK32 | F::A2B10G10R10_SINT_PACK32
        | F::R16G16_UNORM | F::R16G16_SNORM | F::R16G16_USCALED | F::R16G16_SSCALED
        | F::R16G16_UINT | F::R16G16_SINT | F::R16G16_SFLOAT
        | F::R32_UINT | F::R32_SINT | F::R32_SFLOAT
        | F::B10G11R11_UFLOAT_PACK32 | F::E5B9G9R9_UFLOAT_PACK32
        | F::X8_D24_UNORM_PACK32 | F::D32_SFLOAT | F::D24_UNORM_S8_UINT => 4,

        F::D32_SFLOAT_S8_UINT => 5,

        F::R16G16B16_UNORM | F::R16G16B16_SNORM | F::R16G16B16_USCALED | F::R16G16B16_SSCALED
        | F::R16G16B16_UINT | F::R16G16B16_SINT | F::R16G16B16_SFLOAT => 6,

        F::R16G16B16A16_UNORM | F::R16G16B16A16_SNORM | F::R16G16B16A16_USCALED
        | F::R16G16B16A16_SSCALED | F::R16G16B16A16_UINT | F::R16G16B16A16_SINT
        | F::R16G16B16A16_SFLOAT
        | F::R32G32_UINT | F::R32G32_SINT | F::R32G32_SFLOAT
        | F::R64_UINT | F::R64_SINT | F::R64_SFLOAT => 8,

        F::R32G32B32_UINT | F::R32G32B32_SINT | F::R32G32B32_SFLOAT => 12,

        F::R32G32B32A32_UINT | F::R32G32B32A32_SINT | F::R32G32B32A32_SFLOAT
        | F::R64G64_UINT | F::R64G64_SINT | F::R64G64_SFLOAT => 16,

        F::R64G64B64_UINT | F::R64G64B64_SINT | F::R64G64B64_SFLOAT => 24,

        F::R64G64B64A64_UINT | F::R64G64B64A64_SINT | F::R64G64B64A64_SFLOAT => 32,

        _ => 0,
    }
}

/// 8-bit texture format for a component count and color space
pub fn texture_format(components: u32, color_space: ColorSpace) -> Option<vk::Format> {
    match (components, color_space) {
        (3, ColorSpace::Srgb) => Some(vk::Format::R8G8B8_SRGB),
        (3, ColorSpace::Linear) => Some(vk::Format::R8G8B8_UNORM),
        (4, ColorSpace::Srgb) => Some(vk::Format::R8G8B8A8_SRGB),
        (4, ColorSpace::Linear) => Some(vk::Format::R8G8B8A8_UNORM),
        _ => None,
    }
}

/// Staging and final formats for float texture data with `components` channels
///
/// HDR data is uploaded as 32-bit floats and downcast to 16-bit floats by a blit.
pub fn hdr_texture_formats(components: u32) -> Option<(vk::Format, vk::Format)> {
    match components {
        3 => Some((vk::Format::R32G32B32_SFLOAT, vk::Format::R16G16B16_SFLOAT)),
        4 => Some((vk::Format::R32G32B32A32_SFLOAT, vk::Format::R16G16B16A16_SFLOAT)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts() {
        assert_eq!(vk_image_layout(ImageLayout::Attachment, false), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(vk_image_layout(ImageLayout::Attachment, true), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(vk_image_layout(ImageLayout::ShaderRead, true), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(vk_image_layout(ImageLayout::Present, false), vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_attachment_access_matches_image_kind() {
        assert_eq!(
            vk_access_flags(ImageLayout::Attachment, AccessType::Src, false),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(
            vk_access_flags(ImageLayout::Attachment, AccessType::Src, true),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert!(vk_access_flags(ImageLayout::Attachment, AccessType::Dst, true)
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ));
        assert!(vk_access_flags(ImageLayout::Undefined, AccessType::Src, false).is_empty());
        assert_eq!(
            vk_access_flags(ImageLayout::TransferDst, AccessType::Dst, false),
            vk::AccessFlags::TRANSFER_WRITE
        );
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(vk_format_size(vk::Format::R32G32B32_SFLOAT), 12);
        assert_eq!(vk_format_size(vk::Format::R32G32_SFLOAT), 8);
        assert_eq!(vk_format_size(vk::Format::R32G32B32A32_SFLOAT), 16);
        assert_eq!(vk_format_size(vk::Format::R8G8B8A8_SRGB), 4);
        assert_eq!(vk_format_size(vk::Format::R16G16B16_SFLOAT), 6);
        assert_eq!(vk_format_size(vk::Format::R64G64B64A64_SFLOAT), 32);
        assert_eq!(vk_format_size(vk::Format::B10G11R11_UFLOAT_PACK32), 4);
        assert_eq!(vk_format_size(vk::Format::UNDEFINED), 0);
        assert_eq!(vk_format_size(vk::Format::BC1_RGB_UNORM_BLOCK), 0);
    }

    #[test]
    fn test_abstract_formats_have_sizes() {
        let formats = [
            (Format::R16_FLOAT, 2),
            (Format::RG16_FLOAT, 4),
            (Format::RGB32_FLOAT, 12),
            (Format::RGBA16_FLOAT, 8),
            (Format::D32_FLOAT, 4),
        ];
        for (format, size) in formats {
            assert_eq!(vk_format_size(vk_format(format)), size, "{format:?}");
        }
        assert!(Format::D32_FLOAT.is_depth());
        assert!(!Format::RGBA32_FLOAT.is_depth());
    }

    #[test]
    fn test_texture_formats() {
        assert_eq!(texture_format(4, ColorSpace::Srgb), Some(vk::Format::R8G8B8A8_SRGB));
        assert_eq!(texture_format(3, ColorSpace::Linear), Some(vk::Format::R8G8B8_UNORM));
        assert_eq!(texture_format(2, ColorSpace::Linear), None);
        assert_eq!(
            hdr_texture_formats(4),
            Some((vk::Format::R32G32B32A32_SFLOAT, vk::Format::R16G16B16A16_SFLOAT))
        );
        assert_eq!(hdr_texture_formats(1), None);
    }
}
