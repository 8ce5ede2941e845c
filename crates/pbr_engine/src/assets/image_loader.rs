//! Image loading for texture uploads
//!
//! LDR images are decoded to tightly packed RGBA8 for
//! [`GraphicsContext::create_texture`](crate::render::GraphicsContext::create_texture);
//! HDR images to RGBA32F for
//! [`GraphicsContext::create_hdr_texture`](crate::render::GraphicsContext::create_hdr_texture).

use std::path::Path;

use crate::assets::AssetError;

/// Decoded pixels, row-major, `components` values per pixel
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData<T = u8> {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Channels per pixel
    pub components: u32,
    /// Pixel values
    pub pixels: Vec<T>,
}

/// Floating-point image data
pub type HdrImageData = ImageData<f32>;

impl<T> ImageData<T> {
    /// Wrap raw pixels, checking the length against the dimensions
    pub fn new(width: u32, height: u32, components: u32, pixels: Vec<T>) -> Result<Self, AssetError> {
        let expected = width as usize * height as usize * components as usize;
        if pixels.len() != expected {
            return Err(AssetError::InvalidData(format!(
                "{width}x{height}x{components} image needs {expected} values, got {}",
                pixels.len()
            )));
        }

        Ok(Self {
            width,
            height,
            components,
            pixels,
        })
    }

    /// Number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl<T: Copy> ImageData<T> {
    /// Image filled with one RGBA color
    pub fn solid_color(width: u32, height: u32, color: [T; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width as usize * height as usize {
            pixels.extend_from_slice(&color);
        }

        Self {
            width,
            height,
            components: 4,
            pixels,
        }
    }
}

impl ImageData<u8> {
    /// Load a PNG or JPEG file as RGBA8
    pub fn load_rgba8(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| AssetError::LoadFailed(format!("{}: {e}", path.display())))?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::info!("Loaded image {width}x{height} from {}", path.display());

        Ok(Self {
            width,
            height,
            components: 4,
            pixels: rgba.into_raw(),
        })
    }

    /// Decode an in-memory PNG or JPEG as RGBA8
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AssetError> {
        let img = image::load_from_memory(bytes).map_err(|e| AssetError::LoadFailed(e.to_string()))?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        Ok(Self {
            width,
            height,
            components: 4,
            pixels: rgba.into_raw(),
        })
    }
}

impl ImageData<f32> {
    /// Load a Radiance `.hdr` file as RGBA32F with alpha 1
    pub fn load_hdr(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| AssetError::LoadFailed(format!("{}: {e}", path.display())))?;

        let rgba = img.to_rgba32f();
        let (width, height) = rgba.dimensions();
        log::info!("Loaded HDR image {width}x{height} from {}", path.display());

        Ok(Self {
            width,
            height,
            components: 4,
            pixels: rgba.into_raw(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color_image() {
        let img = ImageData::solid_color(4, 4, [255u8, 0, 0, 255]);
        assert_eq!(img.width, 4);
        assert_eq!(img.components, 4);
        assert_eq!(img.pixels.len(), 4 * 4 * 4);
        assert_eq!(&img.pixels[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_length_is_checked() {
        assert!(ImageData::new(2, 2, 3, vec![0u8; 12]).is_ok());
        assert!(matches!(
            ImageData::new(2, 2, 4, vec![0.0f32; 12]),
            Err(AssetError::InvalidData(_))
        ));
    }

    #[test]
    fn test_png_round_trip_through_memory() {
        let source = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        source
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let decoded = ImageData::from_bytes(&bytes).unwrap();
        assert_eq!((decoded.width, decoded.height, decoded.components), (3, 2, 4));
        assert_eq!(decoded.pixel_count(), 6);
        assert_eq!(&decoded.pixels[4..8], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            HdrImageData::load_hdr("does/not/exist.hdr"),
            Err(AssetError::LoadFailed(_))
        ));
    }
}
