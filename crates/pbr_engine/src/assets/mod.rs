//! Asset loading
//!
//! Only images are loaded here; meshes are built procedurally by the caller.

pub mod image_loader;

pub use image_loader::{HdrImageData, ImageData};

use thiserror::Error;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// Failed to load asset
    #[error("Failed to load asset: {0}")]
    LoadFailed(String),

    /// Invalid asset data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}
