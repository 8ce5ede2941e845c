//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the renderer:
//! - Math types and camera/projection helpers
//! - Generation-checked handle types for GPU resources
//! - Logging initialisation and the injectable render logger

pub mod math;
pub mod collections;
pub mod logging;
