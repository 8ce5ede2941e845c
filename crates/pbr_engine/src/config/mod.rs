//! Configuration system
//!
//! Renderer settings are plain serde structs that can be loaded from and saved
//! to TOML or RON files through the [`Config`] trait. Defaults reproduce the
//! behaviour of a stock build, so a missing file is never an error for callers
//! that fall back to `Default`.

use std::path::{Path, PathBuf};

pub use serde::{Serialize, Deserialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from a `.toml` or `.ron` file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            ConfigFormat::Ron => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    /// Load configuration, falling back to defaults when the file does not exist
    fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            log::info!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            ConfigFormat::Ron => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Ron,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// # Descriptor Pool Sizes
///
/// Capacity of the context-wide descriptor pool every descriptor set is
/// allocated from. Each descriptor set handle consumes two sets (one per frame
/// in flight).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    /// Uniform buffer descriptors
    pub uniform_buffers: u32,
    /// Storage buffer descriptors
    pub storage_buffers: u32,
    /// Combined image sampler descriptors
    pub combined_image_samplers: u32,
    /// Maximum number of sets
    pub max_sets: u32,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            uniform_buffers: 100,
            storage_buffers: 100,
            combined_image_samplers: 1000,
            max_sets: 100,
        }
    }
}

/// # Graphics Configuration
///
/// Settings consumed by `GraphicsContext::create`: instance metadata, device
/// preference, validation layers and pool capacities.
///
/// ## Example
///
/// ```rust
/// use pbr_engine::config::GraphicsConfig;
///
/// let config = GraphicsConfig::default()
///     .with_application_name("Viewer")
///     .with_validation(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Application name reported to the Vulkan instance
    pub application_name: String,
    /// Enable validation layers and the debug messenger
    pub enable_validation: bool,
    /// Prefer a discrete GPU when several devices are suitable
    pub prefer_discrete_gpu: bool,
    /// Timeout for per-frame fence waits and image acquisition, in nanoseconds
    pub fence_timeout_ns: u64,
    /// Global descriptor pool capacity
    pub descriptor_pool: DescriptorPoolConfig,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            application_name: "VkPBR".to_string(),
            enable_validation: cfg!(debug_assertions),
            prefer_discrete_gpu: true,
            fence_timeout_ns: 1_000_000_000,
            descriptor_pool: DescriptorPoolConfig::default(),
        }
    }
}

impl GraphicsConfig {
    /// Set the application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Set the per-frame fence timeout
    pub fn with_fence_timeout_ns(mut self, timeout: u64) -> Self {
        self.fence_timeout_ns = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if self.fence_timeout_ns == 0 {
            return Err("Fence timeout must be non-zero".to_string());
        }

        let pool = &self.descriptor_pool;
        if pool.max_sets == 0 {
            return Err("Descriptor pool must allow at least one set".to_string());
        }
        if pool.uniform_buffers + pool.storage_buffers + pool.combined_image_samplers == 0 {
            return Err("Descriptor pool has no descriptors".to_string());
        }

        Ok(())
    }
}

impl Config for GraphicsConfig {}

/// # Image-Based Lighting Configuration
///
/// Target sizes of the maps produced at startup from an equirectangular HDR image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IblConfig {
    /// Edge length of the environment cubemap
    pub environment_size: u32,
    /// Edge length of the diffuse irradiance cubemap
    pub irradiance_size: u32,
    /// Edge length of mip 0 of the specular prefilter cubemap
    pub prefilter_size: u32,
    /// Number of roughness levels in the prefilter cubemap
    pub prefilter_mip_levels: u32,
    /// Edge length of the BRDF integration lookup table
    pub brdf_lut_size: u32,
    /// Directory containing the capture shaders
    pub shader_directory: PathBuf,
}

impl Default for IblConfig {
    fn default() -> Self {
        Self {
            environment_size: 512,
            irradiance_size: 32,
            prefilter_size: 128,
            prefilter_mip_levels: 5,
            brdf_lut_size: 512,
            shader_directory: PathBuf::from("assets/shaders"),
        }
    }
}

impl IblConfig {
    /// Set the shader directory
    pub fn with_shader_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_directory = dir.into();
        self
    }

    /// Path of a shader inside the shader directory
    pub fn shader_path(&self, file_name: &str) -> PathBuf {
        self.shader_directory.join(file_name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let sizes = [
            ("environment", self.environment_size),
            ("irradiance", self.irradiance_size),
            ("prefilter", self.prefilter_size),
            ("BRDF LUT", self.brdf_lut_size),
        ];
        for (name, size) in sizes {
            if size == 0 {
                return Err(format!("{name} size must be non-zero"));
            }
        }

        if self.prefilter_mip_levels < 2 {
            return Err("Prefilter needs at least two mip levels".to_string());
        }

        if self.prefilter_size >> (self.prefilter_mip_levels - 1) == 0 {
            return Err(format!(
                "Prefilter size {} is too small for {} mip levels",
                self.prefilter_size, self.prefilter_mip_levels
            ));
        }

        Ok(())
    }
}

impl Config for IblConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphics_defaults() {
        let config = GraphicsConfig::default();
        assert_eq!(config.application_name, "VkPBR");
        assert_eq!(config.fence_timeout_ns, 1_000_000_000);
        assert_eq!(config.descriptor_pool.combined_image_samplers, 1000);
        assert!(config.prefer_discrete_gpu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_graphics_validation_rejects_empty_name() {
        let config = GraphicsConfig::default().with_application_name("");
        assert!(config.validate().is_err());

        let config = GraphicsConfig::default().with_fence_timeout_ns(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = GraphicsConfig::default()
            .with_application_name("Viewer")
            .with_validation(true);
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: GraphicsConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: IblConfig = toml::from_str("irradiance_size = 64").unwrap();
        assert_eq!(parsed.irradiance_size, 64);
        assert_eq!(parsed.environment_size, 512);
        assert_eq!(parsed.prefilter_mip_levels, 5);
    }

    #[test]
    fn test_ron_file_round_trip() {
        let path = std::env::temp_dir().join(format!("pbr_engine_ibl_{}.ron", std::process::id()));
        let config = IblConfig::default().with_shader_directory("shaders");
        config.save_to_file(&path).unwrap();

        let loaded = IblConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = IblConfig::load_from_file("settings.json");
        assert!(matches!(result, Err(ConfigError::Io(_)) | Err(ConfigError::UnsupportedFormat(_))));

        let result = IblConfig::default().save_to_file("settings.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_ibl_validation() {
        assert!(IblConfig::default().validate().is_ok());

        let mut config = IblConfig::default();
        config.prefilter_size = 8;
        config.prefilter_mip_levels = 5;
        assert!(config.validate().is_err());

        config.prefilter_size = 16;
        assert!(config.validate().is_ok());
    }
}
