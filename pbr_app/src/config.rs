//! Demo settings, read from `pbr_demo.toml` next to the working directory

use std::path::PathBuf;

use pbr_engine::config::{Config, GraphicsConfig, IblConfig};
use serde::{Deserialize, Serialize};

/// Default settings file
pub const CONFIG_PATH: &str = "pbr_demo.toml";

/// Window settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "PBR Demo".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Image files; a missing one is replaced by a generated stand-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureSettings {
    pub environment: PathBuf,
    pub albedo: PathBuf,
    pub material: PathBuf,
    pub normal: PathBuf,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            environment: PathBuf::from("assets/textures/night_stars.hdr"),
            albedo: PathBuf::from("assets/textures/metal.jpg"),
            material: PathBuf::from("assets/textures/metal_scratch_mat.png"),
            normal: PathBuf::from("assets/textures/metal_scratch_normal.jpg"),
        }
    }
}

/// Everything the demo reads at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// `env_logger` filter used when `RUST_LOG` is unset
    pub log_level: String,
    pub window: WindowSettings,
    pub textures: TextureSettings,
    /// Directory holding every `.vert`/`.frag` file
    pub shader_directory: PathBuf,
    /// World units per frame
    pub move_speed: f32,
    /// Radians per frame
    pub turn_speed: f32,
    /// Spheres per side of the instanced grid
    pub grid_size: u32,
    pub graphics: GraphicsConfig,
    pub ibl: IblConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            window: WindowSettings::default(),
            textures: TextureSettings::default(),
            shader_directory: PathBuf::from("assets/shaders"),
            move_speed: 0.1,
            turn_speed: 0.01,
            grid_size: 5,
            graphics: GraphicsConfig::default().with_application_name("PBR Demo"),
            ibl: IblConfig::default(),
        }
    }
}

impl Config for DemoConfig {}

impl DemoConfig {
    /// Path of a shader inside the shader directory
    pub fn shader_path(&self, file_name: &str) -> PathBuf {
        self.shader_directory.join(file_name)
    }

    /// IBL settings reading shaders from the demo's shader directory
    pub fn ibl_config(&self) -> IblConfig {
        self.ibl.clone().with_shader_directory(&self.shader_directory)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), String> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err("Window size must be non-zero".to_string());
        }
        if self.grid_size == 0 || self.grid_size * self.grid_size > crate::app::MAX_OBJECTS {
            return Err(format!("Grid size {} does not fit the object buffer", self.grid_size));
        }
        self.graphics.validate()?;
        self.ibl.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DemoConfig::default();
        assert_eq!(config.window.title, "PBR Demo");
        assert_eq!((config.window.width, config.window.height), (1280, 720));
        assert_eq!(config.graphics.application_name, "PBR Demo");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let text = r#"
            log_level = "debug"
            grid_size = 3

            [window]
            width = 800

            [ibl]
            irradiance_size = 16
        "#;
        let config: DemoConfig = toml::from_str(text).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.grid_size, 3);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.ibl.irradiance_size, 16);
        assert_eq!(config.ibl.environment_size, 512);
    }

    #[test]
    fn test_shader_paths() {
        let config = DemoConfig {
            shader_directory: PathBuf::from("shaders"),
            ..DemoConfig::default()
        };
        assert_eq!(config.shader_path("pbr.vert"), PathBuf::from("shaders/pbr.vert"));
        assert_eq!(config.ibl_config().shader_path("brdf.frag"), PathBuf::from("shaders/brdf.frag"));
    }

    #[test]
    fn test_oversized_grid_is_rejected() {
        let config = DemoConfig {
            grid_size: 200,
            ..DemoConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
