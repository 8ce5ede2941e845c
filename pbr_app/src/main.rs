//! PBR demo
//!
//! Renders a grid of image-based-lit spheres under an HDR skybox.
//! WASD moves, the left and right arrows turn, Escape quits.

mod app;
mod camera;
mod config;
mod mesh;

use pbr_engine::config::Config;
use pbr_engine::foundation::logging;

use crate::app::{DemoError, PbrDemo};
use crate::config::{DemoConfig, CONFIG_PATH};

fn main() -> Result<(), DemoError> {
    let config = DemoConfig::load_or_default(CONFIG_PATH)?;
    logging::init_with_level(&config.log_level);

    log::info!("Starting PBR demo");

    let mut demo = PbrDemo::new(config).map_err(|e| {
        log::error!("Startup failed: {e}");
        e
    })?;

    demo.run().map_err(|e| {
        log::error!("Frame loop failed: {e}");
        e
    })
}
