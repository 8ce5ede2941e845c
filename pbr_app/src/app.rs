//! PBR demo application
//!
//! Generates the image-based-lighting maps once, then draws an instanced grid
//! of textured spheres under a skybox until the window closes.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use pbr_engine::assets::{AssetError, HdrImageData, ImageData};
use pbr_engine::config::ConfigError;
use pbr_engine::foundation::collections::{
    DescriptorSetHandle, FenceHandle, FrameCommandBufferHandle, PipelineHandle, SemaphoreHandle, TextureHandle,
    VertexBufferHandle,
};
use pbr_engine::foundation::logging::{LogCrateLogger, RenderLogger};
use pbr_engine::foundation::math::{Mat4, Mat4Ext, Vec3};
use pbr_engine::ibl::{IblMaps, IblPreprocessor};
use pbr_engine::render::{
    ColorSpace, DescriptorType, GraphicsContext, Key, PipelineCreateInfo, VulkanError, VulkanResult, Window,
    WindowError,
};
use thiserror::Error;

use crate::camera::{Camera, CameraData, CameraInput};
use crate::config::DemoConfig;
use crate::mesh;

/// Capacity of the per-frame model matrix buffer
pub const MAX_OBJECTS: u32 = 10_000;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const GRID_SPACING: f32 = 2.5;

/// Demo errors
#[derive(Error, Debug)]
pub enum DemoError {
    /// Window could not be created
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Any graphics failure
    #[error("Graphics error: {0}")]
    Graphics(#[from] VulkanError),

    /// Image data could not be used
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Settings file could not be read
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Settings were read but are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Sync objects and command buffers for the frame loop
struct FrameResources {
    fence: FenceHandle,
    image_available: SemaphoreHandle,
    render_finished: SemaphoreHandle,
    commands: FrameCommandBufferHandle,
}

impl FrameResources {
    fn create(context: &mut GraphicsContext) -> VulkanResult<Self> {
        Ok(Self {
            fence: context.create_fence(true)?,
            image_available: context.create_semaphore()?,
            render_finished: context.create_semaphore()?,
            commands: context.create_frame_command_buffer()?,
        })
    }
}

struct MaterialTextures {
    albedo: TextureHandle,
    material: TextureHandle,
    normal: TextureHandle,
}

impl MaterialTextures {
    fn load(context: &mut GraphicsContext, config: &DemoConfig) -> VulkanResult<Self> {
        Ok(Self {
            albedo: upload_texture(context, &config.textures.albedo, [200, 200, 200, 255], ColorSpace::Srgb)?,
            material: upload_texture(context, &config.textures.material, [255, 128, 255, 255], ColorSpace::Linear)?,
            normal: upload_texture(context, &config.textures.normal, [128, 128, 255, 255], ColorSpace::Linear)?,
        })
    }
}

fn upload_texture(
    context: &mut GraphicsContext,
    path: &Path,
    fallback: [u8; 4],
    color_space: ColorSpace,
) -> VulkanResult<TextureHandle> {
    let image = load_texture_or(path, fallback);
    context.create_texture(image.width, image.height, image.components, color_space, &image.pixels, true)
}

struct Mesh {
    buffer: VertexBufferHandle,
    vertex_count: u32,
}

impl Mesh {
    fn upload<T: bytemuck::Pod>(context: &mut GraphicsContext, vertices: &[T]) -> VulkanResult<Self> {
        Ok(Self {
            buffer: context.create_vertex_buffer(bytemuck::cast_slice(vertices))?,
            vertex_count: vertices.len() as u32,
        })
    }
}

/// Viewport-sized pipelines and the descriptor sets allocated from them
struct Scene {
    pbr: PipelineHandle,
    skybox: PipelineHandle,
    camera_set: DescriptorSetHandle,
    objects_set: DescriptorSetHandle,
    material_set: DescriptorSetHandle,
    skybox_camera_set: DescriptorSetHandle,
    environment_set: DescriptorSetHandle,
}

impl Scene {
    fn create(
        context: &mut GraphicsContext,
        config: &DemoConfig,
        maps: &IblMaps,
        textures: &MaterialTextures,
    ) -> VulkanResult<Self> {
        let (width, height) = context.swapchain_extent();
        let camera_size = std::mem::size_of::<CameraData>() as u64;

        let pbr = context.create_pipeline(&PipelineCreateInfo::new(
            config.shader_path("pbr.vert"),
            config.shader_path("pbr.frag"),
            width,
            height,
        ))?;

        let camera_set = context.create_descriptor_set(pbr, 0)?;
        context.descriptor_set_add_buffer(camera_set, 0, DescriptorType::UniformBuffer, camera_size)?;
        context.descriptor_set_add_image(camera_set, 1, maps.irradiance)?;
        context.descriptor_set_add_image(camera_set, 2, maps.prefilter)?;
        context.descriptor_set_add_render_pass_attachment(camera_set, 3, maps.brdf_render_pass, 0)?;

        let objects_set = context.create_descriptor_set(pbr, 1)?;
        context.descriptor_set_add_buffer(
            objects_set,
            0,
            DescriptorType::StorageBuffer,
            u64::from(MAX_OBJECTS) * std::mem::size_of::<[[f32; 4]; 4]>() as u64,
        )?;

        let material_set = context.create_descriptor_set(pbr, 2)?;
        context.descriptor_set_add_image(material_set, 0, textures.albedo)?;
        context.descriptor_set_add_image(material_set, 1, textures.material)?;
        context.descriptor_set_add_image(material_set, 2, textures.normal)?;

        let skybox = context.create_pipeline(&PipelineCreateInfo::new(
            config.shader_path("skybox.vert"),
            config.shader_path("skybox.frag"),
            width,
            height,
        ))?;

        let skybox_camera_set = context.create_descriptor_set(skybox, 0)?;
        context.descriptor_set_add_buffer(skybox_camera_set, 0, DescriptorType::UniformBuffer, camera_size)?;

        let environment_set = context.create_descriptor_set(skybox, 1)?;
        context.descriptor_set_add_image(environment_set, 0, maps.environment)?;

        Ok(Self {
            pbr,
            skybox,
            camera_set,
            objects_set,
            material_set,
            skybox_camera_set,
            environment_set,
        })
    }

    /// The device must be idle
    fn destroy(self, context: &mut GraphicsContext) -> VulkanResult<()> {
        for set in [
            self.camera_set,
            self.objects_set,
            self.material_set,
            self.skybox_camera_set,
            self.environment_set,
        ] {
            context.destroy_descriptor_set(set)?;
        }
        context.destroy_pipeline(self.pbr)?;
        context.destroy_pipeline(self.skybox)
    }
}

/// The running demo
pub struct PbrDemo {
    context: GraphicsContext,
    config: DemoConfig,
    camera: Camera,
    frame: FrameResources,
    maps: IblMaps,
    textures: MaterialTextures,
    sphere: Mesh,
    skybox: Mesh,
    scene: Option<Scene>,
    start_time: Instant,
}

impl PbrDemo {
    /// Open the window, bring up the context and build every startup resource
    pub fn new(config: DemoConfig) -> Result<Self, DemoError> {
        config.validate().map_err(DemoError::InvalidConfig)?;

        log::info!("Creating window...");
        let window = Window::new(&config.window.title, config.window.width, config.window.height)?;

        let logger: Arc<dyn RenderLogger> = Arc::new(LogCrateLogger);
        let mut context = GraphicsContext::create(window, config.graphics.clone(), logger)?;

        log::info!("Generating image-based lighting maps...");
        let environment = load_environment(&config.textures.environment)?;
        let equirect = context.create_hdr_texture(
            environment.width,
            environment.height,
            environment.components,
            &environment.pixels,
        )?;
        let maps = IblPreprocessor::new(&mut context, config.ibl_config())?.run(equirect)?;
        context.destroy_texture(equirect)?;

        let textures = MaterialTextures::load(&mut context, &config)?;
        let sphere = Mesh::upload(&mut context, &mesh::uv_sphere(1.0, 64, 32))?;
        let skybox = Mesh::upload(&mut context, &mesh::cube())?;
        let frame = FrameResources::create(&mut context)?;
        let scene = Scene::create(&mut context, &config, &maps, &textures)?;

        log::info!("Demo ready");

        Ok(Self {
            context,
            camera: Camera::new(Vec3::new(0.0, 0.0, 10.0)),
            config,
            frame,
            maps,
            textures,
            sphere,
            skybox,
            scene: Some(scene),
            start_time: Instant::now(),
        })
    }

    /// Run the frame loop until the window closes or Escape is pressed
    pub fn run(&mut self) -> Result<(), DemoError> {
        while !self.context.window().should_close() {
            self.context.window_mut().poll();

            if self.context.window().key_down(Key::Escape) {
                self.context.window_mut().set_should_close(true);
                continue;
            }

            if self.context.window().is_minimized() {
                self.context.window_mut().restore();
                continue;
            }

            let input = CameraInput::from_window(self.context.window());
            self.camera.apply(input, self.config.move_speed, self.config.turn_speed);

            if let Some((width, height)) = self.context.poll_resize() {
                log::info!("Rebuilding scene pipelines for {width}x{height}");
                self.rebuild_scene()?;
            }

            let frame_start = Instant::now();
            self.draw_frame()?;
            log::debug!("Frame time: {:.2} ms", frame_start.elapsed().as_secs_f64() * 1000.0);
        }

        self.context.wait_idle()?;
        log::info!("Demo finished after {} frames", self.context.frame_counter());
        Ok(())
    }

    fn rebuild_scene(&mut self) -> VulkanResult<()> {
        self.context.wait_idle()?;
        if let Some(scene) = self.scene.take() {
            scene.destroy(&mut self.context)?;
        }
        self.scene = Some(Scene::create(&mut self.context, &self.config, &self.maps, &self.textures)?);
        Ok(())
    }

    fn draw_frame(&mut self) -> VulkanResult<()> {
        let scene = self.scene.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "scene pipelines are missing".to_string(),
        })?;

        let token = self.context.wait_on_fence(self.frame.fence, 0)?;
        let image_index = self.context.new_frame(self.frame.image_available)?;

        let (width, height) = self.context.swapchain_extent();
        let camera = self.camera.camera_data(width as f32 / height.max(1) as f32);
        let models = grid_transforms(self.config.grid_size, self.start_time.elapsed().as_secs_f32());

        self.context.write_descriptor_buffer(&token, scene.camera_set, 0, 0, bytemuck::bytes_of(&camera))?;
        self.context.write_descriptor_buffer(&token, scene.skybox_camera_set, 0, 0, bytemuck::bytes_of(&camera))?;
        self.context.write_descriptor_buffer(&token, scene.objects_set, 0, 0, bytemuck::cast_slice(&models))?;

        let shading = self.camera.shading_constants(self.maps.max_reflection_lod());
        let context = &self.context;
        let cmd = self.frame.commands;

        context.begin_recording(cmd)?;
        context.begin_swapchain_render_pass(cmd, image_index, CLEAR_COLOR)?;

        context.bind_pipeline(cmd, scene.pbr)?;
        context.bind_descriptor_set(cmd, 0, scene.camera_set)?;
        context.bind_descriptor_set(cmd, 1, scene.objects_set)?;
        context.bind_descriptor_set(cmd, 2, scene.material_set)?;
        context.push_constants(cmd, scene.pbr, 0, bytemuck::bytes_of(&shading))?;
        context.bind_vertex_buffer(cmd, self.sphere.buffer)?;
        context.draw(cmd, self.sphere.vertex_count, models.len() as u32, 0, 0)?;

        // Drawn last; the shader pins it to the far plane.
        context.bind_pipeline(cmd, scene.skybox)?;
        context.bind_descriptor_set(cmd, 0, scene.skybox_camera_set)?;
        context.bind_descriptor_set(cmd, 1, scene.environment_set)?;
        context.bind_vertex_buffer(cmd, self.skybox.buffer)?;
        context.draw(cmd, self.skybox.vertex_count, 1, 0, 0)?;

        context.end_render_pass(cmd)?;
        context.end_recording(cmd)?;

        self.context.submit(cmd, self.frame.image_available, self.frame.render_finished, self.frame.fence)?;
        self.context.present(image_index, self.frame.render_finished)
    }
}

/// Model matrices for a `grid` x `grid` layout centred on the origin, spinning with `time`
pub fn grid_transforms(grid: u32, time: f32) -> Vec<[[f32; 4]; 4]> {
    let offset = (grid as f32 - 1.0) * 0.5;
    let spin = Mat4::rotation_y(time);

    (0..grid)
        .flat_map(|row| (0..grid).map(move |column| (row, column)))
        .map(|(row, column)| {
            let position = Vec3::new(
                (column as f32 - offset) * GRID_SPACING,
                (row as f32 - offset) * GRID_SPACING,
                0.0,
            );
            (Mat4::translation(position) * spin).into()
        })
        .collect()
}

fn load_texture_or(path: &Path, fallback: [u8; 4]) -> ImageData {
    ImageData::load_rgba8(path).unwrap_or_else(|e| {
        log::warn!("{e}; using a flat stand-in texture");
        ImageData::solid_color(4, 4, fallback)
    })
}

fn load_environment(path: &Path) -> Result<HdrImageData, AssetError> {
    match HdrImageData::load_hdr(path) {
        Ok(image) => Ok(image),
        Err(e) => {
            log::warn!("{e}; using a generated sky");
            gradient_sky(256, 128)
        }
    }
}

/// Equirectangular sky fading from blue at the zenith to dark ground below the horizon
pub fn gradient_sky(width: u32, height: u32) -> Result<HdrImageData, AssetError> {
    const ZENITH: [f32; 3] = [0.2, 0.4, 1.0];
    const HORIZON: [f32; 3] = [1.0, 0.9, 0.8];
    const GROUND: [f32; 3] = [0.05, 0.04, 0.03];

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        // Row 0 looks straight up.
        let elevation = 1.0 - 2.0 * (y as f32 + 0.5) / height as f32;
        let color = if elevation >= 0.0 {
            lerp(HORIZON, ZENITH, elevation)
        } else {
            lerp(HORIZON, GROUND, (-elevation * 4.0).min(1.0))
        };

        for _ in 0..width {
            pixels.extend_from_slice(&[color[0], color[1], color[2], 1.0]);
        }
    }

    HdrImageData::new(width, height, 4, pixels)
}

fn lerp(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t, a[2] + (b[2] - a[2]) * t]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_grid_is_centred() {
        let transforms = grid_transforms(3, 0.0);
        assert_eq!(transforms.len(), 9);

        // Column-major: translation lives in the last column.
        let centre = transforms[4][3];
        assert_relative_eq!(centre[0], 0.0);
        assert_relative_eq!(centre[1], 0.0);

        let corner = transforms[0][3];
        assert_relative_eq!(corner[0], -GRID_SPACING);
        assert_relative_eq!(corner[1], -GRID_SPACING);
    }

    #[test]
    fn test_grid_fits_object_buffer() {
        assert!(grid_transforms(100, 0.0).len() as u32 <= MAX_OBJECTS);
    }

    #[test]
    fn test_gradient_sky() {
        let sky = gradient_sky(8, 4).unwrap();
        assert_eq!(sky.pixels.len(), 8 * 4 * 4);

        let top_blue = sky.pixels[2];
        let bottom_blue = sky.pixels[sky.pixels.len() - 2];
        assert!(top_blue > bottom_blue);
        assert!(sky.pixels.iter().skip(3).step_by(4).all(|&alpha| alpha == 1.0));
    }
}
