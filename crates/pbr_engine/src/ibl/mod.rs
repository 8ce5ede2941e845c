//! Image-based lighting
//!
//! Turns one equirectangular HDR texture into the maps a split-sum PBR shader
//! samples:
//!
//! 1. environment cubemap, rendered face by face from the equirect image
//! 2. diffuse irradiance cubemap, convolved from the environment
//! 3. specular prefilter cubemap, one roughness level per mip
//! 4. BRDF integration lookup table, a single fullscreen triangle
//!
//! Every step records into one command buffer and runs through the blocking
//! [`GraphicsContext::immediate_submit`], so the maps are ready when
//! [`IblPreprocessor::run`] returns.

pub mod capture;
pub mod reference;

use bytemuck::{Pod, Zeroable};

use crate::config::IblConfig;
use crate::foundation::collections::{CommandBufferHandle, RenderPassHandle, TextureHandle, VertexBufferHandle};
use crate::render::{
    AttachmentDescription, Format, GraphicsContext, ImageLayout, LoadOp, PipelineCreateInfo, StoreOp, VulkanError,
    VulkanResult,
};

pub use capture::{capture_projection, CubeFace, CUBE_FACES};

/// Maps produced by [`IblPreprocessor::run`]
///
/// All of them are owned by the context and stay in SHADER_READ layout.
#[derive(Debug, Clone, Copy)]
pub struct IblMaps {
    /// RGBA16F environment cubemap, used by the skybox
    pub environment: TextureHandle,
    /// RGBA16F diffuse irradiance cubemap
    pub irradiance: TextureHandle,
    /// RGBA16F prefilter cubemap, roughness increasing with mip level
    pub prefilter: TextureHandle,
    /// Mip levels of `prefilter`, all of them rendered
    pub prefilter_mip_levels: u32,
    /// RG16F render pass whose single attachment is the BRDF lookup table
    pub brdf_render_pass: RenderPassHandle,
}

impl IblMaps {
    /// Prefilter LOD sampled at roughness 1
    pub fn max_reflection_lod(&self) -> f32 {
        self.prefilter_mip_levels.saturating_sub(1) as f32
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CapturePushConstants {
    view_projection: [[f32; 4]; 4],
    roughness: f32,
}

const VIEW_PROJECTION_SIZE: usize = std::mem::size_of::<[[f32; 4]; 4]>();

/// Runs the four preprocessing passes against a context
pub struct IblPreprocessor<'a> {
    context: &'a mut GraphicsContext,
    config: IblConfig,
    command_buffer: CommandBufferHandle,
    cube: VertexBufferHandle,
}

impl<'a> IblPreprocessor<'a> {
    /// Validate `config` and upload the capture cube
    pub fn new(context: &'a mut GraphicsContext, config: IblConfig) -> VulkanResult<Self> {
        config
            .validate()
            .map_err(|reason| VulkanError::InvalidOperation { reason })?;

        let vertices = capture::capture_cube_vertices();
        let cube = context.create_vertex_buffer(bytemuck::cast_slice(&vertices))?;
        let command_buffer = context.create_command_buffer()?;

        Ok(Self {
            context,
            config,
            command_buffer,
            cube,
        })
    }

    /// Build every map from an equirectangular HDR texture
    ///
    /// Temporary pipelines, passes and buffers are destroyed before returning.
    pub fn run(mut self, equirect: TextureHandle) -> VulkanResult<IblMaps> {
        let maps = self.generate(equirect);
        let released = self.release();
        let maps = maps?;
        released?;

        log::info!("Image-based lighting maps ready");
        Ok(maps)
    }

    fn generate(&mut self, equirect: TextureHandle) -> VulkanResult<IblMaps> {
        let environment_size = self.config.environment_size;
        let environment = self.context.create_cubemap(Format::RGBA16_FLOAT, environment_size, environment_size, 1)?;
        self.render_cube_pass(("equi_to_cube.vert", "equi_to_cube.frag"), equirect, environment, environment_size, 1)?;
        log::info!("Environment cubemap rendered at {environment_size}x{environment_size}");

        let irradiance_size = self.config.irradiance_size;
        let irradiance = self.context.create_cubemap(Format::RGBA16_FLOAT, irradiance_size, irradiance_size, 1)?;
        self.render_cube_pass(("convolution.vert", "convolution.frag"), environment, irradiance, irradiance_size, 1)?;
        log::info!("Irradiance cubemap rendered at {irradiance_size}x{irradiance_size}");

        let prefilter_size = self.config.prefilter_size;
        let prefilter_mips = self.config.prefilter_mip_levels;
        let prefilter = self.context.create_cubemap(Format::RGBA16_FLOAT, prefilter_size, prefilter_size, prefilter_mips)?;
        self.render_cube_pass(("prefilter.vert", "prefilter.frag"), environment, prefilter, prefilter_size, prefilter_mips)?;
        log::info!("Prefilter cubemap rendered with {prefilter_mips} roughness levels");

        let brdf_render_pass = self.render_brdf_lut()?;
        log::info!("BRDF lookup table rendered");

        Ok(IblMaps {
            environment,
            irradiance,
            prefilter,
            prefilter_mip_levels: prefilter_mips,
            brdf_render_pass,
        })
    }

    /// Render the cube six times per mip, sampling `source`, into `target`
    ///
    /// Mip 0 is copied; with more than one mip every level is rendered at full
    /// size and blitted down, with roughness `mip / (mip_levels - 1)`.
    fn render_cube_pass(
        &mut self,
        (vertex_shader, fragment_shader): (&str, &str),
        source: TextureHandle,
        target: TextureHandle,
        size: u32,
        mip_levels: u32,
    ) -> VulkanResult<()> {
        let context = &mut *self.context;
        let cmd = self.command_buffer;

        let render_pass = context.create_render_pass(&[capture_attachment(Format::RGBA16_FLOAT, size)], None)?;
        let pipeline = context.create_pipeline(
            &PipelineCreateInfo::new(
                self.config.shader_path(vertex_shader),
                self.config.shader_path(fragment_shader),
                size,
                size,
            )
            .with_depth(false, false)
            .with_render_pass(render_pass),
        )?;
        let descriptor_set = context.create_descriptor_set(pipeline, 0)?;
        context.descriptor_set_add_image(descriptor_set, 0, source)?;

        let push_size = if mip_levels > 1 {
            std::mem::size_of::<CapturePushConstants>()
        } else {
            VIEW_PROJECTION_SIZE
        };

        context.begin_recording(cmd)?;
        for mip_level in 0..mip_levels {
            let roughness = if mip_levels > 1 {
                mip_level as f32 / (mip_levels - 1) as f32
            } else {
                0.0
            };
            let mip_size = (size >> mip_level).max(1);

            for (face, cube_face) in (0u32..).zip(CUBE_FACES.iter()) {
                let push = CapturePushConstants {
                    view_projection: cube_face.view_projection().into(),
                    roughness,
                };

                context.begin_render_pass(cmd, render_pass)?;
                context.bind_pipeline(cmd, pipeline)?;
                context.bind_descriptor_set(cmd, 0, descriptor_set)?;
                context.push_constants(cmd, pipeline, 0, &bytemuck::bytes_of(&push)[..push_size])?;
                context.bind_vertex_buffer(cmd, self.cube)?;
                context.draw(cmd, capture::CAPTURE_CUBE_VERTEX_COUNT, 1, 0, 0)?;
                context.end_render_pass(cmd)?;

                context.transition_render_pass_images(cmd, render_pass, ImageLayout::Attachment, ImageLayout::TransferSrc)?;
                if mip_levels > 1 {
                    context.blit_render_pass_image_to_cubemap(
                        cmd,
                        render_pass,
                        0,
                        target,
                        face,
                        mip_level,
                        (size, size),
                        (mip_size, mip_size),
                    )?;
                } else {
                    context.copy_render_pass_image_to_cubemap(cmd, render_pass, 0, target, face, 0, size, size)?;
                }
            }
        }
        context.end_recording(cmd)?;
        context.immediate_submit(cmd)?;

        context.destroy_descriptor_set(descriptor_set)?;
        context.destroy_pipeline(pipeline)?;
        context.destroy_render_pass(render_pass)
    }

    /// Render the BRDF lookup table into a pass that outlives the preprocessor
    fn render_brdf_lut(&mut self) -> VulkanResult<RenderPassHandle> {
        let context = &mut *self.context;
        let cmd = self.command_buffer;
        let size = self.config.brdf_lut_size;

        let render_pass = context.create_render_pass(&[capture_attachment(Format::RG16_FLOAT, size)], None)?;
        let pipeline = context.create_pipeline(
            &PipelineCreateInfo::new(
                self.config.shader_path("brdf.vert"),
                self.config.shader_path("brdf.frag"),
                size,
                size,
            )
            .with_depth(false, false)
            .with_render_pass(render_pass),
        )?;

        context.begin_recording(cmd)?;
        context.begin_render_pass(cmd, render_pass)?;
        context.bind_pipeline(cmd, pipeline)?;
        context.draw(cmd, 3, 1, 0, 0)?;
        context.end_render_pass(cmd)?;
        context.transition_render_pass_images(cmd, render_pass, ImageLayout::Attachment, ImageLayout::ShaderRead)?;
        context.end_recording(cmd)?;
        context.immediate_submit(cmd)?;

        context.destroy_pipeline(pipeline)?;
        Ok(render_pass)
    }

    fn release(&mut self) -> VulkanResult<()> {
        self.context.destroy_vertex_buffer(self.cube)?;
        self.context.destroy_command_buffer(self.command_buffer)
    }
}

/// Color target cleared each pass and left in ATTACHMENT layout
fn capture_attachment(format: Format, size: u32) -> AttachmentDescription {
    AttachmentDescription {
        load_op: LoadOp::Clear,
        store_op: StoreOp::Store,
        initial_layout: ImageLayout::Undefined,
        final_layout: ImageLayout::Attachment,
        format,
        width: size,
        height: size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constant_layout() {
        assert_eq!(VIEW_PROJECTION_SIZE, 64);
        assert_eq!(std::mem::size_of::<CapturePushConstants>(), 68);
    }

    #[test]
    fn test_max_reflection_lod_follows_rendered_levels() {
        let maps = IblMaps {
            environment: TextureHandle::default(),
            irradiance: TextureHandle::default(),
            prefilter: TextureHandle::default(),
            prefilter_mip_levels: IblConfig::default().prefilter_mip_levels,
            brdf_render_pass: RenderPassHandle::default(),
        };
        assert_eq!(maps.max_reflection_lod(), 4.0);

        let three = IblMaps { prefilter_mip_levels: 3, ..maps };
        assert_eq!(three.max_reflection_lod(), 2.0);
    }

    #[test]
    fn test_capture_attachment() {
        let attachment = capture_attachment(Format::RG16_FLOAT, 512);
        assert_eq!(attachment.width, 512);
        assert_eq!(attachment.height, 512);
        assert_eq!(attachment.initial_layout, ImageLayout::Undefined);
        assert_eq!(attachment.final_layout, ImageLayout::Attachment);
        assert!(!attachment.format.is_depth());
    }
}
