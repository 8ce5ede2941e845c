//! Graphics pipeline construction from reflected shaders
//!
//! Both stages are reflected and their layouts merged: push-constant ranges
//! with the same offset and size share one range, bindings declared by both
//! stages get the union of their stage flags, and set layouts are created for
//! every index from 0 to the highest declared set so native set numbers match
//! `set = N` in the shaders.

use std::path::PathBuf;

use ash::{vk, Device};

use crate::foundation::collections::RenderPassHandle;
use super::context::{VulkanError, VulkanResult};
use super::shader::{DescriptorSetLayoutData, ShaderModule};

/// Parameters for [`GraphicsContext::create_pipeline`](crate::render::GraphicsContext::create_pipeline)
#[derive(Debug, Clone)]
pub struct PipelineCreateInfo {
    /// GLSL vertex shader (`.vert`)
    pub vertex_shader_path: PathBuf,
    /// GLSL fragment shader (`.frag`)
    pub fragment_shader_path: PathBuf,
    /// Viewport and scissor width
    pub viewport_width: u32,
    /// Viewport and scissor height
    pub viewport_height: u32,
    /// Back-face culling
    pub culling: bool,
    /// Depth test (LESS_OR_EQUAL)
    pub depth_testing: bool,
    /// Depth writes
    pub depth_write: bool,
    /// Target pass; `None` renders into the swapchain
    pub render_pass: Option<RenderPassHandle>,
}

impl PipelineCreateInfo {
    /// Pipeline for the two shaders with depth test and write enabled and no culling
    pub fn new(vertex_shader_path: impl Into<PathBuf>, fragment_shader_path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            vertex_shader_path: vertex_shader_path.into(),
            fragment_shader_path: fragment_shader_path.into(),
            viewport_width: width,
            viewport_height: height,
            culling: false,
            depth_testing: true,
            depth_write: true,
            render_pass: None,
        }
    }

    /// Enable or disable back-face culling
    pub fn with_culling(mut self, culling: bool) -> Self {
        self.culling = culling;
        self
    }

    /// Set depth test and depth write
    pub fn with_depth(mut self, testing: bool, write: bool) -> Self {
        self.depth_testing = testing;
        self.depth_write = write;
        self
    }

    /// Render into an off-screen pass
    pub fn with_render_pass(mut self, render_pass: RenderPassHandle) -> Self {
        self.render_pass = Some(render_pass);
        self
    }
}

/// Union of two stages' push-constant ranges, merging identical (offset, size) pairs
pub fn merge_push_constants(vertex: &[vk::PushConstantRange], fragment: &[vk::PushConstantRange]) -> Vec<vk::PushConstantRange> {
    let mut merged = vertex.to_vec();

    for range in fragment {
        match merged.iter_mut().find(|existing| existing.offset == range.offset && existing.size == range.size) {
            Some(existing) => existing.stage_flags |= range.stage_flags,
            None => merged.push(*range),
        }
    }

    merged
}

/// Per-set binding lists for sets `0..=max`, bindings sorted by number
///
/// A binding seen in several stages keeps the first declaration and ORs in the
/// later stage flags. Sets no stage declares come out empty.
pub fn merge_descriptor_sets(stages: &[&[DescriptorSetLayoutData]]) -> Vec<Vec<vk::DescriptorSetLayoutBinding>> {
    let set_count = stages
        .iter()
        .flat_map(|sets| sets.iter())
        .map(|set| set.set_number + 1)
        .max()
        .unwrap_or(0);

    (0..set_count)
        .map(|set_number| {
            let mut bindings: Vec<vk::DescriptorSetLayoutBinding> = Vec::new();

            let declared = stages
                .iter()
                .flat_map(|sets| sets.iter())
                .filter(|set| set.set_number == set_number)
                .flat_map(|set| set.bindings.iter());

            for binding in declared {
                match bindings.iter_mut().find(|existing| existing.binding == binding.binding) {
                    Some(existing) => existing.stage_flags |= binding.stage_flags,
                    None => bindings.push(*binding),
                }
            }

            bindings.sort_by_key(|binding| binding.binding);
            bindings
        })
        .collect()
}

/// Opaque blend state for each color attachment of the subpass
///
/// Depth-only passes get none.
pub fn color_blend_attachments(color_attachment_count: usize) -> Vec<vk::PipelineColorBlendAttachmentState> {
    let attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    vec![attachment; color_attachment_count]
}

/// Graphics pipeline with its layout and descriptor set layouts
pub struct Pipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    set_bindings: Vec<Vec<vk::DescriptorSetLayoutBinding>>,
    push_constants: Vec<vk::PushConstantRange>,
}

impl Pipeline {
    /// Compile both shaders, merge their reflection and build the pipeline
    pub fn new(
        device: Device,
        info: &PipelineCreateInfo,
        render_pass: vk::RenderPass,
        color_attachment_count: usize,
    ) -> VulkanResult<Self> {
        let vertex = ShaderModule::load(device.clone(), &info.vertex_shader_path)?;
        let fragment = ShaderModule::load(device.clone(), &info.fragment_shader_path)?;

        let push_constants = merge_push_constants(
            &vertex.reflection().push_constants,
            &fragment.reflection().push_constants,
        );

        let sets = merge_descriptor_sets(&[
            vertex.reflection().descriptor_sets.as_slice(),
            fragment.reflection().descriptor_sets.as_slice(),
        ]);

        let mut this = Self {
            device: device.clone(),
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            set_layouts: Vec::with_capacity(sets.len()),
            set_bindings: Vec::new(),
            push_constants: push_constants.clone(),
        };

        for bindings in &sets {
            let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
            let set_layout = unsafe {
                device.create_descriptor_set_layout(&set_layout_info, None)
                    .map_err(VulkanError::Api)?
            };
            this.set_layouts.push(set_layout);
        }
        this.set_bindings = sets;

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&this.set_layouts)
            .push_constant_ranges(&push_constants);
        this.layout = unsafe {
            device.create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let shader_stages = [vertex.stage_info(), fragment.stage_info()];

        let reflection = vertex.reflection();
        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = reflection.input_binding.into_iter().collect();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&reflection.input_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(info.viewport_width as f32)
            .height(info.viewport_height as f32)
            .min_depth(0.0)
            .max_depth(1.0)
            .build();

        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(vk::Extent2D { width: info.viewport_width, height: info.viewport_height })
            .build();

        let viewports = [viewport];
        let scissors = [scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let cull_mode = if info.culling { vk::CullModeFlags::BACK } else { vk::CullModeFlags::NONE };
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(info.depth_testing)
            .depth_write_enable(info.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let blend_attachments = color_blend_attachments(color_attachment_count);
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(this.layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info.build()],
                None
            ).map_err(|(_, err)| {
                log::error!(
                    "Failed to create pipeline from {} and {}: {err:?}",
                    info.vertex_shader_path.display(),
                    info.fragment_shader_path.display()
                );
                VulkanError::Api(err)
            })?
        };

        this.pipeline = pipelines.into_iter().next().ok_or(VulkanError::InvalidOperation {
            reason: "driver returned no pipeline".to_string(),
        })?;

        Ok(this)
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Layout of descriptor set `index`
    pub fn set_layout(&self, index: u32) -> VulkanResult<vk::DescriptorSetLayout> {
        self.set_layouts.get(index as usize).copied().ok_or(VulkanError::InvalidDescriptorSetIndex {
            index,
            count: self.set_layouts.len() as u32,
        })
    }

    /// Reflected bindings of descriptor set `index`
    pub fn set_bindings(&self, index: u32) -> VulkanResult<&[vk::DescriptorSetLayoutBinding]> {
        self.set_bindings.get(index as usize).map(Vec::as_slice).ok_or(VulkanError::InvalidDescriptorSetIndex {
            index,
            count: self.set_bindings.len() as u32,
        })
    }

    /// Number of descriptor set layouts
    pub fn set_count(&self) -> usize {
        self.set_layouts.len()
    }

    /// Merged push-constant ranges
    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constants
    }
}

/// Stage flags for pushing `size` bytes at `offset`
///
/// Every range overlapping the pushed bytes contributes its stages, and each of
/// those ranges must contain all of the pushed bytes.
pub fn push_constant_stages(ranges: &[vk::PushConstantRange], offset: u32, size: u32) -> VulkanResult<vk::ShaderStageFlags> {
    if ranges.is_empty() {
        return Err(VulkanError::InvalidOperation {
            reason: "pipeline declares no push constants".to_string(),
        });
    }

    let end = offset.checked_add(size).ok_or_else(|| VulkanError::InvalidOperation {
        reason: "push constant range overflows".to_string(),
    })?;
    let mut stages = vk::ShaderStageFlags::empty();

    for range in ranges.iter().filter(|range| range.offset < end && offset < range.offset + range.size) {
        if range.offset > offset || range.offset + range.size < end {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "push of bytes {offset}..{end} only partly covers the {:?} range {}..{}",
                    range.stage_flags,
                    range.offset,
                    range.offset + range.size
                ),
            });
        }
        stages |= range.stage_flags;
    }

    if stages.is_empty() {
        return Err(VulkanError::InvalidOperation {
            reason: format!("no push constant range covers bytes {offset}..{end}"),
        });
    }
    Ok(stages)
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.destroy_pipeline(self.pipeline, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                self.device.destroy_pipeline_layout(self.layout, None);
            }
            for &set_layout in &self.set_layouts {
                self.device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(stage: vk::ShaderStageFlags, offset: u32, size: u32) -> vk::PushConstantRange {
        vk::PushConstantRange { stage_flags: stage, offset, size }
    }

    fn binding(number: u32, ty: vk::DescriptorType, stage: vk::ShaderStageFlags) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding {
            binding: number,
            descriptor_type: ty,
            descriptor_count: 1,
            stage_flags: stage,
            ..Default::default()
        }
    }

    fn set(set_number: u32, bindings: Vec<vk::DescriptorSetLayoutBinding>) -> DescriptorSetLayoutData {
        DescriptorSetLayoutData { set_number, bindings }
    }

    #[test]
    fn test_identical_push_constant_ranges_merge() {
        let vertex = [range(vk::ShaderStageFlags::VERTEX, 0, 64)];
        let fragment = [range(vk::ShaderStageFlags::FRAGMENT, 0, 64)];

        let merged = merge_push_constants(&vertex, &fragment);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!((merged[0].offset, merged[0].size), (0, 64));
    }

    #[test]
    fn test_distinct_push_constant_ranges_are_kept() {
        let vertex = [range(vk::ShaderStageFlags::VERTEX, 0, 64)];
        let fragment = [range(vk::ShaderStageFlags::FRAGMENT, 64, 16)];

        let merged = merge_push_constants(&vertex, &fragment);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert!(merge_push_constants(&[], &[]).is_empty());
    }

    #[test]
    fn test_set_gaps_produce_empty_layouts() {
        let vertex = [set(0, vec![binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)])];
        let fragment = [set(2, vec![binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT)])];

        let sets = merge_descriptor_sets(&[&vertex, &fragment]);

        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0].len(), 1);
        assert!(sets[1].is_empty());
        assert_eq!(sets[2][0].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }

    #[test]
    fn test_shared_binding_gets_union_of_stages() {
        let vertex = [set(0, vec![binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)])];
        let fragment = [set(0, vec![
            binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT),
            binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT),
        ])];

        let sets = merge_descriptor_sets(&[&vertex, &fragment]);

        assert_eq!(sets.len(), 1);
        let bindings = &sets[0];
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(bindings[1].binding, 2);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_no_sets() {
        assert!(merge_descriptor_sets(&[&[], &[]]).is_empty());
    }

    #[test]
    fn test_push_only_reaches_stages_covering_bytes() {
        let vertex = range(vk::ShaderStageFlags::VERTEX, 0, 64);
        let fragment = range(vk::ShaderStageFlags::FRAGMENT, 64, 16);
        let ranges = merge_push_constants(&[vertex], &[fragment]);

        assert_eq!(push_constant_stages(&ranges, 0, 64).unwrap(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(push_constant_stages(&ranges, 64, 16).unwrap(), vk::ShaderStageFlags::FRAGMENT);
        assert!(push_constant_stages(&ranges, 32, 48).is_err());
        assert!(push_constant_stages(&ranges, 80, 4).is_err());
    }

    #[test]
    fn test_push_to_shared_range_reaches_both_stages() {
        let ranges = merge_push_constants(
            &[range(vk::ShaderStageFlags::VERTEX, 0, 68)],
            &[range(vk::ShaderStageFlags::FRAGMENT, 0, 68)],
        );

        assert_eq!(
            push_constant_stages(&ranges, 64, 4).unwrap(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert!(push_constant_stages(&[], 0, 4).is_err());
    }

    #[test]
    fn test_blend_state_per_color_attachment() {
        assert!(color_blend_attachments(0).is_empty());

        let two = color_blend_attachments(2);
        assert_eq!(two.len(), 2);
        assert_eq!(two[1].blend_enable, vk::FALSE);
        assert_eq!(two[1].color_write_mask, vk::ColorComponentFlags::RGBA);
    }
}
