//! Shader compilation and reflection
//!
//! GLSL sources are preprocessed and compiled to SPIR-V with `shaderc`, then
//! reflected with `spirq` to recover the vertex input layout, push-constant
//! ranges and descriptor bindings the pipeline builder needs.

use std::ffi::CStr;
use std::path::Path;

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};
use super::conversions::vk_format_size;

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Pipeline stage a shader source compiles to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    /// `.vert`
    Vertex,
    /// `.frag`
    Fragment,
}

impl ShaderStage {
    /// Stage from the file extension
    pub fn from_path(path: &Path) -> VulkanResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("vert") => Ok(Self::Vertex),
            Some("frag") => Ok(Self::Fragment),
            _ => Err(VulkanError::UnsupportedShaderStage(path.display().to_string())),
        }
    }

    /// Native stage flag
    pub fn vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    fn shaderc_kind(self) -> shaderc::ShaderKind {
        match self {
            Self::Vertex => shaderc::ShaderKind::Vertex,
            Self::Fragment => shaderc::ShaderKind::Fragment,
        }
    }
}

/// Bindings of one descriptor set as declared by a single stage
#[derive(Debug, Clone)]
pub struct DescriptorSetLayoutData {
    /// `set = N` in the shader
    pub set_number: u32,
    /// Bindings in declaration order
    pub bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

/// Everything reflected from one compiled stage
#[derive(Debug, Clone, Default)]
pub struct ShaderModuleReflectionData {
    /// Vertex attributes sorted by location with packed offsets
    pub input_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Binding 0 description, absent when the stage takes no vertex input
    pub input_binding: Option<vk::VertexInputBindingDescription>,
    /// Push-constant ranges tagged with this stage
    pub push_constants: Vec<vk::PushConstantRange>,
    /// Descriptor sets used by this stage
    pub descriptor_sets: Vec<DescriptorSetLayoutData>,
}

/// Sort inputs by location and assign tightly packed offsets on binding 0
///
/// A zero stride means the stage reads no vertex data and gets no binding.
pub fn vertex_input_layout(
    inputs: &[(u32, vk::Format)],
) -> (Vec<vk::VertexInputAttributeDescription>, Option<vk::VertexInputBindingDescription>) {
    let mut sorted = inputs.to_vec();
    sorted.sort_by_key(|&(location, _)| location);

    let mut offset = 0;
    let attributes = sorted
        .into_iter()
        .map(|(location, format)| {
            let attribute = vk::VertexInputAttributeDescription {
                location,
                binding: 0,
                format,
                offset,
            };
            offset += vk_format_size(format);
            attribute
        })
        .collect();

    let binding = (offset > 0).then_some(vk::VertexInputBindingDescription {
        binding: 0,
        stride: offset,
        input_rate: vk::VertexInputRate::VERTEX,
    });

    (attributes, binding)
}

fn scalar_format(scalar: &spirq::ty::ScalarType, components: u32) -> Option<vk::Format> {
    use spirq::ty::ScalarType;

    let formats = match scalar {
        ScalarType::Float { bits: 32 } => [
            vk::Format::R32_SFLOAT,
            vk::Format::R32G32_SFLOAT,
            vk::Format::R32G32B32_SFLOAT,
            vk::Format::R32G32B32A32_SFLOAT,
        ],
        ScalarType::Integer { bits: 32, is_signed: true } => [
            vk::Format::R32_SINT,
            vk::Format::R32G32_SINT,
            vk::Format::R32G32B32_SINT,
            vk::Format::R32G32B32A32_SINT,
        ],
        ScalarType::Integer { bits: 32, is_signed: false } => [
            vk::Format::R32_UINT,
            vk::Format::R32G32_UINT,
            vk::Format::R32G32B32_UINT,
            vk::Format::R32G32B32A32_UINT,
        ],
        _ => return None,
    };

    formats.get(components.checked_sub(1)? as usize).copied()
}

fn input_format(ty: &spirq::ty::Type) -> Option<vk::Format> {
    use spirq::ty::Type;

    match ty {
        Type::Scalar(scalar) => scalar_format(scalar, 1),
        Type::Vector(vector) => scalar_format(&vector.scalar_ty, vector.nscalar),
        _ => None,
    }
}

fn descriptor_type(desc_ty: &spirq::ty::DescriptorType) -> Option<vk::DescriptorType> {
    use spirq::ty::DescriptorType;

    let ty = match desc_ty {
        DescriptorType::Sampler() => vk::DescriptorType::SAMPLER,
        DescriptorType::CombinedImageSampler() => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::SampledImage() => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::StorageImage(..) => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::UniformTexelBuffer() => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorType::StorageTexelBuffer(..) => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        DescriptorType::UniformBuffer() => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer(..) => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::InputAttachment(..) => vk::DescriptorType::INPUT_ATTACHMENT,
        _ => return None,
    };
    Some(ty)
}

/// Push-constant range of a block: from its first member to the end of the block
fn push_constant_range(ty: &spirq::ty::Type, stage: vk::ShaderStageFlags) -> Option<vk::PushConstantRange> {
    let end = ty.nbyte()? as u32;
    let offset = match ty {
        spirq::ty::Type::Struct(block) => block
            .members
            .iter()
            .filter_map(|member| member.offset)
            .min()
            .unwrap_or(0) as u32,
        _ => 0,
    };

    Some(vk::PushConstantRange {
        stage_flags: stage,
        offset,
        size: end.saturating_sub(offset),
    })
}

/// Reflect a SPIR-V binary compiled for `stage`
pub fn reflect(path: &Path, spirv: &[u32], stage: ShaderStage) -> VulkanResult<ShaderModuleReflectionData> {
    let reflection_error = |message: String| VulkanError::ShaderReflection {
        path: path.to_path_buf(),
        message,
    };

    let entry_points = spirq::ReflectConfig::new()
        .spv(spirv)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| reflection_error(format!("{e:?}")))?;

    let entry_point = entry_points
        .iter()
        .find(|entry| entry.name == "main")
        .ok_or_else(|| reflection_error("no `main` entry point".to_string()))?;

    let stage_flags = stage.vk_stage();
    let mut inputs = Vec::new();
    let mut push_constants = Vec::new();
    let mut descriptor_sets: Vec<DescriptorSetLayoutData> = Vec::new();

    for var in &entry_point.vars {
        match var {
            spirq::var::Variable::Input { location, ty, .. } => {
                let format = input_format(ty)
                    .ok_or_else(|| reflection_error(format!("unsupported input type at location {}", location.loc())))?;
                inputs.push((location.loc(), format));
            }
            spirq::var::Variable::PushConstant { ty, .. } => {
                let range = push_constant_range(ty, stage_flags)
                    .ok_or_else(|| reflection_error("push-constant block has no size".to_string()))?;
                push_constants.push(range);
            }
            spirq::var::Variable::Descriptor { desc_bind, desc_ty, nbind, .. } => {
                let descriptor_type = descriptor_type(desc_ty)
                    .ok_or_else(|| reflection_error(format!("unsupported descriptor type {desc_ty:?}")))?;
                let binding = vk::DescriptorSetLayoutBinding {
                    binding: desc_bind.bind(),
                    descriptor_type,
                    descriptor_count: (*nbind).max(1),
                    stage_flags,
                    ..Default::default()
                };

                match descriptor_sets.iter_mut().find(|set| set.set_number == desc_bind.set()) {
                    Some(set) => set.bindings.push(binding),
                    None => descriptor_sets.push(DescriptorSetLayoutData {
                        set_number: desc_bind.set(),
                        bindings: vec![binding],
                    }),
                }
            }
            _ => {}
        }
    }

    let (input_attributes, input_binding) = if stage == ShaderStage::Vertex {
        vertex_input_layout(&inputs)
    } else {
        (Vec::new(), None)
    };

    Ok(ShaderModuleReflectionData {
        input_attributes,
        input_binding,
        push_constants,
        descriptor_sets,
    })
}

/// Preprocess and compile GLSL to SPIR-V targeting Vulkan 1.1
pub fn compile_glsl(path: &Path, source: &str, stage: ShaderStage) -> VulkanResult<Vec<u32>> {
    let compile_error = |message: String| VulkanError::ShaderCompilation {
        path: path.to_path_buf(),
        message,
    };
    let file_name = path.display().to_string();

    let compiler = shaderc::Compiler::new()
        .ok_or_else(|| compile_error("shaderc compiler unavailable".to_string()))?;
    let mut options = shaderc::CompileOptions::new()
        .ok_or_else(|| compile_error("shaderc options unavailable".to_string()))?;
    options.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_1 as u32);

    let preprocessed = compiler
        .preprocess(source, &file_name, "main", Some(&options))
        .map_err(|e| compile_error(e.to_string()))?;

    let artifact = compiler
        .compile_into_spirv(&preprocessed.as_text(), stage.shaderc_kind(), &file_name, "main", Some(&options))
        .map_err(|e| compile_error(e.to_string()))?;

    if artifact.get_num_warnings() > 0 {
        log::warn!("[shader] {}: {}", file_name, artifact.get_warning_messages());
    }

    Ok(artifact.as_binary().to_vec())
}

/// Compiled shader module with its reflection data
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
    stage: ShaderStage,
    reflection: ShaderModuleReflectionData,
}

impl ShaderModule {
    /// Read, compile and reflect the GLSL file at `path`
    pub fn load(device: Device, path: &Path) -> VulkanResult<Self> {
        let stage = ShaderStage::from_path(path)?;
        let source = std::fs::read_to_string(path).map_err(|source| VulkanError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let spirv = compile_glsl(path, &source, stage)?;
        let reflection = reflect(path, &spirv, stage)?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&spirv);
        let module = unsafe {
            device.create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        log::debug!("[shader] loaded {}", path.display());

        Ok(Self { device, module, stage, reflection })
    }

    /// Shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Reflection data
    pub fn reflection(&self) -> &ShaderModuleReflectionData {
        &self.reflection
    }

    /// Stage create info with the `main` entry point
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage.vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_offsets_are_packed_by_location() {
        let inputs = [
            (2, vk::Format::R32G32_SFLOAT),
            (0, vk::Format::R32G32B32_SFLOAT),
            (1, vk::Format::R32G32B32_SFLOAT),
        ];

        let (attributes, binding) = vertex_input_layout(&inputs);

        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(locations, vec![0, 1, 2]);
        assert_eq!(offsets, vec![0, 12, 24]);
        assert!(attributes.iter().all(|a| a.binding == 0));

        let binding = binding.unwrap();
        assert_eq!(binding.stride, 32);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_no_inputs_means_no_binding() {
        let (attributes, binding) = vertex_input_layout(&[]);
        assert!(attributes.is_empty());
        assert!(binding.is_none());
    }

    #[test]
    fn test_tangent_layout_stride() {
        let inputs = [
            (0, vk::Format::R32G32B32_SFLOAT),
            (1, vk::Format::R32G32B32_SFLOAT),
            (2, vk::Format::R32G32B32_SFLOAT),
            (3, vk::Format::R32G32_SFLOAT),
        ];
        let (attributes, binding) = vertex_input_layout(&inputs);
        assert_eq!(attributes[3].offset, 36);
        assert_eq!(binding.unwrap().stride, 44);
    }

    #[test]
    fn test_stage_from_extension() {
        assert_eq!(ShaderStage::from_path(Path::new("a/pbr.vert")).unwrap(), ShaderStage::Vertex);
        assert_eq!(ShaderStage::from_path(Path::new("pbr.frag")).unwrap(), ShaderStage::Fragment);
        assert!(matches!(
            ShaderStage::from_path(Path::new("pbr.comp")),
            Err(VulkanError::UnsupportedShaderStage(_))
        ));
        assert!(ShaderStage::from_path(Path::new("pbr")).is_err());
    }
}
