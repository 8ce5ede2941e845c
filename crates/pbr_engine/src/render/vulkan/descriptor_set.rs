//! Descriptor pool, sampler and double-buffered descriptor sets
//!
//! A [`DescriptorSet`] allocates one native set per frame slot. Buffers added
//! to it are duplicated per slot so the CPU can fill slot N+1 while the GPU
//! reads slot N. Images are shared by all slots.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::{vk, Device};

use crate::config::DescriptorPoolConfig;
use crate::foundation::collections::PipelineHandle;
use super::buffer::AllocatedBuffer;
use super::context::{VulkanError, VulkanResult};
use super::conversions::{vk_descriptor_type, DescriptorType};
use super::sync::FRAME_OVERLAP;

/// Global descriptor pool; sets can be freed individually
pub struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create the pool with the configured capacities
    pub fn new(device: Device, config: &DescriptorPoolConfig) -> VulkanResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: config.uniform_buffers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: config.storage_buffers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: config.combined_image_samplers,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(config.max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe {
            device.create_descriptor_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, pool })
    }

    /// Pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Linear, repeating sampler with an unclamped mip range
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Create the shared sampler used for every image descriptor
    pub fn new_linear_repeat(device: Device) -> VulkanResult<Self> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = unsafe {
            device.create_sampler(&info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, sampler })
    }

    /// Sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

/// Buffer usage backing a descriptor type
pub(crate) fn buffer_usage(descriptor_type: DescriptorType) -> vk::BufferUsageFlags {
    match descriptor_type {
        DescriptorType::UniformBuffer => vk::BufferUsageFlags::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer => vk::BufferUsageFlags::STORAGE_BUFFER,
    }
}

/// Check that the reflected layout declares `binding` with `expected` type
pub(crate) fn check_binding(
    bindings: &[vk::DescriptorSetLayoutBinding],
    binding: u32,
    expected: vk::DescriptorType,
) -> VulkanResult<()> {
    let declared = bindings
        .iter()
        .find(|declared| declared.binding == binding)
        .ok_or(VulkanError::InvalidBinding { binding })?;

    if declared.descriptor_type != expected {
        return Err(VulkanError::InvalidOperation {
            reason: format!(
                "binding {binding} is declared as {:?}, not {expected:?}",
                declared.descriptor_type
            ),
        });
    }
    Ok(())
}

/// Refuse to destroy `pipeline` while any of `owners` was allocated from it
pub(crate) fn ensure_pipeline_unreferenced(
    pipeline: PipelineHandle,
    owners: impl IntoIterator<Item = PipelineHandle>,
) -> VulkanResult<()> {
    let live = owners.into_iter().filter(|owner| *owner == pipeline).count();
    if live > 0 {
        return Err(VulkanError::InvalidOperation {
            reason: format!("{live} descriptor set(s) still use the pipeline"),
        });
    }
    Ok(())
}

/// One descriptor set per frame slot plus the buffers bound to them
pub struct DescriptorSet {
    device: Device,
    pool: vk::DescriptorPool,
    sets: [vk::DescriptorSet; FRAME_OVERLAP],
    pipeline: PipelineHandle,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
    buffers: [BTreeMap<u32, AllocatedBuffer>; FRAME_OVERLAP],
}

impl DescriptorSet {
    /// Allocate FRAME_OVERLAP sets with `set_layout`
    ///
    /// `bindings` is the reflected content of the layout; writes are checked
    /// against it.
    pub fn new(
        device: Device,
        pool: vk::DescriptorPool,
        set_layout: vk::DescriptorSetLayout,
        pipeline: PipelineHandle,
        bindings: Vec<vk::DescriptorSetLayoutBinding>,
    ) -> VulkanResult<Self> {
        let layouts = [set_layout; FRAME_OVERLAP];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let allocated = unsafe {
            device.allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)?
        };

        let sets: [vk::DescriptorSet; FRAME_OVERLAP] = allocated.try_into().map_err(|_| VulkanError::InvalidOperation {
            reason: "driver returned the wrong number of descriptor sets".to_string(),
        })?;

        Ok(Self {
            device,
            pool,
            sets,
            pipeline,
            bindings,
            buffers: Default::default(),
        })
    }

    /// Set used by a frame slot
    pub fn handle(&self, frame_index: usize) -> vk::DescriptorSet {
        self.sets[frame_index % FRAME_OVERLAP]
    }

    /// Pipeline the set was allocated from
    pub fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }

    /// Create one buffer per slot for `binding` and point the descriptors at them
    pub fn add_buffer(
        &mut self,
        allocator: &Arc<vk_mem::Allocator>,
        binding: u32,
        descriptor_type: DescriptorType,
        size: vk::DeviceSize,
    ) -> VulkanResult<()> {
        check_binding(&self.bindings, binding, vk_descriptor_type(descriptor_type))?;

        for slot in 0..FRAME_OVERLAP {
            let buffer = AllocatedBuffer::host_visible(allocator.clone(), size, buffer_usage(descriptor_type))?;

            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: buffer.handle(),
                offset: 0,
                range: size,
            }];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(self.sets[slot])
                .dst_binding(binding)
                .descriptor_type(vk_descriptor_type(descriptor_type))
                .buffer_info(&buffer_info)
                .build();

            unsafe { self.device.update_descriptor_sets(&[write], &[]) };

            // Replacing a binding drops the previous buffer.
            self.buffers[slot].insert(binding, buffer);
        }

        Ok(())
    }

    /// Point `binding` of every slot at an image in SHADER_READ layout
    pub fn add_image(&self, binding: u32, view: vk::ImageView, sampler: vk::Sampler) -> VulkanResult<()> {
        check_binding(&self.bindings, binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)?;

        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let writes: Vec<vk::WriteDescriptorSet> = self
            .sets
            .iter()
            .map(|&set| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info)
                    .build()
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    /// Buffer bound at `binding` for a frame slot
    pub fn buffer_mut(&mut self, frame_index: usize, binding: u32) -> VulkanResult<&mut AllocatedBuffer> {
        self.buffers[frame_index % FRAME_OVERLAP]
            .get_mut(&binding)
            .ok_or(VulkanError::InvalidBinding { binding })
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.free_descriptor_sets(self.pool, &self.sets);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::SlotMap;

    fn layout_binding(binding: u32, descriptor_type: vk::DescriptorType) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        }
    }

    #[test]
    fn test_buffer_usage_matches_descriptor_type() {
        assert_eq!(buffer_usage(DescriptorType::UniformBuffer), vk::BufferUsageFlags::UNIFORM_BUFFER);
        assert_eq!(buffer_usage(DescriptorType::StorageBuffer), vk::BufferUsageFlags::STORAGE_BUFFER);
    }

    #[test]
    fn test_image_writes_are_checked_against_layout() {
        let bindings = [
            layout_binding(0, vk::DescriptorType::UNIFORM_BUFFER),
            layout_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        ];
        let sampler = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;

        assert!(check_binding(&bindings, 1, sampler).is_ok());
        assert!(matches!(
            check_binding(&bindings, 5, sampler),
            Err(VulkanError::InvalidBinding { binding: 5 })
        ));
        assert!(matches!(
            check_binding(&bindings, 0, sampler),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_pipeline_with_live_sets_cannot_be_destroyed() {
        let mut pipelines: SlotMap<PipelineHandle, ()> = SlotMap::with_key();
        let pbr = pipelines.insert(());
        let skybox = pipelines.insert(());

        assert!(ensure_pipeline_unreferenced(pbr, [skybox, skybox]).is_ok());
        assert!(matches!(
            ensure_pipeline_unreferenced(pbr, [skybox, pbr]),
            Err(VulkanError::InvalidOperation { .. })
        ));
        assert!(ensure_pipeline_unreferenced(pbr, std::iter::empty()).is_ok());
    }
}
