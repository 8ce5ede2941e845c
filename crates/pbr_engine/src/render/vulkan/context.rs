//! Vulkan instance and device bring-up
//!
//! Creates the instance (with validation and a debug messenger when enabled),
//! picks a physical device and creates the logical device with a graphics queue
//! and, when the hardware has one, a dedicated transfer queue.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use ash::{Device, Entry, Instance};
use std::ffi::{CStr, CString};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::GraphicsConfig;
use crate::foundation::logging::RenderLogger;
use super::window::{Window, WindowError};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// The Vulkan loader could not be found or loaded
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No physical device can render and present to the surface
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// GLSL to SPIR-V compilation failed
    #[error("Failed to compile shader {path}: {message}")]
    ShaderCompilation {
        /// Shader source path
        path: PathBuf,
        /// Compiler output
        message: String,
    },

    /// SPIR-V reflection failed
    #[error("Failed to reflect shader {path}: {message}")]
    ShaderReflection {
        /// Shader source path
        path: PathBuf,
        /// Reflection error
        message: String,
    },

    /// The shader file extension does not name a supported stage
    #[error("Unsupported shader stage for file {0}")]
    UnsupportedShaderStage(String),

    /// Reading a file from disk failed
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// A descriptor set index outside the pipeline's layouts was requested
    #[error("Descriptor set index {index} out of range (pipeline has {count} sets)")]
    InvalidDescriptorSetIndex {
        /// Requested set index
        index: u32,
        /// Number of set layouts in the pipeline
        count: u32,
    },

    /// Texture data with a component count the renderer cannot upload
    #[error("Invalid texture component count: {0}")]
    InvalidComponentCount(u32),

    /// A render pass attachment index out of range
    #[error("Attachment index {index} out of range (render pass has {count} attachments)")]
    InvalidAttachmentIndex {
        /// Requested attachment index
        index: usize,
        /// Number of attachments
        count: usize,
    },

    /// A descriptor binding that holds no buffer
    #[error("Descriptor binding {binding} is not declared or has no buffer")]
    InvalidBinding {
        /// Binding index
        binding: u32,
    },

    /// A handle whose resource was destroyed or never existed
    #[error("Stale or unknown {0} handle")]
    InvalidHandle(&'static str),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// GPU memory allocation failed
    #[error("GPU allocation failed: {0:?}")]
    Allocation(vk::Result),

    /// Window collaborator failure
    #[error(transparent)]
    Window(#[from] WindowError),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension and messenger, when validation is enabled
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance for the window
    pub fn new(window: &Window, config: &GraphicsConfig, logger: &dyn RenderLogger) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::Loading(e.to_string()))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name = CString::new("pbr_engine")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let required_extensions = window.required_instance_extensions()?;
        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid extension name: {e}")))?;

        let mut extensions: Vec<*const std::ffi::c_char> = cstr_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let validation = config.enable_validation && Self::validation_layer_available(&entry);
        if config.enable_validation && !validation {
            logger.warn("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }

        let layer_names: Vec<*const std::ffi::c_char> = if validation {
            extensions.push(DebugUtils::name().as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        logger.info(&format!(
            "Vulkan instance created for '{}' (validation: {validation})",
            config.application_name
        ));

        Ok(Self { entry, instance, debug })
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|layer| {
                    let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                    name == VALIDATION_LAYER
                })
            })
            .unwrap_or(false)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Whether validation layers are active
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Queue family indices chosen for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Family used for rendering
    pub graphics: u32,
    /// Family used for presentation
    pub present: u32,
    /// Family used for uploads, equal to `graphics` when no dedicated family exists
    pub transfer: u32,
}

impl QueueFamilies {
    /// Whether uploads run on their own queue family
    pub fn has_dedicated_transfer(&self) -> bool {
        self.transfer != self.graphics
    }
}

/// Transfer-only family, else the first transfer family without GRAPHICS
pub(crate) fn find_dedicated_transfer_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    let transfer_without = |excluded: vk::QueueFlags| {
        families.iter().position(|family| {
            family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !family.queue_flags.intersects(excluded)
        })
    };

    transfer_without(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        .or_else(|| transfer_without(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
}

/// Ordering key for candidate devices; higher is better
pub(crate) fn device_type_rank(device_type: vk::PhysicalDeviceType, prefer_discrete: bool) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU if prefer_discrete => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::DISCRETE_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Chosen queue families
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Select the best device that can render and present to `surface`
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
        prefer_discrete: bool,
        logger: &dyn RenderLogger,
    ) -> VulkanResult<Self> {
        let devices = unsafe {
            instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        let selected = devices
            .into_iter()
            .filter_map(|device| Self::evaluate_device(instance, device, surface, surface_loader).ok())
            .max_by_key(|info| device_type_rank(info.properties.device_type, prefer_discrete))
            .ok_or(VulkanError::NoSuitableDevice)?;

        let name = unsafe { CStr::from_ptr(selected.properties.device_name.as_ptr()) }.to_string_lossy();
        logger.info(&format!(
            "Selected GPU: {name} ({:?}), minUniformBufferOffsetAlignment = {}",
            selected.properties.device_type,
            selected.properties.limits.min_uniform_buffer_offset_alignment
        ));

        if !selected.queue_families.has_dedicated_transfer() {
            logger.warn("No dedicated transfer queue family, uploads share the graphics queue");
        }

        Ok(selected)
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics = None;
        let mut present = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics.is_none() {
                graphics = Some(index);
            }

            let present_support = unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::Api)?
            };

            if present_support && present.is_none() {
                present = Some(index);
            }
        }

        let graphics = graphics.ok_or_else(|| {
            VulkanError::InitializationFailed("No graphics queue family found".to_string())
        })?;
        let present = present.ok_or_else(|| {
            VulkanError::InitializationFailed("No present queue family found".to_string())
        })?;
        let transfer = find_dedicated_transfer_family(&families).unwrap_or(graphics);

        let extensions = unsafe {
            instance.enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };

        let has_swapchain = extensions.iter().any(|available| {
            let extension_name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            extension_name == SwapchainLoader::name()
        });

        if !has_swapchain {
            return Err(VulkanError::InitializationFailed(
                "Required device extensions not supported".to_string()
            ));
        }

        Ok(Self {
            device,
            properties,
            features,
            queue_families: QueueFamilies { graphics, present, transfer },
        })
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Queue family indices
    pub families: QueueFamilies,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a new logical device with required queues
    pub fn new(instance: &Instance, physical_device_info: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let families = physical_device_info.queue_families;

        let mut unique_families = vec![families.graphics, families.present, families.transfer];
        unique_families.sort_unstable();
        unique_families.dedup();

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical_device_info.features.sampler_anisotropy == vk::TRUE)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance.create_device(physical_device_info.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
            )
        };

        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            families,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_dedicated_transfer_family_found() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(find_dedicated_transfer_family(&families), Some(2));
    }

    #[test]
    fn test_compute_transfer_family_used_without_transfer_only() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(find_dedicated_transfer_family(&families), Some(1));
    }

    #[test]
    fn test_transfer_falls_back_to_graphics() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let transfer = find_dedicated_transfer_family(&families).unwrap_or(0);
        let queues = QueueFamilies { graphics: 0, present: 0, transfer };

        assert!(!queues.has_dedicated_transfer());
    }

    #[test]
    fn test_discrete_gpu_preferred() {
        let discrete = device_type_rank(vk::PhysicalDeviceType::DISCRETE_GPU, true);
        let integrated = device_type_rank(vk::PhysicalDeviceType::INTEGRATED_GPU, true);
        assert!(discrete > integrated);

        let discrete = device_type_rank(vk::PhysicalDeviceType::DISCRETE_GPU, false);
        assert_eq!(discrete, integrated);
        assert!(integrated > device_type_rank(vk::PhysicalDeviceType::CPU, false));
    }
}
