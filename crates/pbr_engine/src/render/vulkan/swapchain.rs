//! Vulkan swapchain management
//!
//! The swapchain owns everything sized to the window: its images and views, the
//! depth buffer, the render pass drawing into them and one framebuffer per image.
//! When the surface goes stale the whole bundle is dropped and rebuilt.

use std::sync::Arc;

use ash::extensions::khr::{Surface as SurfaceLoader, Swapchain as SwapchainLoader};
use ash::prelude::VkResult;
use ash::{vk, Device, Entry, Instance};

use super::context::{VulkanError, VulkanResult};
use super::render_pass::RenderPass;
use super::sync::subresource_range;
use super::texture::{create_image_view, image_create_info, AllocatedImage};

/// Depth format of the swapchain depth buffer
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Window surface with its extension loader, destroyed on drop
pub struct Surface {
    loader: SurfaceLoader,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Take ownership of a surface created for `instance`
    pub fn new(entry: &Entry, instance: &Instance, surface: vk::SurfaceKHR) -> Self {
        Self {
            loader: SurfaceLoader::new(entry, instance),
            surface,
        }
    }

    /// Surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader
    pub fn loader(&self) -> &SurfaceLoader {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// Prefer sRGB BGRA8, otherwise take whatever the surface lists first
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Surface extent, or the window size clamped to the surface limits when the
/// surface leaves it to the application
pub(crate) fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window_extent.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One image more than the minimum, capped by the maximum (0 means unbounded)
pub(crate) fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Result of an acquire, reduced to what the frame loop acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image acquired; `suboptimal` asks for a rebuild after presenting
    Ready {
        /// Swapchain image index
        image_index: u32,
        /// Surface no longer matches exactly
        suboptimal: bool,
    },
    /// Surface is out of date; nothing was acquired
    OutOfDate,
}

/// Classify the result of `vkAcquireNextImageKHR`
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> VulkanResult<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready { image_index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(VulkanError::Api(e)),
    }
}

/// Whether a present result requires a rebuild
pub fn present_needs_rebuild(result: VkResult<bool>) -> VulkanResult<bool> {
    match result {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
        Err(e) => Err(VulkanError::Api(e)),
    }
}

/// Swapchain staleness bookkeeping
///
/// A rebuild raises `resized`, which the frame loop consumes exactly once.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResizeState {
    rebuild_pending: bool,
    resized: bool,
}

impl ResizeState {
    /// Ask for a rebuild at the next present
    pub fn request_rebuild(&mut self) {
        self.rebuild_pending = true;
    }

    /// Whether a rebuild was requested
    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    /// Record a completed rebuild
    pub fn mark_rebuilt(&mut self) {
        self.rebuild_pending = false;
        self.resized = true;
    }

    /// Whether a rebuild happened since the last call; clears the flag
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }
}

/// Swapchain with its views, depth buffer, render pass and framebuffers
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    depth_view: vk::ImageView,
    framebuffers: Vec<vk::Framebuffer>,
    depth_image: AllocatedImage,
    render_pass: RenderPass,
}

impl Swapchain {
    /// Create a FIFO swapchain sized to `window_extent`
    pub fn new(
        device: Device,
        loader: SwapchainLoader,
        allocator: Arc<vk_mem::Allocator>,
        physical_device: vk::PhysicalDevice,
        surface: &Surface,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let surface_loader = surface.loader();
        let surface = surface.handle();

        let caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(VulkanError::Api)?
        };

        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(VulkanError::Api)?
        };
        let format = choose_surface_format(&formats).ok_or_else(|| {
            VulkanError::InitializationFailed("Surface reports no formats".to_string())
        })?;

        let extent = choose_extent(&caps, window_extent);
        let image_count = choose_image_count(&caps);

        log::info!("Creating swapchain {}x{} ({:?})", extent.width, extent.height, format.format);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);

        let swapchain = unsafe {
            loader.create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let depth_info = image_create_info(
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            extent.width,
            extent.height,
            1,
            1,
            vk::ImageCreateFlags::empty(),
        );
        let depth_image = match AllocatedImage::new(allocator, &depth_info) {
            Ok(image) => image,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        let render_pass = match RenderPass::new_swapchain_pass(device.clone(), format.format, DEPTH_FORMAT) {
            Ok(render_pass) => render_pass,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        // From here on partially built state is released by Drop.
        let mut this = Self {
            device,
            loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            extent,
            depth_view: vk::ImageView::null(),
            framebuffers: Vec::new(),
            depth_image,
            render_pass,
        };
        this.create_views_and_framebuffers()?;

        Ok(this)
    }

    fn create_views_and_framebuffers(&mut self) -> VulkanResult<()> {
        self.images = unsafe {
            self.loader.get_swapchain_images(self.swapchain)
                .map_err(VulkanError::Api)?
        };

        let color_range = subresource_range(vk::ImageAspectFlags::COLOR, 0, 1, 0, 1);
        for &image in &self.images {
            let view = create_image_view(&self.device, image, self.format.format, vk::ImageViewType::TYPE_2D, color_range)?;
            self.image_views.push(view);
        }

        self.depth_view = create_image_view(
            &self.device,
            self.depth_image.handle(),
            DEPTH_FORMAT,
            vk::ImageViewType::TYPE_2D,
            subresource_range(vk::ImageAspectFlags::DEPTH, 0, 1, 0, 1),
        )?;

        for &color_view in &self.image_views {
            let attachments = [color_view, self.depth_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass.handle())
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe {
                self.device.create_framebuffer(&framebuffer_info, None)
                    .map_err(VulkanError::Api)?
            };
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    /// Acquire the next image, signalling `semaphore`
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout_ns: u64) -> VkResult<(u32, bool)> {
        unsafe {
            self.loader.acquire_next_image(self.swapchain, timeout_ns, semaphore, vk::Fence::null())
        }
    }

    /// Queue `image_index` for presentation once `wait_semaphore` signals
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphore: vk::Semaphore) -> VkResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    /// Swapchain size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Surface format in use
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Render pass drawing into the swapchain
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    /// Framebuffer of a swapchain image
    pub fn framebuffer(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied().ok_or(VulkanError::InvalidOperation {
            reason: format!("swapchain image {image_index} does not exist"),
        })
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            if self.depth_view != vk::ImageView::null() {
                self.device.destroy_image_view(self.depth_view, None);
            }
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    #[test]
    fn test_extent_follows_surface_or_window() {
        let window = vk::Extent2D { width: 1920, height: 1080 };

        let fixed = choose_extent(&caps((800, 600)), window);
        assert_eq!((fixed.width, fixed.height), (800, 600));

        let free = choose_extent(&caps((u32::MAX, u32::MAX)), window);
        assert_eq!((free.width, free.height), (1920, 1080));

        let huge = choose_extent(&caps((u32::MAX, u32::MAX)), vk::Extent2D { width: 10_000, height: 0 });
        assert_eq!((huge.width, huge.height), (4096, 1));
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&caps((1, 1))), 3);

        let mut unbounded = caps((1, 1));
        unbounded.max_image_count = 0;
        unbounded.min_image_count = 4;
        assert_eq!(choose_image_count(&unbounded), 5);

        let mut tight = caps((1, 1));
        tight.max_image_count = 2;
        assert_eq!(choose_image_count(&tight), 2);
    }

    #[test]
    fn test_surface_format_preference() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        let format_of = |formats: &[vk::SurfaceFormatKHR]| choose_surface_format(formats).map(|sf| sf.format);

        assert_eq!(format_of(&[unorm, srgb]), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(format_of(&[unorm]), Some(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(format_of(&[]), None);
    }

    #[test]
    fn test_acquire_classification() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Ready { image_index: 2, suboptimal: false }
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).unwrap(),
            AcquireOutcome::Ready { image_index: 0, suboptimal: true }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn test_present_classification() {
        assert!(!present_needs_rebuild(Ok(false)).unwrap());
        assert!(present_needs_rebuild(Ok(true)).unwrap());
        assert!(present_needs_rebuild(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap());
        assert!(present_needs_rebuild(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn test_resized_reported_exactly_once() {
        let mut state = ResizeState::default();
        assert!(!state.take_resized());

        // Suboptimal acquire: keep rendering, rebuild after present.
        state.request_rebuild();
        assert!(state.rebuild_pending());
        assert!(!state.take_resized());

        state.mark_rebuilt();
        assert!(!state.rebuild_pending());
        assert!(state.take_resized());
        assert!(!state.take_resized());
    }
}
