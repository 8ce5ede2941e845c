//! GLFW-based window for Vulkan rendering
//!
//! Owns the OS window and its event queue. The graphics context asks it for the
//! framebuffer size, the instance extensions GLFW needs and a Vulkan surface.
//! Resizes are reported through [`Window::poll_resize`] instead of a callback.

use ash::vk;
use thiserror::Error;

pub use glfw::Key;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialised
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Vulkan is not available through GLFW
    #[error("Vulkan is not supported by this GLFW build or driver")]
    VulkanUnsupported,

    /// Surface creation failed
    #[error("Failed to create Vulkan surface: {0:?}")]
    SurfaceCreation(vk::Result),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Latest framebuffer size reported since the last poll
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResizeTracker {
    pending: Option<(u32, u32)>,
}

impl ResizeTracker {
    pub(crate) fn record(&mut self, width: i32, height: i32) {
        self.pending = Some((width.max(0) as u32, height.max(0) as u32));
    }

    pub(crate) fn take(&mut self) -> Option<(u32, u32)> {
        self.pending.take()
    }
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    resize: ResizeTracker,
}

impl Window {
    /// Create a resizable window without a client API
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::VulkanUnsupported);
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self {
            glfw,
            window,
            events,
            resize: ResizeTracker::default(),
        })
    }

    /// Process pending window events
    pub fn poll(&mut self) {
        self.glfw.poll_events();
        for (_, event) in glfw::flush_messages(&self.events) {
            if let glfw::WindowEvent::FramebufferSize(width, height) = event {
                self.resize.record(width, height);
            }
        }
    }

    /// Framebuffer size reported since the last call, if the window was resized
    pub fn poll_resize(&mut self) -> Option<(u32, u32)> {
        self.resize.take()
    }

    /// Block until at least one event arrives
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request the window to close
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Whether a key is currently held down
    pub fn key_down(&self, key: Key) -> bool {
        matches!(self.window.get_key(key), glfw::Action::Press | glfw::Action::Repeat)
    }

    /// Framebuffer width in pixels
    pub fn width(&self) -> u32 {
        self.framebuffer_size().0
    }

    /// Framebuffer height in pixels
    pub fn height(&self) -> u32 {
        self.framebuffer_size().1
    }

    /// Framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Whether the window is iconified
    pub fn is_minimized(&self) -> bool {
        self.window.is_iconified()
    }

    /// Restore an iconified window
    pub fn restore(&mut self) {
        self.window.restore();
    }

    /// Seconds since GLFW was initialised
    pub fn time(&self) -> f64 {
        self.glfw.get_time()
    }

    /// Vulkan instance extensions required to present to this window
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or(WindowError::VulkanUnsupported)
    }

    /// Create a Vulkan surface for this window
    pub fn create_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::SurfaceCreation(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_reported_once() {
        let mut tracker = ResizeTracker::default();
        assert_eq!(tracker.take(), None);

        tracker.record(800, 600);
        tracker.record(1024, 768);
        assert_eq!(tracker.take(), Some((1024, 768)));
        assert_eq!(tracker.take(), None);
    }

    #[test]
    fn test_resize_clamps_negative_sizes() {
        let mut tracker = ResizeTracker::default();
        tracker.record(-1, 0);
        assert_eq!(tracker.take(), Some((0, 0)));
    }
}
