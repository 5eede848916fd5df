//! Window management using winit and Vulkan surface creation.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use ember_core::{Error, Result};

/// What the frame loop needs to know about its window each iteration.
pub trait WindowStatus {
    /// Current framebuffer size in pixels. Either side may be zero while minimized.
    fn framebuffer_extent(&self) -> (u32, u32);

    /// Returns `true` once per resize, clearing the pending flag.
    fn take_resize(&mut self) -> bool;

    /// Whether the user asked to close the window.
    fn should_close(&self) -> bool;
}

/// RAII wrapper for a Vulkan surface. The instance must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Get the raw Vulkan surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Surface extension loader the surface was created with.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window from the same instance as the loader.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Winit window that tracks its size and pending resize or close.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resize_pending: bool,
    close_requested: bool,
}

impl Window {
    /// Create a resizable window with the given inner size.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;
        let size = window.inner_size();

        tracing::info!("Window created: {}x{}", size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
            resize_pending: false,
            close_requested: false,
        })
    }

    /// Record a new framebuffer size from a resize event.
    pub fn on_resized(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.resize_pending = true;
            tracing::debug!("Window resized: {}x{}", width, height);
        }
    }

    /// Ask the renderer to stop at the start of its next frame.
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    /// Ask winit for another redraw event.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Set the window title.
    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    /// Instance extensions needed to create a surface for this window.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;
        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| Error::Window(format!("Failed to enumerate surface extensions: {}", e)))?;
        Ok(extensions.to_vec())
    }

    /// Create a Vulkan surface for this window.
    ///
    /// The instance must have been created with [`required_extensions`](Self::required_extensions).
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;
        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: both handles come from a live winit window; the surface is
        // destroyed in `Surface::drop`.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Window(format!("Failed to create Vulkan surface: {}", e)))?
        };

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }
}

impl WindowStatus for Window {
    fn framebuffer_extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn take_resize(&mut self) -> bool {
        std::mem::take(&mut self.resize_pending)
    }

    fn should_close(&self) -> bool {
        self.close_requested
    }
}

/// Fixed-size stand-in for a window, for headless runs and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticWindow {
    /// Framebuffer width
    pub width: u32,
    /// Framebuffer height
    pub height: u32,
    /// Set by [`resize`](Self::resize), cleared by `take_resize`
    pub resize_pending: bool,
    /// Reported by `should_close`
    pub close_requested: bool,
}

impl StaticWindow {
    /// Window of the given size with no pending events.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Change the size and flag a pending resize.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.resize_pending = true;
    }
}

impl WindowStatus for StaticWindow {
    fn framebuffer_extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn take_resize(&mut self) -> bool {
        std::mem::take(&mut self.resize_pending)
    }

    fn should_close(&self) -> bool {
        self.close_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_resize_clears_flag() {
        let mut window = StaticWindow::new(800, 600);
        assert!(!window.take_resize());

        window.resize(400, 300);
        assert_eq!(window.framebuffer_extent(), (400, 300));
        assert!(window.take_resize());
        assert!(!window.take_resize());
    }

    #[test]
    fn test_should_close() {
        let mut window = StaticWindow::new(1, 1);
        assert!(!window.should_close());
        window.close_requested = true;
        assert!(window.should_close());
    }
}
