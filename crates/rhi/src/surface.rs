//! Vulkan surface creation for native windows.
//!
//! A [`Surface`] is created from anything that exposes raw window and
//! display handles, so the RHI stays independent of the windowing backend.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// RAII wrapper for a Vulkan surface.
///
/// This struct owns a `vk::SurfaceKHR` handle and ensures it is properly destroyed
/// when dropped. It holds the instance it was created from, so the instance
/// always outlives the surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    instance: Arc<Instance>,
}

impl Surface {
    /// Creates a Vulkan surface for a native window.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The instance was created without surface extensions
    /// - Raw window or display handles are unavailable
    /// - Vulkan surface creation fails
    pub fn new<W>(instance: Arc<Instance>, window: &W) -> RhiResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        if !instance.supports_surfaces() {
            return Err(RhiError::SurfaceError(
                "Instance has no surface extensions".to_string(),
            ));
        }

        let display_handle = window
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(format!("Failed to get display handle: {}", e)))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| RhiError::SurfaceError(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: The handles come from a live window and the instance was
        // created with the extensions ash-window needs for this platform.
        // The surface will be destroyed in the Surface::drop implementation.
        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| RhiError::SurfaceError(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        tracing::info!("Vulkan surface created successfully");

        Ok(Self {
            handle,
            surface_loader,
            instance,
        })
    }

    /// Get the raw Vulkan surface handle.
    ///
    /// The returned handle is valid only as long as this `Surface` instance exists.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Get a reference to the surface loader.
    ///
    /// This is useful for querying surface capabilities, formats, and present modes.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Returns the instance the surface belongs to.
    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: The surface handle is valid and was created by ash_window::create_surface.
        // The loader comes from the same instance, which the Arc keeps alive.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}
