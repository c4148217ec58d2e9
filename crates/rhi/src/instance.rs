//! Vulkan instance management.
//!
//! The [`Instance`] owns the `VkInstance` and, when validation is on, the
//! debug messenger that forwards layer messages to `tracing`. Surface
//! extensions are enabled only when the loader offers them, so one instance
//! type serves both windowed presentation and display-less (offscreen) use.
//!
//! # Example
//!
//! ```no_run
//! use bridge_rhi::instance::Instance;
//!
//! let instance = Instance::new(cfg!(debug_assertions)).expect("Failed to create Vulkan instance");
//! if !instance.supports_surfaces() {
//!     println!("Offscreen only");
//! }
//! ```

use std::borrow::Cow;
use std::ffi::{CStr, CString, c_void};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance with optional validation messenger.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surfaces: bool,
}

impl Instance {
    /// Loads the Vulkan library and creates an instance.
    ///
    /// Validation is enabled only if requested and the Khronos layer is
    /// installed; a missing layer is logged, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::LoadingError`] if no Vulkan loader is present, or
    /// the Vulkan error from instance or messenger creation.
    pub fn new(enable_validation: bool) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && Self::has_layer(&entry, VALIDATION_LAYER)?;
        if enable_validation && !validation {
            warn!("Validation layer requested but not installed, continuing without it");
        }

        let offered = Self::offered_extensions(&entry)?;
        let enabled = select_extensions(&surface_extensions(), &offered);
        let surfaces = enabled.contains(&ash::khr::surface::NAME);
        if !surfaces {
            warn!("VK_KHR_surface not offered, windows cannot be presented to");
        }

        let mut extension_ptrs: Vec<*const i8> = enabled.iter().map(|e| e.as_ptr()).collect();
        let mut layer_ptrs = Vec::new();
        if validation {
            extension_ptrs.push(ash::ext::debug_utils::NAME.as_ptr());
            layer_ptrs.push(VALIDATION_LAYER.as_ptr());
        }

        let flags = if enabled.contains(&ash::khr::portability_enumeration::NAME) {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"Presentation Bridge")
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"bridge")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);
        let create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan instance created (API 1.3, {} extensions, validation {})",
            extension_ptrs.len(),
            if validation { "on" } else { "off" }
        );

        let messenger = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match Self::create_messenger(&loader) {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            messenger,
            surfaces,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Whether validation messages are being forwarded.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.messenger.is_some()
    }

    /// Whether windows can get a presentation surface from this instance.
    #[inline]
    pub fn supports_surfaces(&self) -> bool {
        self.surfaces
    }

    fn offered_extensions(entry: &Entry) -> RhiResult<Vec<CString>> {
        let properties = unsafe { entry.enumerate_instance_extension_properties(None)? };
        Ok(properties
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok().map(CStr::to_owned))
            .collect())
    }

    fn has_layer(entry: &Entry, name: &CStr) -> RhiResult<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|n| n == name)))
    }

    fn create_messenger(
        loader: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(forward_validation_message));
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };
        debug!("Validation messenger installed");
        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Surface extensions this platform can use, base extension first.
fn surface_extensions() -> Vec<&'static CStr> {
    let mut extensions = vec![ash::khr::surface::NAME];

    #[cfg(target_os = "windows")]
    extensions.push(ash::khr::win32_surface::NAME);

    #[cfg(target_os = "linux")]
    extensions.extend([
        ash::khr::xlib_surface::NAME,
        ash::khr::xcb_surface::NAME,
        ash::khr::wayland_surface::NAME,
    ]);

    #[cfg(target_os = "macos")]
    extensions.extend([
        ash::ext::metal_surface::NAME,
        ash::khr::portability_enumeration::NAME,
    ]);

    extensions
}

/// Keeps the wanted extensions the loader offers, in wanted order.
fn select_extensions<'a>(wanted: &[&'a CStr], offered: &[CString]) -> Vec<&'a CStr> {
    wanted
        .iter()
        .copied()
        .filter(|name| offered.iter().any(|o| o.as_c_str() == *name))
        .collect()
}

/// Routes validation layer messages into `tracing`.
unsafe extern "system" fn forward_validation_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let data = unsafe { &*data };
    let message = if data.p_message.is_null() {
        Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(data.p_message).to_string_lossy() }
    };

    let kind = match kind {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[vulkan {}] {}", kind, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[vulkan {}] {}", kind, message),
        _ => debug!("[vulkan {}] {}", kind, message),
    }
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_without_validation() {
        match Instance::new(false) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(RhiError::LoadingError(_)) => eprintln!("Skipping test: Vulkan not available"),
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_instance_with_validation_if_installed() {
        match Instance::new(true) {
            Ok(instance) => {
                if instance.has_validation() {
                    assert!(instance.messenger.is_some());
                }
            }
            Err(RhiError::LoadingError(_)) => eprintln!("Skipping test: Vulkan not available"),
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_surface_extensions_start_with_base() {
        let extensions = surface_extensions();
        assert_eq!(extensions[0], ash::khr::surface::NAME);

        #[cfg(target_os = "linux")]
        assert_eq!(extensions.len(), 4);
    }

    #[test]
    fn test_select_extensions_drops_missing() {
        let offered = vec![
            CString::from(ash::khr::wayland_surface::NAME),
            CString::from(ash::khr::surface::NAME),
        ];
        let wanted = [
            ash::khr::surface::NAME,
            ash::khr::xlib_surface::NAME,
            ash::khr::wayland_surface::NAME,
        ];
        assert_eq!(
            select_extensions(&wanted, &offered),
            vec![ash::khr::surface::NAME, ash::khr::wayland_surface::NAME]
        );
        assert!(select_extensions(&wanted, &[]).is_empty());
    }
}
