//! Physical device (GPU) selection.
//!
//! Every candidate needs Vulkan 1.3 and a graphics queue family. The graphics
//! family also presents: whether it can present to a particular window is
//! checked when that window's swapchain is created, since windows may appear
//! long after the device is opened.
//!
//! Among suitable GPUs, discrete beats integrated, and within a type a GPU
//! that can import host memory (`VK_EXT_external_memory_host`) wins, because
//! zero-copy presentation depends on it.
//!
//! # Example
//!
//! ```no_run
//! use bridge_rhi::instance::Instance;
//! use bridge_rhi::physical_device::select_physical_device;
//!
//! let instance = Instance::new(false).expect("Failed to create instance");
//! let info = select_physical_device(instance.handle()).expect("No suitable GPU");
//!
//! println!("Selected GPU: {:?}", info.device_name());
//! println!("Zero-copy import: {:?}", info.host_import);
//! ```

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Zero-copy host memory import capabilities (`VK_EXT_external_memory_host`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostImportSupport {
    /// Required alignment of both the imported pointer and the imported size.
    pub min_alignment: u64,
}

/// What the device layer needs to know about the chosen GPU.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family used for graphics, transfers and presentation.
    pub graphics_family: u32,
    /// Host memory import support, if the device offers it.
    pub host_import: Option<HostImportSupport>,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    fn type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "discrete",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual",
            vk::PhysicalDeviceType::CPU => "cpu",
            _ => "other",
        }
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.type_name())
            .field(
                "api_version",
                &format!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("graphics_family", &self.graphics_family)
            .field("host_import", &self.host_import)
            .finish()
    }
}

/// Picks the best GPU for presentation.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU has Vulkan 1.3 and a
/// graphics queue.
pub fn select_physical_device(instance: &ash::Instance) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    debug!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| inspect_device(instance, device))
        .map(|info| (rate_device(&info), info))
        .inspect(|(score, info)| debug!("GPU '{}' scored {}", info.device_name(), score))
        .max_by_key(|(score, _)| *score);

    let Some((_, info)) = best else {
        warn!("No GPU with Vulkan 1.3 and a graphics queue");
        return Err(RhiError::NoSuitableGpu);
    };
    info!("Selected GPU: {:?}", info);
    Ok(info)
}

/// Returns the device's info if it meets the minimum requirements.
fn inspect_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if properties.api_version < vk::API_VERSION_1_3 {
        debug!(
            "GPU '{}' skipped: Vulkan {}.{} is below 1.3",
            name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        );
        return None;
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let Some(graphics_family) = graphics_family(&families) else {
        debug!("GPU '{}' skipped: no graphics queue family", name);
        return None;
    };

    let host_import = query_host_import_support(instance, device);
    if host_import.is_none() {
        debug!("GPU '{}' cannot import host memory", name);
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties: unsafe { instance.get_physical_device_memory_properties(device) },
        graphics_family,
        host_import,
    })
}

/// First queue family with graphics support and at least one queue.
fn graphics_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32)
}

/// Queries `VK_EXT_external_memory_host` support and its alignment requirement.
fn query_host_import_support(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> Option<HostImportSupport> {
    let extensions = unsafe { instance.enumerate_device_extension_properties(device).ok()? };
    let supported = extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::ext::external_memory_host::NAME)
    });
    if !supported {
        return None;
    }

    let mut host_properties = vk::PhysicalDeviceExternalMemoryHostPropertiesEXT::default();
    {
        let mut properties2 =
            vk::PhysicalDeviceProperties2::default().push_next(&mut host_properties);
        unsafe { instance.get_physical_device_properties2(device, &mut properties2) };
    }

    Some(HostImportSupport {
        min_alignment: host_properties.min_imported_host_pointer_alignment.max(1),
    })
}

/// Higher is better. Device type dominates, then host import.
fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let type_score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 40_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 20_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10_000,
        _ => 0,
    };
    let import_score = if info.host_import.is_some() { 5_000 } else { 0 };
    // Tie-breaker only; clamped so it never outweighs the terms above
    let size_score = info.properties.limits.max_image_dimension2_d.min(4_096);
    type_score + import_score + size_score
}
