//! Vulkan logical device, its queue, and the memory allocator.
//!
//! One [`Device`] is shared (via `Arc`) by every presentation surface and
//! by the device bridge. It owns:
//! - the logical device, created with dynamic rendering and synchronization2
//! - a single graphics queue that also carries transfers and presents
//! - a `gpu-allocator` allocator for buffers and textures
//! - the `VK_EXT_external_memory_host` loader, when the GPU supports it
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bridge_rhi::instance::Instance;
//! use bridge_rhi::physical_device::select_physical_device;
//! use bridge_rhi::device::Device;
//!
//! let instance = Arc::new(Instance::new(false).expect("Failed to create instance"));
//! let info = select_physical_device(instance.handle()).expect("No suitable GPU found");
//! let device = Device::new(instance.clone(), &info).expect("Failed to create logical device");
//!
//! assert_eq!(device.supports_host_import(), info.host_import.is_some());
//! ```

use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::RhiResult;
use crate::instance::Instance;
use crate::physical_device::{HostImportSupport, PhysicalDeviceInfo};

/// Device extensions every bridge device enables.
const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::dynamic_rendering::NAME];

/// Extensions to enable for a device, given what the instance and GPU offer.
fn device_extensions(swapchain: bool, host_import: bool) -> Vec<&'static CStr> {
    let mut extensions = REQUIRED_DEVICE_EXTENSIONS.to_vec();
    if swapchain {
        extensions.push(ash::khr::swapchain::NAME);
    }
    if host_import {
        extensions.push(ash::ext::external_memory_host::NAME);
    }
    extensions
}

/// Shared logical device.
///
/// The allocator sits behind a `Mutex`; everything else is immutable after
/// creation, so `&Device` can be used from any thread.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    /// Used to pick a memory type for imported host memory.
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Dropped by hand before `vkDestroyDevice`.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    queue: vk::Queue,
    queue_family: u32,
    host_memory: Option<ash::ext::external_memory_host::Device>,
    host_import: Option<HostImportSupport>,
    swapchain: bool,
    /// Keeps the instance alive until the device is destroyed.
    instance: Arc<Instance>,
}

impl Device {
    /// Creates the logical device for `info`.
    ///
    /// `VK_KHR_swapchain` is enabled when the instance can create surfaces,
    /// and `VK_EXT_external_memory_host` when the GPU supports it.
    ///
    /// # Errors
    ///
    /// Returns the Vulkan error from device creation, or an allocator error.
    pub fn new(instance: Arc<Instance>, info: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let queue_family = info.graphics_family;
        let priorities = [1.0f32];
        let queue_info = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)];

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let swapchain = instance.supports_surfaces();
        let host_import = info.host_import;
        let extensions = device_extensions(swapchain, host_import.is_some());
        let extension_ptrs: Vec<*const i8> = extensions.iter().map(|e| e.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_info)
            .enabled_extension_names(&extension_ptrs)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(info.device, &create_info, None)?
        };
        info!("Logical device created with extensions {:?}", extensions);

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        debug!("Using queue family {}", queue_family);

        let host_memory = host_import
            .map(|_| ash::ext::external_memory_host::Device::new(instance.handle(), &device));

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        Ok(Arc::new(Self {
            device,
            physical_device: info.device,
            memory_properties: info.memory_properties,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            queue,
            queue_family,
            host_memory,
            host_import,
            swapchain,
            instance,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The queue used for graphics, transfers and presentation.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.queue
    }

    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.queue_family
    }

    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Host memory import loader, if the extension is enabled.
    #[inline]
    pub fn host_memory(&self) -> Option<&ash::ext::external_memory_host::Device> {
        self.host_memory.as_ref()
    }

    /// Alignment rules for host memory import, if supported.
    #[inline]
    pub fn host_import(&self) -> Option<HostImportSupport> {
        self.host_import
    }

    /// Whether caller memory can be imported without a copy.
    #[inline]
    pub fn supports_host_import(&self) -> bool {
        self.host_memory.is_some()
    }

    #[inline]
    pub fn supports_swapchain(&self) -> bool {
        self.swapchain
    }

    /// Finds a memory type allowed by `type_bits` that has all of `flags`.
    pub fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        find_memory_type(&self.memory_properties, type_bits, flags)
    }

    /// Blocks until every queue is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits to the graphics queue.
    ///
    /// # Safety
    ///
    /// Command buffers must be fully recorded, and `fence` (if not null) must
    /// be unsignaled and not in use by another submission.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe { self.device.queue_submit(self.queue, submit_infos, fence)? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            // The allocator releases its memory blocks, so it must go first
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: ash::Device and the extension loader are Send+Sync, the raw handles
// are plain values, and the allocator is behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// Memory type selection over raw memory properties.
pub(crate) fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    properties
        .memory_types
        .iter()
        .take(properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|(index, _)| index as u32)
}
