//! Swapchain for a window surface.
//!
//! Images are created with `TRANSFER_DST` usage so presentation surfaces can
//! copy client pixels straight into them, and with `COLOR_ATTACHMENT` usage
//! so the device bridge can render into them. The device's single graphics
//! queue presents, so images are always exclusively owned.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bridge_rhi::device::Device;
//! use bridge_rhi::surface::Surface;
//! use bridge_rhi::swapchain::Swapchain;
//! use bridge_rhi::vk;
//!
//! # fn example(device: Arc<Device>, surface: Arc<Surface>) -> Result<(), bridge_rhi::RhiError> {
//! let swapchain = Swapchain::new(device, surface, 800, 600, vk::Format::B8G8R8A8_UNORM)?;
//!
//! // Per frame:
//! // let (image_index, suboptimal) = swapchain.acquire_next_image(semaphore, timeout)?;
//! // ... copy or render into swapchain.image(image_index) ...
//! // let needs_resize = swapchain.present(queue, image_index, render_finished)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::command::color_subresource_range;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::surface::Surface;

/// Image usage every bridge swapchain needs.
pub const SWAPCHAIN_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// A `VkSwapchainKHR` with its images and views.
///
/// Not thread-safe; callers serialize access (the device bridge keeps it
/// behind a `Mutex`).
pub struct Swapchain {
    device: Arc<Device>,
    /// Outlives the swapchain.
    surface: Arc<Surface>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    /// Format requested at creation, reused on recreate.
    preferred_format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Creates a swapchain of roughly `width` x `height`.
    ///
    /// Picks `preferred_format` when the surface offers it, MAILBOX when
    /// available (FIFO otherwise), and one image more than the minimum.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] when the device has no swapchain
    /// support, its queue cannot present to `surface`, or the surface offers
    /// no formats, no present modes, or not [`SWAPCHAIN_USAGE`].
    pub fn new(
        device: Arc<Device>,
        surface: Arc<Surface>,
        width: u32,
        height: u32,
        preferred_format: vk::Format,
    ) -> RhiResult<Self> {
        if !device.supports_swapchain() {
            return Err(RhiError::SwapchainError(
                "Device was created without VK_KHR_swapchain".to_string(),
            ));
        }

        let family = device.graphics_family();
        let supported = unsafe {
            surface.loader().get_physical_device_surface_support(
                device.physical_device(),
                family,
                surface.handle(),
            )?
        };
        if !supported {
            return Err(RhiError::SwapchainError(format!(
                "Queue family {} cannot present to this surface",
                family
            )));
        }

        let loader = ash::khr::swapchain::Device::new(device.instance().handle(), device.handle());
        let mut swapchain = Self {
            device,
            surface,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            preferred_format,
            extent: vk::Extent2D::default(),
        };
        swapchain.build(width, height)?;
        Ok(swapchain)
    }

    /// Creates the swapchain handle, retiring the current one.
    fn build(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let physical = self.device.physical_device();
        let surface = self.surface.handle();
        let surface_loader = self.surface.loader();
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical, surface)?,
                surface_loader.get_physical_device_surface_formats(physical, surface)?,
                surface_loader.get_physical_device_surface_present_modes(physical, surface)?,
            )
        };

        if formats.is_empty() || present_modes.is_empty() {
            return Err(RhiError::SwapchainError(
                "Surface offers no formats or present modes".to_string(),
            ));
        }
        if !capabilities.supported_usage_flags.contains(SWAPCHAIN_USAGE) {
            return Err(RhiError::SwapchainError(format!(
                "Surface does not support image usage {:?}",
                SWAPCHAIN_USAGE
            )));
        }

        let surface_format = choose_surface_format(&formats, self.preferred_format);
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&capabilities, width, height);
        let image_count = determine_image_count(&capabilities);

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_USAGE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };

        self.destroy_image_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.images = unsafe { self.loader.get_swapchain_images(swapchain)? };
        self.image_views = create_image_views(&self.device, &self.images, surface_format.format)?;
        self.extent = extent;

        info!(
            "Swapchain ready: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    /// Recreates the swapchain for a new window size. Waits for the device
    /// to go idle first.
    pub fn recreate(&mut self, width: u32, height: u32) -> RhiResult<()> {
        self.device.wait_idle()?;
        debug!("Recreating swapchain at {}x{}", width, height);
        self.build(width, height)
    }

    /// Acquires the next image, returning `(image_index, suboptimal)`.
    ///
    /// `ERROR_OUT_OF_DATE_KHR` means recreate; `TIMEOUT` or `NOT_READY` mean
    /// no image became available within `timeout_ns`.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, semaphore, vk::Fence::null())
        }
    }

    /// Presents an acquired image once `wait_semaphore` signals. Returns true
    /// when the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            debug!("Swapchain destroyed");
        }
    }
}

/// Picks `preferred` in SRGB_NONLINEAR, else any 8-bit UNORM BGRA/RGBA
/// format (copies stay byte-exact), else the first format offered.
///
/// `formats` must not be empty.
fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::Format,
) -> vk::SurfaceFormatKHR {
    if let Some(&exact) = formats
        .iter()
        .find(|f| f.format == preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
    {
        return exact;
    }
    if let Some(&unorm) = formats.iter().find(|f| {
        matches!(
            f.format,
            vk::Format::B8G8R8A8_UNORM | vk::Format::R8G8B8A8_UNORM
        )
    }) {
        warn!(
            "Surface lacks {:?}; using {:?} (channel order differs)",
            preferred, unorm.format
        );
        return unorm;
    }
    warn!("Surface lacks 8-bit UNORM formats; using {:?}", formats[0].format);
    formats[0]
}

/// MAILBOX when offered, else FIFO (always available).
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the requested size clamped to its
/// limits when the surface leaves the extent to the swapchain (`u32::MAX`).
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 means uncapped).
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    match capabilities.max_image_count {
        0 => preferred,
        max => preferred.min(max),
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_subresource_range());
        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(e.into());
            }
        }
    }
    Ok(views)
}
