//! Color texture management.
//!
//! A [`Texture`] is a 2-D, single-mip color image with GPU-only memory and a
//! view. It serves as an offscreen presentation target and as the texture
//! object the device bridge hands out.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bridge_rhi::device::Device;
//! use bridge_rhi::texture::{Texture, TextureFormat};
//!
//! # fn example(device: Arc<Device>) -> Result<(), bridge_rhi::RhiError> {
//! let texture = Texture::new(device, 256, 256, TextureFormat::Bgra8Unorm)?;
//! assert_eq!(texture.extent().width, 256);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, PoisonError};

use ash::vk;
use bridge_core::PixelFormat;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::command::color_subresource_range;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Usage flags every texture is created with: render target, copy source
/// (read-back) and copy destination (band blits and clears).
pub const TEXTURE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Texel formats accepted by the bridge.
///
/// The raw values are the ones accepted at the C ABI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum TextureFormat {
    /// 8-bit blue, green, red, alpha
    #[default]
    Bgra8Unorm = 0,
    /// 8-bit red, green, blue, alpha
    Rgba8Unorm = 1,
}

impl TextureFormat {
    /// Decodes a raw format value; `None` for unknown values.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(TextureFormat::Bgra8Unorm),
            1 => Some(TextureFormat::Rgba8Unorm),
            _ => None,
        }
    }

    /// Converts to the Vulkan format.
    pub fn to_vk(self) -> vk::Format {
        match self {
            TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

impl From<PixelFormat> for TextureFormat {
    fn from(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Bgra8 => TextureFormat::Bgra8Unorm,
            PixelFormat::Rgba8 => TextureFormat::Rgba8Unorm,
        }
    }
}

/// 2-D color texture.
///
/// # Resource Destruction
///
/// Resources are destroyed in the following order:
/// 1. Image view
/// 2. Image
/// 3. Memory allocation
pub struct Texture {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan image handle.
    image: vk::Image,
    /// Vulkan image view handle.
    image_view: vk::ImageView,
    /// GPU memory allocation.
    allocation: Option<Allocation>,
    /// Texel format.
    format: vk::Format,
    /// Texture dimensions.
    extent: vk::Extent2D,
}

impl Texture {
    /// Creates a texture with the specified dimensions and format.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Either dimension is zero
    /// - Image creation or memory allocation fails
    /// - Image view creation fails
    pub fn new(
        device: Arc<Device>,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> RhiResult<Self> {
        Self::with_vk_format(device, width, height, format.to_vk())
    }

    /// Creates a texture with an explicit Vulkan format.
    ///
    /// # Errors
    ///
    /// See [`Texture::new`].
    pub fn with_vk_format(
        device: Arc<Device>,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> RhiResult<Self> {
        if width == 0 || height == 0 {
            return Err(RhiError::InvalidHandle(
                "Texture dimensions must be greater than 0".to_string(),
            ));
        }

        let extent = vk::Extent2D { width, height };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(TEXTURE_USAGE)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = {
            let mut allocator = device
                .allocator()
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            allocator.allocate(&AllocationCreateDesc {
                name: "texture",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false, // Optimal tiling is not linear
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        let mut texture = Self {
            device,
            image,
            image_view: vk::ImageView::null(),
            allocation: Some(allocation),
            format,
            extent,
        };

        // From here on Drop cleans up whatever was created.
        if let Some(allocation) = texture.allocation.as_ref() {
            unsafe {
                texture.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_subresource_range());

        texture.image_view = unsafe { texture.device.handle().create_image_view(&view_info, None)? };

        debug!("Created texture: {}x{} ({:?})", width, height, format);

        Ok(texture)
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Returns the Vulkan image view handle.
    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    /// Returns the texel format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the texture extent (width and height).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Size in bytes of a tightly packed copy of the whole texture.
    #[inline]
    pub fn packed_size(&self) -> vk::DeviceSize {
        self.extent.width as vk::DeviceSize * self.extent.height as vk::DeviceSize * 4
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            if self.image_view != vk::ImageView::null() {
                self.device
                    .handle()
                    .destroy_image_view(self.image_view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self
                .device
                .allocator()
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free texture allocation: {:?}", e);
            }
        }

        debug!(
            "Destroyed texture: {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_format_raw_values() {
        assert_eq!(TextureFormat::from_raw(0), Some(TextureFormat::Bgra8Unorm));
        assert_eq!(TextureFormat::from_raw(1), Some(TextureFormat::Rgba8Unorm));
        assert_eq!(TextureFormat::from_raw(7), None);
    }

    #[test]
    fn test_texture_format_matches_pixel_format() {
        assert_eq!(
            TextureFormat::from(PixelFormat::Bgra8).to_vk(),
            vk::Format::B8G8R8A8_UNORM
        );
        assert_eq!(
            TextureFormat::from(PixelFormat::Rgba8).to_vk(),
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_texture_usage_allows_copies_both_ways() {
        assert!(TEXTURE_USAGE.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(TEXTURE_USAGE.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(TEXTURE_USAGE.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }
}
