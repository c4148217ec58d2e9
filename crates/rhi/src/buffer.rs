//! Allocator-backed GPU buffers.
//!
//! [`Buffer`] pairs a `VkBuffer` with a `gpu-allocator` allocation. The
//! [`BufferUsage`] decides both the Vulkan usage flags and where the memory
//! lives; host-visible buffers stay persistently mapped for their lifetime.
//! Caller-owned memory goes through [`crate::host_import`] instead.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bridge_rhi::device::Device;
//! use bridge_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), bridge_rhi::RhiError> {
//! let buffer = Buffer::new(device, BufferUsage::Shared, 1024)?;
//! let contents = buffer.mapped_ptr()?;
//! unsafe { contents.write_bytes(0, 1024) };
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, PoisonError};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What a buffer is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// General buffer the CPU can write through a pointer
    Shared,
    /// General buffer in device-local memory
    Private,
    /// CPU-readable destination of image copies
    Readback,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Shared | BufferUsage::Private => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Shared => MemoryLocation::CpuToGpu,
            BufferUsage::Private => MemoryLocation::GpuOnly,
            BufferUsage::Readback => MemoryLocation::GpuToCpu,
        }
    }

    /// Whether the buffer gets a CPU mapping.
    pub fn is_host_visible(self) -> bool {
        self.memory_location() != MemoryLocation::GpuOnly
    }

    fn name(self) -> &'static str {
        match self {
            BufferUsage::Shared => "shared",
            BufferUsage::Private => "private",
            BufferUsage::Readback => "readback",
        }
    }
}

/// A `VkBuffer` with allocator-managed memory.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    /// Taken in `drop` to hand back to the allocator.
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for a zero size, or the Vulkan or
    /// allocator error.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: usage.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        // From here on, Drop releases both halves.
        let created = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };
        if let Some(allocation) = &created.allocation {
            unsafe {
                created.device.handle().bind_buffer_memory(
                    buffer,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        debug!("Created {} buffer of {} bytes", usage.name(), size);
        Ok(created)
    }

    /// Copies `out.len()` bytes starting at `offset` out of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for unmapped buffers or ranges
    /// past the end.
    pub fn read_data(&self, offset: vk::DeviceSize, out: &mut [u8]) -> RhiResult<()> {
        let in_bounds = offset
            .checked_add(out.len() as vk::DeviceSize)
            .is_some_and(|end| end <= self.size);
        if !in_bounds {
            return Err(RhiError::InvalidHandle(format!(
                "Read of {} bytes at {} exceeds buffer of {}",
                out.len(),
                offset,
                self.size
            )));
        }

        let src = self.mapped_ptr()?;
        unsafe {
            std::ptr::copy_nonoverlapping(src.add(offset as usize), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    /// CPU address of the buffer contents.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for device-local buffers.
    pub fn mapped_ptr(&self) -> RhiResult<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|ptr| ptr.as_ptr().cast::<u8>())
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let freed = self
                .device
                .allocator()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .free(allocation);
            if let Err(e) = freed {
                error!("Failed to free buffer allocation: {:?}", e);
            }
        }
        unsafe { self.device.handle().destroy_buffer(self.buffer, None) };
    }
}
