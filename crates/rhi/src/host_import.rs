//! Zero-copy import of caller-owned memory (`VK_EXT_external_memory_host`).
//!
//! [`ImportedBuffer`] wraps a host allocation as a `VkBuffer` without copying
//! it. The GPU then reads the caller's pixels directly during transfers.
//!
//! # Alignment
//!
//! Both the pointer and the imported size must be multiples of
//! `minImportedHostPointerAlignment` (one page on common drivers). The size
//! is rounded up to that alignment; the rounded tail lies inside the last
//! page of the caller's allocation, which is mapped whenever the allocation
//! itself starts on an aligned address.
//!
//! # Safety contract
//!
//! The import aliases memory Rust does not own. The caller must keep the
//! memory alive and unmodified while GPU work reading it is in flight, and
//! must drop the [`ImportedBuffer`] before freeing the memory.

use std::ffi::c_void;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Handle type used for every host import.
const HOST_HANDLE_TYPE: vk::ExternalMemoryHandleTypeFlags =
    vk::ExternalMemoryHandleTypeFlags::HOST_ALLOCATION_EXT;

/// Computes the import size for `len` bytes at `addr`.
///
/// # Errors
///
/// Returns [`RhiError::HostImportError`] if `len` is zero or `addr` is not a
/// multiple of `min_alignment`.
pub fn import_size(addr: usize, len: usize, min_alignment: u64) -> RhiResult<vk::DeviceSize> {
    if len == 0 {
        return Err(RhiError::HostImportError(
            "Cannot import an empty buffer".to_string(),
        ));
    }
    let alignment = min_alignment.max(1);
    if !(addr as u64).is_multiple_of(alignment) {
        return Err(RhiError::HostImportError(format!(
            "Pointer {:#x} is not aligned to {} bytes",
            addr, alignment
        )));
    }
    Ok((len as u64).div_ceil(alignment) * alignment)
}

/// A `VkBuffer` bound to imported host memory.
pub struct ImportedBuffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    /// Caller pointer the memory aliases.
    ptr: *mut u8,
    /// Length the caller handed in.
    len: usize,
    /// Length rounded up to the import alignment.
    import_size: vk::DeviceSize,
}

impl ImportedBuffer {
    /// Imports `len` bytes at `ptr` as a transfer-source buffer.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live host allocation of at least `len` bytes
    /// whose last page is fully mapped, and that allocation must outlive the
    /// returned buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::HostImportError`] if the device lacks the
    /// extension, the pointer is misaligned, or no memory type accepts the
    /// pointer; Vulkan errors are propagated.
    pub unsafe fn new(device: Arc<Device>, ptr: *mut u8, len: usize) -> RhiResult<Self> {
        let (Some(loader), Some(support)) = (device.host_memory(), device.host_import()) else {
            return Err(RhiError::HostImportError(
                "VK_EXT_external_memory_host is not enabled on this device".to_string(),
            ));
        };
        if ptr.is_null() {
            return Err(RhiError::HostImportError("Null host pointer".to_string()));
        }
        let size = import_size(ptr as usize, len, support.min_alignment)?;

        let mut pointer_properties = vk::MemoryHostPointerPropertiesEXT::default();
        unsafe {
            (loader.fp().get_memory_host_pointer_properties_ext)(
                device.handle().handle(),
                HOST_HANDLE_TYPE,
                ptr as *const c_void,
                &mut pointer_properties,
            )
            .result()?;
        }

        let mut external_info =
            vk::ExternalMemoryBufferCreateInfo::default().handle_types(HOST_HANDLE_TYPE);
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(
                vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::VERTEX_BUFFER,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .push_next(&mut external_info);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let type_bits = requirements.memory_type_bits & pointer_properties.memory_type_bits;
        let memory_type = device
            .find_memory_type(type_bits, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .or_else(|| device.find_memory_type(type_bits, vk::MemoryPropertyFlags::empty()));
        let Some(memory_type) = memory_type else {
            unsafe { device.handle().destroy_buffer(buffer, None) };
            return Err(RhiError::HostImportError(format!(
                "No memory type accepts this host pointer (buffer bits {:#b}, pointer bits {:#b})",
                requirements.memory_type_bits, pointer_properties.memory_type_bits
            )));
        };

        let mut import_info = vk::ImportMemoryHostPointerInfoEXT::default()
            .handle_type(HOST_HANDLE_TYPE)
            .host_pointer(ptr as *mut c_void);
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type)
            .push_next(&mut import_info);

        let memory = match unsafe { device.handle().allocate_memory(&allocate_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let imported = Self {
            device,
            buffer,
            memory,
            ptr,
            len,
            import_size: size,
        };
        unsafe {
            imported
                .device
                .handle()
                .bind_buffer_memory(buffer, memory, 0)?;
        }

        debug!(
            "Imported {} host bytes at {:p} (import size {})",
            len, ptr, size
        );

        Ok(imported)
    }

    /// Returns the raw Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the caller pointer this buffer aliases.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Returns the length the caller handed in.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for an empty import (never constructed, kept for API symmetry).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the aligned size actually imported.
    #[inline]
    pub fn import_size(&self) -> vk::DeviceSize {
        self.import_size
    }
}

impl Drop for ImportedBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
            self.device.handle().free_memory(self.memory, None);
        }
        debug!("Released host import at {:p}", self.ptr);
    }
}

// SAFETY: The struct only stores the caller pointer for identification and
// logging; it never dereferences it. The GPU reads the memory under the
// caller's documented synchronization contract.
unsafe impl Send for ImportedBuffer {}
unsafe impl Sync for ImportedBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_size_rounds_up_to_alignment() {
        assert_eq!(import_size(4096, 64, 4096).unwrap(), 4096);
        assert_eq!(import_size(8192, 4096, 4096).unwrap(), 4096);
        assert_eq!(import_size(8192, 4097, 4096).unwrap(), 8192);
    }

    #[test]
    fn test_import_size_rejects_misaligned_pointer() {
        let err = import_size(4100, 64, 4096).unwrap_err();
        assert!(matches!(err, RhiError::HostImportError(_)));
    }

    #[test]
    fn test_import_size_rejects_empty() {
        assert!(import_size(4096, 0, 4096).is_err());
    }

    #[test]
    fn test_import_size_treats_zero_alignment_as_one() {
        assert_eq!(import_size(3, 5, 0).unwrap(), 5);
    }
}
