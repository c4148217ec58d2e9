//! The caller's pixel memory.
//!
//! The bridge never copies a frame into memory of its own: both strategies
//! read straight from the [`PixelBuffer`] the caller hands over. Two forms
//! exist:
//! - **Borrowed**: a raw pointer from the C boundary. The caller keeps the
//!   memory alive and does not write it while a present is in flight.
//! - **Owned**: a page-aligned allocation made by [`PixelBuffer::owned_aligned`],
//!   written through [`PixelBuffer::pixels_mut`] under the borrow checker.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Alignment of owned buffers. Covers every `minImportedHostPointerAlignment`
/// seen in practice (4 KiB pages, 64 KiB on some Windows drivers).
pub const OWNED_ALIGNMENT: usize = 64 * 1024;

enum Storage {
    Borrowed,
    Owned(Layout),
}

/// CPU pixel memory handed to a presentation surface.
pub struct PixelBuffer {
    ptr: NonNull<u8>,
    len: usize,
    storage: Storage,
}

impl PixelBuffer {
    /// Wraps caller-owned memory without taking ownership.
    ///
    /// Returns `None` for a null pointer or zero length.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// returned buffer (and any surface holding it) is dropped, and the caller
    /// must not write the memory while a present reading it is in flight.
    pub unsafe fn from_raw(ptr: *mut u8, len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        Some(Self {
            ptr: NonNull::new(ptr)?,
            len,
            storage: Storage::Borrowed,
        })
    }

    /// Allocates `len` zeroed bytes on an [`OWNED_ALIGNMENT`] boundary.
    ///
    /// The allocation is rounded up to whole alignment units so the GPU
    /// strategy can import it zero-copy. Returns `None` for a zero length or
    /// when the allocator refuses.
    pub fn owned_aligned(len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let size = len.checked_next_multiple_of(OWNED_ALIGNMENT)?;
        let layout = Layout::from_size_align(size, OWNED_ALIGNMENT).ok()?;
        // SAFETY: layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;
        Some(Self {
            ptr,
            len,
            storage: Storage::Owned(layout),
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length the caller asked for, in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True for buffers allocated by [`PixelBuffer::owned_aligned`].
    #[inline]
    pub fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: valid for `len` bytes per the constructors' contracts.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` excludes other Rust borrows.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let Storage::Owned(layout) = self.storage {
            // SAFETY: allocated in `owned_aligned` with this layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("owned", &self.is_owned())
            .finish()
    }
}

// SAFETY: the buffer is plain bytes; borrowed memory crosses threads only
// under the caller's from_raw contract.
unsafe impl Send for PixelBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_is_aligned_and_zeroed() {
        let buffer = PixelBuffer::owned_aligned(100).unwrap();
        assert!(buffer.is_owned());
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.as_ptr() as usize % OWNED_ALIGNMENT, 0);
        assert!(buffer.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_owned_rejects_zero() {
        assert!(PixelBuffer::owned_aligned(0).is_none());
    }

    #[test]
    fn test_from_raw_aliases_caller_memory() {
        let mut backing = vec![0u8; 16];
        let mut buffer = unsafe { PixelBuffer::from_raw(backing.as_mut_ptr(), 16) }.unwrap();
        assert!(!buffer.is_owned());
        buffer.pixels_mut()[3] = 7;
        drop(buffer);
        assert_eq!(backing[3], 7);
    }

    #[test]
    fn test_from_raw_rejects_null_and_empty() {
        let mut backing = [0u8; 4];
        assert!(unsafe { PixelBuffer::from_raw(std::ptr::null_mut(), 4) }.is_none());
        assert!(unsafe { PixelBuffer::from_raw(backing.as_mut_ptr(), 0) }.is_none());
    }
}
