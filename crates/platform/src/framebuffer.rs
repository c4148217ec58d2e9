//! Owned 32-bit pixel frame, the unit a window displays.

/// A `width x height` frame of 4-byte pixels, rows tightly packed.
///
/// The byte order is whatever the producer wrote; the bridge copies bytes and
/// never reinterprets channels.
#[derive(Clone, PartialEq, Eq)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Framebuffer {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Creates a zero-filled frame.
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        Self {
            width,
            height,
            pixels: vec![0; len],
        }
    }

    /// Wraps existing bytes. Returns `None` if the length does not match the size.
    pub fn from_bytes(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        (pixels.len() == expected).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn bytes_per_row(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL
    }

    /// Resizes to `width x height`, keeping the allocation when possible.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels
            .resize(width as usize * height as usize * Self::BYTES_PER_PIXEL, 0);
    }

    /// Paints every pixel with the same 4 bytes.
    pub fn fill(&mut self, pixel: [u8; 4]) {
        for chunk in self.pixels.chunks_exact_mut(Self::BYTES_PER_PIXEL) {
            chunk.copy_from_slice(&pixel);
        }
    }

    /// Returns the pixel at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = y as usize * self.bytes_per_row() + x as usize * Self::BYTES_PER_PIXEL;
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.pixels[start..start + Self::BYTES_PER_PIXEL]);
        Some(out)
    }

    /// Mutable access to one row.
    ///
    /// # Panics
    ///
    /// Panics if `y` is out of bounds.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let stride = self.bytes_per_row();
        let start = y as usize * stride;
        &mut self.pixels[start..start + stride]
    }

    /// Rows `y..y + count` as one contiguous slice.
    pub fn rows_mut(&mut self, y: u32, count: u32) -> &mut [u8] {
        let stride = self.bytes_per_row();
        let start = y as usize * stride;
        &mut self.pixels[start..start + count as usize * stride]
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// True if every pixel equals `pixel`.
    pub fn is_filled_with(&self, pixel: [u8; 4]) -> bool {
        self.pixels
            .chunks_exact(Self::BYTES_PER_PIXEL)
            .all(|chunk| chunk == pixel)
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_read() {
        let mut frame = Framebuffer::new(3, 2);
        frame.fill([1, 2, 3, 4]);
        assert!(frame.is_filled_with([1, 2, 3, 4]));
        assert_eq!(frame.pixel(2, 1), Some([1, 2, 3, 4]));
        assert_eq!(frame.pixel(3, 0), None);
    }

    #[test]
    fn test_row_mut_targets_one_row() {
        let mut frame = Framebuffer::new(2, 2);
        frame.row_mut(1).copy_from_slice(&[9; 8]);
        assert_eq!(frame.pixel(0, 0), Some([0; 4]));
        assert_eq!(frame.pixel(1, 1), Some([9; 4]));
    }

    #[test]
    fn test_from_bytes_checks_length() {
        assert!(Framebuffer::from_bytes(2, 2, vec![0; 16]).is_some());
        assert!(Framebuffer::from_bytes(2, 2, vec![0; 15]).is_none());
    }

    #[test]
    fn test_resize() {
        let mut frame = Framebuffer::new(1, 1);
        frame.resize(4, 4);
        assert_eq!(frame.as_bytes().len(), 64);
        assert_eq!(frame.bytes_per_row(), 16);
    }
}
