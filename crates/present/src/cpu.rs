//! CPU-blit strategy.
//!
//! Every present composites the visible band into an owned [`Framebuffer`]
//! and hands it to a [`FrameSink`]. With no buffer set the frame is a solid
//! diagnostic fill: pink before any buffer arrives, red after a buffer was
//! rejected.

use std::num::NonZeroU32;
use std::sync::Arc;

use bridge_core::{PixelFormat, PresentStrategy};
use bridge_platform::{FrameStore, Framebuffer};
use softbuffer::{Context, Surface};
use tracing::{debug, trace};
use winit::window::Window as WinitWindow;

use crate::band::BandLayout;
use crate::error::{PresentError, PresentResult};
use crate::pixels::PixelBuffer;
use crate::surface::Presenter;

/// "No buffer" diagnostic color.
pub const NO_BUFFER_RGB: (u8, u8, u8) = (255, 105, 180);

/// "Format rejected" diagnostic color.
pub const REJECTED_RGB: (u8, u8, u8) = (255, 0, 0);

/// Where composited frames go.
pub trait FrameSink {
    /// Displays one frame. Called once per present.
    fn show(&mut self, frame: &Framebuffer) -> PresentResult<()>;
}

impl FrameSink for FrameStore {
    fn show(&mut self, frame: &Framebuffer) -> PresentResult<()> {
        self.display(frame);
        Ok(())
    }
}

/// Software blit into a desktop window through softbuffer.
///
/// The frame is scaled nearest-neighbour to the window's client area.
pub struct SoftbufferSink {
    // Dropped before the context.
    surface: Surface<Arc<WinitWindow>, Arc<WinitWindow>>,
    _context: Context<Arc<WinitWindow>>,
    window: Arc<WinitWindow>,
    format: PixelFormat,
}

impl SoftbufferSink {
    /// Attaches a software surface to `window`.
    ///
    /// # Errors
    ///
    /// Returns [`PresentError::Sink`] if the window system refuses a surface.
    pub fn new(window: Arc<WinitWindow>, format: PixelFormat) -> PresentResult<Self> {
        let context =
            Context::new(window.clone()).map_err(|e| PresentError::Sink(e.to_string()))?;
        let surface = Surface::new(&context, window.clone())
            .map_err(|e| PresentError::Sink(e.to_string()))?;
        debug!("Software surface attached ({:?})", format);
        Ok(Self {
            surface,
            _context: context,
            window,
            format,
        })
    }
}

impl FrameSink for SoftbufferSink {
    fn show(&mut self, frame: &Framebuffer) -> PresentResult<()> {
        let size = self.window.inner_size();
        let (Some(width), Some(height)) = (NonZeroU32::new(size.width), NonZeroU32::new(size.height))
        else {
            trace!("Skipping present to a zero-sized window");
            return Ok(());
        };
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(());
        }

        self.surface
            .resize(width, height)
            .map_err(|e| PresentError::Sink(e.to_string()))?;
        let mut buffer = self
            .surface
            .buffer_mut()
            .map_err(|e| PresentError::Sink(e.to_string()))?;

        let (dst_w, dst_h) = (size.width as usize, size.height as usize);
        let (src_w, src_h) = (frame.width() as usize, frame.height() as usize);
        let src = frame.as_bytes();
        let stride = frame.bytes_per_row();
        for (y, row) in buffer.chunks_exact_mut(dst_w).take(dst_h).enumerate() {
            let sy = y * src_h / dst_h;
            let src_row = &src[sy * stride..(sy + 1) * stride];
            for (x, out) in row.iter_mut().enumerate() {
                let sx = x * src_w / dst_w * Framebuffer::BYTES_PER_PIXEL;
                *out = to_xrgb(self.format, &src_row[sx..sx + Framebuffer::BYTES_PER_PIXEL]);
            }
        }

        self.window.pre_present_notify();
        buffer
            .present()
            .map_err(|e| PresentError::Sink(e.to_string()))
    }
}

/// Converts one pixel to softbuffer's `0x00RRGGBB` word.
fn to_xrgb(format: PixelFormat, px: &[u8]) -> u32 {
    let (r, g, b) = match format {
        PixelFormat::Bgra8 => (px[2], px[1], px[0]),
        PixelFormat::Rgba8 => (px[0], px[1], px[2]),
    };
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    NoBuffer,
    Rejected,
}

/// Composites on the CPU and displays through a [`FrameSink`].
pub struct CpuPresenter {
    sink: Box<dyn FrameSink>,
    format: PixelFormat,
    frame: Framebuffer,
    source: Option<(PixelBuffer, BandLayout)>,
    fallback: Fallback,
    fallback_size: (u32, u32),
}

impl CpuPresenter {
    /// Creates a presenter whose fallback fill is `width x height`.
    pub fn new(sink: Box<dyn FrameSink>, format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            sink,
            format,
            frame: Framebuffer::new(0, 0),
            source: None,
            fallback: Fallback::NoBuffer,
            fallback_size: (width.max(1), height.max(1)),
        }
    }

    fn fallback_pixel(&self) -> [u8; 4] {
        let (r, g, b) = match self.fallback {
            Fallback::NoBuffer => NO_BUFFER_RGB,
            Fallback::Rejected => REJECTED_RGB,
        };
        self.format.pack(r, g, b, 255)
    }
}

impl Presenter for CpuPresenter {
    fn strategy(&self) -> PresentStrategy {
        PresentStrategy::Cpu
    }

    fn set_buffer(&mut self, pixels: PixelBuffer, layout: BandLayout) -> PresentResult<()> {
        self.source = Some((pixels, layout));
        self.fallback = Fallback::NoBuffer;
        Ok(())
    }

    fn reject(&mut self) {
        self.fallback = Fallback::Rejected;
    }

    fn present(&mut self, offset_bytes: u64) -> PresentResult<()> {
        match &self.source {
            Some((pixels, layout)) => {
                self.frame.resize(layout.width(), layout.height());
                let src = pixels.as_bytes();
                let stride = layout.bytes_per_row();
                for span in layout.visible_rows(offset_bytes).spans() {
                    let start = span.src_offset(layout);
                    let len = span.rows as usize * stride;
                    self.frame
                        .rows_mut(span.dst_row, span.rows)
                        .copy_from_slice(&src[start..start + len]);
                }
            }
            None => {
                let (width, height) = self.fallback_size;
                let pixel = self.fallback_pixel();
                self.frame.resize(width, height);
                self.frame.fill(pixel);
            }
        }
        self.sink.show(&self.frame)
    }

    fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        self.source.as_mut().map(|(pixels, _)| pixels.pixels_mut())
    }

    fn is_configured(&self) -> bool {
        self.source.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presenter(store: &FrameStore) -> CpuPresenter {
        CpuPresenter::new(Box::new(store.clone()), PixelFormat::Bgra8, 4, 2)
    }

    #[test]
    fn test_no_buffer_paints_pink() {
        let store = FrameStore::default();
        let mut cpu = presenter(&store);
        cpu.present(0).unwrap();
        let frame = store.latest().unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert!(frame.is_filled_with(PixelFormat::Bgra8.pack(255, 105, 180, 255)));
    }

    #[test]
    fn test_rejected_paints_red_until_valid_buffer() {
        let store = FrameStore::default();
        let mut cpu = presenter(&store);
        cpu.reject();
        cpu.present(0).unwrap();
        assert!(
            store
                .latest()
                .unwrap()
                .is_filled_with(PixelFormat::Bgra8.pack(255, 0, 0, 255))
        );

        let layout = BandLayout::new(2, 2, 1).unwrap();
        let mut pixels = PixelBuffer::owned_aligned(layout.total_bytes()).unwrap();
        pixels.pixels_mut().fill(9);
        cpu.set_buffer(pixels, layout).unwrap();
        cpu.present(0).unwrap();
        assert!(store.latest().unwrap().is_filled_with([9; 4]));
    }

    #[test]
    fn test_present_copies_visible_band() {
        let store = FrameStore::default();
        let mut cpu = presenter(&store);
        let layout = BandLayout::new(1, 2, 3).unwrap();
        let mut pixels = PixelBuffer::owned_aligned(layout.total_bytes()).unwrap();
        for (row, chunk) in pixels.pixels_mut().chunks_exact_mut(4).enumerate() {
            chunk.fill(row as u8);
        }
        cpu.set_buffer(pixels, layout).unwrap();

        // Rows 5 and 0 (wrapped)
        cpu.present(5 * 4).unwrap();
        let frame = store.latest().unwrap();
        assert_eq!(frame.pixel(0, 0), Some([5; 4]));
        assert_eq!(frame.pixel(0, 1), Some([0; 4]));
    }

    #[test]
    fn test_to_xrgb_respects_byte_order() {
        assert_eq!(to_xrgb(PixelFormat::Bgra8, &[0x33, 0x22, 0x11, 0xFF]), 0x112233);
        assert_eq!(to_xrgb(PixelFormat::Rgba8, &[0x11, 0x22, 0x33, 0xFF]), 0x112233);
    }
}
