//! The per-window presentation surface.

use std::sync::Arc;

use tracing::debug;

use bridge_core::{BridgeConfig, PixelFormat, PresentStrategy};
use bridge_platform::{DesktopWindow, HeadlessWindow, NativeWindow};
use bridge_rhi::bridge::WindowKeepAlive;
use bridge_rhi::device::Device;

use crate::band::BandLayout;
use crate::cpu::{CpuPresenter, FrameSink, SoftbufferSink};
use crate::error::PresentResult;
use crate::gpu::{GpuPresenter, GpuTarget, OffscreenTarget, SwapchainTarget};
use crate::pixels::PixelBuffer;

/// A presentation strategy behind one surface.
pub trait Presenter {
    fn strategy(&self) -> PresentStrategy;

    /// Takes over `pixels`, already validated against `layout`.
    ///
    /// On error the previous buffer stays in place.
    fn set_buffer(&mut self, pixels: PixelBuffer, layout: BandLayout) -> PresentResult<()>;

    /// Records that a buffer was refused at validation.
    fn reject(&mut self);

    /// The window's client area changed size.
    ///
    /// Strategies that size their output on every present ignore it.
    fn resize(&mut self) {}

    /// Shows the band window starting at `offset_bytes`.
    fn present(&mut self, offset_bytes: u64) -> PresentResult<()>;

    /// The current buffer's bytes, for owned buffers written in place.
    fn pixels_mut(&mut self) -> Option<&mut [u8]>;

    fn is_configured(&self) -> bool;
}

/// Windows a surface can present into.
pub trait PresentableWindow: NativeWindow {
    /// Sink for CPU-composited frames.
    fn frame_sink(&self, format: PixelFormat) -> PresentResult<Box<dyn FrameSink>>;

    /// Swap target for the GPU strategy, sized for `layout` where the window
    /// has no size of its own.
    fn gpu_target(
        &self,
        device: &Arc<Device>,
        format: PixelFormat,
        layout: &BandLayout,
    ) -> PresentResult<GpuTarget>;

    /// Shared owner of the native window, for GPU objects built on it that
    /// may outlive this handle. None when there is no native window.
    fn keep_alive(&self) -> Option<WindowKeepAlive>;
}

impl PresentableWindow for HeadlessWindow {
    fn frame_sink(&self, _format: PixelFormat) -> PresentResult<Box<dyn FrameSink>> {
        Ok(Box::new(self.frames().clone()))
    }

    fn gpu_target(
        &self,
        device: &Arc<Device>,
        format: PixelFormat,
        layout: &BandLayout,
    ) -> PresentResult<GpuTarget> {
        Ok(GpuTarget::Offscreen(OffscreenTarget::new(
            device.clone(),
            layout.width(),
            layout.height(),
            format,
            self.frames().clone(),
        )?))
    }

    fn keep_alive(&self) -> Option<WindowKeepAlive> {
        None
    }
}

impl PresentableWindow for DesktopWindow {
    fn frame_sink(&self, format: PixelFormat) -> PresentResult<Box<dyn FrameSink>> {
        Ok(Box::new(SoftbufferSink::new(self.shared(), format)?))
    }

    fn gpu_target(
        &self,
        device: &Arc<Device>,
        format: PixelFormat,
        _layout: &BandLayout,
    ) -> PresentResult<GpuTarget> {
        Ok(GpuTarget::Swapchain(SwapchainTarget::new(
            device.clone(),
            self.shared(),
            format,
        )?))
    }

    fn keep_alive(&self) -> Option<WindowKeepAlive> {
        Some(self.shared())
    }
}

/// Presents a caller pixel buffer into one window.
///
/// # Example
///
/// ```
/// use bridge_core::PixelFormat;
/// use bridge_platform::FrameStore;
/// use bridge_present::{CpuPresenter, PixelBuffer, PresentationSurface};
///
/// let store = FrameStore::default();
/// let presenter = CpuPresenter::new(Box::new(store.clone()), PixelFormat::Bgra8, 4, 4);
/// let mut surface = PresentationSurface::new(Box::new(presenter), 3);
///
/// let pixels = PixelBuffer::owned_aligned(4 * 4 * 4 * 3).unwrap();
/// surface.set_buffer(pixels, 4, 4).unwrap();
/// surface.present(0).unwrap();
/// assert!(store.latest().is_some());
/// ```
pub struct PresentationSurface {
    presenter: Box<dyn Presenter>,
    band_count: u32,
    layout: Option<BandLayout>,
}

impl PresentationSurface {
    /// Wraps a strategy. Buffers of `band_count` bands or one band are accepted.
    pub fn new(presenter: Box<dyn Presenter>, band_count: u32) -> Self {
        Self {
            presenter,
            band_count: band_count.max(1),
            layout: None,
        }
    }

    /// CPU-blit surface for `window`, showing the "no buffer" fill until a
    /// buffer is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the window refuses a frame sink.
    pub fn cpu<W: PresentableWindow>(window: &W, config: &BridgeConfig) -> PresentResult<Self> {
        let sink = window.frame_sink(config.pixel_format)?;
        let (width, height) = window.inner_size();
        let presenter = CpuPresenter::new(sink, config.pixel_format, width, height);
        Ok(Self::new(Box::new(presenter), config.band_count))
    }

    /// GPU surface for `window`, sized for buffers laid out as `layout`.
    ///
    /// # Errors
    ///
    /// Swap target and presenter creation errors are propagated.
    pub fn gpu<W: PresentableWindow>(
        device: Arc<Device>,
        window: &W,
        layout: &BandLayout,
        config: &BridgeConfig,
    ) -> PresentResult<Self> {
        let target = window.gpu_target(&device, config.pixel_format, layout)?;
        let presenter = GpuPresenter::new(device, target, config.fence_timeout_ns())?;
        Ok(Self::new(Box::new(presenter), config.band_count))
    }

    pub fn strategy(&self) -> PresentStrategy {
        self.presenter.strategy()
    }

    /// Layout of the current buffer, if any.
    pub fn layout(&self) -> Option<BandLayout> {
        self.layout
    }

    #[inline]
    pub fn band_count(&self) -> u32 {
        self.band_count
    }

    /// Validates and installs a new buffer.
    ///
    /// On error nothing changes except the CPU strategy's fallback color.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PresentError::LengthMismatch`] or
    /// [`crate::PresentError::InvalidSize`] for a buffer that does not match
    /// `width x height`; strategy errors (such as a failed GPU import) are
    /// propagated.
    pub fn set_buffer(&mut self, pixels: PixelBuffer, width: u32, height: u32) -> PresentResult<()> {
        let layout = match BandLayout::from_len(pixels.len(), width, height, self.band_count) {
            Ok(layout) => layout,
            Err(e) => {
                self.presenter.reject();
                return Err(e);
            }
        };
        self.presenter.set_buffer(pixels, layout)?;
        self.layout = Some(layout);
        debug!(
            "Surface buffer set: {}x{} x {} band(s)",
            width,
            height,
            layout.bands()
        );
        Ok(())
    }

    /// Presents the band window at `offset_bytes`.
    ///
    /// # Errors
    ///
    /// Strategy errors are propagated; the surface stays usable.
    pub fn present(&mut self, offset_bytes: u64) -> PresentResult<()> {
        if let Some(layout) = &self.layout
            && !offset_bytes.is_multiple_of(layout.bytes_per_row() as u64)
        {
            debug!(
                "Offset {} is not a whole scan line ({} bytes), truncating",
                offset_bytes,
                layout.bytes_per_row()
            );
        }
        self.presenter.present(offset_bytes)
    }

    /// Tells the strategy its window changed size.
    pub fn resize(&mut self) {
        self.presenter.resize();
    }

    /// The current buffer's bytes.
    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        self.presenter.pixels_mut()
    }

    /// True once a buffer has been accepted.
    pub fn is_configured(&self) -> bool {
        self.presenter.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PresentError;
    use bridge_platform::FrameStore;

    fn cpu_surface(store: &FrameStore) -> PresentationSurface {
        let presenter = CpuPresenter::new(Box::new(store.clone()), PixelFormat::Bgra8, 2, 2);
        PresentationSurface::new(Box::new(presenter), 3)
    }

    #[test]
    fn test_rejected_length_keeps_previous_buffer() {
        let store = FrameStore::default();
        let mut surface = cpu_surface(&store);

        let mut good = PixelBuffer::owned_aligned(2 * 2 * 4).unwrap();
        good.pixels_mut().fill(0x42);
        surface.set_buffer(good, 2, 2).unwrap();

        let bad = PixelBuffer::owned_aligned(7).unwrap();
        let err = surface.set_buffer(bad, 2, 2).unwrap_err();
        assert!(matches!(err, PresentError::LengthMismatch { .. }));

        assert_eq!(surface.layout(), BandLayout::new(2, 2, 1));
        surface.present(0).unwrap();
        assert!(store.latest().unwrap().is_filled_with([0x42; 4]));
    }

    #[test]
    fn test_pixels_mut_writes_through() {
        let store = FrameStore::default();
        let mut surface = cpu_surface(&store);
        assert!(surface.pixels_mut().is_none());

        surface
            .set_buffer(PixelBuffer::owned_aligned(2 * 2 * 4 * 3).unwrap(), 2, 2)
            .unwrap();
        surface.pixels_mut().unwrap()[..16].fill(0x10);
        surface.present(0).unwrap();
        assert!(store.latest().unwrap().is_filled_with([0x10; 4]));
    }

    #[test]
    fn test_misaligned_offset_truncates_to_scan_line() {
        let store = FrameStore::default();
        let mut surface = cpu_surface(&store);
        let mut pixels = PixelBuffer::owned_aligned(2 * 2 * 4 * 3).unwrap();
        for (row, chunk) in pixels.pixels_mut().chunks_exact_mut(8).enumerate() {
            chunk.fill(row as u8);
        }
        surface.set_buffer(pixels, 2, 2).unwrap();

        surface.present(8 + 5).unwrap();
        assert_eq!(store.latest().unwrap().pixel(0, 0), Some([1; 4]));
    }

    struct CountingPresenter {
        resizes: std::rc::Rc<std::cell::Cell<u32>>,
    }

    impl Presenter for CountingPresenter {
        fn strategy(&self) -> PresentStrategy {
            PresentStrategy::Gpu
        }

        fn set_buffer(&mut self, _pixels: PixelBuffer, _layout: BandLayout) -> PresentResult<()> {
            Ok(())
        }

        fn reject(&mut self) {}

        fn resize(&mut self) {
            self.resizes.set(self.resizes.get() + 1);
        }

        fn present(&mut self, _offset_bytes: u64) -> PresentResult<()> {
            Ok(())
        }

        fn pixels_mut(&mut self) -> Option<&mut [u8]> {
            None
        }

        fn is_configured(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_resize_reaches_strategy() {
        let resizes = std::rc::Rc::new(std::cell::Cell::new(0));
        let presenter = CountingPresenter {
            resizes: resizes.clone(),
        };
        let mut surface = PresentationSurface::new(Box::new(presenter), 1);
        surface.resize();
        surface.resize();
        assert_eq!(resizes.get(), 2);
    }

    #[test]
    fn test_cpu_strategy_ignores_resize() {
        let store = FrameStore::default();
        let mut surface = cpu_surface(&store);
        surface.resize();
        surface.present(0).unwrap();
        assert_eq!(store.latest().unwrap().width(), 2);
    }
}
