//! The explicitly owned bridge context.
//!
//! Every boundary call takes a context instead of touching process-wide
//! state, so independent contexts (one per test, say) never interfere.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use bridge_core::{BridgeConfig, Error, Handle, PresentStrategy, Result};
use bridge_platform::{
    EventDemultiplexer, HandleRegistry, KeyEvent, MouseEvent, NativeWindow, Platform, PumpStats,
};
use bridge_present::{BandLayout, PixelBuffer, PresentableWindow, PresentationSurface, open_device};
use bridge_rhi::bridge::GraphicsDeviceBridge;
use bridge_rhi::device::Device;
use bridge_rhi::texture::TextureFormat;

/// Lazily opened device for GPU presentation.
enum GpuRuntime {
    Unopened,
    Ready(Arc<Device>),
    Unavailable,
}

/// Everything one `init` owns.
pub struct BridgeContext<P: Platform> {
    // Surfaces go first: they reference windows and the device.
    surfaces: HashMap<Handle, PresentationSurface>,
    gpu: GraphicsDeviceBridge,
    // Device-bridge layers created per window.
    layers: HashMap<Handle, Vec<Handle>>,
    runtime: GpuRuntime,
    registry: HandleRegistry<P::Window>,
    demux: EventDemultiplexer,
    platform: P,
    config: BridgeConfig,
}

impl<P> BridgeContext<P>
where
    P: Platform,
    P::Window: PresentableWindow,
{
    /// Creates a context over `platform`.
    pub fn new(platform: P, config: BridgeConfig) -> Self {
        info!(
            "Bridge context created ({:?} strategy, {} band(s), {:?})",
            config.strategy, config.band_count, config.pixel_format
        );
        Self {
            surfaces: HashMap::new(),
            gpu: GraphicsDeviceBridge::new(&config),
            layers: HashMap::new(),
            runtime: GpuRuntime::Unopened,
            registry: HandleRegistry::new(config.default_scale_factor),
            demux: EventDemultiplexer::new(),
            platform,
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn registry(&self) -> &HandleRegistry<P::Window> {
        &self.registry
    }

    pub fn gpu(&mut self) -> &mut GraphicsDeviceBridge {
        &mut self.gpu
    }

    // ========================================================================
    // Windows
    // ========================================================================

    /// Creates a window; in the CPU strategy its surface comes with it.
    pub fn create_window(&mut self, width: u32, height: u32, title: &str) -> Handle {
        let handle = self
            .registry
            .create_window(&mut self.platform, width, height, title);
        if !handle.is_valid() || self.config.strategy != PresentStrategy::Cpu {
            return handle;
        }

        if let Some(window) = self.registry.get(handle) {
            match PresentationSurface::cpu(window, &self.config) {
                Ok(surface) => {
                    self.surfaces.insert(handle, surface);
                }
                Err(e) => warn!("Window {:?} has no CPU surface: {}", handle, e),
            }
        }
        handle
    }

    /// Destroys a window after its surface and its device-bridge layers.
    /// Idempotent.
    pub fn destroy_window(&mut self, handle: Handle) {
        if self.surfaces.remove(&handle).is_some() {
            debug!("Surface of {:?} released", handle);
        }
        for layer in self.layers.remove(&handle).unwrap_or_default() {
            self.gpu.release(layer);
            debug!("Layer {:?} of {:?} released", layer, handle);
        }
        self.registry.destroy_window(handle);
    }

    pub fn should_close(&self, handle: Handle) -> bool {
        self.registry.should_close(handle)
    }

    pub fn scale_factor(&self, handle: Handle) -> f32 {
        self.registry.scale_factor(handle)
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Drains native events into the queues and forwards resizes to the
    /// affected surfaces.
    pub fn pump_events(&mut self) -> PumpStats {
        let stats = self.demux.pump(&mut self.platform, &mut self.registry);
        for handle in self.demux.take_resized() {
            if let Some(surface) = self.surfaces.get_mut(&handle) {
                surface.resize();
            }
        }
        stats
    }

    pub fn poll_key(&mut self) -> Option<KeyEvent> {
        self.demux.poll_key()
    }

    pub fn poll_mouse(&mut self) -> Option<MouseEvent> {
        self.demux.poll_mouse()
    }

    // ========================================================================
    // Presentation
    // ========================================================================

    /// Hands a pixel buffer to the window's surface.
    ///
    /// In the GPU strategy the first successful call creates the surface.
    /// On any error the previous presentation state stays in place.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] for an unknown window, [`Error::Contract`] for
    /// a buffer that does not match the size, [`Error::Vulkan`] when the GPU
    /// cannot take the buffer.
    pub fn set_pixel_buffer(
        &mut self,
        handle: Handle,
        pixels: PixelBuffer,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if !self.registry.contains(handle) {
            return Err(Error::InvalidHandle(handle.to_raw()));
        }

        if let Some(surface) = self.surfaces.get_mut(&handle) {
            return Ok(surface.set_buffer(pixels, width, height)?);
        }
        if self.config.strategy == PresentStrategy::Cpu {
            return Err(Error::Internal(format!("{:?} has no surface", handle)));
        }

        let layout = BandLayout::from_len(pixels.len(), width, height, self.config.band_count)?;
        let device = self.present_device()?;
        let window = self
            .registry
            .get(handle)
            .ok_or(Error::InvalidHandle(handle.to_raw()))?;
        let mut surface = PresentationSurface::gpu(device, window, &layout, &self.config)?;
        surface.set_buffer(pixels, width, height)?;
        self.surfaces.insert(handle, surface);
        Ok(())
    }

    /// Presents the window's buffer at `offset_bytes`. No-op without a surface.
    pub fn present(&mut self, handle: Handle, offset_bytes: u64) {
        let Some(surface) = self.surfaces.get_mut(&handle) else {
            return;
        };
        if let Err(e) = surface.present(offset_bytes) {
            warn!("Present on {:?} failed: {}", handle, e);
            return;
        }
        if surface.strategy() == PresentStrategy::Cpu
            && let Some(window) = self.registry.get(handle)
        {
            window.request_redraw();
        }
    }

    /// The window's surface, if one is configured.
    pub fn surface_mut(&mut self, handle: Handle) -> Option<&mut PresentationSurface> {
        self.surfaces.get_mut(&handle)
    }

    fn present_device(&mut self) -> Result<Arc<Device>> {
        match &self.runtime {
            GpuRuntime::Ready(device) => return Ok(device.clone()),
            GpuRuntime::Unavailable => {
                return Err(Error::Vulkan("GPU presentation is unavailable".to_string()));
            }
            GpuRuntime::Unopened => {}
        }

        match open_device(self.config.validation) {
            Ok(device) => {
                info!("GPU presentation device opened");
                self.runtime = GpuRuntime::Ready(device.clone());
                Ok(device)
            }
            Err(e) => {
                error!("GPU presentation unavailable: {}", e);
                self.runtime = GpuRuntime::Unavailable;
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // Device bridge glue
    // ========================================================================

    /// Device handle for the device bridge, sharing the presentation device
    /// when one is open.
    pub fn gpu_create_device(&mut self) -> Handle {
        match &self.runtime {
            GpuRuntime::Ready(device) => self.gpu.adopt_device(device.clone()),
            _ => self.gpu.create_device(),
        }
    }

    /// Presentation layer for a registered window, sized to its client area.
    pub fn gpu_layer_for_window(&mut self, device: Handle, window: Handle) -> Handle {
        let Some(native) = self.registry.get(window) else {
            warn!("Layer creation ignored: unknown window {:?}", window);
            return Handle::NULL;
        };
        let (width, height) = native.inner_size();
        let layer = self.gpu.layer_for_window(
            device,
            native,
            native.keep_alive(),
            width,
            height,
            TextureFormat::from(self.config.pixel_format),
        );
        self.track_layer(window, layer);
        layer
    }

    fn track_layer(&mut self, window: Handle, layer: Handle) {
        if layer.is_valid() {
            self.layers.entry(window).or_default().push(layer);
        }
    }
}

impl<P: Platform> Drop for BridgeContext<P> {
    fn drop(&mut self) {
        self.surfaces.clear();
        self.layers.clear();
        self.gpu.release_all();
        let windows = self.registry.clear();
        info!("Bridge context dropped ({} window(s) still open)", windows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_platform::HeadlessPlatform;

    fn cpu_context() -> BridgeContext<HeadlessPlatform> {
        let config = BridgeConfig {
            strategy: PresentStrategy::Cpu,
            ..BridgeConfig::default()
        };
        BridgeContext::new(HeadlessPlatform::new(), config)
    }

    #[test]
    fn test_cpu_window_gets_surface() {
        let mut ctx = cpu_context();
        let handle = ctx.create_window(4, 4, "cpu");
        assert!(ctx.surface_mut(handle).is_some());
        ctx.destroy_window(handle);
        assert!(ctx.surface_mut(handle).is_none());
    }

    #[test]
    fn test_set_buffer_on_unknown_window() {
        let mut ctx = cpu_context();
        let pixels = PixelBuffer::owned_aligned(64).unwrap();
        let err = ctx
            .set_pixel_buffer(Handle::from_raw(0x1_0000_0000), pixels, 4, 4)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHandle(_)));
    }

    #[test]
    fn test_present_requests_redraw_in_cpu_strategy() {
        let mut ctx = cpu_context();
        let handle = ctx.create_window(2, 2, "redraw");
        ctx.present(handle, 0);
        assert_eq!(ctx.registry().get(handle).unwrap().redraw_requests(), 1);
    }

    #[test]
    fn test_destroy_window_releases_its_layers() {
        let mut ctx = cpu_context();
        let doomed = ctx.create_window(2, 2, "doomed");
        let kept = ctx.create_window(2, 2, "kept");

        // Descriptors stand in for layers; release does not care about kind.
        let doomed_layer = ctx.gpu().create_render_pass_descriptor();
        let kept_layer = ctx.gpu().create_render_pass_descriptor();
        ctx.track_layer(doomed, doomed_layer);
        ctx.track_layer(kept, kept_layer);
        ctx.track_layer(kept, Handle::NULL);

        ctx.destroy_window(doomed);
        assert!(ctx.gpu().kind(doomed_layer).is_none());
        assert!(ctx.gpu().kind(kept_layer).is_some());
        assert_eq!(ctx.layers.get(&kept).map(Vec::len), Some(1));

        ctx.destroy_window(doomed);
        assert_eq!(ctx.gpu().live_objects(), 1);
    }

    #[test]
    fn test_resize_events_are_applied() {
        let mut ctx = cpu_context();
        let handle = ctx.create_window(4, 4, "resize");
        let key = ctx.registry().get(handle).unwrap().key();
        ctx.platform_mut().inject_resize(key, 8, 8);
        ctx.platform_mut().inject_resize(key, 16, 16);

        let stats = ctx.pump_events();
        assert_eq!(stats.applied, 2);
        assert!(ctx.demux.take_resized().is_empty());
        assert!(ctx.surface_mut(handle).is_some());
    }

    #[test]
    fn test_contexts_are_independent() {
        let mut a = cpu_context();
        let b = cpu_context();
        let handle = a.create_window(2, 2, "a");
        assert!(!a.should_close(handle));
        assert!(b.should_close(handle));
        assert_eq!(b.registry().len(), 0);
    }
}
