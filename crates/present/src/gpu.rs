//! GPU strategy.
//!
//! The caller's pixel memory is imported into Vulkan with no copy and read
//! as a `width x (height * K)` band image through buffer-to-image copy
//! regions. Each present clears the swap target and copies at most two row
//! spans into it (two when the visible window wraps past the last band).
//!
//! Swap targets are either a window swapchain or an offscreen image whose
//! contents are read back into a headless window's frame store.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};
use winit::window::Window as WinitWindow;

use bridge_core::{PixelFormat, PresentStrategy};
use bridge_platform::{FrameStore, Framebuffer};
use bridge_rhi::RhiError;
use bridge_rhi::buffer::{Buffer, BufferUsage};
use bridge_rhi::command::{CommandBuffer, CommandPool};
use bridge_rhi::device::Device;
use bridge_rhi::host_import::ImportedBuffer;
use bridge_rhi::instance::Instance;
use bridge_rhi::physical_device::select_physical_device;
use bridge_rhi::surface::Surface;
use bridge_rhi::swapchain::Swapchain;
use bridge_rhi::sync::{FrameRing, MAX_FRAMES_IN_FLIGHT, Semaphore};
use bridge_rhi::texture::{Texture, TextureFormat};

use crate::band::{BandLayout, RowSpan};
use crate::error::{PresentError, PresentResult};
use crate::pixels::PixelBuffer;
use crate::surface::Presenter;

/// Clear color for target pixels outside the band.
const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Opens a device able to import host memory.
///
/// # Errors
///
/// Returns [`RhiError::HostImportError`] if the selected device lacks
/// `VK_EXT_external_memory_host`; loader and device errors are propagated.
pub fn open_device(validation: bool) -> PresentResult<Arc<Device>> {
    let instance = Arc::new(Instance::new(validation)?);
    let info = select_physical_device(instance.handle())?;
    let device = Device::new(instance, &info)?;
    if !device.supports_host_import() {
        return Err(RhiError::HostImportError(format!(
            "'{}' cannot import host memory",
            info.device_name()
        ))
        .into());
    }
    Ok(device)
}

/// Builds the copy regions for one present.
///
/// Regions read the band image with `bufferRowLength = width` and are
/// clipped to `extent`.
pub fn copy_regions(
    layout: &BandLayout,
    offset_bytes: u64,
    extent: vk::Extent2D,
) -> Vec<vk::BufferImageCopy> {
    let width = layout.width().min(extent.width);
    if width == 0 {
        return Vec::new();
    }
    layout
        .visible_rows(offset_bytes)
        .spans()
        .iter()
        .filter_map(|span| clip_span(span, extent.height))
        .map(|span| {
            vk::BufferImageCopy::default()
                .buffer_offset(span.src_offset(layout) as vk::DeviceSize)
                .buffer_row_length(layout.width())
                .buffer_image_height(0)
                .image_subresource(color_layers())
                .image_offset(vk::Offset3D {
                    x: 0,
                    y: span.dst_row as i32,
                    z: 0,
                })
                .image_extent(vk::Extent3D {
                    width,
                    height: span.rows,
                    depth: 1,
                })
        })
        .collect()
}

fn clip_span(span: &RowSpan, target_height: u32) -> Option<RowSpan> {
    let rows = span.rows.min(target_height.saturating_sub(span.dst_row));
    (rows > 0).then_some(RowSpan { rows, ..*span })
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1)
}

/// A window swapchain.
pub struct SwapchainTarget {
    /// One per swapchain image; an image's semaphore is reused only after
    /// that image is acquired again.
    render_finished: Vec<Semaphore>,
    swapchain: Swapchain,
    window: Arc<WinitWindow>,
    resized: bool,
}

impl SwapchainTarget {
    /// Creates a surface and swapchain for `window`.
    ///
    /// # Errors
    ///
    /// Surface, swapchain and semaphore creation errors are propagated.
    pub fn new(
        device: Arc<Device>,
        window: Arc<WinitWindow>,
        format: PixelFormat,
    ) -> PresentResult<Self> {
        let surface = Arc::new(Surface::new(device.instance().clone(), window.as_ref())?);
        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            surface,
            size.width.max(1),
            size.height.max(1),
            TextureFormat::from(format).to_vk(),
        )?;
        let render_finished = per_image_semaphores(&device, swapchain.image_count())?;
        Ok(Self {
            render_finished,
            swapchain,
            window,
            resized: false,
        })
    }

    fn recreate(&mut self, device: &Arc<Device>) -> PresentResult<()> {
        let size = self.window.inner_size();
        if size.width == 0 || size.height == 0 {
            debug!("Deferring swapchain recreation for a zero-sized window");
            return Ok(());
        }
        self.swapchain.recreate(size.width, size.height)?;
        self.render_finished = per_image_semaphores(device, self.swapchain.image_count())?;
        self.resized = false;
        Ok(())
    }
}

fn per_image_semaphores(device: &Arc<Device>, count: u32) -> PresentResult<Vec<Semaphore>> {
    Ok((0..count)
        .map(|_| Semaphore::new(device.clone()))
        .collect::<Result<Vec<_>, RhiError>>()?)
}

/// An offscreen image read back into a frame store after each present.
pub struct OffscreenTarget {
    image: Texture,
    readback: Buffer,
    frame: Framebuffer,
    frames: FrameStore,
}

impl OffscreenTarget {
    /// Creates a `width x height` target.
    ///
    /// # Errors
    ///
    /// Image and buffer creation errors are propagated.
    pub fn new(
        device: Arc<Device>,
        width: u32,
        height: u32,
        format: PixelFormat,
        frames: FrameStore,
    ) -> PresentResult<Self> {
        let image = Texture::new(device.clone(), width, height, TextureFormat::from(format))?;
        let readback = Buffer::new(device, BufferUsage::Readback, image.packed_size())?;
        Ok(Self {
            image,
            readback,
            frame: Framebuffer::new(width, height),
            frames,
        })
    }

    fn read_back(&mut self) -> PresentResult<()> {
        let extent = self.image.extent();
        self.frame.resize(extent.width, extent.height);
        let bytes = self.frame.rows_mut(0, extent.height);
        self.readback.read_data(0, bytes)?;
        self.frames.display(&self.frame);
        Ok(())
    }
}

/// Where a GPU present lands.
pub enum GpuTarget {
    Swapchain(SwapchainTarget),
    Offscreen(OffscreenTarget),
}

/// The imported caller buffer.
struct BandSource {
    // Released before the memory it aliases.
    import: ImportedBuffer,
    layout: BandLayout,
    pixels: PixelBuffer,
}

/// Copies from imported caller memory into a swap target on the GPU.
pub struct GpuPresenter {
    device: Arc<Device>,
    target: GpuTarget,
    source: Option<BandSource>,
    commands: Vec<CommandBuffer>,
    frames: FrameRing,
    pool: CommandPool,
    fence_timeout_ns: u64,
}

impl GpuPresenter {
    /// Creates a presenter with nothing to present yet.
    ///
    /// # Errors
    ///
    /// Command pool, command buffer and synchronization errors are propagated.
    pub fn new(device: Arc<Device>, target: GpuTarget, fence_timeout_ns: u64) -> PresentResult<Self> {
        let pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let commands = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| CommandBuffer::new(device.clone(), &pool))
            .collect::<Result<Vec<_>, RhiError>>()?;
        let frames = FrameRing::new(device.clone())?;

        info!(
            "GPU presenter ready ({})",
            match target {
                GpuTarget::Swapchain(_) => "swapchain",
                GpuTarget::Offscreen(_) => "offscreen",
            }
        );

        Ok(Self {
            device,
            target,
            source: None,
            commands,
            frames,
            pool,
            fence_timeout_ns,
        })
    }

    fn record(&self, cmd: &CommandBuffer, image: vk::Image, extent: vk::Extent2D, offset: u64) {
        cmd.transition_image(
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        cmd.clear_color_image(image, CLEAR_COLOR);

        if let Some(source) = &self.source {
            let regions = copy_regions(&source.layout, offset, extent);
            if !regions.is_empty() {
                // Clear before copy
                cmd.transition_image(
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                cmd.copy_buffer_to_image(source.import.handle(), image, &regions);
            }
        }

        match &self.target {
            GpuTarget::Swapchain(_) => cmd.transition_image(
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
            GpuTarget::Offscreen(target) => {
                cmd.transition_image(
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                );
                let region = vk::BufferImageCopy::default()
                    .image_subresource(color_layers())
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    });
                cmd.copy_image_to_buffer(image, target.readback.handle(), &[region]);
            }
        }
    }

    fn present_swapchain(&mut self, offset: u64) -> PresentResult<()> {
        let frame_index = self.frames.index();
        let frame = self.frames.current();
        frame.in_flight_fence().wait(self.fence_timeout_ns)?;

        let GpuTarget::Swapchain(target) = &mut self.target else {
            return Ok(());
        };
        if target.resized {
            target.recreate(&self.device)?;
        }

        let image_index = match target.swapchain.acquire_next_image(
            frame.image_available_semaphore().handle(),
            self.fence_timeout_ns,
        ) {
            Ok((index, _)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date, recreating");
                return target.recreate(&self.device);
            }
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                warn!("No swapchain image became available, skipping frame");
                return Ok(());
            }
            Err(e) => return Err(RhiError::from(e).into()),
        };

        // Only reset the fence once work is certain to be submitted
        frame.in_flight_fence().reset()?;

        let image = target.swapchain.image(image_index as usize);
        let extent = target.swapchain.extent();
        let render_finished = target.render_finished[image_index as usize].handle();

        let cmd = &self.commands[frame_index];
        cmd.reset()?;
        cmd.begin()?;
        self.record(cmd, image, extent, offset);
        cmd.end()?;

        let wait_semaphores = [frame.image_available_semaphore().handle()];
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd.handle()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .submit_graphics(&[submit_info], frame.in_flight_fence().handle())?;
        }

        let GpuTarget::Swapchain(target) = &mut self.target else {
            return Ok(());
        };
        let needs_recreate = match target.swapchain.present(
            self.device.graphics_queue(),
            image_index,
            render_finished,
        ) {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(RhiError::from(e).into()),
        };
        if needs_recreate {
            target.recreate(&self.device)?;
        }

        self.frames.advance();
        Ok(())
    }

    fn present_offscreen(&mut self, offset: u64) -> PresentResult<()> {
        let frame = self.frames.current();
        frame.in_flight_fence().wait(self.fence_timeout_ns)?;
        frame.in_flight_fence().reset()?;

        let GpuTarget::Offscreen(target) = &self.target else {
            return Ok(());
        };
        let image = target.image.image();
        let extent = target.image.extent();

        let cmd = &self.commands[self.frames.index()];
        cmd.reset()?;
        cmd.begin()?;
        self.record(cmd, image, extent, offset);
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            self.device
                .submit_graphics(&[submit_info], frame.in_flight_fence().handle())?;
        }
        frame.in_flight_fence().wait(self.fence_timeout_ns)?;

        if let GpuTarget::Offscreen(target) = &mut self.target {
            target.read_back()?;
        }
        self.frames.advance();
        Ok(())
    }
}

impl Presenter for GpuPresenter {
    fn strategy(&self) -> PresentStrategy {
        PresentStrategy::Gpu
    }

    fn set_buffer(&mut self, pixels: PixelBuffer, layout: BandLayout) -> PresentResult<()> {
        // SAFETY: PixelBuffer guarantees `len` valid bytes, and the import is
        // dropped before the pixels it aliases (BandSource field order).
        let import =
            unsafe { ImportedBuffer::new(self.device.clone(), pixels.as_ptr(), pixels.len())? };

        if let Err(e) = self.frames.wait_all(self.fence_timeout_ns) {
            // The old import may still be read; leak it rather than free it under the GPU.
            warn!("Replacing a buffer still in use: {}", e);
            if let Some(old) = self.source.take() {
                std::mem::forget(old);
            }
        }

        debug!(
            "Imported {}x{} pixel buffer with {} band(s)",
            layout.width(),
            layout.height(),
            layout.bands()
        );
        self.source = Some(BandSource {
            import,
            layout,
            pixels,
        });
        Ok(())
    }

    fn reject(&mut self) {}

    /// Marks the swapchain for recreation on the next present.
    fn resize(&mut self) {
        if let GpuTarget::Swapchain(target) = &mut self.target {
            target.resized = true;
        }
    }

    fn present(&mut self, offset_bytes: u64) -> PresentResult<()> {
        if self.source.is_none() {
            return Ok(());
        }
        match self.target {
            GpuTarget::Swapchain(_) => self.present_swapchain(offset_bytes),
            GpuTarget::Offscreen(_) => self.present_offscreen(offset_bytes),
        }
    }

    fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        self.source.as_mut().map(|source| source.pixels.pixels_mut())
    }

    fn is_configured(&self) -> bool {
        self.source.is_some()
    }
}

impl Drop for GpuPresenter {
    fn drop(&mut self) {
        if let Err(e) = self.frames.wait_all(self.fence_timeout_ns) {
            warn!("GPU presenter dropped with work in flight: {}", e);
            if let Err(e) = self.device.wait_idle() {
                warn!("Device wait failed: {}", e);
            }
        }
        for cmd in &self.commands {
            self.pool.free_command_buffer(cmd.handle());
        }
        debug!("GPU presenter released");
    }
}
