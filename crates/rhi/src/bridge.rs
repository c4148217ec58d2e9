//! Handle-based GPU object API.
//!
//! [`GraphicsDeviceBridge`] exposes devices, queues, command buffers,
//! buffers, textures, presentation layers, drawables, shader libraries,
//! functions, render pipelines, render-pass descriptors and render encoders
//! as opaque [`Handle`]s, so a caller on the far side of the C ABI can drive
//! immediate-mode rendering without ever holding a Vulkan object.
//!
//! # Overview
//!
//! Every creation call returns a live handle or [`Handle::NULL`]; failures
//! are logged and never abort the process. Every other call on an unknown,
//! stale or wrong-kind handle is a logged no-op. The expected ordering is:
//!
//! ```text
//! device -> queue -> command buffer -> encoder(descriptor with color target)
//!        -> (set pipeline, set vertex buffer, draw)* -> end
//!        -> [present drawable] -> commit
//! ```
//!
//! Objects referenced by a command buffer (buffers, textures, pipelines,
//! layers) are retained by it until its GPU work has finished, so
//! [`GraphicsDeviceBridge::release`] is safe at any point in that sequence.
//!
//! # Example
//!
//! ```no_run
//! use bridge_core::BridgeConfig;
//! use bridge_rhi::bridge::GraphicsDeviceBridge;
//!
//! let mut bridge = GraphicsDeviceBridge::new(&BridgeConfig::default());
//! let device = bridge.create_device();
//! let queue = bridge.create_command_queue(device);
//! let target = bridge.create_texture(device, 64, 64, 0);
//!
//! let desc = bridge.create_render_pass_descriptor();
//! bridge.render_pass_set_color_attachment(desc, target, 2, 1, [0.0, 0.0, 1.0, 1.0]);
//!
//! let cb = bridge.create_command_buffer(queue);
//! let encoder = bridge.create_render_encoder(cb, desc);
//! bridge.encoder_end(encoder);
//! bridge.command_buffer_commit(cb);
//! ```

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;
use bridge_core::{BridgeConfig, Handle, HandleTable};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, warn};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::host_import::ImportedBuffer;
use crate::instance::Instance;
use crate::physical_device::select_physical_device;
use crate::pipeline::{PrimitiveType, RenderPipeline};
use crate::rendering::{ColorAttachment, LoadAction, RenderingInfoBundle, StoreAction};
use crate::shader::{ShaderFunction, ShaderLibrary, ShaderStage};
use crate::surface::Surface;
use crate::swapchain::Swapchain;
use crate::sync::{Fence, FrameRing};
use crate::texture::{Texture, TextureFormat};
use crate::vertex::BridgeVertex;

/// Anything a command buffer keeps alive until its work completes.
type Retained = Arc<dyn Any + Send + Sync>;

/// Owner reference a layer holds so its native window outlives the surface.
pub type WindowKeepAlive = Arc<dyn Any + Send + Sync>;

/// Kind of object behind a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Device,
    Queue,
    CommandBuffer,
    Buffer,
    Texture,
    Layer,
    Drawable,
    Library,
    Function,
    Pipeline,
    RenderPassDescriptor,
    Encoder,
}

impl ObjectKind {
    /// Release order: users of an object go before the object.
    fn release_rank(self) -> u8 {
        match self {
            ObjectKind::Encoder => 0,
            ObjectKind::CommandBuffer => 1,
            ObjectKind::Drawable => 2,
            ObjectKind::Texture => 3,
            ObjectKind::Layer => 4,
            ObjectKind::RenderPassDescriptor => 5,
            ObjectKind::Pipeline => 6,
            ObjectKind::Function => 7,
            ObjectKind::Library => 8,
            ObjectKind::Buffer => 9,
            ObjectKind::Queue => 10,
            ObjectKind::Device => 11,
        }
    }
}

/// Where a buffer's memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageMode {
    /// CPU-visible memory, contents reachable through a pointer
    Shared,
    /// Device-local memory, no CPU pointer
    Private,
}

impl StorageMode {
    /// Decodes resource option bits; the storage mode lives in bits 4..8
    /// (0 shared, 1 managed, 2 private). Managed is treated as shared.
    pub fn from_options(options: u64) -> Option<Self> {
        match (options >> 4) & 0xF {
            0 | 1 => Some(StorageMode::Shared),
            2 => Some(StorageMode::Private),
            _ => None,
        }
    }

    fn buffer_usage(self) -> BufferUsage {
        match self {
            StorageMode::Shared => BufferUsage::Shared,
            StorageMode::Private => BufferUsage::Private,
        }
    }
}

/// Color target configuration of a render-pass descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorTarget {
    pub texture: Handle,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_color: [f32; 4],
}

/// Render-pass descriptor: at most one color target.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderPassDescriptor {
    pub color: Option<ColorTarget>,
}

enum BufferObject {
    Allocated(Buffer),
    Imported(ImportedBuffer),
}

impl BufferObject {
    fn handle(&self) -> vk::Buffer {
        match self {
            BufferObject::Allocated(buffer) => buffer.handle(),
            BufferObject::Imported(buffer) => buffer.handle(),
        }
    }

    fn contents(&self) -> *mut u8 {
        match self {
            BufferObject::Allocated(buffer) if buffer.usage().is_host_visible() => {
                buffer.mapped_ptr().unwrap_or(std::ptr::null_mut())
            }
            BufferObject::Allocated(_) => std::ptr::null_mut(),
            BufferObject::Imported(buffer) => buffer.as_ptr(),
        }
    }
}

struct QueueObject {
    device: Arc<Device>,
    pool: Arc<CommandPool>,
}

/// Window surface, its swapchain and the semaphores of its frames.
///
/// Fields drop in order, so the window goes after the surface built on it.
struct LayerObject {
    device: Arc<Device>,
    swapchain: Mutex<Swapchain>,
    frames: Mutex<FrameRing>,
    _window: Option<WindowKeepAlive>,
}

impl LayerObject {
    /// Acquires the next image. Returns `(index, acquired, rendered)` where
    /// `acquired` signals when the image is ready and `rendered` must be
    /// signaled before it is presented.
    fn acquire(&self, timeout_ns: u64) -> RhiResult<(u32, vk::Semaphore, vk::Semaphore)> {
        let (acquired, rendered) = {
            let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
            let frame = frames.current();
            let pair = (
                frame.image_available_semaphore().handle(),
                frame.render_finished_semaphore().handle(),
            );
            frames.advance();
            pair
        };

        let mut swapchain = self.swapchain.lock().unwrap_or_else(PoisonError::into_inner);
        let index = match swapchain.acquire_next_image(acquired, timeout_ns) {
            Ok((index, _)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                let extent = swapchain.extent();
                swapchain.recreate(extent.width, extent.height)?;
                swapchain.acquire_next_image(acquired, timeout_ns)?.0
            }
            Err(e) => return Err(e.into()),
        };
        Ok((index, acquired, rendered))
    }
}

enum TextureBacking {
    Owned(Arc<Texture>),
    Drawable {
        layer: Arc<LayerObject>,
        image: vk::Image,
        view: vk::ImageView,
        extent: vk::Extent2D,
    },
}

struct TextureObject {
    backing: TextureBacking,
    /// Layout the image is left in by the commands recorded so far.
    layout: vk::ImageLayout,
}

impl TextureObject {
    fn image(&self) -> vk::Image {
        match &self.backing {
            TextureBacking::Owned(texture) => texture.image(),
            TextureBacking::Drawable { image, .. } => *image,
        }
    }

    fn view(&self) -> vk::ImageView {
        match &self.backing {
            TextureBacking::Owned(texture) => texture.image_view(),
            TextureBacking::Drawable { view, .. } => *view,
        }
    }

    fn extent(&self) -> vk::Extent2D {
        match &self.backing {
            TextureBacking::Owned(texture) => texture.extent(),
            TextureBacking::Drawable { extent, .. } => *extent,
        }
    }

    fn retain(&self) -> Retained {
        match &self.backing {
            TextureBacking::Owned(texture) => texture.clone(),
            TextureBacking::Drawable { layer, .. } => layer.clone(),
        }
    }
}

struct DrawableObject {
    layer: Arc<LayerObject>,
    image_index: u32,
    texture: Handle,
    acquired: vk::Semaphore,
    rendered: vk::Semaphore,
    presented: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Submission {
    Recording,
    Committed,
}

struct CommandBufferObject {
    device: Arc<Device>,
    pool: Arc<CommandPool>,
    cmd: CommandBuffer,
    fence: Fence,
    submission: Submission,
    open_encoder: Option<Handle>,
    drawables: Vec<Handle>,
    retained: Vec<Retained>,
}

impl Drop for CommandBufferObject {
    fn drop(&mut self) {
        if self.submission == Submission::Committed && !self.fence.is_signaled() {
            // The bounded wait in commit expired; the GPU may still read
            // retained resources.
            warn!("Releasing a command buffer that is still executing, waiting for the device");
            if let Err(e) = self.device.wait_idle() {
                error!("Device wait failed while releasing command buffer: {}", e);
            }
        }
        self.pool.free_command_buffer(self.cmd.handle());
    }
}

struct EncoderObject {
    command_buffer: Handle,
    pipeline: Option<Arc<Mutex<RenderPipeline>>>,
    bound: Option<vk::Pipeline>,
    ended: bool,
}

enum GpuObject {
    Device(Arc<Device>),
    Queue(QueueObject),
    CommandBuffer(CommandBufferObject),
    Buffer(Arc<BufferObject>),
    Texture(TextureObject),
    Layer(Arc<LayerObject>),
    Drawable(DrawableObject),
    Library(Arc<ShaderLibrary>),
    Function(ShaderFunction),
    Pipeline(Arc<Mutex<RenderPipeline>>),
    RenderPassDescriptor(RenderPassDescriptor),
    Encoder(EncoderObject),
}

impl GpuObject {
    fn kind(&self) -> ObjectKind {
        match self {
            GpuObject::Device(_) => ObjectKind::Device,
            GpuObject::Queue(_) => ObjectKind::Queue,
            GpuObject::CommandBuffer(_) => ObjectKind::CommandBuffer,
            GpuObject::Buffer(_) => ObjectKind::Buffer,
            GpuObject::Texture(_) => ObjectKind::Texture,
            GpuObject::Layer(_) => ObjectKind::Layer,
            GpuObject::Drawable(_) => ObjectKind::Drawable,
            GpuObject::Library(_) => ObjectKind::Library,
            GpuObject::Function(_) => ObjectKind::Function,
            GpuObject::Pipeline(_) => ObjectKind::Pipeline,
            GpuObject::RenderPassDescriptor(_) => ObjectKind::RenderPassDescriptor,
            GpuObject::Encoder(_) => ObjectKind::Encoder,
        }
    }

    fn device(&self) -> Option<&Arc<Device>> {
        match self {
            GpuObject::Device(device) => Some(device),
            GpuObject::Queue(queue) => Some(&queue.device),
            GpuObject::CommandBuffer(cb) => Some(&cb.device),
            GpuObject::Layer(layer) => Some(&layer.device),
            _ => None,
        }
    }
}

/// Handle-based wrapper over the GPU objects an external renderer needs.
pub struct GraphicsDeviceBridge {
    objects: HandleTable<GpuObject>,
    validation: bool,
    default_library: PathBuf,
    fence_timeout_ns: u64,
}

impl GraphicsDeviceBridge {
    /// Creates an empty bridge. No GPU work happens until `create_device`.
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            objects: HandleTable::new(),
            validation: config.validation,
            default_library: config.shader_library.clone(),
            fence_timeout_ns: config.fence_timeout_ns(),
        }
    }

    /// Number of live objects.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// Kind of the object behind `handle`, if it is live.
    pub fn kind(&self, handle: Handle) -> Option<ObjectKind> {
        self.objects.get(handle).map(GpuObject::kind)
    }

    fn store(&mut self, what: &str, result: RhiResult<GpuObject>) -> Handle {
        match result {
            Ok(object) => {
                let handle = self.objects.insert(object);
                debug!("Created {} {:?}", what, handle);
                handle
            }
            Err(e) => {
                warn!("Failed to create {}: {}", what, e);
                Handle::NULL
            }
        }
    }

    fn lookup_device(&self, handle: Handle) -> RhiResult<Arc<Device>> {
        match self.objects.get(handle) {
            Some(GpuObject::Device(device)) => Ok(device.clone()),
            _ => Err(invalid("device", handle)),
        }
    }

    // =========================================================================
    // Device and queue
    // =========================================================================

    /// Creates a Vulkan instance and logical device.
    ///
    /// Returns [`Handle::NULL`] when no Vulkan loader or suitable GPU exists.
    pub fn create_device(&mut self) -> Handle {
        let result = open_device(self.validation).map(GpuObject::Device);
        self.store("device", result)
    }

    /// Wraps an already opened device, so other subsystems can share it.
    pub fn adopt_device(&mut self, device: Arc<Device>) -> Handle {
        self.store("device", Ok(GpuObject::Device(device)))
    }

    /// Returns the device behind `handle`.
    pub fn device(&self, handle: Handle) -> Option<Arc<Device>> {
        self.lookup_device(handle).ok()
    }

    /// Creates a command queue (graphics queue plus a command pool).
    pub fn create_command_queue(&mut self, device: Handle) -> Handle {
        let result = self.lookup_device(device).and_then(|device| {
            let pool = CommandPool::new(device.clone(), device.graphics_family())?;
            Ok(GpuObject::Queue(QueueObject {
                device,
                pool: Arc::new(pool),
            }))
        });
        self.store("command queue", result)
    }

    /// Creates a command buffer on `queue`, already recording.
    pub fn create_command_buffer(&mut self, queue: Handle) -> Handle {
        let result = match self.objects.get(queue) {
            Some(GpuObject::Queue(queue)) => {
                new_command_buffer(queue.device.clone(), queue.pool.clone())
            }
            _ => Err(invalid("command queue", queue)),
        };
        self.store("command buffer", result.map(GpuObject::CommandBuffer))
    }

    // =========================================================================
    // Buffers and textures
    // =========================================================================

    /// Creates a buffer of `length` bytes.
    ///
    /// `options` carries the storage mode (see [`StorageMode::from_options`]).
    pub fn create_buffer(&mut self, device: Handle, length: u64, options: u64) -> Handle {
        let result = self.lookup_device(device).and_then(|device| {
            let mode = StorageMode::from_options(options).ok_or_else(|| {
                RhiError::InvalidHandle(format!("Unknown resource options {:#x}", options))
            })?;
            let buffer = Buffer::new(device, mode.buffer_usage(), length)?;
            Ok(GpuObject::Buffer(Arc::new(BufferObject::Allocated(buffer))))
        });
        self.store("buffer", result)
    }

    /// CPU pointer to a buffer's contents; null for private storage or an
    /// unknown handle.
    pub fn buffer_contents(&self, buffer: Handle) -> *mut u8 {
        match self.objects.get(buffer) {
            Some(GpuObject::Buffer(buffer)) => buffer.contents(),
            _ => std::ptr::null_mut(),
        }
    }

    /// Imports `len` bytes of caller memory at `ptr` as a buffer, without copying.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for `len` bytes (rounded up to the device's
    /// import alignment) until the returned handle is released and every
    /// command buffer that used it has completed.
    pub unsafe fn import_host_buffer(&mut self, device: Handle, ptr: *mut u8, len: usize) -> Handle {
        let result = self.lookup_device(device).and_then(|device| {
            // SAFETY: forwarded caller contract.
            let imported = unsafe { ImportedBuffer::new(device, ptr, len)? };
            Ok(GpuObject::Buffer(Arc::new(BufferObject::Imported(imported))))
        });
        self.store("host buffer import", result)
    }

    /// Creates a `width x height` texture. `format` is a [`TextureFormat`] raw value.
    pub fn create_texture(&mut self, device: Handle, width: u32, height: u32, format: u32) -> Handle {
        let result = self.lookup_device(device).and_then(|device| {
            let format = TextureFormat::from_raw(format).ok_or_else(|| {
                RhiError::InvalidHandle(format!("Unknown texture format {}", format))
            })?;
            let texture = Texture::new(device, width, height, format)?;
            Ok(GpuObject::Texture(TextureObject {
                backing: TextureBacking::Owned(Arc::new(texture)),
                layout: vk::ImageLayout::UNDEFINED,
            }))
        });
        self.store("texture", result)
    }

    // =========================================================================
    // Presentation layers and drawables
    // =========================================================================

    /// Creates a presentation layer (surface plus swapchain) for a window.
    ///
    /// `keep_alive`, when given, is held for as long as the layer or anything
    /// retaining it lives. Pass the window's owner whenever the caller can
    /// destroy the window independently of this bridge.
    pub fn layer_for_window<W>(
        &mut self,
        device: Handle,
        window: &W,
        keep_alive: Option<WindowKeepAlive>,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Handle
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let result = self.lookup_device(device).and_then(|device| {
            let surface = Arc::new(Surface::new(device.instance().clone(), window)?);
            let swapchain = Swapchain::new(device.clone(), surface, width, height, format.to_vk())?;
            let frames = FrameRing::new(device.clone())?;
            Ok(GpuObject::Layer(Arc::new(LayerObject {
                device,
                swapchain: Mutex::new(swapchain),
                frames: Mutex::new(frames),
                _window: keep_alive,
            })))
        });
        self.store("layer", result)
    }

    /// Acquires the layer's next drawable, waiting at most the fence timeout.
    pub fn layer_next_drawable(&mut self, layer: Handle) -> Handle {
        let layer = match self.objects.get(layer) {
            Some(GpuObject::Layer(layer)) => layer.clone(),
            _ => {
                warn!("Failed to create drawable: {}", invalid("layer", layer));
                return Handle::NULL;
            }
        };

        let (image_index, acquired, rendered) = match layer.acquire(self.fence_timeout_ns) {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!("Failed to acquire drawable: {}", e);
                return Handle::NULL;
            }
        };

        let (image, view, extent) = {
            let swapchain = layer.swapchain.lock().unwrap_or_else(PoisonError::into_inner);
            (
                swapchain.image(image_index as usize),
                swapchain.image_view(image_index as usize),
                swapchain.extent(),
            )
        };

        let texture = self.objects.insert(GpuObject::Texture(TextureObject {
            backing: TextureBacking::Drawable {
                layer: layer.clone(),
                image,
                view,
                extent,
            },
            layout: vk::ImageLayout::UNDEFINED,
        }));

        self.store(
            "drawable",
            Ok(GpuObject::Drawable(DrawableObject {
                layer,
                image_index,
                texture,
                acquired,
                rendered,
                presented: false,
            })),
        )
    }

    /// Texture of a drawable; released together with the drawable.
    pub fn drawable_texture(&self, drawable: Handle) -> Handle {
        match self.objects.get(drawable) {
            Some(GpuObject::Drawable(drawable)) => drawable.texture,
            _ => Handle::NULL,
        }
    }

    // =========================================================================
    // Shaders and pipelines
    // =========================================================================

    /// Loads the configured default SPIR-V library.
    pub fn create_default_library(&mut self, device: Handle) -> Handle {
        let path = self.default_library.clone();
        self.create_library_from_file(device, &path)
    }

    /// Loads a SPIR-V library from `path`.
    pub fn create_library_from_file(&mut self, device: Handle, path: &Path) -> Handle {
        let result = self.lookup_device(device).and_then(|device| {
            let library = ShaderLibrary::from_spirv_file(device, path)?;
            info!(
                "Loaded shader library {:?} ({} entry points)",
                path,
                library.entry_points().len()
            );
            Ok(GpuObject::Library(library))
        });
        self.store("library", result)
    }

    /// Looks up an entry point by name; null when the library has none.
    pub fn library_function(&mut self, library: Handle, name: &str) -> Handle {
        let result = match self.objects.get(library) {
            Some(GpuObject::Library(library)) => library
                .function(name)
                .map(GpuObject::Function)
                .ok_or_else(|| RhiError::ShaderError(format!("No entry point named {:?}", name))),
            _ => Err(invalid("library", library)),
        };
        self.store("function", result)
    }

    /// Creates a render pipeline drawing [`BridgeVertex`] data.
    ///
    /// `pixel_format` is a [`TextureFormat`] raw value and must match the
    /// color targets the pipeline is used with.
    pub fn create_render_pipeline(
        &mut self,
        device: Handle,
        vertex_function: Handle,
        fragment_function: Handle,
        pixel_format: u32,
    ) -> Handle {
        let result = self.build_pipeline(device, vertex_function, fragment_function, pixel_format);
        self.store("render pipeline", result)
    }

    fn build_pipeline(
        &self,
        device: Handle,
        vertex_function: Handle,
        fragment_function: Handle,
        pixel_format: u32,
    ) -> RhiResult<GpuObject> {
        let device = self.lookup_device(device)?;
        let vertex = self.lookup_function(vertex_function, ShaderStage::Vertex)?;
        let fragment = self.lookup_function(fragment_function, ShaderStage::Fragment)?;
        let format = TextureFormat::from_raw(pixel_format).ok_or_else(|| {
            RhiError::PipelineError(format!("Unknown pixel format {}", pixel_format))
        })?;

        debug!(
            "Building pipeline with {}-byte vertices",
            BridgeVertex::STRIDE
        );
        let pipeline = RenderPipeline::new(device, vertex, fragment, format.to_vk())?;
        Ok(GpuObject::Pipeline(Arc::new(Mutex::new(pipeline))))
    }

    fn lookup_function(&self, handle: Handle, stage: ShaderStage) -> RhiResult<ShaderFunction> {
        match self.objects.get(handle) {
            Some(GpuObject::Function(function)) if function.stage() == stage => {
                Ok(function.clone())
            }
            Some(GpuObject::Function(function)) => Err(RhiError::PipelineError(format!(
                "Function {:?} is a {} function, expected {}",
                function.entry_point(),
                function.stage(),
                stage
            ))),
            _ => Err(invalid("function", handle)),
        }
    }

    // =========================================================================
    // Render passes and encoders
    // =========================================================================

    /// Creates an empty render-pass descriptor.
    pub fn create_render_pass_descriptor(&mut self) -> Handle {
        self.store(
            "render pass descriptor",
            Ok(GpuObject::RenderPassDescriptor(RenderPassDescriptor::default())),
        )
    }

    /// Sets the descriptor's color target. Unknown textures or actions leave
    /// the descriptor unchanged.
    pub fn render_pass_set_color_attachment(
        &mut self,
        descriptor: Handle,
        texture: Handle,
        load_action: u64,
        store_action: u64,
        clear_color: [f64; 4],
    ) {
        if !matches!(self.objects.get(texture), Some(GpuObject::Texture(_))) {
            warn!("Color attachment ignored: {}", invalid("texture", texture));
            return;
        }
        let (Some(load_action), Some(store_action)) = (
            u32::try_from(load_action).ok().and_then(LoadAction::from_raw),
            u32::try_from(store_action).ok().and_then(StoreAction::from_raw),
        ) else {
            warn!(
                "Color attachment ignored: unknown load/store action {}/{}",
                load_action, store_action
            );
            return;
        };

        match self.objects.get_mut(descriptor) {
            Some(GpuObject::RenderPassDescriptor(desc)) => {
                desc.color = Some(ColorTarget {
                    texture,
                    load_action,
                    store_action,
                    clear_color: clear_color.map(|c| c as f32),
                });
            }
            _ => warn!(
                "Color attachment ignored: {}",
                invalid("render pass descriptor", descriptor)
            ),
        }
    }

    /// Begins a render pass on `command_buffer` as described by `descriptor`.
    ///
    /// Returns null if the descriptor has no color target, the command
    /// buffer was committed, or another encoder is still open on it.
    pub fn create_render_encoder(&mut self, command_buffer: Handle, descriptor: Handle) -> Handle {
        match self.begin_encoder(command_buffer, descriptor) {
            Ok(encoder) => {
                debug!("Created encoder {:?}", encoder);
                encoder
            }
            Err(e) => {
                warn!("Failed to create render encoder: {}", e);
                Handle::NULL
            }
        }
    }

    fn begin_encoder(&mut self, command_buffer: Handle, descriptor: Handle) -> RhiResult<Handle> {
        let target = match self.objects.get(descriptor) {
            Some(GpuObject::RenderPassDescriptor(desc)) => desc.color.ok_or_else(|| {
                RhiError::InvalidHandle("Render pass descriptor has no color target".to_string())
            })?,
            _ => return Err(invalid("render pass descriptor", descriptor)),
        };

        match self.objects.get(command_buffer) {
            Some(GpuObject::CommandBuffer(cb)) => check_recording(cb)?,
            _ => return Err(invalid("command buffer", command_buffer)),
        }

        let (image, view, extent, layout, retained) = match self.objects.get_mut(target.texture) {
            Some(GpuObject::Texture(texture)) => {
                let before = texture.layout;
                texture.layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
                (
                    texture.image(),
                    texture.view(),
                    texture.extent(),
                    before,
                    texture.retain(),
                )
            }
            _ => return Err(invalid("texture", target.texture)),
        };

        let encoder = self.objects.insert(GpuObject::Encoder(EncoderObject {
            command_buffer,
            pipeline: None,
            bound: None,
            ended: false,
        }));

        let Some(GpuObject::CommandBuffer(cb)) = self.objects.get_mut(command_buffer) else {
            return Err(invalid("command buffer", command_buffer));
        };

        if layout != vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL {
            cb.cmd
                .transition_image(image, layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        }

        let attachment = ColorAttachment::new(view)
            .with_load_action(target.load_action)
            .with_store_action(target.store_action)
            .with_clear_color(target.clear_color);
        let bundle = RenderingInfoBundle::new(&attachment, extent);
        cb.cmd.begin_rendering(&bundle.info());
        cb.cmd.set_viewport(&bundle.viewport());
        cb.cmd.set_scissor(&bundle.render_area());

        cb.open_encoder = Some(encoder);
        cb.retained.push(retained);

        Ok(encoder)
    }

    /// Mutable access to an open encoder and its command buffer.
    fn open_encoder(
        &mut self,
        encoder: Handle,
    ) -> RhiResult<(&mut EncoderObject, &mut CommandBufferObject)> {
        let command_buffer = match self.objects.get(encoder) {
            Some(GpuObject::Encoder(enc)) if enc.ended => {
                return Err(RhiError::InvalidHandle(format!(
                    "Encoder {:?} has already ended",
                    encoder
                )));
            }
            Some(GpuObject::Encoder(enc)) => enc.command_buffer,
            _ => return Err(invalid("encoder", encoder)),
        };

        match self.objects.get2_mut(encoder, command_buffer) {
            Some((GpuObject::Encoder(enc), GpuObject::CommandBuffer(cb))) => Ok((enc, cb)),
            _ => Err(invalid("command buffer", command_buffer)),
        }
    }

    /// Sets the pipeline used by subsequent draws.
    pub fn encoder_set_pipeline(&mut self, encoder: Handle, pipeline: Handle) {
        let pipeline = match self.objects.get(pipeline) {
            Some(GpuObject::Pipeline(pipeline)) => pipeline.clone(),
            _ => {
                warn!("Set pipeline ignored: {}", invalid("pipeline", pipeline));
                return;
            }
        };
        match self.open_encoder(encoder) {
            Ok((enc, cb)) => {
                cb.retained.push(pipeline.clone());
                enc.pipeline = Some(pipeline);
                enc.bound = None;
            }
            Err(e) => warn!("Set pipeline ignored: {}", e),
        }
    }

    /// Binds `buffer` at `offset` to vertex binding `index`.
    pub fn encoder_set_vertex_buffer(&mut self, encoder: Handle, buffer: Handle, offset: u64, index: u64) {
        let buffer = match self.objects.get(buffer) {
            Some(GpuObject::Buffer(buffer)) => buffer.clone(),
            _ => {
                warn!("Set vertex buffer ignored: {}", invalid("buffer", buffer));
                return;
            }
        };
        if index != u64::from(BridgeVertex::BINDING) {
            warn!(
                "Set vertex buffer ignored: the vertex layout only uses binding {}, got {}",
                BridgeVertex::BINDING,
                index
            );
            return;
        }
        match self.open_encoder(encoder) {
            Ok((_, cb)) => {
                cb.cmd
                    .bind_vertex_buffer(BridgeVertex::BINDING, buffer.handle(), offset);
                cb.retained.push(buffer);
            }
            Err(e) => warn!("Set vertex buffer ignored: {}", e),
        }
    }

    /// Draws `count` vertices starting at `start`.
    ///
    /// `primitive` is a [`PrimitiveType`] raw value; unknown values and draws
    /// without a pipeline are ignored.
    pub fn encoder_draw_primitives(&mut self, encoder: Handle, primitive: u64, start: u64, count: u64) {
        let Some(primitive) = u32::try_from(primitive).ok().and_then(PrimitiveType::from_raw) else {
            warn!("Draw ignored: unknown primitive type {}", primitive);
            return;
        };
        let (Ok(start), Ok(count)) = (u32::try_from(start), u32::try_from(count)) else {
            warn!("Draw ignored: vertex range {}+{} out of range", start, count);
            return;
        };

        let (enc, cb) = match self.open_encoder(encoder) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Draw ignored: {}", e);
                return;
            }
        };
        let Some(pipeline) = enc.pipeline.as_ref() else {
            warn!("Draw ignored: no pipeline set on encoder {:?}", encoder);
            return;
        };

        let variant = pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .variant(primitive);
        match variant {
            Ok(variant) => {
                if enc.bound != Some(variant) {
                    cb.cmd.bind_pipeline(variant);
                    enc.bound = Some(variant);
                }
                cb.cmd.draw(count, start);
            }
            Err(e) => warn!("Draw ignored: {}", e),
        }
    }

    /// Ends the render pass. Ending twice is a logged no-op.
    pub fn encoder_end(&mut self, encoder: Handle) {
        match self.open_encoder(encoder) {
            Ok((enc, cb)) => {
                cb.cmd.end_rendering();
                cb.open_encoder = None;
                enc.ended = true;
            }
            Err(e) => warn!("End encoding ignored: {}", e),
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Schedules `drawable` to be presented when `command_buffer` commits.
    pub fn command_buffer_present_drawable(&mut self, command_buffer: Handle, drawable: Handle) {
        match self.objects.get(drawable) {
            Some(GpuObject::Drawable(d)) if d.presented => {
                warn!("Present ignored: drawable {:?} was already presented", drawable);
                return;
            }
            Some(GpuObject::Drawable(_)) => {}
            _ => {
                warn!("Present ignored: {}", invalid("drawable", drawable));
                return;
            }
        }
        match self.objects.get_mut(command_buffer) {
            Some(GpuObject::CommandBuffer(cb)) => match check_recording(cb) {
                Ok(()) if !cb.drawables.contains(&drawable) => cb.drawables.push(drawable),
                Ok(()) => {}
                Err(e) => warn!("Present ignored: {}", e),
            },
            _ => warn!("Present ignored: {}", invalid("command buffer", command_buffer)),
        }
    }

    /// Ends and submits `command_buffer`, waits for it (bounded by the fence
    /// timeout), then presents every scheduled drawable.
    pub fn command_buffer_commit(&mut self, command_buffer: Handle) {
        if let Err(e) = self.commit(command_buffer) {
            warn!("Commit of {:?} failed: {}", command_buffer, e);
        }
    }

    fn commit(&mut self, command_buffer: Handle) -> RhiResult<()> {
        let scheduled = match self.objects.get(command_buffer) {
            Some(GpuObject::CommandBuffer(cb)) => {
                check_recording(cb)?;
                if let Some(encoder) = cb.open_encoder {
                    return Err(RhiError::InvalidHandle(format!(
                        "Encoder {:?} is still open",
                        encoder
                    )));
                }
                cb.drawables.clone()
            }
            _ => return Err(invalid("command buffer", command_buffer)),
        };

        // Resolve scheduled drawables and move their images to PRESENT_SRC.
        let mut presents = Vec::with_capacity(scheduled.len());
        let mut transitions = Vec::with_capacity(scheduled.len());
        for handle in scheduled {
            let Some(GpuObject::Drawable(drawable)) = self.objects.get(handle) else {
                warn!("Skipping released drawable {:?}", handle);
                continue;
            };
            presents.push((
                handle,
                drawable.layer.clone(),
                drawable.image_index,
                drawable.acquired,
                drawable.rendered,
            ));
            let texture = drawable.texture;
            if let Some(GpuObject::Texture(texture)) = self.objects.get_mut(texture) {
                transitions.push((texture.image(), texture.layout));
                texture.layout = vk::ImageLayout::PRESENT_SRC_KHR;
            }
        }

        let fence_timeout_ns = self.fence_timeout_ns;
        let Some(GpuObject::CommandBuffer(cb)) = self.objects.get_mut(command_buffer) else {
            return Err(invalid("command buffer", command_buffer));
        };

        for (image, layout) in transitions {
            cb.cmd
                .transition_image(image, layout, vk::ImageLayout::PRESENT_SRC_KHR);
        }
        cb.cmd.end()?;
        cb.submission = Submission::Committed;

        let wait_semaphores: Vec<vk::Semaphore> = presents.iter().map(|p| p.3).collect();
        let wait_stages = vec![
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER;
            wait_semaphores.len()
        ];
        let signal_semaphores: Vec<vk::Semaphore> = presents.iter().map(|p| p.4).collect();
        let command_buffers = [cb.cmd.handle()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer was fully recorded above and its fence
        // was created unsignaled and never submitted before.
        unsafe {
            cb.device
                .submit_graphics(std::slice::from_ref(&submit_info), cb.fence.handle())?;
        }

        match cb.fence.wait(fence_timeout_ns) {
            Ok(()) => cb.retained.clear(),
            Err(e) => error!("Command buffer {:?} did not complete: {}", command_buffer, e),
        }

        let present_queue = cb.device.graphics_queue();
        for (handle, layer, image_index, _, rendered) in presents {
            let swapchain = layer.swapchain.lock().unwrap_or_else(PoisonError::into_inner);
            match swapchain.present(present_queue, image_index, rendered) {
                Ok(false) => {}
                Ok(true) => debug!("Swapchain is suboptimal after present"),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    debug!("Swapchain out of date, it is recreated on next acquire")
                }
                Err(e) => error!("Present failed: {:?}", e),
            }
            drop(swapchain);
            if let Some(GpuObject::Drawable(drawable)) = self.objects.get_mut(handle) {
                drawable.presented = true;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Releases any bridge object. Unknown and already released handles are
    /// ignored, so release is idempotent.
    ///
    /// Releasing a drawable also releases its texture. Releasing an open
    /// encoder ends its render pass first.
    pub fn release(&mut self, handle: Handle) {
        let Some(object) = self.objects.remove(handle) else {
            return;
        };
        debug!("Released {:?} {:?}", object.kind(), handle);

        match object {
            GpuObject::Drawable(drawable) => {
                self.objects.remove(drawable.texture);
            }
            GpuObject::Encoder(encoder) if !encoder.ended => {
                if let Some(GpuObject::CommandBuffer(cb)) =
                    self.objects.get_mut(encoder.command_buffer)
                    && cb.open_encoder == Some(handle)
                {
                    cb.cmd.end_rendering();
                    cb.open_encoder = None;
                }
            }
            _ => {}
        }
    }
}

impl GraphicsDeviceBridge {
    /// Releases every live object after the GPU has finished with them.
    ///
    /// Handles issued before the call are stale afterwards.
    pub fn release_all(&mut self) {
        if self.objects.is_empty() {
            return;
        }

        let mut devices: Vec<Arc<Device>> = Vec::new();
        for (_, object) in self.objects.iter() {
            if let Some(device) = object.device()
                && !devices.iter().any(|d| Arc::ptr_eq(d, device))
            {
                devices.push(device.clone());
            }
        }
        for device in &devices {
            if let Err(e) = device.wait_idle() {
                error!("Device wait failed during bridge teardown: {}", e);
            }
        }

        let mut objects = self.objects.drain();
        let count = objects.len();
        objects.sort_by_key(|object| object.kind().release_rank());
        drop(objects);

        info!("Device bridge released {} object(s)", count);
    }
}

impl Drop for GraphicsDeviceBridge {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn invalid(what: &str, handle: Handle) -> RhiError {
    RhiError::InvalidHandle(format!("{:?} is not a live {}", handle, what))
}

fn check_recording(cb: &CommandBufferObject) -> RhiResult<()> {
    match cb.submission {
        Submission::Recording => Ok(()),
        Submission::Committed => Err(RhiError::InvalidHandle(
            "Command buffer was already committed".to_string(),
        )),
    }
}

fn open_device(validation: bool) -> RhiResult<Arc<Device>> {
    let instance = Arc::new(Instance::new(validation)?);
    let info = select_physical_device(instance.handle())?;
    Device::new(instance, &info)
}

fn new_command_buffer(
    device: Arc<Device>,
    pool: Arc<CommandPool>,
) -> RhiResult<CommandBufferObject> {
    let cmd = CommandBuffer::new(device.clone(), &pool)?;
    let fence = match Fence::new(device.clone(), false) {
        Ok(fence) => fence,
        Err(e) => {
            pool.free_command_buffer(cmd.handle());
            return Err(e);
        }
    };
    let object = CommandBufferObject {
        device,
        pool,
        cmd,
        fence,
        submission: Submission::Recording,
        open_encoder: None,
        drawables: Vec::new(),
        retained: Vec::new(),
    };
    object.cmd.begin()?;
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> GraphicsDeviceBridge {
        GraphicsDeviceBridge::new(&BridgeConfig {
            validation: false,
            ..BridgeConfig::default()
        })
    }

    /// Opens a device, or returns None when Vulkan is unavailable.
    fn bridge_with_device() -> Option<(GraphicsDeviceBridge, Handle)> {
        if let Err(e) = open_device(false) {
            assert!(e.is_unavailable(), "unexpected device error: {}", e);
            eprintln!("Skipping test: Vulkan not available ({})", e);
            return None;
        }
        let mut bridge = bridge();
        let device = bridge.create_device();
        assert!(device.is_valid());
        Some((bridge, device))
    }

    #[test]
    fn test_storage_mode_from_options() {
        assert_eq!(StorageMode::from_options(0), Some(StorageMode::Shared));
        assert_eq!(StorageMode::from_options(1 << 4), Some(StorageMode::Shared));
        assert_eq!(StorageMode::from_options(2 << 4), Some(StorageMode::Private));
        assert_eq!(StorageMode::from_options(3 << 4), None);
        // Cache-mode bits are ignored.
        assert_eq!(StorageMode::from_options(1), Some(StorageMode::Shared));
    }

    #[test]
    fn test_release_order_puts_users_first() {
        assert!(ObjectKind::Encoder.release_rank() < ObjectKind::CommandBuffer.release_rank());
        assert!(ObjectKind::CommandBuffer.release_rank() < ObjectKind::Texture.release_rank());
        assert!(ObjectKind::Drawable.release_rank() < ObjectKind::Layer.release_rank());
        assert!(ObjectKind::Function.release_rank() < ObjectKind::Library.release_rank());
        assert!(ObjectKind::Queue.release_rank() < ObjectKind::Device.release_rank());
    }

    #[test]
    fn test_unknown_handles_yield_null() {
        let mut bridge = bridge();
        let bogus = Handle::from_raw(0x7_0000_0003);

        assert_eq!(bridge.create_command_queue(Handle::NULL), Handle::NULL);
        assert_eq!(bridge.create_command_queue(bogus), Handle::NULL);
        assert_eq!(bridge.create_command_buffer(bogus), Handle::NULL);
        assert_eq!(bridge.create_buffer(bogus, 64, 0), Handle::NULL);
        assert_eq!(bridge.create_texture(bogus, 4, 4, 0), Handle::NULL);
        assert_eq!(bridge.layer_next_drawable(bogus), Handle::NULL);
        assert_eq!(bridge.drawable_texture(bogus), Handle::NULL);
        assert_eq!(bridge.create_default_library(bogus), Handle::NULL);
        assert_eq!(bridge.library_function(bogus, "main"), Handle::NULL);
        assert_eq!(bridge.create_render_pipeline(bogus, bogus, bogus, 0), Handle::NULL);
        assert!(bridge.buffer_contents(bogus).is_null());
        assert_eq!(bridge.live_objects(), 0);
    }

    #[test]
    fn test_unknown_handles_are_noops() {
        let mut bridge = bridge();
        let bogus = Handle::from_raw(0x2_0000_0001);

        bridge.encoder_set_pipeline(bogus, bogus);
        bridge.encoder_set_vertex_buffer(bogus, bogus, 0, 0);
        bridge.encoder_draw_primitives(bogus, 3, 0, 3);
        bridge.encoder_end(bogus);
        bridge.command_buffer_present_drawable(bogus, bogus);
        bridge.command_buffer_commit(bogus);
        bridge.release(bogus);
        bridge.release(Handle::NULL);
        assert_eq!(bridge.live_objects(), 0);
    }

    #[test]
    fn test_descriptor_without_target_gives_no_encoder() {
        let mut bridge = bridge();
        let desc = bridge.create_render_pass_descriptor();
        assert!(desc.is_valid());
        assert_eq!(bridge.kind(desc), Some(ObjectKind::RenderPassDescriptor));

        // Texture is unknown, so the descriptor stays empty.
        bridge.render_pass_set_color_attachment(desc, Handle::from_raw(0x1_0000_0009), 2, 1, [0.0; 4]);
        let Some(GpuObject::RenderPassDescriptor(d)) = bridge.objects.get(desc) else {
            panic!("descriptor missing");
        };
        assert!(d.color.is_none());

        assert_eq!(bridge.create_render_encoder(Handle::NULL, desc), Handle::NULL);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut bridge = bridge();
        let desc = bridge.create_render_pass_descriptor();
        bridge.release(desc);
        bridge.release(desc);
        assert_eq!(bridge.kind(desc), None);
        assert_eq!(bridge.live_objects(), 0);

        // A new object never answers to the stale handle.
        let other = bridge.create_render_pass_descriptor();
        assert_ne!(other, desc);
        assert_eq!(bridge.kind(desc), None);
    }

    #[test]
    fn test_release_all_leaves_only_stale_handles() {
        let mut bridge = bridge();
        let a = bridge.create_render_pass_descriptor();
        let b = bridge.create_render_pass_descriptor();
        bridge.release_all();
        assert_eq!(bridge.live_objects(), 0);
        assert_eq!(bridge.kind(a), None);
        assert_eq!(bridge.kind(b), None);

        // Still usable afterwards.
        let c = bridge.create_render_pass_descriptor();
        assert_eq!(bridge.kind(c), Some(ObjectKind::RenderPassDescriptor));
        bridge.release_all();
        bridge.release_all();
        assert_eq!(bridge.live_objects(), 0);
    }

    #[test]
    fn test_wrong_kind_is_unknown() {
        let mut bridge = bridge();
        let desc = bridge.create_render_pass_descriptor();
        // A descriptor handle is not a device.
        assert_eq!(bridge.create_command_queue(desc), Handle::NULL);
        assert!(bridge.device(desc).is_none());
    }

    #[test]
    fn test_buffer_contents_shared_and_private() {
        let Some((mut bridge, device)) = bridge_with_device() else {
            return;
        };

        let shared = bridge.create_buffer(device, 256, 0);
        assert!(shared.is_valid());
        let contents = bridge.buffer_contents(shared);
        assert!(!contents.is_null());
        unsafe { contents.write_bytes(0xAB, 256) };

        let private = bridge.create_buffer(device, 256, 2 << 4);
        assert!(private.is_valid());
        assert!(bridge.buffer_contents(private).is_null());

        assert_eq!(bridge.create_buffer(device, 0, 0), Handle::NULL);
    }

    #[test]
    fn test_clear_pass_commits() {
        let Some((mut bridge, device)) = bridge_with_device() else {
            return;
        };

        let queue = bridge.create_command_queue(device);
        let target = bridge.create_texture(device, 16, 16, TextureFormat::Bgra8Unorm as u32);
        assert!(queue.is_valid());
        assert!(target.is_valid());

        let desc = bridge.create_render_pass_descriptor();
        bridge.render_pass_set_color_attachment(
            desc,
            target,
            LoadAction::Clear as u64,
            StoreAction::Store as u64,
            [0.0, 0.0, 1.0, 1.0],
        );

        let cb = bridge.create_command_buffer(queue);
        let encoder = bridge.create_render_encoder(cb, desc);
        assert!(encoder.is_valid());

        // A second encoder while the first is open is refused.
        assert_eq!(bridge.create_render_encoder(cb, desc), Handle::NULL);

        // Drawing without a pipeline is ignored, not recorded.
        bridge.encoder_draw_primitives(encoder, PrimitiveType::Triangle as u64, 0, 3);

        bridge.encoder_end(encoder);
        bridge.encoder_end(encoder);
        bridge.command_buffer_commit(cb);

        // Committing twice is a no-op; the buffer still releases cleanly.
        bridge.command_buffer_commit(cb);
        bridge.release(encoder);
        bridge.release(cb);
        assert_eq!(bridge.kind(cb), None);
    }

    #[test]
    fn test_commit_with_open_encoder_is_rejected() {
        let Some((mut bridge, device)) = bridge_with_device() else {
            return;
        };

        let queue = bridge.create_command_queue(device);
        let target = bridge.create_texture(device, 8, 8, 0);
        let desc = bridge.create_render_pass_descriptor();
        bridge.render_pass_set_color_attachment(desc, target, 2, 1, [1.0, 0.0, 0.0, 1.0]);

        let cb = bridge.create_command_buffer(queue);
        let encoder = bridge.create_render_encoder(cb, desc);
        bridge.command_buffer_commit(cb);

        let Some(GpuObject::CommandBuffer(state)) = bridge.objects.get(cb) else {
            panic!("command buffer missing");
        };
        assert_eq!(state.submission, Submission::Recording);

        // Releasing the open encoder closes the pass, so commit now succeeds.
        bridge.release(encoder);
        bridge.command_buffer_commit(cb);
        let Some(GpuObject::CommandBuffer(state)) = bridge.objects.get(cb) else {
            panic!("command buffer missing");
        };
        assert_eq!(state.submission, Submission::Committed);
    }

    #[test]
    fn test_missing_library_file_gives_null() {
        let Some((mut bridge, device)) = bridge_with_device() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.spv");
        assert_eq!(bridge.create_library_from_file(device, &missing), Handle::NULL);

        let garbage = dir.path().join("garbage.spv");
        std::fs::write(&garbage, b"not spirv").unwrap();
        assert_eq!(bridge.create_library_from_file(device, &garbage), Handle::NULL);
    }
}
