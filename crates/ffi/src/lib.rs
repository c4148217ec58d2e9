//! C ABI for the presentation bridge.
//!
//! A host calls [`bridge_init`] once, threads the returned pointer through
//! every other call, and hands it back to [`bridge_deinit`]. Windows and GPU
//! objects cross the boundary as generation-checked `u64` handles; `0` is the
//! null handle.
//!
//! Failure policy at the boundary:
//! - a null context, unknown handle or null output pointer gives a sentinel
//!   (`0`, `false`, null, the default scale factor) and leaves outputs untouched
//! - errors are logged, never returned
//! - panics are caught and mapped to the same sentinels
//!
//! All calls belong on the thread that called [`bridge_init`].

mod context;

use std::ffi::{CStr, c_char};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use tracing::{error, info, warn};

use bridge_core::{BridgeConfig, Error, Handle, init_logging};
use bridge_platform::{DesktopPlatform, HeadlessPlatform};
use bridge_present::PixelBuffer;

pub use context::BridgeContext;

/// Raw handle value as seen by the host: `uint64_t` on every target.
pub type BridgeHandle = u64;

/// The context behind the host's opaque pointer.
pub enum Bridge {
    Desktop(BridgeContext<DesktopPlatform>),
    Headless(BridgeContext<HeadlessPlatform>),
}

macro_rules! dispatch {
    ($bridge:expr, $ctx:ident => $body:expr) => {
        match $bridge {
            Bridge::Desktop($ctx) => $body,
            Bridge::Headless($ctx) => $body,
        }
    };
}

fn load_config() -> BridgeConfig {
    let config = BridgeConfig::load()
        .and_then(|config| config.validate().map(|()| config))
        .unwrap_or_else(|e| {
            error!("Ignoring configuration: {}", e);
            BridgeConfig::default()
        });
    info!("Configuration: {:?}", config);
    config
}

/// Runs `f`, mapping a panic to `fallback`.
fn guard<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error!("Panic caught at the bridge boundary");
            fallback
        }
    }
}

/// Runs `f` on the context behind `bridge`, or returns `fallback` for null.
fn with_bridge<T>(bridge: *mut Bridge, fallback: T, f: impl FnOnce(&mut Bridge) -> T) -> T {
    if bridge.is_null() {
        warn!("Bridge call with a null context");
        return fallback;
    }
    // SAFETY: non-null pointers come from bridge_init and stay valid until
    // bridge_deinit, per the documented host contract.
    guard(fallback, || f(unsafe { &mut *bridge }))
}

fn cstr_or_empty<'a>(ptr: *const c_char) -> std::borrow::Cow<'a, str> {
    if ptr.is_null() {
        return "".into();
    }
    // SAFETY: host passes a NUL-terminated string.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy()
}

fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: host passes a NUL-terminated string.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn dimension(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Connects to the display and creates a context.
///
/// Terminates the process with a diagnostic when no display system exists.
/// Calling it again after [`bridge_deinit`] reuses the display connection;
/// calling it while another desktop context is alive returns null.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_init() -> *mut Bridge {
    init_logging();
    guard(std::ptr::null_mut(), || {
        let config = load_config();
        match DesktopPlatform::new() {
            Ok(platform) => Box::into_raw(Box::new(Bridge::Desktop(BridgeContext::new(
                platform, config,
            )))),
            Err(Error::DisplayUnavailable(reason)) => {
                error!("No display system: {}", reason);
                eprintln!("present-bridge: a display system is required but none is available ({reason})");
                std::process::exit(1);
            }
            Err(e) => {
                error!("Bridge initialization failed: {}", e);
                std::ptr::null_mut()
            }
        }
    })
}

/// Creates a display-less context; frames are kept in memory.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_init_headless() -> *mut Bridge {
    init_logging();
    guard(std::ptr::null_mut(), || {
        let config = load_config();
        Box::into_raw(Box::new(Bridge::Headless(BridgeContext::new(
            HeadlessPlatform::new(),
            config,
        ))))
    })
}

/// Destroys a context and everything it owns.
///
/// # Safety
///
/// `bridge` must come from [`bridge_init`] or [`bridge_init_headless`] and
/// must not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_deinit(bridge: *mut Bridge) {
    if bridge.is_null() {
        return;
    }
    guard((), || {
        // SAFETY: caller contract above.
        drop(unsafe { Box::from_raw(bridge) });
        info!("Bridge deinitialized");
    });
}

// ============================================================================
// Windows
// ============================================================================

/// Creates a window. Returns `0` on failure or for non-positive dimensions.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_create_window(
    bridge: *mut Bridge,
    width: i32,
    height: i32,
    title: *const c_char,
) -> BridgeHandle {
    with_bridge(bridge, 0, |bridge| {
        let title = cstr_or_empty(title);
        let (width, height) = (dimension(width), dimension(height));
        dispatch!(bridge, ctx => ctx.create_window(width, height, &title)).to_raw()
    })
}

/// Destroys a window. Unknown and already destroyed handles are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_destroy_window(bridge: *mut Bridge, window: BridgeHandle) {
    with_bridge(bridge, (), |bridge| {
        dispatch!(bridge, ctx => ctx.destroy_window(Handle::from_raw(window)))
    })
}

/// True once the user asked to close the window, or for unknown handles.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_window_should_close(bridge: *mut Bridge, window: BridgeHandle) -> bool {
    with_bridge(bridge, true, |bridge| {
        dispatch!(bridge, ctx => ctx.should_close(Handle::from_raw(window)))
    })
}

/// Display scale factor, or the configured default for unknown handles.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_window_scale_factor(bridge: *mut Bridge, window: BridgeHandle) -> f32 {
    let fallback = BridgeConfig::default().default_scale_factor;
    with_bridge(bridge, fallback, |bridge| {
        dispatch!(bridge, ctx => ctx.scale_factor(Handle::from_raw(window)))
    })
}

// ============================================================================
// Input
// ============================================================================

/// Drains the currently queued native events into the key and mouse queues.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_pump_events(bridge: *mut Bridge) {
    with_bridge(bridge, (), |bridge| {
        dispatch!(bridge, ctx => {
            ctx.pump_events();
        })
    })
}

/// Pops the oldest key event. Returns false, writing nothing, when the queue
/// is empty or an output pointer is null.
///
/// # Safety
///
/// Non-null outputs must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_poll_key_event(
    bridge: *mut Bridge,
    out_keycode: *mut u16,
    out_is_down: *mut u8,
) -> bool {
    if out_keycode.is_null() || out_is_down.is_null() {
        return false;
    }
    with_bridge(bridge, false, |bridge| {
        let Some(event) = dispatch!(bridge, ctx => ctx.poll_key()) else {
            return false;
        };
        // SAFETY: checked non-null; validity is the caller's contract.
        unsafe {
            out_keycode.write(event.keycode);
            out_is_down.write(u8::from(event.is_down));
        }
        true
    })
}

/// Pops the oldest mouse event. Returns false, writing nothing, when the
/// queue is empty or an output pointer is null.
///
/// # Safety
///
/// Non-null outputs must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_poll_mouse_event(
    bridge: *mut Bridge,
    out_x: *mut f32,
    out_y: *mut f32,
    out_scroll_x: *mut f32,
    out_scroll_y: *mut f32,
    out_button: *mut u8,
    out_is_down: *mut u8,
) -> bool {
    if out_x.is_null()
        || out_y.is_null()
        || out_scroll_x.is_null()
        || out_scroll_y.is_null()
        || out_button.is_null()
        || out_is_down.is_null()
    {
        return false;
    }
    with_bridge(bridge, false, |bridge| {
        let Some(event) = dispatch!(bridge, ctx => ctx.poll_mouse()) else {
            return false;
        };
        // SAFETY: checked non-null; validity is the caller's contract.
        unsafe {
            out_x.write(event.x);
            out_y.write(event.y);
            out_scroll_x.write(event.scroll_dx);
            out_scroll_y.write(event.scroll_dy);
            out_button.write(event.button);
            out_is_down.write(u8::from(event.is_down));
        }
        true
    })
}

// ============================================================================
// Presentation
// ============================================================================

/// Sets the window's pixel buffer. Rejected calls leave the previous buffer.
///
/// `pixels_len` must be `width * height * 4` (one band) or that times the
/// configured band count.
///
/// # Safety
///
/// `pixels` must stay valid for `pixels_len` bytes until another buffer is
/// set or the window is destroyed, and must not be written while a present
/// is in flight. The GPU strategy also needs it page aligned.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_set_pixel_buffer(
    bridge: *mut Bridge,
    window: BridgeHandle,
    pixels: *mut u8,
    pixels_len: usize,
    width: i32,
    height: i32,
) {
    with_bridge(bridge, (), |bridge| {
        // SAFETY: caller contract above.
        let Some(buffer) = (unsafe { PixelBuffer::from_raw(pixels, pixels_len) }) else {
            warn!("Pixel buffer ignored: null or empty");
            return;
        };
        let handle = Handle::from_raw(window);
        let (width, height) = (dimension(width), dimension(height));
        let result = dispatch!(bridge, ctx => ctx.set_pixel_buffer(handle, buffer, width, height));
        if let Err(e) = result {
            warn!("Pixel buffer for {:?} rejected: {}", handle, e);
        }
    })
}

/// Presents the window's buffer starting `offset` bytes into it.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_present(bridge: *mut Bridge, window: BridgeHandle, offset: u32) {
    with_bridge(bridge, (), |bridge| {
        dispatch!(bridge, ctx => ctx.present(Handle::from_raw(window), u64::from(offset)))
    })
}

// ============================================================================
// Device bridge
// ============================================================================

macro_rules! gpu_call {
    ($bridge:expr, $fallback:expr, |$gpu:ident| $body:expr) => {
        with_bridge($bridge, $fallback, |bridge| {
            dispatch!(bridge, ctx => {
                let $gpu = ctx.gpu();
                $body
            })
        })
    };
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_create_device(bridge: *mut Bridge) -> BridgeHandle {
    with_bridge(bridge, 0, |bridge| {
        dispatch!(bridge, ctx => ctx.gpu_create_device()).to_raw()
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_create_command_queue(
    bridge: *mut Bridge,
    device: BridgeHandle,
) -> BridgeHandle {
    gpu_call!(bridge, 0, |gpu| gpu
        .create_command_queue(Handle::from_raw(device))
        .to_raw())
}

/// Creates a command buffer that is already recording.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_create_command_buffer(
    bridge: *mut Bridge,
    queue: BridgeHandle,
) -> BridgeHandle {
    gpu_call!(bridge, 0, |gpu| gpu
        .create_command_buffer(Handle::from_raw(queue))
        .to_raw())
}

/// Creates a buffer. `options` carries the storage mode in bits 4..8.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_create_buffer(
    bridge: *mut Bridge,
    device: BridgeHandle,
    length: u64,
    options: u64,
) -> BridgeHandle {
    gpu_call!(bridge, 0, |gpu| gpu
        .create_buffer(Handle::from_raw(device), length, options)
        .to_raw())
}

/// CPU address of a shared buffer, null for private or unknown buffers.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_buffer_contents(bridge: *mut Bridge, buffer: BridgeHandle) -> *mut u8 {
    gpu_call!(bridge, std::ptr::null_mut(), |gpu| gpu
        .buffer_contents(Handle::from_raw(buffer)))
}

/// Wraps caller memory as a GPU buffer without copying.
///
/// # Safety
///
/// `ptr` must stay valid for `len` bytes until the buffer is released, and
/// must be aligned to the device's host-import alignment.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bridge_gpu_import_buffer(
    bridge: *mut Bridge,
    device: BridgeHandle,
    ptr: *mut u8,
    len: usize,
) -> BridgeHandle {
    // SAFETY: forwarded caller contract.
    gpu_call!(bridge, 0, |gpu| unsafe {
        gpu.import_host_buffer(Handle::from_raw(device), ptr, len)
    }
    .to_raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_create_texture(
    bridge: *mut Bridge,
    device: BridgeHandle,
    width: u32,
    height: u32,
    format: u32,
) -> BridgeHandle {
    gpu_call!(bridge, 0, |gpu| gpu
        .create_texture(Handle::from_raw(device), width, height, format)
        .to_raw())
}

/// Presentation layer (surface and swapchain) for a bridge window.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_layer_for_window(
    bridge: *mut Bridge,
    device: BridgeHandle,
    window: BridgeHandle,
) -> BridgeHandle {
    with_bridge(bridge, 0, |bridge| {
        dispatch!(bridge, ctx => ctx
            .gpu_layer_for_window(Handle::from_raw(device), Handle::from_raw(window))
            .to_raw())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_layer_next_drawable(
    bridge: *mut Bridge,
    layer: BridgeHandle,
) -> BridgeHandle {
    gpu_call!(bridge, 0, |gpu| gpu
        .layer_next_drawable(Handle::from_raw(layer))
        .to_raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_drawable_texture(
    bridge: *mut Bridge,
    drawable: BridgeHandle,
) -> BridgeHandle {
    gpu_call!(bridge, 0, |gpu| gpu
        .drawable_texture(Handle::from_raw(drawable))
        .to_raw())
}

/// Loads the configured default SPIR-V library.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_create_default_library(
    bridge: *mut Bridge,
    device: BridgeHandle,
) -> BridgeHandle {
    gpu_call!(bridge, 0, |gpu| gpu
        .create_default_library(Handle::from_raw(device))
        .to_raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_create_library_from_file(
    bridge: *mut Bridge,
    device: BridgeHandle,
    path: *const c_char,
) -> BridgeHandle {
    let Some(path) = cstr(path) else {
        warn!("Library path is null or not UTF-8");
        return 0;
    };
    gpu_call!(bridge, 0, |gpu| gpu
        .create_library_from_file(Handle::from_raw(device), Path::new(path))
        .to_raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_library_function(
    bridge: *mut Bridge,
    library: BridgeHandle,
    name: *const c_char,
) -> BridgeHandle {
    let Some(name) = cstr(name) else {
        warn!("Function name is null or not UTF-8");
        return 0;
    };
    gpu_call!(bridge, 0, |gpu| gpu
        .library_function(Handle::from_raw(library), name)
        .to_raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_create_render_pipeline(
    bridge: *mut Bridge,
    device: BridgeHandle,
    vertex_function: BridgeHandle,
    fragment_function: BridgeHandle,
    pixel_format: u32,
) -> BridgeHandle {
    gpu_call!(bridge, 0, |gpu| gpu
        .create_render_pipeline(
            Handle::from_raw(device),
            Handle::from_raw(vertex_function),
            Handle::from_raw(fragment_function),
            pixel_format,
        )
        .to_raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_create_render_pass_descriptor(bridge: *mut Bridge) -> BridgeHandle {
    gpu_call!(bridge, 0, |gpu| gpu.create_render_pass_descriptor().to_raw())
}

/// Sets color attachment 0. Load: 0 don't care, 1 load, 2 clear.
/// Store: 0 don't care, 1 store.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_render_pass_set_color_attachment(
    bridge: *mut Bridge,
    descriptor: BridgeHandle,
    texture: BridgeHandle,
    load_action: u64,
    store_action: u64,
    r: f64,
    g: f64,
    b: f64,
    a: f64,
) {
    gpu_call!(bridge, (), |gpu| gpu.render_pass_set_color_attachment(
        Handle::from_raw(descriptor),
        Handle::from_raw(texture),
        load_action,
        store_action,
        [r, g, b, a],
    ))
}

/// Begins a render pass. Returns `0` if the descriptor has no color target.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_create_render_encoder(
    bridge: *mut Bridge,
    command_buffer: BridgeHandle,
    descriptor: BridgeHandle,
) -> BridgeHandle {
    gpu_call!(bridge, 0, |gpu| gpu
        .create_render_encoder(Handle::from_raw(command_buffer), Handle::from_raw(descriptor))
        .to_raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_encoder_set_pipeline(
    bridge: *mut Bridge,
    encoder: BridgeHandle,
    pipeline: BridgeHandle,
) {
    gpu_call!(bridge, (), |gpu| gpu
        .encoder_set_pipeline(Handle::from_raw(encoder), Handle::from_raw(pipeline)))
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_encoder_set_vertex_buffer(
    bridge: *mut Bridge,
    encoder: BridgeHandle,
    buffer: BridgeHandle,
    offset: u64,
    index: u64,
) {
    gpu_call!(bridge, (), |gpu| gpu.encoder_set_vertex_buffer(
        Handle::from_raw(encoder),
        Handle::from_raw(buffer),
        offset,
        index,
    ))
}

/// Draws `count` vertices from `start`. Primitive: 0 point, 1 line,
/// 2 line strip, 3 triangle, 4 triangle strip.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_encoder_draw_primitives(
    bridge: *mut Bridge,
    encoder: BridgeHandle,
    primitive: u64,
    start: u64,
    count: u64,
) {
    gpu_call!(bridge, (), |gpu| gpu.encoder_draw_primitives(
        Handle::from_raw(encoder),
        primitive,
        start,
        count,
    ))
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_encoder_end(bridge: *mut Bridge, encoder: BridgeHandle) {
    gpu_call!(bridge, (), |gpu| gpu.encoder_end(Handle::from_raw(encoder)))
}

#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_command_buffer_present_drawable(
    bridge: *mut Bridge,
    command_buffer: BridgeHandle,
    drawable: BridgeHandle,
) {
    gpu_call!(bridge, (), |gpu| gpu.command_buffer_present_drawable(
        Handle::from_raw(command_buffer),
        Handle::from_raw(drawable),
    ))
}

/// Submits the command buffer, waits (bounded) for it, then presents any
/// scheduled drawables.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_command_buffer_commit(
    bridge: *mut Bridge,
    command_buffer: BridgeHandle,
) {
    gpu_call!(bridge, (), |gpu| gpu
        .command_buffer_commit(Handle::from_raw(command_buffer)))
}

/// Releases any device-bridge object. Idempotent.
#[unsafe(no_mangle)]
pub extern "C" fn bridge_gpu_release(bridge: *mut Bridge, handle: BridgeHandle) {
    gpu_call!(bridge, (), |gpu| gpu.release(Handle::from_raw(handle)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_rejects_negative() {
        assert_eq!(dimension(-1), 0);
        assert_eq!(dimension(640), 640);
    }

    #[test]
    fn test_cstr_helpers_handle_null() {
        assert_eq!(cstr_or_empty(std::ptr::null()), "");
        assert_eq!(cstr(std::ptr::null()), None);
        assert_eq!(cstr(c"main".as_ptr()), Some("main"));
    }

    #[test]
    fn test_guard_maps_panic_to_fallback() {
        let value = guard(7, || panic!("boom"));
        assert_eq!(value, 7);
    }
}
