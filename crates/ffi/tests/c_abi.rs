//! Boundary behavior through the exported C functions, on headless contexts.

use bridge_core::{BridgeConfig, PresentStrategy};
use bridge_ffi::*;
use bridge_platform::{HeadlessPlatform, MouseButton, NativeWindow, WindowKey};
use bridge_present::PixelBuffer;
use bridge_rhi::vertex::BridgeVertex;
use glam::{Vec2, Vec4};

fn headless(config: BridgeConfig) -> *mut Bridge {
    Box::into_raw(Box::new(Bridge::Headless(BridgeContext::new(
        HeadlessPlatform::new(),
        config,
    ))))
}

fn cpu_bridge() -> *mut Bridge {
    headless(BridgeConfig {
        strategy: PresentStrategy::Cpu,
        validation: false,
        ..BridgeConfig::default()
    })
}

fn context(bridge: *mut Bridge) -> &'static mut BridgeContext<HeadlessPlatform> {
    match unsafe { &mut *bridge } {
        Bridge::Headless(ctx) => ctx,
        Bridge::Desktop(_) => panic!("expected a headless context"),
    }
}

fn window_key(bridge: *mut Bridge, window: BridgeHandle) -> WindowKey {
    let ctx = context(bridge);
    ctx.registry()
        .get(bridge_core::Handle::from_raw(window))
        .expect("live window")
        .key()
}

fn poll_key(bridge: *mut Bridge) -> Option<(u16, u8)> {
    let (mut code, mut down) = (0u16, 0u8);
    unsafe { bridge_poll_key_event(bridge, &mut code, &mut down) }.then_some((code, down))
}

#[derive(Debug, Default, PartialEq)]
struct Mouse {
    x: f32,
    y: f32,
    sx: f32,
    sy: f32,
    button: u8,
    down: u8,
}

fn poll_mouse(bridge: *mut Bridge) -> Option<Mouse> {
    let mut m = Mouse::default();
    unsafe {
        bridge_poll_mouse_event(
            bridge,
            &mut m.x,
            &mut m.y,
            &mut m.sx,
            &mut m.sy,
            &mut m.button,
            &mut m.down,
        )
    }
    .then_some(m)
}

// ============================================================================
// Windows
// ============================================================================

#[test]
fn test_new_window_is_not_closing() {
    let bridge = cpu_bridge();
    for (w, h) in [(1, 1), (640, 480), (4096, 16)] {
        let window = bridge_create_window(bridge, w, h, c"window".as_ptr());
        assert_ne!(window, 0);
        assert!(!bridge_window_should_close(bridge, window));
    }
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_unknown_and_destroyed_windows_report_closing() {
    let bridge = cpu_bridge();
    assert!(bridge_window_should_close(bridge, 0));
    assert!(bridge_window_should_close(bridge, 0xDEAD_0000_0001));

    let window = bridge_create_window(bridge, 8, 8, std::ptr::null());
    bridge_destroy_window(bridge, window);
    assert!(bridge_window_should_close(bridge, window));

    // Second destroy is harmless
    bridge_destroy_window(bridge, window);
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_invalid_dimensions_give_null_handle() {
    let bridge = cpu_bridge();
    assert_eq!(bridge_create_window(bridge, 0, 10, c"x".as_ptr()), 0);
    assert_eq!(bridge_create_window(bridge, -5, 10, c"x".as_ptr()), 0);
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_close_request_flips_flag_without_destroying() {
    let bridge = cpu_bridge();
    let window = bridge_create_window(bridge, 8, 8, c"close".as_ptr());
    let key = window_key(bridge, window);

    context(bridge).platform_mut().inject_close(key);
    bridge_pump_events(bridge);

    assert!(bridge_window_should_close(bridge, window));
    assert!(context(bridge).registry().contains(bridge_core::Handle::from_raw(window)));
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_scale_factor_defaults() {
    let bridge = cpu_bridge();
    assert_eq!(bridge_window_scale_factor(bridge, 42), 3.0);
    assert_eq!(bridge_window_scale_factor(std::ptr::null_mut(), 42), 3.0);

    let window = bridge_create_window(bridge, 8, 8, c"scale".as_ptr());
    assert_eq!(bridge_window_scale_factor(bridge, window), 1.0);
    unsafe { bridge_deinit(bridge) };
}

// ============================================================================
// Input
// ============================================================================

#[test]
fn test_empty_polls_leave_outputs_untouched() {
    let bridge = cpu_bridge();
    bridge_pump_events(bridge);

    let (mut code, mut down) = (0xAAAAu16, 0xBBu8);
    assert!(!unsafe { bridge_poll_key_event(bridge, &mut code, &mut down) });
    assert_eq!((code, down), (0xAAAA, 0xBB));

    let mut x = -1.0f32;
    let (mut y, mut sx, mut sy) = (-1.0f32, -1.0f32, -1.0f32);
    let (mut button, mut is_down) = (9u8, 9u8);
    assert!(!unsafe {
        bridge_poll_mouse_event(
            bridge,
            &mut x,
            &mut y,
            &mut sx,
            &mut sy,
            &mut button,
            &mut is_down,
        )
    });
    assert_eq!((x, y, sx, sy, button, is_down), (-1.0, -1.0, -1.0, -1.0, 9, 9));
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_null_outputs_do_not_consume() {
    let bridge = cpu_bridge();
    let window = bridge_create_window(bridge, 8, 8, c"keys".as_ptr());
    let key = window_key(bridge, window);
    context(bridge).platform_mut().inject_key(key, 30, true);
    bridge_pump_events(bridge);

    let mut down = 0u8;
    assert!(!unsafe { bridge_poll_key_event(bridge, std::ptr::null_mut(), &mut down) });
    assert_eq!(poll_key(bridge), Some((30, 1)));
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_keys_arrive_in_order() {
    let bridge = cpu_bridge();
    let window = bridge_create_window(bridge, 8, 8, c"keys".as_ptr());
    let key = window_key(bridge, window);
    let codes = [4u16, 22, 7, 9, 44];
    for code in codes {
        context(bridge).platform_mut().inject_key(key, code, true);
    }
    bridge_pump_events(bridge);

    for code in codes {
        assert_eq!(poll_key(bridge), Some((code, 1)));
    }
    assert_eq!(poll_key(bridge), None);
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_mouse_payloads_are_exclusive() {
    let bridge = cpu_bridge();
    let window = bridge_create_window(bridge, 100, 100, c"mouse".as_ptr());
    let key = window_key(bridge, window);
    {
        let platform = context(bridge).platform_mut();
        platform.inject_button(key, 10.0, 20.0, MouseButton::Right, true);
        platform.inject_scroll(key, 30.0, 40.0, 0.0, -2.5);
    }
    bridge_pump_events(bridge);

    let button = poll_mouse(bridge).unwrap();
    assert_eq!((button.x, button.y, button.button, button.down), (10.0, 20.0, 1, 1));
    assert_eq!((button.sx, button.sy), (0.0, 0.0));

    let scroll = poll_mouse(bridge).unwrap();
    assert_eq!(scroll.sy, -2.5);
    assert_eq!((scroll.button, scroll.down), (0, 0));

    assert_eq!(poll_mouse(bridge), None);
    assert_eq!(context(bridge).platform().redispatched().len(), 2);
    unsafe { bridge_deinit(bridge) };
}

// ============================================================================
// Presentation
// ============================================================================

#[test]
fn test_round_trip_through_c_abi() {
    let bridge = cpu_bridge();
    let window = bridge_create_window(bridge, 4, 4, c"present".as_ptr());
    let mut pixels = PixelBuffer::owned_aligned(4 * 4 * 4).unwrap();
    for px in pixels.pixels_mut().chunks_exact_mut(4) {
        px.copy_from_slice(&0xFF0000FFu32.to_ne_bytes());
    }

    unsafe { bridge_set_pixel_buffer(bridge, window, pixels.as_ptr(), pixels.len(), 4, 4) };
    bridge_present(bridge, window, 0);

    let ctx = context(bridge);
    let frame = ctx
        .registry()
        .get(bridge_core::Handle::from_raw(window))
        .unwrap()
        .frames()
        .latest()
        .unwrap();
    assert!(frame.is_filled_with(0xFF0000FFu32.to_ne_bytes()));

    // Surface goes before the caller frees its memory
    bridge_destroy_window(bridge, window);
    drop(pixels);
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_bad_length_does_not_crash() {
    let bridge = cpu_bridge();
    let window = bridge_create_window(bridge, 4, 4, c"bad".as_ptr());
    let mut pixels = vec![0u8; 4 * 4 * 4 * 2];
    unsafe { bridge_set_pixel_buffer(bridge, window, pixels.as_mut_ptr(), pixels.len(), 4, 4) };
    unsafe { bridge_set_pixel_buffer(bridge, window, std::ptr::null_mut(), 64, 4, 4) };
    unsafe { bridge_set_pixel_buffer(bridge, window, pixels.as_mut_ptr(), 64, -4, 4) };
    bridge_present(bridge, window, 0);
    bridge_present(bridge, 0, 0);
    unsafe { bridge_deinit(bridge) };
}

fn gpu_bridge() -> *mut Bridge {
    headless(BridgeConfig {
        strategy: PresentStrategy::Gpu,
        validation: false,
        ..BridgeConfig::default()
    })
}

fn latest_frame(bridge: *mut Bridge, window: BridgeHandle) -> Option<bridge_platform::Framebuffer> {
    context(bridge)
        .registry()
        .get(bridge_core::Handle::from_raw(window))
        .expect("live window")
        .frames()
        .latest()
}

#[test]
fn test_gpu_strategy_bad_length_is_rejected_before_the_device() {
    let bridge = gpu_bridge();
    let window = bridge_create_window(bridge, 4, 4, c"gpu-bad".as_ptr());
    let mut short = PixelBuffer::owned_aligned(4 * 4 * 4 - 4).unwrap();

    unsafe { bridge_set_pixel_buffer(bridge, window, short.pixels_mut().as_mut_ptr(), short.len(), 4, 4) };
    assert!(context(bridge).surface_mut(bridge_core::Handle::from_raw(window)).is_none());
    bridge_present(bridge, window, 0);
    assert!(latest_frame(bridge, window).is_none());

    bridge_destroy_window(bridge, window);
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_gpu_strategy_bad_length_keeps_previous_buffer() {
    let bridge = gpu_bridge();
    let window = bridge_create_window(bridge, 4, 4, c"gpu-keep".as_ptr());
    let mut good = PixelBuffer::owned_aligned(4 * 4 * 4).unwrap();
    for px in good.pixels_mut().chunks_exact_mut(4) {
        px.copy_from_slice(&[0x20, 0x40, 0x60, 0xFF]);
    }

    unsafe { bridge_set_pixel_buffer(bridge, window, good.pixels_mut().as_mut_ptr(), good.len(), 4, 4) };
    if context(bridge).surface_mut(bridge_core::Handle::from_raw(window)).is_none() {
        eprintln!("Skipping GPU test: no Vulkan device");
        unsafe { bridge_deinit(bridge) };
        return;
    }

    let mut bad = PixelBuffer::owned_aligned(4 * 4 * 4 * 2).unwrap();
    bad.pixels_mut().fill(0xEE);
    unsafe { bridge_set_pixel_buffer(bridge, window, bad.pixels_mut().as_mut_ptr(), 7, 4, 4) };
    unsafe { bridge_set_pixel_buffer(bridge, window, bad.pixels_mut().as_mut_ptr(), bad.len(), 4, 4) };
    bridge_present(bridge, window, 0);

    let frame = latest_frame(bridge, window).expect("frame presented");
    assert!(frame.is_filled_with([0x20, 0x40, 0x60, 0xFF]));

    bridge_destroy_window(bridge, window);
    drop(good);
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_null_context_is_safe_everywhere() {
    let null = std::ptr::null_mut();
    assert_eq!(bridge_create_window(null, 4, 4, c"x".as_ptr()), 0);
    bridge_destroy_window(null, 1);
    assert!(bridge_window_should_close(null, 1));
    bridge_pump_events(null);
    assert_eq!(poll_key(null), None);
    assert_eq!(poll_mouse(null), None);
    bridge_present(null, 1, 0);
    assert_eq!(bridge_gpu_create_device(null), 0);
    assert!(bridge_gpu_buffer_contents(null, 1).is_null());
    bridge_gpu_release(null, 1);
    unsafe { bridge_deinit(null) };
}

// ============================================================================
// Device bridge
// ============================================================================

#[test]
fn test_gpu_calls_on_unknown_handles_are_sentinels() {
    let bridge = cpu_bridge();
    assert_eq!(bridge_gpu_create_command_queue(bridge, 99), 0);
    assert_eq!(bridge_gpu_create_command_buffer(bridge, 99), 0);
    assert_eq!(bridge_gpu_create_buffer(bridge, 99, 64, 0), 0);
    assert_eq!(bridge_gpu_create_texture(bridge, 99, 4, 4, 0), 0);
    assert_eq!(bridge_gpu_layer_for_window(bridge, 99, 98), 0);
    assert_eq!(bridge_gpu_layer_next_drawable(bridge, 99), 0);
    assert_eq!(bridge_gpu_drawable_texture(bridge, 99), 0);
    assert_eq!(bridge_gpu_library_function(bridge, 99, c"main".as_ptr()), 0);
    assert_eq!(bridge_gpu_library_function(bridge, 99, std::ptr::null()), 0);
    assert_eq!(bridge_gpu_create_render_encoder(bridge, 99, 98), 0);
    bridge_gpu_encoder_set_pipeline(bridge, 99, 98);
    bridge_gpu_encoder_draw_primitives(bridge, 99, 3, 0, 3);
    bridge_gpu_encoder_end(bridge, 99);
    bridge_gpu_command_buffer_commit(bridge, 99);
    bridge_gpu_release(bridge, 99);
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_descriptor_without_target_gives_no_encoder() {
    let bridge = cpu_bridge();
    let descriptor = bridge_gpu_create_render_pass_descriptor(bridge);
    assert_ne!(descriptor, 0);
    assert_eq!(bridge_gpu_create_render_encoder(bridge, 99, descriptor), 0);
    bridge_gpu_release(bridge, descriptor);
    bridge_gpu_release(bridge, descriptor);
    unsafe { bridge_deinit(bridge) };
}

#[test]
fn test_gpu_clear_pass_and_vertex_upload() {
    let bridge = cpu_bridge();
    let device = bridge_gpu_create_device(bridge);
    if device == 0 {
        eprintln!("Skipping GPU test: no Vulkan device");
        unsafe { bridge_deinit(bridge) };
        return;
    }

    let queue = bridge_gpu_create_command_queue(bridge, device);
    let vertices = [
        BridgeVertex::new(Vec2::new(0.0, -0.5), Vec4::new(1.0, 0.0, 0.0, 1.0)),
        BridgeVertex::new(Vec2::new(0.5, 0.5), Vec4::new(0.0, 1.0, 0.0, 1.0)),
        BridgeVertex::new(Vec2::new(-0.5, 0.5), Vec4::new(0.0, 0.0, 1.0, 1.0)),
    ];
    let bytes: &[u8] = bytemuck::cast_slice(&vertices);
    let buffer = bridge_gpu_create_buffer(bridge, device, bytes.len() as u64, 0);
    assert_ne!(buffer, 0);
    let contents = bridge_gpu_buffer_contents(bridge, buffer);
    assert!(!contents.is_null());
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), contents, bytes.len()) };

    // Private storage has no CPU address
    let private = bridge_gpu_create_buffer(bridge, device, 64, 2 << 4);
    assert!(bridge_gpu_buffer_contents(bridge, private).is_null());

    let texture = bridge_gpu_create_texture(bridge, device, 16, 16, 0);
    let descriptor = bridge_gpu_create_render_pass_descriptor(bridge);
    bridge_gpu_render_pass_set_color_attachment(bridge, descriptor, texture, 2, 1, 0.0, 0.0, 0.0, 1.0);

    let command_buffer = bridge_gpu_create_command_buffer(bridge, queue);
    let encoder = bridge_gpu_create_render_encoder(bridge, command_buffer, descriptor);
    assert_ne!(encoder, 0);
    bridge_gpu_encoder_set_vertex_buffer(bridge, encoder, buffer, 0, 0);
    // No pipeline set: rejected, not recorded
    bridge_gpu_encoder_draw_primitives(bridge, encoder, 3, 0, 3);
    bridge_gpu_encoder_end(bridge, encoder);
    bridge_gpu_command_buffer_commit(bridge, command_buffer);

    for handle in [encoder, command_buffer, descriptor, texture, private, buffer, queue, device] {
        bridge_gpu_release(bridge, handle);
    }
    unsafe { bridge_deinit(bridge) };
}
