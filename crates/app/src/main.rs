//! Scrolling band demo for the presentation bridge.
//!
//! Paints a tall buffer of stacked bands, hands it to the bridge once, then
//! scrolls it by advancing the presentation offset every frame. Up and Down
//! change the speed; closing the window exits. When the GPU strategy cannot
//! take the buffer the demo reopens its window with the CPU strategy.

use anyhow::{Context as _, Result, bail};
use tracing::{info, warn};

use bridge_core::{BridgeConfig, FrameClock, Handle, PixelFormat, PresentStrategy, init_logging};
use bridge_ffi::BridgeContext;
use bridge_platform::DesktopPlatform;
use bridge_present::{BYTES_PER_PIXEL, PixelBuffer};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const TARGET_FPS: u32 = 60;
const MAX_SPEED: u32 = 32;

/// Native scancodes for the arrow keys.
#[cfg(target_os = "linux")]
const KEY_UP: u16 = 103;
#[cfg(target_os = "linux")]
const KEY_DOWN: u16 = 108;
#[cfg(target_os = "windows")]
const KEY_UP: u16 = 0xE048;
#[cfg(target_os = "windows")]
const KEY_DOWN: u16 = 0xE050;
#[cfg(target_os = "macos")]
const KEY_UP: u16 = 126;
#[cfg(target_os = "macos")]
const KEY_DOWN: u16 = 125;
#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
const KEY_UP: u16 = u16::MAX;
#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
const KEY_DOWN: u16 = u16::MAX - 1;

const BAND_COLORS: [[u8; 3]; 4] = [[220, 60, 60], [60, 180, 90], [70, 110, 230], [230, 200, 70]];

/// Fills each band with its own color and a darker stripe every 16 rows.
fn paint_bands(pixels: &mut [u8], width: u32, height: u32, format: PixelFormat) {
    let row_bytes = width as usize * BYTES_PER_PIXEL;
    for (row_index, row) in pixels.chunks_exact_mut(row_bytes).enumerate() {
        let band = row_index / height as usize;
        let [r, g, b] = BAND_COLORS[band % BAND_COLORS.len()];
        let shade = if (row_index / 16).is_multiple_of(2) { 1 } else { 2 };
        let px = format.pack(r / shade, g / shade, b / shade, 255);
        for dst in row.chunks_exact_mut(BYTES_PER_PIXEL) {
            dst.copy_from_slice(&px);
        }
    }
}

/// The configuration to retry with when `config` fails to present.
fn fallback_config(config: &BridgeConfig) -> Option<BridgeConfig> {
    (config.strategy == PresentStrategy::Gpu).then(|| BridgeConfig {
        strategy: PresentStrategy::Cpu,
        ..config.clone()
    })
}

/// Opens a context with one window and hands it a freshly painted buffer.
fn open(config: BridgeConfig) -> Result<(BridgeContext<DesktopPlatform>, Handle)> {
    let platform = DesktopPlatform::new().context("No display available")?;
    let bands = config.band_count;
    let format = config.pixel_format;
    let mut ctx = BridgeContext::new(platform, config);

    let window = ctx.create_window(WIDTH, HEIGHT, "Present Bridge");
    if !window.is_valid() {
        bail!("Failed to create window");
    }

    let band_bytes = WIDTH as usize * HEIGHT as usize * BYTES_PER_PIXEL;
    let mut pixels = PixelBuffer::owned_aligned(band_bytes * bands as usize)
        .context("Failed to allocate pixel buffer")?;
    paint_bands(pixels.pixels_mut(), WIDTH, HEIGHT, format);
    ctx.set_pixel_buffer(window, pixels, WIDTH, HEIGHT)
        .context("Pixel buffer rejected")?;
    Ok((ctx, window))
}

fn main() -> Result<()> {
    init_logging();
    let config = BridgeConfig::load().context("Failed to load bridge configuration")?;
    info!("Starting present-bridge demo ({:?} strategy)", config.strategy);

    let fallback = fallback_config(&config);
    let (mut ctx, window) = match (open(config), fallback) {
        (Ok(opened), _) => opened,
        (Err(e), Some(fallback)) => {
            warn!("{:#}; retrying with the CPU strategy", e);
            open(fallback)?
        }
        (Err(e), None) => return Err(e),
    };

    let bands = ctx.config().band_count;
    let band_bytes = WIDTH as usize * HEIGHT as usize * BYTES_PER_PIXEL;
    let row_bytes = u64::from(WIDTH) * BYTES_PER_PIXEL as u64;
    let total_bytes = band_bytes as u64 * u64::from(bands);
    let mut offset = 0u64;
    let mut speed = 1u32;
    let mut clock = FrameClock::new(TARGET_FPS);

    while !ctx.should_close(window) {
        ctx.pump_events();

        while let Some(key) = ctx.poll_key() {
            info!("Key {} {}", key.keycode, if key.is_down { "down" } else { "up" });
            if !key.is_down {
                continue;
            }
            match key.keycode {
                KEY_UP => speed = (speed + 1).min(MAX_SPEED),
                KEY_DOWN => speed = speed.saturating_sub(1),
                _ => continue,
            }
            info!("Scroll speed: {} rows per frame", speed);
        }
        while let Some(mouse) = ctx.poll_mouse() {
            info!(
                "Mouse at ({:.1}, {:.1}) button {} down {} scroll ({:.1}, {:.1})",
                mouse.x, mouse.y, mouse.button, mouse.is_down, mouse.scroll_dx, mouse.scroll_dy
            );
        }

        ctx.present(window, offset);
        offset = (offset + row_bytes * u64::from(speed)) % total_bytes;

        let frame = clock.end_frame();
        if frame > clock.budget() * 2 {
            warn!("Slow frame: {:?}", frame);
        }
        if clock.frames().is_multiple_of(u64::from(TARGET_FPS) * 5) {
            info!("{:.1} fps", clock.average_fps());
        }
    }

    info!("Window closed after {} frames", clock.frames());
    ctx.destroy_window(window);
    Ok(())
}
