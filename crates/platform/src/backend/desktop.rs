//! winit-backed desktop windows.
//!
//! Events are pulled with `pump_app_events` and a zero timeout, so a pump
//! returns as soon as the OS queue is momentarily empty. The cursor position is
//! tracked per window here because winit reports it separately from button and
//! wheel events.
//!
//! winit allows one event loop per process. A dropped [`DesktopPlatform`]
//! parks its loop in a main-thread slot and the next one picks it up, so a
//! host can `deinit` and `init` again.

use std::cell::RefCell;
use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Weak};
use std::time::Duration;

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::{debug, info, trace};
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalPosition};
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::error::EventLoopError;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::platform::scancode::PhysicalKeyExtScancode;
use winit::window::{Window as WinitWindow, WindowAttributes, WindowId};

use bridge_core::{Error, Result};

use super::Platform;
use crate::event::{MouseButton, NativeEvent, WindowKey};
use crate::window::NativeWindow;

/// A desktop window owned by the bridge registry.
pub struct DesktopWindow {
    window: Arc<WinitWindow>,
}

impl DesktopWindow {
    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Shared handle for consumers that must own the window, such as a
    /// software-blit surface.
    pub fn shared(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }
}

impl NativeWindow for DesktopWindow {
    fn key(&self) -> WindowKey {
        WindowKey(u64::from(self.window.id()))
    }

    fn scale_factor(&self) -> f32 {
        self.window.scale_factor() as f32
    }

    fn inner_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl HasWindowHandle for DesktopWindow {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for DesktopWindow {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

/// Per-window state needed to translate pointer events.
#[derive(Debug, Clone)]
struct PointerState {
    cursor: PhysicalPosition<f64>,
    scale: f64,
    /// Entry is pruned once the registry drops the window.
    window: Weak<WinitWindow>,
}

impl PointerState {
    fn logical_cursor(&self) -> (f32, f32) {
        (
            (self.cursor.x / self.scale) as f32,
            (self.cursor.y / self.scale) as f32,
        )
    }
}

/// Drops pointer state of windows nobody owns any more.
fn prune_pointers(pointers: &mut HashMap<WindowId, PointerState>) {
    pointers.retain(|_, state| state.window.strong_count() > 0);
}

thread_local! {
    static PARKED_LOOP: RefCell<Option<EventLoop<()>>> = const { RefCell::new(None) };
}

/// Maps an event loop creation failure to the bridge error kinds.
///
/// Only a missing display is [`Error::DisplayUnavailable`]; a loop that
/// already exists elsewhere in the process is an internal error the host can
/// recover from.
fn event_loop_error(error: EventLoopError) -> Error {
    match error {
        EventLoopError::RecreationAttempt => Error::Internal(format!(
            "{} (another desktop context still owns the event loop)",
            error
        )),
        EventLoopError::ExitFailure(_) => Error::Internal(error.to_string()),
        other => Error::DisplayUnavailable(other.to_string()),
    }
}

/// Desktop platform backed by a winit event loop.
///
/// Must be created and used on the process main thread; winit refuses any other.
pub struct DesktopPlatform {
    // Parked again on drop.
    event_loop: ManuallyDrop<EventLoop<()>>,
    pointers: HashMap<WindowId, PointerState>,
}

impl DesktopPlatform {
    /// Connects to the display system, reusing the loop a previous platform
    /// parked on this thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DisplayUnavailable`] when no display server is reachable
    /// (for example no `DISPLAY` or `WAYLAND_DISPLAY` on Linux), and
    /// [`Error::Internal`] while another platform is alive.
    pub fn new() -> Result<Self> {
        let parked = PARKED_LOOP.with(|slot| slot.borrow_mut().take());
        let event_loop = match parked {
            Some(event_loop) => {
                debug!("Reusing parked event loop");
                event_loop
            }
            None => EventLoop::new().map_err(event_loop_error)?,
        };
        info!("Desktop platform connected to display");
        Ok(Self {
            event_loop: ManuallyDrop::new(event_loop),
            pointers: HashMap::new(),
        })
    }
}

impl Drop for DesktopPlatform {
    fn drop(&mut self) {
        // SAFETY: the field is never touched again after this take.
        let event_loop = unsafe { ManuallyDrop::take(&mut self.event_loop) };
        // During thread teardown the slot is gone and the loop drops here.
        let _ = PARKED_LOOP.try_with(move |slot| *slot.borrow_mut() = Some(event_loop));
        debug!("Event loop parked");
    }
}

impl Platform for DesktopPlatform {
    type Window = DesktopWindow;

    fn create_window(&mut self, width: u32, height: u32, title: &str) -> Result<DesktopWindow> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(LogicalSize::new(width, height))
            .with_visible(true)
            .with_active(true);

        // The pump-driven loop never hands out an ActiveEventLoop outside a callback.
        #[allow(deprecated)]
        let window = self
            .event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;
        window.focus_window();
        let window = Arc::new(window);

        prune_pointers(&mut self.pointers);
        self.pointers.insert(
            window.id(),
            PointerState {
                cursor: PhysicalPosition::new(0.0, 0.0),
                scale: window.scale_factor(),
                window: Arc::downgrade(&window),
            },
        );

        info!(
            "Window created: {}x{} (scale {})",
            width,
            height,
            window.scale_factor()
        );

        Ok(DesktopWindow { window })
    }

    fn drain_events(&mut self, out: &mut Vec<NativeEvent>) {
        prune_pointers(&mut self.pointers);
        let mut collector = EventCollector {
            out,
            pointers: &mut self.pointers,
        };
        if let PumpStatus::Exit(code) = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut collector)
        {
            debug!("Event loop reported exit with code {}", code);
        }
    }

    fn redispatch(&mut self, event: &NativeEvent) {
        // winit delivers a copy after the OS has already applied its default
        // handling (title bar drags, resize edges), so nothing is left to forward.
        trace!("Redispatch {:?}", event);
    }
}

/// Translates winit callbacks into [`NativeEvent`]s for one pump.
struct EventCollector<'a> {
    out: &'a mut Vec<NativeEvent>,
    pointers: &'a mut HashMap<WindowId, PointerState>,
}

impl ApplicationHandler for EventCollector<'_> {
    fn resumed(&mut self, _event_loop: &ActiveEventLoop) {}

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let window = WindowKey(u64::from(id));
        let pointer = self.pointers.get(&id).cloned().unwrap_or(PointerState {
            cursor: PhysicalPosition::new(0.0, 0.0),
            scale: 1.0,
            window: Weak::new(),
        });

        let native = match event {
            WindowEvent::KeyboardInput { event, .. } => {
                let Some(scancode) = event
                    .physical_key
                    .to_scancode()
                    .and_then(|code| u16::try_from(code).ok())
                else {
                    trace!("Dropping key without a 16-bit scancode: {:?}", event.physical_key);
                    return;
                };
                NativeEvent::Key {
                    window,
                    scancode,
                    pressed: event.state == ElementState::Pressed,
                    repeat: event.repeat,
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let (x, y) = pointer.logical_cursor();
                NativeEvent::MouseButton {
                    window,
                    x,
                    y,
                    button: MouseButton::from(button),
                    pressed: state == ElementState::Pressed,
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let (x, y) = pointer.logical_cursor();
                let (dx, dy) = match delta {
                    MouseScrollDelta::LineDelta(dx, dy) => (dx, dy),
                    MouseScrollDelta::PixelDelta(p) => {
                        ((p.x / pointer.scale) as f32, (p.y / pointer.scale) as f32)
                    }
                };
                NativeEvent::Scroll {
                    window,
                    x,
                    y,
                    dx,
                    dy,
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some(state) = self.pointers.get_mut(&id) {
                    state.cursor = position;
                }
                NativeEvent::Other
            }
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                if let Some(state) = self.pointers.get_mut(&id) {
                    state.scale = scale_factor;
                }
                NativeEvent::ScaleFactorChanged {
                    window,
                    scale: scale_factor as f32,
                }
            }
            WindowEvent::Resized(size) => NativeEvent::Resized {
                window,
                width: size.width,
                height: size.height,
            },
            WindowEvent::CloseRequested => NativeEvent::CloseRequested { window },
            WindowEvent::Destroyed => {
                self.pointers.remove(&id);
                NativeEvent::Other
            }
            _ => NativeEvent::Other,
        };

        self.out.push(native);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_cursor_divides_by_scale() {
        let state = PointerState {
            cursor: PhysicalPosition::new(300.0, 150.0),
            scale: 3.0,
            window: Weak::new(),
        };
        assert_eq!(state.logical_cursor(), (100.0, 50.0));
    }

    #[test]
    fn test_pointer_state_of_dropped_window_is_pruned() {
        let mut pointers = HashMap::new();
        pointers.insert(
            WindowId::from(7u64),
            PointerState {
                cursor: PhysicalPosition::new(1.0, 2.0),
                scale: 1.0,
                window: Weak::new(),
            },
        );
        prune_pointers(&mut pointers);
        assert!(pointers.is_empty());
    }

    #[test]
    fn test_event_loop_recreation_is_not_a_missing_display() {
        let err = event_loop_error(EventLoopError::RecreationAttempt);
        assert!(matches!(err, Error::Internal(_)));
        assert!(matches!(
            event_loop_error(EventLoopError::ExitFailure(1)),
            Error::Internal(_)
        ));
    }
}
