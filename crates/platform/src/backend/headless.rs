//! Display-less backend.
//!
//! Windows exist only as bookkeeping and a frame store; native events are
//! injected by the host (or a test) and the most recent redispatched events
//! are recorded so routing decisions can be observed.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::debug;

use bridge_core::{Error, Result};

use super::Platform;
use crate::event::{MouseButton, NativeEvent, WindowKey};
use crate::framebuffer::Framebuffer;
use crate::window::NativeWindow;

/// Last frame a headless window displayed, shared with whoever presents into it.
#[derive(Clone, Default)]
pub struct FrameStore(Arc<Mutex<Option<Framebuffer>>>);

impl FrameStore {
    /// Replaces the displayed frame.
    pub fn display(&self, frame: &Framebuffer) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_mut() {
            Some(current) if current.width() == frame.width() && current.height() == frame.height() => {
                current.clone_from(frame);
            }
            _ => *slot = Some(frame.clone()),
        }
    }

    /// Copy of the displayed frame, if anything was displayed yet.
    pub fn latest(&self) -> Option<Framebuffer> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl std::fmt::Debug for FrameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStore").finish_non_exhaustive()
    }
}

/// A window with no native surface.
#[derive(Debug)]
pub struct HeadlessWindow {
    key: WindowKey,
    title: String,
    width: u32,
    height: u32,
    scale: f32,
    frames: FrameStore,
    redraw_requests: Cell<u32>,
}

impl HeadlessWindow {
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Frame store this window displays from.
    pub fn frames(&self) -> &FrameStore {
        &self.frames
    }

    /// How many redraws were requested so far.
    pub fn redraw_requests(&self) -> u32 {
        self.redraw_requests.get()
    }
}

impl NativeWindow for HeadlessWindow {
    fn key(&self) -> WindowKey {
        self.key
    }

    fn scale_factor(&self) -> f32 {
        self.scale
    }

    fn inner_size(&self) -> (u32, u32) {
        (
            (self.width as f32 * self.scale).round() as u32,
            (self.height as f32 * self.scale).round() as u32,
        )
    }

    fn request_redraw(&self) {
        self.redraw_requests.set(self.redraw_requests.get() + 1);
    }

    fn set_scale_factor(&mut self, scale: f32) {
        self.scale = scale;
    }
}

impl HasWindowHandle for HeadlessWindow {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl HasDisplayHandle for HeadlessWindow {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

/// How many redispatched events a headless platform remembers.
pub const REDISPATCH_HISTORY: usize = 256;

/// Backend with injectable events and no display.
#[derive(Debug)]
pub struct HeadlessPlatform {
    next_key: u64,
    scale: f32,
    queued: VecDeque<NativeEvent>,
    redispatched: VecDeque<NativeEvent>,
    fail_next_create: bool,
}

impl HeadlessPlatform {
    /// Creates a backend whose windows report a scale factor of 1.0.
    pub fn new() -> Self {
        Self::with_scale_factor(1.0)
    }

    /// Creates a backend whose new windows report `scale`.
    pub fn with_scale_factor(scale: f32) -> Self {
        Self {
            next_key: 1,
            scale,
            queued: VecDeque::new(),
            redispatched: VecDeque::new(),
            fail_next_create: false,
        }
    }

    /// Queues a native event for the next pump.
    pub fn inject(&mut self, event: NativeEvent) {
        self.queued.push_back(event);
    }

    /// Queues a key transition.
    pub fn inject_key(&mut self, window: WindowKey, scancode: u16, pressed: bool) {
        self.inject(NativeEvent::Key {
            window,
            scancode,
            pressed,
            repeat: false,
        });
    }

    /// Queues a mouse button transition at (x, y).
    pub fn inject_button(
        &mut self,
        window: WindowKey,
        x: f32,
        y: f32,
        button: MouseButton,
        pressed: bool,
    ) {
        self.inject(NativeEvent::MouseButton {
            window,
            x,
            y,
            button,
            pressed,
        });
    }

    /// Queues a scroll tick at (x, y).
    pub fn inject_scroll(&mut self, window: WindowKey, x: f32, y: f32, dx: f32, dy: f32) {
        self.inject(NativeEvent::Scroll {
            window,
            x,
            y,
            dx,
            dy,
        });
    }

    /// Queues a close notification.
    pub fn inject_close(&mut self, window: WindowKey) {
        self.inject(NativeEvent::CloseRequested { window });
    }

    /// Queues a client-area resize to `width x height` physical pixels.
    pub fn inject_resize(&mut self, window: WindowKey, width: u32, height: u32) {
        self.inject(NativeEvent::Resized {
            window,
            width,
            height,
        });
    }

    /// The last [`REDISPATCH_HISTORY`] events handed back to the normal
    /// delivery path, oldest first.
    pub fn redispatched(&self) -> &VecDeque<NativeEvent> {
        &self.redispatched
    }

    /// Removes and returns the recorded redispatches.
    pub fn take_redispatched(&mut self) -> Vec<NativeEvent> {
        self.redispatched.drain(..).collect()
    }

    /// Native events not yet pumped.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Makes the next `create_window` fail, as an exhausted window server would.
    pub fn fail_next_create(&mut self) {
        self.fail_next_create = true;
    }
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HeadlessPlatform {
    type Window = HeadlessWindow;

    fn create_window(&mut self, width: u32, height: u32, title: &str) -> Result<HeadlessWindow> {
        if std::mem::take(&mut self.fail_next_create) {
            return Err(Error::Window("window server refused the window".to_string()));
        }

        let key = WindowKey(self.next_key);
        self.next_key += 1;
        debug!("Headless window {:?} created: {}x{}", key, width, height);

        Ok(HeadlessWindow {
            key,
            title: title.to_string(),
            width,
            height,
            scale: self.scale,
            frames: FrameStore::default(),
            redraw_requests: Cell::new(0),
        })
    }

    fn drain_events(&mut self, out: &mut Vec<NativeEvent>) {
        out.extend(self.queued.drain(..));
    }

    fn redispatch(&mut self, event: &NativeEvent) {
        if self.redispatched.len() == REDISPATCH_HISTORY {
            self.redispatched.pop_front();
        }
        self.redispatched.push_back(event.clone());
    }
}
