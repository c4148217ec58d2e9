//! The window contract shared by every backend.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::event::WindowKey;

/// A native window the registry can own.
///
/// Raw window and display handles are required so a Vulkan surface can be
/// created for presentation; windows with no native surface (headless) return
/// [`raw_window_handle::HandleError::Unavailable`] from both.
pub trait NativeWindow: HasWindowHandle + HasDisplayHandle {
    /// Backend identity used to route native events back to this window.
    fn key(&self) -> WindowKey;

    /// Display backing scale factor.
    fn scale_factor(&self) -> f32;

    /// Client-area size in physical pixels.
    fn inner_size(&self) -> (u32, u32);

    /// Asks the backend to schedule a redraw.
    fn request_redraw(&self);

    /// Records a backend-reported scale change. Backends that query the live
    /// value can ignore this.
    fn set_scale_factor(&mut self, _scale: f32) {}
}
