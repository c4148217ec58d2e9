//! Platform layer for the presentation bridge.
//!
//! This crate provides:
//! - Window backends (winit desktop, headless) behind [`Platform`]
//! - The handle-to-window registry
//! - The event demultiplexer with its key and mouse FIFOs
//! - Owned frames for windows that display CPU-composited pixels

mod backend;
mod demux;
mod event;
mod framebuffer;
mod registry;
mod window;

pub use backend::{
    DesktopPlatform, DesktopWindow, FrameStore, HeadlessPlatform, HeadlessWindow, Platform,
};
pub use demux::{EventDemultiplexer, PumpStats, Routing};
pub use event::{KeyEvent, MouseButton, MouseEvent, NativeEvent, WindowKey};
pub use framebuffer::Framebuffer;
pub use registry::HandleRegistry;
pub use window::NativeWindow;

// Re-export raw-window-handle traits that surface creation needs
pub use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
