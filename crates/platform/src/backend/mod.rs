//! Window backends.
//!
//! [`Platform`] is the seam between the bridge and the OS: it creates windows
//! and hands over whatever native events are queued right now. Two backends
//! ship with the crate:
//! - [`DesktopPlatform`]: real windows through winit
//! - [`HeadlessPlatform`]: no display; events are injected and frames are kept in memory

mod desktop;
mod headless;

pub use desktop::{DesktopPlatform, DesktopWindow};
pub use headless::{FrameStore, HeadlessPlatform, HeadlessWindow};

use bridge_core::Result;

use crate::event::NativeEvent;
use crate::window::NativeWindow;

/// Native event source and window factory.
pub trait Platform {
    type Window: NativeWindow;

    /// Creates, shows, and focuses a window with the given client-area size.
    fn create_window(&mut self, width: u32, height: u32, title: &str) -> Result<Self::Window>;

    /// Appends every currently queued native event to `out`. Never blocks.
    fn drain_events(&mut self, out: &mut Vec<NativeEvent>);

    /// Hands an event back to the OS's normal delivery path.
    fn redispatch(&mut self, event: &NativeEvent);
}
