//! Handle-to-window registry.
//!
//! The registry is the only owner of bridge windows. Every other component
//! reaches a window through a [`Handle`] the registry validates, so a stale or
//! foreign handle degrades to a fail-safe default instead of touching freed
//! state.
//!
//! # Example
//!
//! ```
//! use bridge_platform::{HandleRegistry, HeadlessPlatform};
//!
//! let mut platform = HeadlessPlatform::new();
//! let mut registry = HandleRegistry::new(3.0);
//!
//! let handle = registry.create_window(&mut platform, 640, 480, "demo");
//! assert!(!registry.should_close(handle));
//!
//! registry.destroy_window(handle);
//! registry.destroy_window(handle);
//! assert!(registry.should_close(handle));
//! assert_eq!(registry.scale_factor(handle), 3.0);
//! ```

use tracing::{debug, info, warn};

use bridge_core::{Handle, HandleTable};

use crate::backend::Platform;
use crate::event::WindowKey;
use crate::window::NativeWindow;

/// A registered window and its close flag.
#[derive(Debug)]
struct WindowEntry<W> {
    window: W,
    should_close: bool,
}

/// Owns every live bridge window.
pub struct HandleRegistry<W: NativeWindow> {
    windows: HandleTable<WindowEntry<W>>,
    default_scale: f32,
}

impl<W: NativeWindow> HandleRegistry<W> {
    /// Creates an empty registry. `default_scale` is reported for unknown handles.
    pub fn new(default_scale: f32) -> Self {
        Self {
            windows: HandleTable::new(),
            default_scale,
        }
    }

    /// Creates, shows, and registers a window.
    ///
    /// Returns [`Handle::NULL`] if either dimension is zero or the backend
    /// cannot create the window.
    pub fn create_window<P>(&mut self, platform: &mut P, width: u32, height: u32, title: &str) -> Handle
    where
        P: Platform<Window = W>,
    {
        if width == 0 || height == 0 {
            warn!("Refusing to create a {}x{} window", width, height);
            return Handle::NULL;
        }

        match platform.create_window(width, height, title) {
            Ok(window) => {
                let handle = self.windows.insert(WindowEntry {
                    window,
                    should_close: false,
                });
                info!("Registered window {:?} ({:?})", handle, title);
                handle
            }
            Err(e) => {
                warn!("Window creation failed: {}", e);
                Handle::NULL
            }
        }
    }

    /// Unregisters and releases a window. Unknown, null, or already destroyed
    /// handles are ignored. Returns true if a window was released.
    pub fn destroy_window(&mut self, handle: Handle) -> bool {
        match self.windows.remove(handle) {
            Some(entry) => {
                debug!("Destroyed window {:?} ({:?})", handle, entry.window.key());
                true
            }
            None => {
                debug!("destroy_window on unknown handle {:?}", handle);
                false
            }
        }
    }

    /// The window's close flag, or true for a handle that does not resolve.
    pub fn should_close(&self, handle: Handle) -> bool {
        self.windows
            .get(handle)
            .is_none_or(|entry| entry.should_close)
    }

    /// The window's backing scale, or the configured default for unknown handles.
    pub fn scale_factor(&self, handle: Handle) -> f32 {
        self.windows
            .get(handle)
            .map(|entry| entry.window.scale_factor())
            .filter(|scale| scale.is_finite() && *scale > 0.0)
            .unwrap_or(self.default_scale)
    }

    /// Flips the close flag of the window behind `key`. Returns false for
    /// windows the registry does not own.
    pub fn mark_close_requested(&mut self, key: WindowKey) -> bool {
        let Some(handle) = self.find_by_key(key) else {
            return false;
        };
        if let Some(entry) = self.windows.get_mut(handle) {
            if !entry.should_close {
                info!("Close requested for window {:?}", handle);
            }
            entry.should_close = true;
        }
        true
    }

    /// Forwards a backend-reported scale change to the window behind `key`.
    pub fn update_scale_factor(&mut self, key: WindowKey, scale: f32) -> bool {
        let Some(handle) = self.find_by_key(key) else {
            return false;
        };
        if let Some(entry) = self.windows.get_mut(handle) {
            entry.window.set_scale_factor(scale);
            debug!("Window {:?} scale factor now {}", handle, scale);
        }
        true
    }

    /// Finds the handle for a backend window identity.
    pub fn find_by_key(&self, key: WindowKey) -> Option<Handle> {
        self.windows
            .iter()
            .find(|(_, entry)| entry.window.key() == key)
            .map(|(handle, _)| handle)
    }

    pub fn get(&self, handle: Handle) -> Option<&W> {
        self.windows.get(handle).map(|entry| &entry.window)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut W> {
        self.windows.get_mut(handle).map(|entry| &mut entry.window)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.windows.contains(handle)
    }

    /// Handles of every live window.
    pub fn handles(&self) -> Vec<Handle> {
        self.windows.iter().map(|(handle, _)| handle).collect()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Releases every window. Returns how many were live.
    pub fn clear(&mut self) -> usize {
        let released = self.windows.drain().len();
        if released > 0 {
            info!("Released {} window(s)", released);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessPlatform, HeadlessWindow};

    fn setup() -> (HeadlessPlatform, HandleRegistry<HeadlessWindow>) {
        (HeadlessPlatform::with_scale_factor(2.0), HandleRegistry::new(3.0))
    }

    #[test]
    fn test_new_window_is_open() {
        let (mut platform, mut registry) = setup();
        let handle = registry.create_window(&mut platform, 320, 240, "open");
        assert!(handle.is_valid());
        assert!(!registry.should_close(handle));
        assert_eq!(registry.scale_factor(handle), 2.0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let (mut platform, mut registry) = setup();
        assert_eq!(registry.create_window(&mut platform, 0, 10, "x"), Handle::NULL);
        assert_eq!(registry.create_window(&mut platform, 10, 0, "x"), Handle::NULL);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_backend_failure_returns_null() {
        let (mut platform, mut registry) = setup();
        platform.fail_next_create();
        assert_eq!(registry.create_window(&mut platform, 10, 10, "x"), Handle::NULL);
    }

    #[test]
    fn test_unknown_handle_defaults() {
        let (_, registry) = setup();
        assert!(registry.should_close(Handle::NULL));
        assert!(registry.should_close(Handle::from_raw(0x0000_0001_0000_0007)));
        assert_eq!(registry.scale_factor(Handle::NULL), 3.0);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (mut platform, mut registry) = setup();
        let handle = registry.create_window(&mut platform, 10, 10, "x");
        assert!(registry.destroy_window(handle));
        assert!(!registry.destroy_window(handle));
        assert!(!registry.destroy_window(Handle::NULL));
        assert!(registry.should_close(handle));
        assert_eq!(registry.scale_factor(handle), 3.0);
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let (mut platform, mut registry) = setup();
        let old = registry.create_window(&mut platform, 10, 10, "old");
        registry.destroy_window(old);
        let new = registry.create_window(&mut platform, 10, 10, "new");

        assert!(registry.get(old).is_none());
        assert_eq!(registry.get(new).map(|w| w.title()), Some("new"));
        assert!(!registry.destroy_window(old));
        assert!(registry.contains(new));
    }

    #[test]
    fn test_close_request_only_flips_flag() {
        let (mut platform, mut registry) = setup();
        let handle = registry.create_window(&mut platform, 10, 10, "x");
        let key = registry.get(handle).unwrap().key();

        assert!(registry.mark_close_requested(key));
        assert!(registry.should_close(handle));
        assert!(registry.contains(handle));
        assert!(!registry.mark_close_requested(WindowKey(999)));
    }

    #[test]
    fn test_scale_update() {
        let (mut platform, mut registry) = setup();
        let handle = registry.create_window(&mut platform, 10, 10, "x");
        let key = registry.get(handle).unwrap().key();
        assert!(registry.update_scale_factor(key, 1.5));
        assert_eq!(registry.scale_factor(handle), 1.5);
    }

    #[test]
    fn test_clear_releases_all() {
        let (mut platform, mut registry) = setup();
        let a = registry.create_window(&mut platform, 10, 10, "a");
        let b = registry.create_window(&mut platform, 10, 10, "b");
        assert_eq!(registry.handles().len(), 2);
        assert_eq!(registry.clear(), 2);
        assert!(registry.should_close(a));
        assert!(registry.should_close(b));
    }
}
