//! Backend-neutral native events and the typed events handed to the caller.

/// Identifies the native window an event belongs to.
///
/// This is the backend's own window identity, not a bridge [`Handle`](bridge_core::Handle);
/// the registry maps one to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowKey(pub u64);

/// Mouse button identifiers as seen across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
    Other(u16),
}

impl MouseButton {
    /// Returns the boundary button id: left 0, right 1, middle 2, back 3,
    /// forward 4, anything else its own number saturated to `u8`.
    pub fn id(self) -> u8 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Right => 1,
            MouseButton::Middle => 2,
            MouseButton::Back => 3,
            MouseButton::Forward => 4,
            MouseButton::Other(n) => u8::try_from(n).unwrap_or(u8::MAX),
        }
    }
}

impl From<winit::event::MouseButton> for MouseButton {
    fn from(button: winit::event::MouseButton) -> Self {
        match button {
            winit::event::MouseButton::Left => MouseButton::Left,
            winit::event::MouseButton::Right => MouseButton::Right,
            winit::event::MouseButton::Middle => MouseButton::Middle,
            winit::event::MouseButton::Back => MouseButton::Back,
            winit::event::MouseButton::Forward => MouseButton::Forward,
            winit::event::MouseButton::Other(n) => MouseButton::Other(n),
        }
    }
}

/// One native event, already reduced to what the demultiplexer needs.
///
/// Coordinates are window-local logical points with a top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    Key {
        window: WindowKey,
        scancode: u16,
        pressed: bool,
        repeat: bool,
    },
    MouseButton {
        window: WindowKey,
        x: f32,
        y: f32,
        button: MouseButton,
        pressed: bool,
    },
    Scroll {
        window: WindowKey,
        x: f32,
        y: f32,
        dx: f32,
        dy: f32,
    },
    CloseRequested {
        window: WindowKey,
    },
    ScaleFactorChanged {
        window: WindowKey,
        scale: f32,
    },
    /// New client-area size in physical pixels.
    Resized {
        window: WindowKey,
        width: u32,
        height: u32,
    },
    /// Anything the bridge does not route (cursor motion, focus, ...).
    Other,
}

/// A key transition, as polled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Platform-native scancode.
    pub keycode: u16,
    pub is_down: bool,
}

/// A mouse button transition or a scroll tick, as polled by the caller.
///
/// Button and scroll payloads are mutually exclusive: scroll events carry
/// `button == 0` and `is_down == false`, button events carry zero deltas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseEvent {
    pub x: f32,
    pub y: f32,
    pub scroll_dx: f32,
    pub scroll_dy: f32,
    pub button: u8,
    pub is_down: bool,
}

impl MouseEvent {
    /// Builds a button transition event.
    pub fn button(x: f32, y: f32, button: MouseButton, is_down: bool) -> Self {
        Self {
            x,
            y,
            scroll_dx: 0.0,
            scroll_dy: 0.0,
            button: button.id(),
            is_down,
        }
    }

    /// Builds a scroll event.
    pub fn scroll(x: f32, y: f32, dx: f32, dy: f32) -> Self {
        Self {
            x,
            y,
            scroll_dx: dx,
            scroll_dy: dy,
            button: 0,
            is_down: false,
        }
    }

    /// True for scroll ticks.
    pub fn is_scroll(&self) -> bool {
        self.scroll_dx != 0.0 || self.scroll_dy != 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_ids() {
        assert_eq!(MouseButton::Left.id(), 0);
        assert_eq!(MouseButton::Right.id(), 1);
        assert_eq!(MouseButton::Middle.id(), 2);
        assert_eq!(MouseButton::Back.id(), 3);
        assert_eq!(MouseButton::Forward.id(), 4);
        assert_eq!(MouseButton::Other(9).id(), 9);
        assert_eq!(MouseButton::Other(4000).id(), u8::MAX);
    }

    #[test]
    fn test_from_winit_button() {
        assert_eq!(
            MouseButton::from(winit::event::MouseButton::Right),
            MouseButton::Right
        );
        assert_eq!(
            MouseButton::from(winit::event::MouseButton::Other(7)),
            MouseButton::Other(7)
        );
    }

    #[test]
    fn test_scroll_payload_has_no_button() {
        let event = MouseEvent::scroll(10.0, 20.0, 0.0, -1.5);
        assert!(event.is_scroll());
        assert_eq!(event.button, 0);
        assert!(!event.is_down);
    }

    #[test]
    fn test_button_payload_has_no_scroll() {
        let event = MouseEvent::button(1.0, 2.0, MouseButton::Middle, true);
        assert!(!event.is_scroll());
        assert_eq!(event.button, 2);
        assert!(event.is_down);
    }
}
