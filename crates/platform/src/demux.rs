//! Event demultiplexer.
//!
//! One [`EventDemultiplexer::pump`] drains whatever native events are queued and
//! sorts them into two independent FIFOs, one for keys and one for mouse
//! buttons and scroll ticks. The caller then drains each FIFO one item per
//! poll call.
//!
//! Routing rules:
//! - key transitions are queued and consumed (never handed back to the OS)
//! - mouse buttons and scroll ticks are queued and also redispatched, so window
//!   chrome keeps its standard mouse handling
//! - close and scale notifications update the registry and are not queued
//! - resizes of known windows are collected once per window until
//!   [`EventDemultiplexer::take_resized`] hands them to the presenters
//! - everything else is dropped
//!
//! Queues are unbounded. A caller that pumps without polling grows them
//! without limit; nothing here applies backpressure.

use std::collections::VecDeque;

use bridge_core::Handle;
use tracing::trace;

use crate::backend::Platform;
use crate::event::{KeyEvent, MouseEvent, NativeEvent};
use crate::registry::HandleRegistry;

/// What the demultiplexer did with one native event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Queued; the OS never sees it again.
    Consumed,
    /// Queued and handed back to the OS.
    Redispatched,
    /// Applied to window state, not queued.
    Applied,
    /// Not something the bridge routes.
    Dropped,
}

/// Counts from one pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub keys: usize,
    pub mice: usize,
    pub applied: usize,
    pub dropped: usize,
}

/// Two FIFO queues fed from the native event stream.
#[derive(Debug, Default)]
pub struct EventDemultiplexer {
    keys: VecDeque<KeyEvent>,
    mice: VecDeque<MouseEvent>,
    resized: Vec<Handle>,
    scratch: Vec<crate::event::NativeEvent>,
}

impl EventDemultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the platform's currently queued events into the FIFOs.
    pub fn pump<P: Platform>(
        &mut self,
        platform: &mut P,
        registry: &mut HandleRegistry<P::Window>,
    ) -> PumpStats {
        let mut events = std::mem::take(&mut self.scratch);
        platform.drain_events(&mut events);

        let mut stats = PumpStats::default();
        for event in events.drain(..) {
            match self.route(&event, registry) {
                Routing::Consumed => stats.keys += 1,
                Routing::Redispatched => {
                    stats.mice += 1;
                    platform.redispatch(&event);
                }
                Routing::Applied => stats.applied += 1,
                Routing::Dropped => stats.dropped += 1,
            }
        }

        self.scratch = events;
        if stats != PumpStats::default() {
            trace!("Pump: {:?}", stats);
        }
        stats
    }

    /// Classifies one event and queues it if it belongs in a FIFO.
    pub fn route<W: crate::window::NativeWindow>(
        &mut self,
        event: &NativeEvent,
        registry: &mut HandleRegistry<W>,
    ) -> Routing {
        match *event {
            NativeEvent::Key {
                scancode, pressed, ..
            } => {
                self.keys.push_back(KeyEvent {
                    keycode: scancode,
                    is_down: pressed,
                });
                Routing::Consumed
            }
            NativeEvent::MouseButton {
                x,
                y,
                button,
                pressed,
                ..
            } => {
                self.mice.push_back(MouseEvent::button(x, y, button, pressed));
                Routing::Redispatched
            }
            NativeEvent::Scroll { x, y, dx, dy, .. } => {
                if dx == 0.0 && dy == 0.0 {
                    // A zero tick carries no information and would read as a button event.
                    return Routing::Dropped;
                }
                self.mice.push_back(MouseEvent::scroll(x, y, dx, dy));
                Routing::Redispatched
            }
            NativeEvent::CloseRequested { window } => {
                if registry.mark_close_requested(window) {
                    Routing::Applied
                } else {
                    Routing::Dropped
                }
            }
            NativeEvent::ScaleFactorChanged { window, scale } => {
                if registry.update_scale_factor(window, scale) {
                    Routing::Applied
                } else {
                    Routing::Dropped
                }
            }
            NativeEvent::Resized {
                window,
                width,
                height,
            } => match registry.find_by_key(window) {
                Some(handle) => {
                    trace!("Window {:?} resized to {}x{}", handle, width, height);
                    if !self.resized.contains(&handle) {
                        self.resized.push(handle);
                    }
                    Routing::Applied
                }
                None => Routing::Dropped,
            },
            NativeEvent::Other => Routing::Dropped,
        }
    }

    /// Removes and returns the windows resized since the last call, each once.
    pub fn take_resized(&mut self) -> Vec<Handle> {
        std::mem::take(&mut self.resized)
    }

    /// Removes and returns the oldest key event.
    pub fn poll_key(&mut self) -> Option<KeyEvent> {
        self.keys.pop_front()
    }

    /// Removes and returns the oldest mouse event.
    pub fn poll_mouse(&mut self) -> Option<MouseEvent> {
        self.mice.pop_front()
    }

    pub fn pending_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn pending_mice(&self) -> usize {
        self.mice.len()
    }

    /// Drops everything queued.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.mice.clear();
        self.resized.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessPlatform, HeadlessWindow};
    use crate::event::{MouseButton, WindowKey};
    use crate::window::NativeWindow;

    fn setup() -> (
        HeadlessPlatform,
        HandleRegistry<HeadlessWindow>,
        EventDemultiplexer,
        Handle,
        WindowKey,
    ) {
        let mut platform = HeadlessPlatform::new();
        let mut registry = HandleRegistry::new(3.0);
        let handle = registry.create_window(&mut platform, 100, 100, "events");
        let key = registry.get(handle).unwrap().key();
        (platform, registry, EventDemultiplexer::new(), handle, key)
    }

    #[test]
    fn test_empty_polls() {
        let mut demux = EventDemultiplexer::new();
        assert_eq!(demux.poll_key(), None);
        assert_eq!(demux.poll_mouse(), None);
    }

    #[test]
    fn test_keys_fifo_and_consumed() {
        let (mut platform, mut registry, mut demux, _, key) = setup();
        for code in [12u16, 7, 40, 3] {
            platform.inject_key(key, code, true);
        }

        let stats = demux.pump(&mut platform, &mut registry);
        assert_eq!(stats.keys, 4);
        assert!(platform.redispatched().is_empty());

        let polled: Vec<u16> = std::iter::from_fn(|| demux.poll_key())
            .map(|event| event.keycode)
            .collect();
        assert_eq!(polled, vec![12, 7, 40, 3]);
        assert_eq!(demux.poll_key(), None);
    }

    #[test]
    fn test_key_up_reports_not_down() {
        let (mut platform, mut registry, mut demux, _, key) = setup();
        platform.inject_key(key, 5, true);
        platform.inject_key(key, 5, false);
        demux.pump(&mut platform, &mut registry);

        assert_eq!(
            demux.poll_key(),
            Some(KeyEvent {
                keycode: 5,
                is_down: true
            })
        );
        assert_eq!(
            demux.poll_key(),
            Some(KeyEvent {
                keycode: 5,
                is_down: false
            })
        );
    }

    #[test]
    fn test_repeats_are_kept() {
        let (mut platform, mut registry, mut demux, _, key) = setup();
        for _ in 0..3 {
            platform.inject(NativeEvent::Key {
                window: key,
                scancode: 30,
                pressed: true,
                repeat: true,
            });
        }
        demux.pump(&mut platform, &mut registry);
        assert_eq!(demux.pending_keys(), 3);
    }

    #[test]
    fn test_mouse_events_queued_and_redispatched() {
        let (mut platform, mut registry, mut demux, _, key) = setup();
        platform.inject_button(key, 10.0, 20.0, MouseButton::Right, true);
        platform.inject_scroll(key, 11.0, 21.0, 0.0, -3.0);

        let stats = demux.pump(&mut platform, &mut registry);
        assert_eq!(stats.mice, 2);
        assert_eq!(platform.redispatched().len(), 2);

        let button = demux.poll_mouse().unwrap();
        assert_eq!((button.x, button.y), (10.0, 20.0));
        assert_eq!(button.button, 1);
        assert!(button.is_down);
        assert_eq!((button.scroll_dx, button.scroll_dy), (0.0, 0.0));

        let scroll = demux.poll_mouse().unwrap();
        assert_eq!(scroll.scroll_dy, -3.0);
        assert_eq!(scroll.button, 0);
        assert!(!scroll.is_down);
    }

    #[test]
    fn test_key_and_mouse_queues_are_independent() {
        let (mut platform, mut registry, mut demux, _, key) = setup();
        platform.inject_button(key, 0.0, 0.0, MouseButton::Left, true);
        platform.inject_key(key, 1, true);
        platform.inject_button(key, 0.0, 0.0, MouseButton::Left, false);
        demux.pump(&mut platform, &mut registry);

        assert_eq!(demux.poll_key().map(|e| e.keycode), Some(1));
        assert_eq!(demux.poll_mouse().map(|e| e.is_down), Some(true));
        assert_eq!(demux.poll_mouse().map(|e| e.is_down), Some(false));
    }

    #[test]
    fn test_close_notification_flips_flag_only() {
        let (mut platform, mut registry, mut demux, handle, key) = setup();
        platform.inject_close(key);
        let stats = demux.pump(&mut platform, &mut registry);

        assert_eq!(stats.applied, 1);
        assert!(registry.should_close(handle));
        assert!(registry.contains(handle));
        assert_eq!(demux.pending_keys() + demux.pending_mice(), 0);
    }

    #[test]
    fn test_unhandled_and_foreign_events_dropped() {
        let (mut platform, mut registry, mut demux, _, _) = setup();
        platform.inject(NativeEvent::Other);
        platform.inject_close(WindowKey(4242));
        platform.inject_scroll(WindowKey(1), 0.0, 0.0, 0.0, 0.0);

        let stats = demux.pump(&mut platform, &mut registry);
        assert_eq!(stats.dropped, 3);
        assert!(platform.redispatched().is_empty());
    }

    #[test]
    fn test_resizes_collected_once_per_window() {
        let (mut platform, mut registry, mut demux, handle, key) = setup();
        platform.inject_resize(key, 200, 150);
        platform.inject_resize(key, 320, 240);
        platform.inject_resize(WindowKey(4242), 10, 10);

        let stats = demux.pump(&mut platform, &mut registry);
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(demux.pending_keys() + demux.pending_mice(), 0);
        assert!(platform.redispatched().is_empty());

        assert_eq!(demux.take_resized(), vec![handle]);
        assert!(demux.take_resized().is_empty());
    }

    #[test]
    fn test_pump_with_nothing_queued_returns_immediately() {
        let (mut platform, mut registry, mut demux, _, _) = setup();
        assert_eq!(demux.pump(&mut platform, &mut registry), PumpStats::default());
    }

    #[test]
    fn test_clear() {
        let (mut platform, mut registry, mut demux, _, key) = setup();
        platform.inject_key(key, 1, true);
        platform.inject_button(key, 0.0, 0.0, MouseButton::Left, true);
        demux.pump(&mut platform, &mut registry);
        demux.clear();
        assert_eq!(demux.poll_key(), None);
        assert_eq!(demux.poll_mouse(), None);
    }
}
