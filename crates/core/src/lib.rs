//! Core utilities for the presentation bridge.
//!
//! This crate provides foundational types used across the bridge:
//! - Error types and result aliases
//! - Logging initialization
//! - Configuration loading
//! - Generation-checked handles for objects crossing the boundary
//! - Frame pacing for host loops

mod clock;
mod config;
mod error;
mod handle;
mod logging;

pub use clock::FrameClock;
pub use config::{
    BridgeConfig, CONFIG_ENV, CONFIG_FILE_NAME, MAX_BAND_COUNT, PixelFormat, PresentStrategy,
};
pub use error::{Error, Result};
pub use handle::{Handle, HandleTable};
pub use logging::init_logging;
