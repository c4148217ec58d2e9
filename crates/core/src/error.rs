//! Error types for the presentation bridge.

use thiserror::Error;

/// Main error type for the bridge.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// No display system is reachable from this process
    #[error("Display unavailable: {0}")]
    DisplayUnavailable(String),

    /// Unknown, null, or stale handle
    #[error("Invalid handle: {0:#x}")]
    InvalidHandle(u64),

    /// A caller-side contract was broken at the boundary
    #[error("Contract violation: {0}")]
    Contract(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the bridge's Error type.
pub type Result<T> = std::result::Result<T, Error>;
