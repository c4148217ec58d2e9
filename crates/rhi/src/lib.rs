//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance and device creation
//! - Window surfaces and swapchain management
//! - Command buffer recording
//! - Buffers, textures and zero-copy host memory import
//! - Pipeline creation
//! - Synchronization primitives
//! - The handle-based [`bridge::GraphicsDeviceBridge`]

mod error;

pub mod bridge;
pub mod buffer;
pub mod command;
pub mod device;
pub mod host_import;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
