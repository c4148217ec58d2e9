//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader module or entry point error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A fence was not signaled within the configured bound
    #[error("Fence wait timed out after {0} ns")]
    FenceTimeout(u64),

    /// Host memory could not be imported without a copy
    #[error("Host import error: {0}")]
    HostImportError(String),
}

impl RhiError {
    /// True when the failure means "no usable Vulkan here" rather than a bug.
    ///
    /// Tests use this to skip on machines without a GPU or loader.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RhiError::LoadingError(_)
                | RhiError::NoSuitableGpu
                | RhiError::VulkanError(ash::vk::Result::ERROR_INCOMPATIBLE_DRIVER)
                | RhiError::VulkanError(ash::vk::Result::ERROR_INITIALIZATION_FAILED)
        )
    }
}

impl From<RhiError> for bridge_core::Error {
    fn from(err: RhiError) -> Self {
        match err {
            RhiError::InvalidHandle(msg) => bridge_core::Error::Internal(msg),
            other => bridge_core::Error::Vulkan(other.to_string()),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
