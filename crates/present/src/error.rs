//! Presentation error types.

use bridge_rhi::RhiError;
use thiserror::Error;

/// Errors raised while configuring or presenting a surface.
#[derive(Error, Debug)]
pub enum PresentError {
    /// GPU layer failure
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Platform or configuration failure
    #[error(transparent)]
    Core(#[from] bridge_core::Error),

    /// Buffer length matches neither the single-band nor the banded layout
    #[error(
        "Pixel buffer length {len} matches neither {expected_single} (one band) nor {expected_banded} (all bands)"
    )]
    LengthMismatch {
        len: usize,
        expected_single: usize,
        expected_banded: usize,
    },

    /// Zero or overflowing dimensions
    #[error("Invalid buffer size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    /// The window offers nothing to present into
    #[error("No presentation target for this window")]
    NoTarget,

    /// CPU frame sink failure (window system side)
    #[error("Frame sink error: {0}")]
    Sink(String),
}

impl From<PresentError> for bridge_core::Error {
    fn from(err: PresentError) -> Self {
        match err {
            PresentError::Core(inner) => inner,
            PresentError::Rhi(inner) => inner.into(),
            other @ (PresentError::LengthMismatch { .. } | PresentError::InvalidSize { .. }) => {
                bridge_core::Error::Contract(other.to_string())
            }
            other => bridge_core::Error::Internal(other.to_string()),
        }
    }
}

/// Result type alias for presentation operations.
pub type PresentResult<T> = std::result::Result<T, PresentError>;
