//! Error types for the compositor.

use thiserror::Error;

/// Errors that can occur while building frames or canvases.
#[derive(Debug, Error)]
pub enum CompositorError {
    /// Pixel buffer does not match the declared dimensions.
    #[error("Frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    /// Canvas dimensions are zero or too large.
    #[error("Invalid canvas dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}
