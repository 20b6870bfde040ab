//! Error types for the encoder module.

use drawstream_ipc::ContainerFormat;
use thiserror::Error;

/// Errors that can occur during encoding operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// No encoder program or library is usable.
    #[error("Encoder not available: {0}")]
    NotAvailable(String),

    /// None of the requested containers can be produced.
    #[error("No supported container among {0:?}")]
    NoSupportedFormat(Vec<ContainerFormat>),

    /// General initialization error.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// General encoding error.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// Encoder already started.
    #[error("Encoder already started")]
    AlreadyStarted,

    /// Media pushed while the encoder is inactive.
    #[error("Encoder is not recording")]
    NotRecording,

    /// Filesystem or pipe failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EncoderError {
    /// Returns true if the encoder can no longer produce output and the
    /// session has to be stopped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Encoding(_) | Self::Io(_))
    }
}
