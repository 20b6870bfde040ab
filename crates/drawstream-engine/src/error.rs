//! Error types for the engine.

use thiserror::Error;

use drawstream_audio::AudioError;
use drawstream_compositor::CompositorError;
use drawstream_encoder::EncoderError;
use drawstream_ipc::AcquirePhase;

/// Errors that can occur while running a capture session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A resource acquisition phase failed; everything acquired was released.
    #[error("{} failed: {message}", phase.name())]
    Acquire {
        /// Phase that failed.
        phase: AcquirePhase,

        /// Underlying error message.
        message: String,
    },

    /// The audio engine could not be resumed or the encoder not started.
    #[error("Recording start failed: {0}")]
    StartFailed(String),

    /// Audio error.
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Encoder error.
    #[error(transparent)]
    Encoder(#[from] EncoderError),

    /// Compositor error.
    #[error(transparent)]
    Compositor(#[from] CompositorError),
}
