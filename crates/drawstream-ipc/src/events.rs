//! Events sent from the recorder to the UI.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::RecordingArtifact;

/// Events that the recorder can send to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecorderEvent {
    /// Recorder is ready to accept commands.
    Ready,

    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: SessionState,

        /// Current state.
        current: SessionState,
    },

    /// Countdown value for the pre-roll overlay (0 is shown as "REC").
    Countdown(u8),

    /// Encoder and frame clock are running.
    RecordingStarted,

    /// Recoverable problem, e.g. microphone permission denied.
    Warning { message: String },

    /// Error occurred.
    Error {
        /// Whether the recorder can keep going.
        recoverable: bool,

        /// Error message.
        message: String,
    },

    /// The finished recording is available for download or preview.
    ArtifactReady(RecordingArtifact),

    /// Recorder has shut down.
    Shutdown,
}
