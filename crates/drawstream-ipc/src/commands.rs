//! Commands sent from the UI to the recorder.

use serde::{Deserialize, Serialize};

use crate::types::RecordingConfig;

/// Commands that the UI can send to the recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecorderCommand {
    /// Start a capture session. Ignored unless the recorder is idle.
    StartRecording { config: RecordingConfig },

    /// Stop the running recording and finalize the artifact.
    StopRecording,

    /// Request current session state.
    GetState,

    /// Finalize any active session and shut the recorder down.
    Shutdown,
}
