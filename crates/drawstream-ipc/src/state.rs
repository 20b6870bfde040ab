//! Capture session state machine types.

use serde::{Deserialize, Serialize};

/// The state of the single capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session; nothing acquired.
    #[default]
    Idle,

    /// Pipeline is hot, the visible pre-roll countdown is running.
    CountingDown {
        /// Value currently shown to the user.
        remaining: u8,
    },

    /// Encoder and frame clock are running.
    Recording,

    /// Stop requested, waiting for the encoder to flush.
    Finalizing,
}

impl SessionState {
    /// Returns true if no session exists.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true during the pre-roll countdown.
    pub fn is_counting_down(&self) -> bool {
        matches!(self, Self::CountingDown { .. })
    }

    /// Returns true while frames are being recorded.
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    /// Returns true while the encoder is flushing.
    pub fn is_finalizing(&self) -> bool {
        matches!(self, Self::Finalizing)
    }

    /// Countdown value for UI display, if counting down.
    pub fn countdown(&self) -> Option<u8> {
        match self {
            Self::CountingDown { remaining } => Some(*remaining),
            _ => None,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::CountingDown { .. } => "CountingDown",
            Self::Recording => "Recording",
            Self::Finalizing => "Finalizing",
        }
    }
}

/// Resource acquisition phases run before the countdown, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquirePhase {
    /// Opening the microphone stream.
    AcquireMicrophone,

    /// Tapping the main video's own audio.
    TapSourceAudio,

    /// Creating the audio engine and wiring the mix graph.
    BuildAudioGraph,

    /// Tapping the composited canvas as a live pixel stream.
    OpenCanvasStream,

    /// Negotiating a container and creating the encoder.
    CreateEncoder,
}

impl AcquirePhase {
    /// First phase of every session.
    pub const FIRST: Self = Self::AcquireMicrophone;

    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::AcquireMicrophone => Some(Self::TapSourceAudio),
            Self::TapSourceAudio => Some(Self::BuildAudioGraph),
            Self::BuildAudioGraph => Some(Self::OpenCanvasStream),
            Self::OpenCanvasStream => Some(Self::CreateEncoder),
            Self::CreateEncoder => None,
        }
    }

    /// Returns the previous phase, if any (for rollback).
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::AcquireMicrophone => None,
            Self::TapSourceAudio => Some(Self::AcquireMicrophone),
            Self::BuildAudioGraph => Some(Self::TapSourceAudio),
            Self::OpenCanvasStream => Some(Self::BuildAudioGraph),
            Self::CreateEncoder => Some(Self::OpenCanvasStream),
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::AcquireMicrophone => "Opening microphone",
            Self::TapSourceAudio => "Tapping video audio",
            Self::BuildAudioGraph => "Building audio graph",
            Self::OpenCanvasStream => "Opening canvas stream",
            Self::CreateEncoder => "Creating encoder",
        }
    }
}

/// Reason a recording ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// User requested stop.
    UserRequested,

    /// Encoder failed mid-recording; whatever was captured is kept.
    EncoderError { message: String },

    /// Recorder is shutting down.
    Shutdown,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Recording stopped by user".to_string(),
            Self::EncoderError { message } => format!("Encoder error: {message}"),
            Self::Shutdown => "Recorder shutting down".to_string(),
        }
    }
}
