//! Error types for the audio module.

use thiserror::Error;

use crate::input::AudioSourceKind;

/// Errors that can occur during audio operations.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The user or platform refused access to the device.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Audio device not found.
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// The source video has no audio track to tap.
    #[error("Source audio unavailable: {0}")]
    SourceUnavailable(String),

    /// Engine already running.
    #[error("Audio engine already running")]
    AlreadyStarted,

    /// Engine has no graph connected.
    #[error("Audio engine has no graph connected")]
    NotConnected,

    /// Engine was closed and cannot be reused.
    #[error("Audio engine closed")]
    EngineClosed,

    /// An input stopped delivering during capture.
    #[error("Audio input lost: {}", .0.name())]
    DeviceLost(AudioSourceKind),

    /// Mixer error.
    #[error("Mixer error: {0}")]
    MixerError(String),
}
