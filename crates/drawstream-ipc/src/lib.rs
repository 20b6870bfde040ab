//! Typed UI<->recorder messages for DrawStream.
//!
//! This crate defines the read-only frame snapshot the UI layer publishes,
//! the capture session state machine types, and the command/event messages
//! exchanged with the recorder.

mod commands;
mod events;
mod state;
mod types;

pub use commands::RecorderCommand;
pub use events::RecorderEvent;
pub use state::{AcquirePhase, SessionState, StopReason};
pub use types::{
    ArtifactInfo, ContainerFormat, FrameSnapshot, RecordingArtifact, RecordingConfig,
    VideoFormat, VideoLayout, ZoomTransform, DEFAULT_ZOOM_SCALE,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (UI → recorder).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (recorder → UI).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<RecorderCommand>, Receiver<RecorderCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<RecorderEvent>, Receiver<RecorderEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
