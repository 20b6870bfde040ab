//! Capture session engine for DrawStream.
//!
//! This crate ties the compositor, the audio engine and the encoder into a
//! single recorder thread: phased resource acquisition, the pre-roll
//! countdown, the frame clock, and finalization of the artifact.

mod clock;
mod error;
mod recorder;
mod resources;
mod session;
mod stats;

#[cfg(test)]
mod testing;

pub use clock::FrameClock;
pub use error::EngineError;
pub use recorder::{Collaborators, Recorder};
pub use resources::{AcquireContext, AudioPump, ResourceManager};
pub use session::{is_valid_transition, Countdown, CountdownStep};
pub use stats::RecordingStats;

use crossbeam_channel::{Receiver, Sender};
use drawstream_ipc::{RecorderCommand, RecorderEvent};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Create a recorder wired to the given channels and collaborators.
pub fn create_recorder(
    command_rx: Receiver<RecorderCommand>,
    event_tx: Sender<RecorderEvent>,
    collaborators: Collaborators,
) -> EngineResult<Recorder> {
    Recorder::new(command_rx, event_tx, collaborators)
}
