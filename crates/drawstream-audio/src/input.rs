//! Live audio inputs and the device collaborators that produce them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{bytes_to_samples, samples_to_bytes, AudioResult, CHANNELS};

/// Where an audio input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSourceKind {
    /// The soundtrack of the video being annotated.
    SourceVideo,

    /// The live microphone.
    Microphone,
}

impl AudioSourceKind {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SourceVideo => "source_video",
            Self::Microphone => "microphone",
        }
    }
}

/// One node of the mix graph, as wired for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioNode {
    /// Input feeding the node.
    pub source: AudioSourceKind,

    /// Whether the input passes through the compressor.
    pub enhancement: bool,
}

/// A block of interleaved f32 stereo samples from one input.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Little-endian f32 interleaved stereo.
    pub data: Bytes,

    /// Timestamp when this chunk was captured.
    pub timestamp: Instant,

    /// Monotonically increasing sequence number.
    pub sequence: u64,

    /// Source identifier.
    pub source: AudioSourceKind,
}

impl AudioChunk {
    /// Build a chunk from interleaved samples.
    pub fn from_samples(samples: &[f32], source: AudioSourceKind, sequence: u64) -> Self {
        Self {
            data: samples_to_bytes(samples),
            timestamp: Instant::now(),
            sequence,
            source,
        }
    }

    /// Get the number of sample frames in this chunk.
    pub fn sample_count(&self) -> usize {
        self.data.len() / (std::mem::size_of::<f32>() * CHANNELS as usize)
    }

    /// Iterate the interleaved samples.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        bytes_to_samples(&self.data)
    }
}

/// A live media track that must be stopped to release its device.
pub trait MediaTrack: Send {
    /// Stop the track. Must be idempotent.
    fn stop(&mut self);

    /// Whether the track is still delivering.
    fn is_live(&self) -> bool;
}

/// A track backed by a shared stop flag the producer polls.
#[derive(Debug, Clone, Default)]
pub struct TrackHandle {
    stopped: Arc<AtomicBool>,
}

impl TrackHandle {
    /// Create a live track.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`MediaTrack::stop`] has been called on any clone.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for TrackHandle {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        !self.is_stopped()
    }
}

/// A live audio input: a chunk stream plus the track that owns the device.
///
/// Dropping the input stops the track.
pub struct AudioInput {
    /// Where the samples come from.
    pub kind: AudioSourceKind,

    /// Incoming chunks.
    pub chunks: Receiver<AudioChunk>,

    track: Option<Box<dyn MediaTrack>>,
    stopped: bool,
}

impl AudioInput {
    /// Wrap a chunk stream and its track.
    pub fn new(
        kind: AudioSourceKind,
        chunks: Receiver<AudioChunk>,
        track: Box<dyn MediaTrack>,
    ) -> Self {
        Self {
            kind,
            chunks,
            track: Some(track),
            stopped: false,
        }
    }

    /// Detach the track so its owner controls when the device is released.
    /// The input keeps delivering chunks until the producer stops.
    pub fn take_track(&mut self) -> Option<Box<dyn MediaTrack>> {
        self.track.take()
    }

    /// Stop the underlying track, if still attached.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        if let Some(track) = self.track.as_mut() {
            debug!(source = self.kind.name(), "Stopping audio track");
            track.stop();
        }
        self.stopped = true;
    }

    /// Whether the track is still delivering.
    pub fn is_live(&self) -> bool {
        !self.stopped && self.track.as_ref().map_or(true, |t| t.is_live())
    }
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AudioInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioInput")
            .field("kind", &self.kind)
            .field("stopped", &self.stopped)
            .finish()
    }
}

/// Microphone request. Voice processing is always asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicConstraints {
    /// Exact device to open, or the default device.
    pub device_id: Option<String>,

    /// Echo cancellation.
    pub echo_cancellation: bool,

    /// Noise suppression.
    pub noise_suppression: bool,

    /// Automatic gain control.
    pub auto_gain_control: bool,
}

impl MicConstraints {
    /// Constraints for `device_id` with all voice processing on.
    pub fn for_device(device_id: Option<String>) -> Self {
        Self {
            device_id,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl Default for MicConstraints {
    fn default() -> Self {
        Self::for_device(None)
    }
}

/// Opens capture devices.
pub trait MediaDevices: Send {
    /// Open a microphone. Fails with [`crate::AudioError::PermissionDenied`]
    /// or [`crate::AudioError::DeviceNotFound`].
    fn open_microphone(&mut self, constraints: &MicConstraints) -> AudioResult<AudioInput>;
}

/// Taps the audio of the video being annotated.
pub trait SourceAudio: Send {
    /// Start delivering the source video's audio.
    fn tap(&mut self) -> AudioResult<AudioInput>;

    /// Where the tapped audio should keep playing locally, if anywhere.
    fn monitor_output(&mut self) -> Option<Box<dyn AudioOutput>> {
        None
    }
}

/// Local playback so the user keeps hearing the source video.
pub trait AudioOutput: Send {
    /// Play one chunk.
    fn play(&mut self, chunk: &AudioChunk);
}
