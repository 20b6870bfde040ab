//! Audio inputs, dynamics compression and mixing.
//!
//! Two live sources feed the recording: the audio track of the video being
//! annotated and the user's microphone. Both arrive as [`AudioInput`]s,
//! are wired into an [`AudioGraph`] and mixed by an [`AudioEngine`] into
//! one stereo track for the encoder.

mod compressor;
mod engine;
mod error;
mod input;
mod mixer;

pub use compressor::{Compressor, CompressorSettings};
pub use engine::{AudioEngine, AudioGraph, EngineState};
pub use error::AudioError;
pub use input::{
    AudioChunk, AudioInput, AudioNode, AudioOutput, AudioSourceKind, MediaDevices, MediaTrack,
    MicConstraints, SourceAudio, TrackHandle,
};
pub use mixer::{soft_clip, MixedAudioChunk};

/// Channel capacity for audio chunks from a single input.
pub const AUDIO_CHANNEL_CAPACITY: usize = 8;

/// Channel capacity for mixed chunks waiting for the encoder.
pub const MIXED_CHANNEL_CAPACITY: usize = 64;

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48000;

/// Number of audio channels.
pub const CHANNELS: u16 = 2;

/// Samples per audio chunk (10ms at 48kHz).
pub const SAMPLES_PER_CHUNK: usize = 480;

/// Encode interleaved samples as little-endian f32 bytes.
pub(crate) fn samples_to_bytes(samples: &[f32]) -> bytes::Bytes {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    bytes::Bytes::from(out)
}

/// Decode little-endian f32 bytes. Trailing partial samples are ignored.
pub(crate) fn bytes_to_samples(data: &[u8]) -> impl Iterator<Item = f32> + '_ {
    data.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
