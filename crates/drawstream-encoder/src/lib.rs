//! Encoding of the composited canvas and mixed audio into one container.
//!
//! The recorder talks to encoders through [`MediaEncoder`]: start, push
//! media, request a stop, then wait for [`EncoderEvent::Stopped`] on the
//! event channel. Data arrives as [`EncoderEvent::DataAvailable`] chunks
//! which [`ChunkCollector`] concatenates into the final artifact.

mod collector;
mod error;
mod ffmpeg;

pub use collector::ChunkCollector;
pub use error::EncoderError;
pub use ffmpeg::{parse_encoder_list, FfmpegBackend, FfmpegEncoder};

use bytes::Bytes;
use crossbeam_channel::Sender;
use tracing::{info, warn};

use drawstream_audio::{MixedAudioChunk, CHANNELS, SAMPLE_RATE};
use drawstream_compositor::CanvasFrame;
use drawstream_ipc::{ContainerFormat, RecordingConfig};

/// Channel capacity for encoder events.
pub const ENCODER_EVENT_CAPACITY: usize = 64;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Encoding configuration for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Output container and codecs.
    pub format: ContainerFormat,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Frames per second of the canvas stream.
    pub fps: u32,

    /// Video bitrate in bits per second.
    pub video_bitrate_bps: u32,

    /// Audio bitrate in bits per second.
    pub audio_bitrate_bps: u32,

    /// Sample rate of the mixed audio in Hz.
    pub sample_rate: u32,

    /// Number of mixed audio channels.
    pub channels: u16,
}

impl EncoderConfig {
    /// Configuration for a `width`×`height` canvas using the session's rates.
    pub fn from_recording(
        config: &RecordingConfig,
        format: ContainerFormat,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            format,
            width,
            height,
            fps: config.fps,
            video_bitrate_bps: config.video_bitrate_bps,
            audio_bitrate_bps: config.audio_bitrate_bps,
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        }
    }

    /// Reject configurations no encoder can honour.
    pub fn validate(&self) -> EncoderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EncoderError::InvalidInput(
                "width/height must be non-zero".into(),
            ));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(EncoderError::InvalidInput(
                "width/height must be even for 4:2:0 output".into(),
            ));
        }
        if self.fps == 0 {
            return Err(EncoderError::InvalidInput("fps must be non-zero".into()));
        }
        Ok(())
    }
}

/// Encoder lifecycle as reported to the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderState {
    /// Not started, or stopping/stopped.
    #[default]
    Inactive,

    /// Accepting media.
    Recording,

    /// Started but not accepting media.
    Paused,
}

impl EncoderState {
    /// Returns true while the encoder still wants frames.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Inactive)
    }

    /// Get a human-readable name for this state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Recording => "recording",
            Self::Paused => "paused",
        }
    }
}

/// Asynchronous notifications from a running encoder.
#[derive(Debug, Clone)]
pub enum EncoderEvent {
    /// A piece of the output file, in order.
    DataAvailable(Bytes),

    /// The encoder failed; a [`EncoderEvent::Stopped`] follows.
    Error(String),

    /// All data has been delivered. Always the last event.
    Stopped,
}

/// A running encoder for one session.
pub trait MediaEncoder: Send {
    /// Current lifecycle state.
    fn state(&self) -> EncoderState;

    /// Negotiated container.
    fn format(&self) -> ContainerFormat;

    /// Begin accepting media.
    fn start(&mut self) -> EncoderResult<()>;

    /// Append one composited frame.
    fn push_video(&mut self, frame: &CanvasFrame) -> EncoderResult<()>;

    /// Append one mixed audio chunk.
    fn push_audio(&mut self, chunk: &MixedAudioChunk) -> EncoderResult<()>;

    /// Stop accepting media. The state becomes inactive immediately; the
    /// remaining data and `Stopped` follow on the event channel.
    fn request_stop(&mut self) -> EncoderResult<()>;

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Creates encoders and reports which containers it can produce.
pub trait EncoderBackend: Send {
    /// Get backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Whether `format` can be produced.
    fn supports(&self, format: ContainerFormat) -> bool;

    /// Create an inactive encoder that reports on `events`.
    fn create(
        &mut self,
        config: EncoderConfig,
        events: Sender<EncoderEvent>,
    ) -> EncoderResult<Box<dyn MediaEncoder>>;
}

/// First container in `preferred` the backend supports.
pub fn negotiate_format(
    backend: &dyn EncoderBackend,
    preferred: &[ContainerFormat],
) -> EncoderResult<ContainerFormat> {
    preferred
        .iter()
        .copied()
        .find(|f| backend.supports(*f))
        .ok_or_else(|| EncoderError::NoSupportedFormat(preferred.to_vec()))
}

/// Create an encoder, walking `preferred` until one is supported and
/// constructs successfully.
pub fn create_encoder(
    backend: &mut dyn EncoderBackend,
    base: &EncoderConfig,
    preferred: &[ContainerFormat],
    events: Sender<EncoderEvent>,
) -> EncoderResult<Box<dyn MediaEncoder>> {
    let mut last_error = None;

    for format in preferred.iter().copied() {
        if !backend.supports(format) {
            info!(backend = backend.name(), mime = format.mime_type(), "Container not supported");
            continue;
        }

        let config = EncoderConfig {
            format,
            ..base.clone()
        };
        match backend.create(config, events.clone()) {
            Ok(encoder) => {
                info!(
                    backend = backend.name(),
                    encoder = encoder.name(),
                    mime = format.mime_type(),
                    "Using encoder"
                );
                return Ok(encoder);
            }
            Err(e) => {
                warn!(mime = format.mime_type(), "Encoder creation failed: {}, falling back", e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| EncoderError::NoSupportedFormat(preferred.to_vec())))
}
