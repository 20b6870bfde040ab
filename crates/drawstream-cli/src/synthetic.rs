//! Synthetic collaborators: a moving test scene and tone generators standing
//! in for the video element, camera, annotation layer and audio devices.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, TrySendError};
use tracing::{debug, warn};

use drawstream_audio::{
    AudioChunk, AudioError, AudioInput, AudioResult, AudioSourceKind, MediaDevices,
    MicConstraints, SourceAudio, TrackHandle, AUDIO_CHANNEL_CAPACITY, CHANNELS, SAMPLES_PER_CHUNK,
    SAMPLE_RATE,
};
use drawstream_compositor::{RgbaFrame, SharedSurface, Surfaces};

const VIDEO_SIZE: (u32, u32) = (640, 360);
const CAMERA_SIZE: (u32, u32) = (320, 240);
const CHUNK_PERIOD: Duration = Duration::from_millis(10);

/// Bar colours of the main video test pattern.
const BARS: [[u8; 4]; 6] = [
    [0xe6, 0xe6, 0xe6, 0xff],
    [0xe6, 0xe6, 0x1e, 0xff],
    [0x1e, 0xe6, 0xe6, 0xff],
    [0x1e, 0xe6, 0x1e, 0xff],
    [0xe6, 0x1e, 0xe6, 0xff],
    [0x1e, 0x1e, 0xe6, 0xff],
];

/// Moving colour bars on the main video, a pulsing camera, and a static
/// annotation stroke, published from one producer thread.
pub struct SyntheticScene {
    video: SharedSurface,
    camera: SharedSurface,
    annotation: SharedSurface,
    stop: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
}

impl SyntheticScene {
    /// Start publishing at `fps`.
    pub fn start(fps: u32, camera_enabled: bool) -> anyhow::Result<Self> {
        let video = SharedSurface::new();
        let camera = SharedSurface::new();
        let annotation = SharedSurface::new();
        annotation.publish(annotation_stroke(VIDEO_SIZE.0, VIDEO_SIZE.1));

        let stop = Arc::new(AtomicBool::new(false));
        let period = Duration::from_secs(1) / fps.max(1);

        let producer = {
            let video = video.clone();
            let camera = camera.clone();
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("synthetic-video".into())
                .spawn(move || {
                    let mut n = 0u32;
                    while !stop.load(Ordering::Relaxed) {
                        video.publish(test_pattern(VIDEO_SIZE.0, VIDEO_SIZE.1, n));
                        if camera_enabled {
                            camera.publish(camera_frame(CAMERA_SIZE.0, CAMERA_SIZE.1, n));
                        }
                        n = n.wrapping_add(1);
                        thread::sleep(period);
                    }
                    debug!(frames = n, "Synthetic video stopped");
                })?
        };

        Ok(Self {
            video,
            camera,
            annotation,
            stop,
            producer: Some(producer),
        })
    }

    /// The surfaces the compositor samples. Both camera panes share a feed.
    pub fn surfaces(&self) -> Surfaces {
        Surfaces {
            main_video: Arc::new(self.video.clone()),
            camera: Arc::new(self.camera.clone()),
            camera_overlay: Arc::new(self.camera.clone()),
            annotation: Arc::new(self.annotation.clone()),
        }
    }
}

impl Drop for SyntheticScene {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
    }
}

/// Vertical colour bars scrolling one pixel per frame.
pub fn test_pattern(width: u32, height: u32, n: u32) -> RgbaFrame {
    let bar_width = (width / BARS.len() as u32).max(1);
    let mut row = Vec::with_capacity(width as usize * 4);
    for x in 0..width {
        let bar = ((x + n) / bar_width) as usize % BARS.len();
        row.extend_from_slice(&BARS[bar]);
    }
    let mut data = Vec::with_capacity(row.len() * height as usize);
    for _ in 0..height {
        data.extend_from_slice(&row);
    }
    RgbaFrame {
        data: Bytes::from(data),
        width,
        height,
    }
}

/// Vertical gradient whose brightness pulses over time.
pub fn camera_frame(width: u32, height: u32, n: u32) -> RgbaFrame {
    let pulse = ((n % 60) as f32 / 60.0 * TAU).sin() * 0.5 + 0.5;
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        let level = (y as f32 / height.max(1) as f32 * 160.0 + pulse * 60.0) as u8;
        for _ in 0..width {
            data.extend_from_slice(&[level / 2, level, level / 3, 0xff]);
        }
    }
    RgbaFrame {
        data: Bytes::from(data),
        width,
        height,
    }
}

/// Transparent layer with one thick red diagonal stroke.
pub fn annotation_stroke(width: u32, height: u32) -> RgbaFrame {
    const HALF_THICKNESS: f32 = 4.0;
    let mut data = vec![0u8; width as usize * height as usize * 4];
    let slope = height as f32 / width.max(1) as f32;
    for y in 0..height {
        for x in 0..width {
            if (y as f32 - x as f32 * slope).abs() <= HALF_THICKNESS {
                let i = (y as usize * width as usize + x as usize) * 4;
                data[i..i + 4].copy_from_slice(&[0xef, 0x44, 0x44, 0xff]);
            }
        }
    }
    RgbaFrame {
        data: Bytes::from(data),
        width,
        height,
    }
}

/// Start a sine generator delivering 10 ms chunks until `track` stops.
fn spawn_tone(
    kind: AudioSourceKind,
    frequency: f32,
    amplitude: f32,
    track: TrackHandle,
) -> AudioResult<Receiver<AudioChunk>> {
    let (tx, rx) = crossbeam_channel::bounded(AUDIO_CHANNEL_CAPACITY);

    thread::Builder::new()
        .name(format!("tone-{}", kind.name()))
        .spawn(move || {
            let step = TAU * frequency / SAMPLE_RATE as f32;
            let mut phase = 0.0f32;
            let mut sequence = 0u64;
            let mut samples = vec![0.0f32; SAMPLES_PER_CHUNK * CHANNELS as usize];

            while !track.is_stopped() {
                for frame in samples.chunks_exact_mut(CHANNELS as usize) {
                    frame.fill(phase.sin() * amplitude);
                    phase = (phase + step) % TAU;
                }
                match tx.try_send(AudioChunk::from_samples(&samples, kind, sequence)) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                }
                sequence += 1;
                thread::sleep(CHUNK_PERIOD);
            }
            debug!(source = kind.name(), chunks = sequence, "Tone stopped");
        })
        .map_err(|e| AudioError::SourceUnavailable(e.to_string()))?;

    Ok(rx)
}

/// A microphone that hums at 220 Hz.
pub struct ToneMicrophone {
    devices: Vec<String>,
}

impl ToneMicrophone {
    /// Device ids this microphone answers to.
    pub const DEVICES: [&'static str; 2] = ["default", "synthetic-mic"];

    /// A microphone answering to [`Self::DEVICES`].
    pub fn new() -> Self {
        Self {
            devices: Self::DEVICES.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl Default for ToneMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDevices for ToneMicrophone {
    fn open_microphone(&mut self, constraints: &MicConstraints) -> AudioResult<AudioInput> {
        if let Some(id) = &constraints.device_id {
            if !self.devices.contains(id) {
                warn!(device = %id, "Unknown microphone");
                return Err(AudioError::DeviceNotFound(id.clone()));
            }
        }
        debug!(?constraints, "Opening synthetic microphone");

        let track = TrackHandle::new();
        let chunks = spawn_tone(AudioSourceKind::Microphone, 220.0, 0.3, track.clone())?;
        Ok(AudioInput::new(AudioSourceKind::Microphone, chunks, Box::new(track)))
    }
}

/// The main video's soundtrack: a 440 Hz tone.
pub struct ToneSource;

impl SourceAudio for ToneSource {
    fn tap(&mut self) -> AudioResult<AudioInput> {
        let track = TrackHandle::new();
        let chunks = spawn_tone(AudioSourceKind::SourceVideo, 440.0, 0.2, track.clone())?;
        Ok(AudioInput::new(AudioSourceKind::SourceVideo, chunks, Box::new(track)))
    }
}
