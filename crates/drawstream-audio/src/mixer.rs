//! The mix thread: sums the graph's inputs into 10ms stereo chunks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::compressor::Compressor;
use crate::error::AudioError;
use crate::input::{AudioChunk, AudioInput, AudioOutput, AudioSourceKind};
use crate::{bytes_to_samples, samples_to_bytes, CHANNELS, SAMPLES_PER_CHUNK};

/// Mixed audio output chunk.
#[derive(Debug, Clone)]
pub struct MixedAudioChunk {
    /// Little-endian f32 interleaved stereo samples.
    pub data: Bytes,

    /// Presentation timestamp in 100ns units.
    pub pts_100ns: u64,

    /// Sequence number.
    pub sequence: u64,
}

impl MixedAudioChunk {
    /// Iterate the interleaved samples.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        bytes_to_samples(&self.data)
    }
}

/// One graph input as the mix thread sees it.
pub(crate) struct MixSource {
    pub input: AudioInput,
    pub compressor: Option<Compressor>,
    pub lost: bool,
}

impl MixSource {
    fn kind(&self) -> AudioSourceKind {
        self.input.kind
    }
}

/// Everything the mix thread owns while running.
pub(crate) struct MixGraph {
    pub sources: Vec<MixSource>,
    pub monitor: Option<Box<dyn AudioOutput>>,
}

/// Mix until `should_stop` is set or the output is dropped.
///
/// Returns the graph so the engine can release it on close.
pub(crate) fn mix_thread(
    mut graph: MixGraph,
    sender: Sender<MixedAudioChunk>,
    should_stop: Arc<AtomicBool>,
    lost_inputs: Arc<Mutex<Vec<AudioSourceKind>>>,
) -> MixGraph {
    debug!("Mixer thread started");

    let samples_per_chunk = SAMPLES_PER_CHUNK * CHANNELS as usize;
    let mut mix_buffer = vec![0.0f32; samples_per_chunk];
    let mut input_buffer = vec![0.0f32; samples_per_chunk];
    let mut sequence = 0u64;
    let start_time = Instant::now();

    let chunk_duration = Duration::from_millis(10);
    let mut next_chunk_time = start_time;

    while !should_stop.load(Ordering::SeqCst) {
        mix_buffer.fill(0.0);

        for source in graph.sources.iter_mut() {
            let Some(chunk) = receive(source, &lost_inputs) else {
                continue;
            };

            if source.kind() == AudioSourceKind::SourceVideo {
                if let Some(monitor) = graph.monitor.as_mut() {
                    monitor.play(&chunk);
                }
            }

            input_buffer.fill(0.0);
            for (slot, sample) in input_buffer.iter_mut().zip(chunk.samples()) {
                *slot = sample;
            }
            if let Some(compressor) = source.compressor.as_mut() {
                compressor.process(&mut input_buffer);
            }
            for (mixed, sample) in mix_buffer.iter_mut().zip(&input_buffer) {
                *mixed += sample;
            }
        }

        for sample in mix_buffer.iter_mut() {
            *sample = soft_clip(*sample);
        }

        let elapsed = next_chunk_time.duration_since(start_time);
        let output = MixedAudioChunk {
            data: samples_to_bytes(&mix_buffer),
            pts_100ns: elapsed.as_nanos() as u64 / 100,
            sequence,
        };

        match sender.try_send(output) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!("Mixed audio channel full, dropping chunk");
            }
            Err(TrySendError::Disconnected(_)) => {
                break;
            }
        }

        sequence += 1;
        next_chunk_time += chunk_duration;

        let now = Instant::now();
        if next_chunk_time > now {
            thread::sleep(next_chunk_time - now);
        }
    }

    debug!(chunks = sequence, "Mixer thread exiting");
    graph
}

/// Take at most one chunk from `source`. A disconnected input is flagged
/// once and contributes silence from then on.
fn receive(
    source: &mut MixSource,
    lost_inputs: &Mutex<Vec<AudioSourceKind>>,
) -> Option<AudioChunk> {
    if source.lost {
        return None;
    }
    match source.input.chunks.try_recv() {
        Ok(chunk) => Some(chunk),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => {
            warn!("{}, mixing silence", AudioError::DeviceLost(source.kind()));
            source.lost = true;
            lost_inputs.lock().push(source.kind());
            None
        }
    }
}

/// Level above which the soft clipper starts bending the signal.
const CLIP_KNEE: f32 = 0.8;

/// Soft clipping to prevent harsh digital clipping. Linear up to the knee,
/// then a tanh curve that approaches full scale without reaching past it.
pub fn soft_clip(sample: f32) -> f32 {
    let magnitude = sample.abs();
    if magnitude <= CLIP_KNEE {
        return sample;
    }
    let headroom = 1.0 - CLIP_KNEE;
    let bent = CLIP_KNEE + headroom * ((magnitude - CLIP_KNEE) / headroom).tanh();
    bent.copysign(sample)
}
