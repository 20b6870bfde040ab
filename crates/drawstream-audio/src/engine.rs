//! The audio engine: owns the mix graph and its thread for one session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::compressor::Compressor;
use crate::error::AudioError;
use crate::input::{AudioInput, AudioNode, AudioOutput, AudioSourceKind};
use crate::mixer::{mix_thread, MixGraph, MixSource, MixedAudioChunk};
use crate::{AudioResult, MIXED_CHANNEL_CAPACITY};

/// Audio engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Created, graph may be connected, nothing flows yet.
    #[default]
    Suspended,

    /// Mix thread running.
    Running,

    /// Released. Terminal.
    Closed,
}

impl EngineState {
    /// Returns true if audio is flowing.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Get a human-readable name for this state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::Running => "running",
            Self::Closed => "closed",
        }
    }
}

/// Inputs and routing for one session.
#[derive(Default)]
pub struct AudioGraph {
    source_video: Option<AudioInput>,
    microphone: Option<(AudioInput, bool)>,
    monitor: Option<Box<dyn AudioOutput>>,
}

impl AudioGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mix (and monitor) the source video's audio.
    pub fn with_source_video(mut self, input: AudioInput) -> Self {
        self.source_video = Some(input);
        self
    }

    /// Mix the microphone, through the compressor when `enhanced`.
    pub fn with_microphone(mut self, input: AudioInput, enhanced: bool) -> Self {
        self.microphone = Some((input, enhanced));
        self
    }

    /// Play the source video's audio locally while recording.
    pub fn with_monitor(mut self, output: Box<dyn AudioOutput>) -> Self {
        self.monitor = Some(output);
        self
    }

    /// The nodes this graph wires up.
    pub fn nodes(&self) -> Vec<AudioNode> {
        let mut nodes = Vec::with_capacity(2);
        if self.source_video.is_some() {
            nodes.push(AudioNode {
                source: AudioSourceKind::SourceVideo,
                enhancement: false,
            });
        }
        if let Some((_, enhanced)) = &self.microphone {
            nodes.push(AudioNode {
                source: AudioSourceKind::Microphone,
                enhancement: *enhanced,
            });
        }
        nodes
    }

    fn into_mix_graph(self) -> MixGraph {
        let mut sources = Vec::with_capacity(2);
        if let Some(input) = self.source_video {
            sources.push(MixSource {
                input,
                compressor: None,
                lost: false,
            });
        }
        if let Some((input, enhanced)) = self.microphone {
            sources.push(MixSource {
                input,
                compressor: enhanced.then(Compressor::voice),
                lost: false,
            });
        }
        MixGraph {
            sources,
            monitor: self.monitor,
        }
    }
}

/// Mixes a connected [`AudioGraph`] on its own thread.
///
/// Starts suspended; [`AudioEngine::resume`] starts the flow and
/// [`AudioEngine::close`] stops it and releases every input. Close also runs
/// on drop.
pub struct AudioEngine {
    state: EngineState,
    graph: Option<MixGraph>,
    nodes: Vec<AudioNode>,
    mix_thread: Option<JoinHandle<MixGraph>>,
    should_stop: Arc<AtomicBool>,
    lost_inputs: Arc<Mutex<Vec<AudioSourceKind>>>,
}

impl AudioEngine {
    /// Create a suspended engine.
    pub fn new() -> Self {
        Self {
            state: EngineState::Suspended,
            graph: None,
            nodes: Vec::new(),
            mix_thread: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            lost_inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Nodes of the connected graph.
    pub fn nodes(&self) -> &[AudioNode] {
        &self.nodes
    }

    /// Wire `graph` into the engine. Only allowed while suspended.
    pub fn connect(&mut self, graph: AudioGraph) -> AudioResult<()> {
        match self.state {
            EngineState::Closed => return Err(AudioError::EngineClosed),
            EngineState::Running => return Err(AudioError::AlreadyStarted),
            EngineState::Suspended => {}
        }
        self.nodes = graph.nodes();
        self.graph = Some(graph.into_mix_graph());
        Ok(())
    }

    /// Start mixing. Returns the mixed output stream.
    #[instrument(name = "audio_engine_resume", skip(self))]
    pub fn resume(&mut self) -> AudioResult<Receiver<MixedAudioChunk>> {
        match self.state {
            EngineState::Closed => return Err(AudioError::EngineClosed),
            EngineState::Running => return Err(AudioError::AlreadyStarted),
            EngineState::Suspended => {}
        }
        let graph = self.graph.take().ok_or(AudioError::NotConnected)?;

        info!(nodes = ?self.nodes, "Resuming audio engine");

        let (sender, receiver) = crossbeam_channel::bounded(MIXED_CHANNEL_CAPACITY);
        self.should_stop.store(false, Ordering::SeqCst);
        let should_stop = Arc::clone(&self.should_stop);
        let lost_inputs = Arc::clone(&self.lost_inputs);

        let handle = thread::Builder::new()
            .name("audio-mix".into())
            .spawn(move || mix_thread(graph, sender, should_stop, lost_inputs))
            .map_err(|e| AudioError::MixerError(e.to_string()))?;

        self.mix_thread = Some(handle);
        self.state = EngineState::Running;
        Ok(receiver)
    }

    /// Inputs that disconnected while running.
    pub fn lost_inputs(&self) -> Vec<AudioSourceKind> {
        self.lost_inputs.lock().clone()
    }

    /// Stop mixing and release all inputs. Idempotent.
    #[instrument(name = "audio_engine_close", skip(self))]
    pub fn close(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }
        info!(state = self.state.name(), "Closing audio engine");

        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.mix_thread.take() {
            match handle.join() {
                Ok(graph) => drop(graph),
                Err(_) => warn!("Mixer thread panicked"),
            }
        }
        // Inputs stop their tracks on drop.
        self.graph = None;
        self.state = EngineState::Closed;
        info!("Audio engine closed");
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.close();
    }
}
