//! Phased acquisition and ordered release of session resources.

use crossbeam_channel::Receiver;
use tracing::{debug, info, instrument, trace, warn};

use drawstream_audio::{
    AudioEngine, AudioGraph, AudioInput, AudioSourceKind, EngineState, MediaDevices, MediaTrack,
    MicConstraints, MixedAudioChunk, SourceAudio,
};
use drawstream_compositor::{CanvasFrame, CanvasTap, Compositor};
use drawstream_encoder::{
    create_encoder, EncoderBackend, EncoderConfig, EncoderEvent, EncoderResult, EncoderState,
    MediaEncoder, ENCODER_EVENT_CAPACITY,
};
use drawstream_ipc::{AcquirePhase, ContainerFormat, RecordingConfig, VideoFormat};

use crate::error::EngineError;
use crate::EngineResult;

/// Order resources are released in after a completed recording. The audio
/// engine goes last so the mix keeps draining until every track is stopped.
const RELEASE_ORDER: [AcquirePhase; 5] = [
    AcquirePhase::CreateEncoder,
    AcquirePhase::OpenCanvasStream,
    AcquirePhase::TapSourceAudio,
    AcquirePhase::AcquireMicrophone,
    AcquirePhase::BuildAudioGraph,
];

/// Everything the acquisition phases need to borrow for one start.
pub struct AcquireContext<'a> {
    /// Session settings.
    pub config: &'a RecordingConfig,

    /// Output format; the canvas is resized to it.
    pub format: VideoFormat,

    /// Opens the microphone.
    pub devices: &'a mut dyn MediaDevices,

    /// Taps the main video's audio.
    pub source_audio: &'a mut dyn SourceAudio,

    /// Creates the encoder.
    pub backend: &'a mut dyn EncoderBackend,

    /// Owner of the canvas.
    pub compositor: &'a mut Compositor,
}

/// Mixed audio handed to the encoder by one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioPump {
    /// Chunks the encoder accepted.
    pub accepted: usize,

    /// Chunks the encoder refused.
    pub dropped: usize,
}

/// Owns every resource of the current session.
#[derive(Default)]
pub struct ResourceManager {
    mic_track: Option<Box<dyn MediaTrack>>,
    source_track: Option<Box<dyn MediaTrack>>,
    pending_mic: Option<AudioInput>,
    pending_source: Option<AudioInput>,
    audio_engine: Option<AudioEngine>,
    mixed_audio: Option<Receiver<MixedAudioChunk>>,
    canvas_tap: Option<CanvasTap>,
    encoder: Option<Box<dyn MediaEncoder>>,
    encoder_events: Option<Receiver<EncoderEvent>>,
    acquired: Vec<AcquirePhase>,
}

impl ResourceManager {
    /// Create an empty resource manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live session resources.
    pub fn held(&self) -> usize {
        self.acquired.len()
    }

    /// Phases whose resources are currently held, in acquisition order.
    pub fn acquired(&self) -> &[AcquirePhase] {
        &self.acquired
    }

    /// Run every acquisition phase in order. On failure, everything acquired
    /// so far is released in reverse.
    #[instrument(name = "acquire_resources", skip_all)]
    pub fn acquire_all(&mut self, mut ctx: AcquireContext<'_>) -> EngineResult<()> {
        if !self.acquired.is_empty() {
            warn!(held = self.held(), "Acquiring over a live session, releasing first");
            self.rollback();
        }

        let mut phase = AcquirePhase::FIRST;
        loop {
            info!("Acquiring: {}", phase.name());

            if let Err(e) = self.acquire_phase(phase, &mut ctx) {
                warn!(phase = ?phase, "Acquisition failed: {}", e);
                self.rollback();
                return Err(EngineError::Acquire {
                    phase,
                    message: e.to_string(),
                });
            }
            self.acquired.push(phase);

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        debug!(held = self.held(), "All session resources acquired");
        Ok(())
    }

    fn acquire_phase(
        &mut self,
        phase: AcquirePhase,
        ctx: &mut AcquireContext<'_>,
    ) -> EngineResult<()> {
        match phase {
            AcquirePhase::AcquireMicrophone => {
                let constraints = MicConstraints::for_device(ctx.config.mic_device.clone());
                let mut input = ctx.devices.open_microphone(&constraints)?;
                self.mic_track = input.take_track();
                self.pending_mic = Some(input);
            }
            AcquirePhase::TapSourceAudio => {
                let mut input = ctx.source_audio.tap()?;
                self.source_track = input.take_track();
                self.pending_source = Some(input);
            }
            AcquirePhase::BuildAudioGraph => {
                let mut graph = AudioGraph::new();
                if let Some(input) = self.pending_source.take() {
                    graph = graph.with_source_video(input);
                }
                if let Some(input) = self.pending_mic.take() {
                    graph = graph.with_microphone(input, ctx.config.audio_enhanced);
                }
                if let Some(monitor) = ctx.source_audio.monitor_output() {
                    graph = graph.with_monitor(monitor);
                }

                let mut engine = AudioEngine::new();
                engine.connect(graph)?;
                debug!(nodes = ?engine.nodes(), "Audio graph connected");
                self.audio_engine = Some(engine);
            }
            AcquirePhase::OpenCanvasStream => {
                ctx.compositor.set_format(ctx.format)?;
                self.canvas_tap = Some(ctx.compositor.capture_stream(ctx.config.fps));
            }
            AcquirePhase::CreateEncoder => {
                let (width, height) = ctx.format.canvas_size();
                let preferred = ctx
                    .config
                    .containers
                    .first()
                    .copied()
                    .unwrap_or(ContainerFormat::Mp4Avc1);
                let base = EncoderConfig::from_recording(ctx.config, preferred, width, height);
                base.validate()?;

                let (tx, rx) = crossbeam_channel::bounded(ENCODER_EVENT_CAPACITY);
                let encoder = create_encoder(&mut *ctx.backend, &base, &ctx.config.containers, tx)?;
                self.encoder = Some(encoder);
                self.encoder_events = Some(rx);
            }
        }
        Ok(())
    }

    /// Resume the audio engine, then start the encoder once audio is
    /// confirmed running.
    #[instrument(name = "start_pipeline", skip(self))]
    pub fn start_pipeline(&mut self) -> EngineResult<()> {
        let engine = self
            .audio_engine
            .as_mut()
            .ok_or_else(|| EngineError::StartFailed("audio engine not built".into()))?;
        let mixed = engine.resume()?;
        if !engine.state().is_running() {
            return Err(EngineError::StartFailed(format!(
                "audio engine is {}",
                engine.state().name()
            )));
        }
        self.mixed_audio = Some(mixed);

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| EngineError::StartFailed("encoder not created".into()))?;
        encoder.start()?;
        info!(encoder = encoder.name(), "Encoder started");
        Ok(())
    }

    /// Encoder state, inactive when there is no encoder.
    pub fn encoder_state(&self) -> EncoderState {
        self.encoder
            .as_ref()
            .map(|e| e.state())
            .unwrap_or_default()
    }

    /// Negotiated container of the current encoder.
    pub fn container(&self) -> Option<ContainerFormat> {
        self.encoder.as_ref().map(|e| e.format())
    }

    /// Audio engine state, if one is held.
    pub fn audio_state(&self) -> Option<EngineState> {
        self.audio_engine.as_ref().map(|e| e.state())
    }

    /// Inputs the audio engine lost mid-session.
    pub fn lost_inputs(&self) -> Vec<AudioSourceKind> {
        self.audio_engine
            .as_ref()
            .map(|e| e.lost_inputs())
            .unwrap_or_default()
    }

    /// Encoder event stream of the current session.
    pub fn encoder_events(&self) -> Option<&Receiver<EncoderEvent>> {
        self.encoder_events.as_ref()
    }

    /// Hand one composited frame to the encoder.
    pub fn push_video(&mut self, frame: &CanvasFrame) -> EncoderResult<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.push_video(frame),
            None => Err(drawstream_encoder::EncoderError::NotRecording),
        }
    }

    /// Hand every pending mixed audio chunk to the encoder. Stops at the
    /// first fatal encoder error.
    pub fn push_pending_audio(&mut self) -> EncoderResult<AudioPump> {
        let mut pump = AudioPump::default();
        let (Some(mixed), Some(encoder)) = (self.mixed_audio.as_ref(), self.encoder.as_mut()) else {
            return Ok(pump);
        };

        for chunk in mixed.try_iter() {
            match encoder.push_audio(&chunk) {
                Ok(()) => pump.accepted += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    trace!(sequence = chunk.sequence, "Audio chunk refused: {}", e);
                    pump.dropped += 1;
                }
            }
        }
        Ok(pump)
    }

    /// Ask the encoder to stop; its remaining output follows as events.
    pub fn request_encoder_stop(&mut self) -> EncoderResult<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.request_stop(),
            None => Ok(()),
        }
    }

    /// Release everything after a finished recording: encoder, canvas tap,
    /// source tap, microphone, then the audio engine.
    #[instrument(name = "release_resources", skip(self))]
    pub fn release(&mut self) {
        if self.acquired.is_empty() {
            return;
        }
        info!(held = self.held(), "Releasing session resources");

        for phase in RELEASE_ORDER {
            if self.acquired.contains(&phase) {
                self.release_phase(phase);
            }
        }
        self.acquired.clear();
    }

    /// Release acquired phases in strict reverse order.
    #[instrument(name = "rollback_resources", skip(self))]
    pub fn rollback(&mut self) {
        while let Some(phase) = self.acquired.pop() {
            info!("Rolling back: {}", phase.name());
            self.release_phase(phase);
        }
    }

    fn release_phase(&mut self, phase: AcquirePhase) {
        match phase {
            AcquirePhase::CreateEncoder => {
                if let Some(mut encoder) = self.encoder.take() {
                    if encoder.state().is_active() {
                        let _ = encoder.request_stop();
                    }
                }
                self.encoder_events = None;
            }
            AcquirePhase::OpenCanvasStream => {
                self.canvas_tap = None;
            }
            AcquirePhase::TapSourceAudio => {
                if let Some(mut track) = self.source_track.take() {
                    track.stop();
                }
                self.pending_source = None;
            }
            AcquirePhase::AcquireMicrophone => {
                if let Some(mut track) = self.mic_track.take() {
                    track.stop();
                }
                self.pending_mic = None;
            }
            AcquirePhase::BuildAudioGraph => {
                if let Some(mut engine) = self.audio_engine.take() {
                    engine.close();
                }
                self.mixed_audio = None;
            }
        }
        self.acquired.retain(|p| *p != phase);
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.release();
    }
}
