//! The recorder: one thread driving the capture session state machine.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument, warn};

use drawstream_audio::{AudioError, AudioSourceKind, EngineState, MediaDevices, SourceAudio};
use drawstream_compositor::{
    CaptureTimestamp, Compositor, LayoutProbe, SnapshotProvider, Surfaces,
};
use drawstream_encoder::{
    ChunkCollector, EncoderBackend, EncoderEvent, EncoderResult, EncoderState,
};
use drawstream_ipc::{
    ContainerFormat, RecorderCommand, RecorderEvent, RecordingArtifact, RecordingConfig,
    SessionState, StopReason,
};

use crate::clock::FrameClock;
use crate::resources::{AcquireContext, ResourceManager};
use crate::session::{is_valid_transition, Countdown, CountdownStep};
use crate::stats::RecordingStats;
use crate::EngineResult;

/// Longest wait between loop iterations when nothing is scheduled.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// How long shutdown waits for the encoder to flush.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// The outside world the recorder samples and drives.
pub struct Collaborators {
    /// Visual inputs of the compositor.
    pub surfaces: Surfaces,

    /// Per-frame UI state.
    pub snapshot: Arc<dyn SnapshotProvider>,

    /// On-screen geometry.
    pub probe: Arc<dyn LayoutProbe>,

    /// Microphone access.
    pub devices: Box<dyn MediaDevices>,

    /// The main video's audio.
    pub source_audio: Box<dyn SourceAudio>,

    /// Encoder factory.
    pub backend: Box<dyn EncoderBackend>,
}

/// Drives one capture session at a time.
///
/// All session logic runs on the thread calling [`Recorder::run`]; the loop
/// sleeps until the next command, encoder event or deadline.
pub struct Recorder {
    command_rx: Receiver<RecorderCommand>,
    event_tx: Sender<RecorderEvent>,
    snapshot: Arc<dyn SnapshotProvider>,
    probe: Arc<dyn LayoutProbe>,
    devices: Box<dyn MediaDevices>,
    source_audio: Box<dyn SourceAudio>,
    backend: Box<dyn EncoderBackend>,
    compositor: Compositor,
    resources: ResourceManager,
    state: SessionState,
    config: RecordingConfig,
    countdown: Option<Countdown>,
    clock: FrameClock,
    collector: ChunkCollector,
    stats: RecordingStats,
    container: Option<ContainerFormat>,
    recording_started: Option<Instant>,
    frames_pushed: u64,
    reported_lost: Vec<AudioSourceKind>,
    artifact: Option<RecordingArtifact>,
}

impl Recorder {
    /// Create an idle recorder.
    pub fn new(
        command_rx: Receiver<RecorderCommand>,
        event_tx: Sender<RecorderEvent>,
        collaborators: Collaborators,
    ) -> EngineResult<Self> {
        let Collaborators {
            surfaces,
            snapshot,
            probe,
            devices,
            source_audio,
            backend,
        } = collaborators;

        let config = RecordingConfig::default();
        let compositor = Compositor::new(surfaces, snapshot.snapshot().format)?;

        Ok(Self {
            command_rx,
            event_tx,
            snapshot,
            probe,
            devices,
            source_audio,
            backend,
            compositor,
            resources: ResourceManager::new(),
            state: SessionState::Idle,
            clock: FrameClock::new(config.fps),
            config,
            countdown: None,
            collector: ChunkCollector::new(),
            stats: RecordingStats::default(),
            container: None,
            recording_started: None,
            frames_pushed: 0,
            reported_lost: Vec::new(),
            artifact: None,
        })
    }

    /// Run the recorder loop until shutdown.
    pub fn run(&mut self) {
        info!("Recorder starting");
        self.send_event(RecorderEvent::Ready);

        let commands = self.command_rx.clone();
        loop {
            let events = self
                .resources
                .encoder_events()
                .cloned()
                .unwrap_or_else(crossbeam_channel::never);
            let timeout = self
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()).min(IDLE_POLL))
                .unwrap_or(IDLE_POLL);

            select! {
                recv(commands) -> msg => match msg {
                    Ok(command) => {
                        if !self.handle_command(command, Instant::now()) {
                            break;
                        }
                    }
                    Err(_) => {
                        info!("Command channel disconnected, shutting down");
                        self.shutdown(Instant::now());
                        break;
                    }
                },
                recv(events) -> msg => match msg {
                    Ok(event) => self.handle_encoder_event(event, Instant::now()),
                    Err(_) => self.encoder_gone(Instant::now()),
                },
                default(timeout) => {}
            }

            self.poll(Instant::now());
        }

        info!("Recorder stopped");
    }

    /// Handle a command. Returns false if the recorder should stop.
    pub fn handle_command(&mut self, command: RecorderCommand, now: Instant) -> bool {
        debug!(?command, "Handling command");

        match command {
            RecorderCommand::StartRecording { config } => self.start_recording(config, now),
            RecorderCommand::StopRecording => self.stop_recording(StopReason::UserRequested, now),
            RecorderCommand::GetState => self.send_event(RecorderEvent::StateChanged {
                previous: self.state,
                current: self.state,
            }),
            RecorderCommand::Shutdown => {
                self.shutdown(now);
                return false;
            }
        }

        true
    }

    /// Advance everything that is due at `now`: encoder events, the
    /// countdown, and the frame clock.
    pub fn poll(&mut self, now: Instant) {
        let pending: Vec<EncoderEvent> = self
            .resources
            .encoder_events()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default();
        for event in pending {
            self.handle_encoder_event(event, now);
        }

        self.advance_countdown(now);

        if self.clock.is_due(now) {
            self.tick(now);
        }

        if self.state.is_recording() {
            self.stats.maybe_report(now);
        }
    }

    /// Earliest pending deadline: countdown step or frame tick.
    pub fn next_deadline(&self) -> Option<Instant> {
        let countdown = self.countdown.as_ref().and_then(|c| c.deadline());
        match (countdown, self.clock.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Countdown value shown, if counting down.
    pub fn countdown(&self) -> Option<u8> {
        self.state.countdown()
    }

    /// Returns true while frames are being recorded.
    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    /// The last finished recording.
    pub fn artifact(&self) -> Option<&RecordingArtifact> {
        self.artifact.as_ref()
    }

    /// Number of live session resources.
    pub fn held_resources(&self) -> usize {
        self.resources.held()
    }

    /// Statistics of the current or last recording.
    pub fn stats(&self) -> &RecordingStats {
        &self.stats
    }

    /// Audio engine state, if a session holds one.
    pub fn audio_state(&self) -> Option<EngineState> {
        self.resources.audio_state()
    }

    /// Encoder state, inactive without a session.
    pub fn encoder_state(&self) -> EncoderState {
        self.resources.encoder_state()
    }

    /// The frame clock.
    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// The compositor and its canvas.
    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Acquire resources and begin the countdown. Ignored unless idle.
    #[instrument(name = "start_recording", skip(self, config))]
    pub fn start_recording(&mut self, config: RecordingConfig, now: Instant) {
        if !self.state.is_idle() {
            debug!(state = self.state.name(), "Start ignored, session already active");
            return;
        }

        let format = self.snapshot.snapshot().format;
        info!(?format, fps = config.fps, "Starting capture session");

        let acquired = self.resources.acquire_all(AcquireContext {
            config: &config,
            format,
            devices: self.devices.as_mut(),
            source_audio: self.source_audio.as_mut(),
            backend: self.backend.as_mut(),
            compositor: &mut self.compositor,
        });
        if let Err(e) = acquired {
            warn!("Could not start recording: {}", e);
            self.send_event(RecorderEvent::Warning {
                message: e.to_string(),
            });
            return;
        }

        self.container = self.resources.container();
        self.collector = ChunkCollector::new();
        self.clock.set_fps(config.fps);
        self.countdown = Some(Countdown::new(
            config.countdown_from,
            Duration::from_millis(config.countdown_step_ms),
            Duration::from_millis(config.settle_delay_ms),
            now,
        ));
        let from = config.countdown_from;
        self.config = config;

        self.transition_to(SessionState::CountingDown { remaining: from });
        self.send_event(RecorderEvent::Countdown(from));
    }

    /// Request the encoder to stop. Ignored unless recording.
    #[instrument(name = "stop_recording", skip(self))]
    pub fn stop_recording(&mut self, reason: StopReason, now: Instant) {
        match self.state {
            SessionState::Recording => {}
            SessionState::CountingDown { remaining } => {
                info!(remaining, "Stop ignored, countdown cannot be cancelled");
                return;
            }
            state => {
                debug!(state = state.name(), "Stop ignored, not recording");
                return;
            }
        }

        info!("{}", reason.message());
        if let Err(e) = self.pump_audio() {
            warn!("Final audio drain failed: {}", e);
        }
        self.transition_to(SessionState::Finalizing);

        if let Err(e) = self.resources.request_encoder_stop() {
            error!("Encoder stop failed: {}", e);
            self.send_event(RecorderEvent::Error {
                recoverable: true,
                message: e.to_string(),
            });
            self.finalize(now);
        }
    }

    fn advance_countdown(&mut self, now: Instant) {
        while let Some(step) = self.countdown.as_mut().and_then(|c| c.poll(now)) {
            match step {
                CountdownStep::Tick(remaining) => {
                    self.transition_to(SessionState::CountingDown { remaining });
                    self.send_event(RecorderEvent::Countdown(remaining));
                }
                CountdownStep::Settled => {
                    self.countdown = None;
                    self.begin_recording(now);
                }
            }
        }
    }

    #[instrument(name = "begin_recording", skip(self))]
    fn begin_recording(&mut self, now: Instant) {
        if let Err(e) = self.resources.start_pipeline() {
            warn!("Recording start failed: {}", e);
            self.resources.rollback();
            self.transition_to(SessionState::Idle);
            self.send_event(RecorderEvent::Warning {
                message: e.to_string(),
            });
            return;
        }

        self.stats.start(now);
        self.recording_started = Some(now);
        self.frames_pushed = 0;
        self.reported_lost.clear();
        self.clock.start(now);

        self.transition_to(SessionState::Recording);
        self.send_event(RecorderEvent::RecordingStarted);
    }

    fn tick(&mut self, now: Instant) {
        let active = self.resources.encoder_state().is_active();
        if active {
            self.capture_frame(now);
        }
        let keep_running = active && self.resources.encoder_state().is_active();
        self.clock.complete_tick(now, keep_running);
    }

    /// Compose once and push it for every frame slot the elapsed time calls
    /// for, so the constant-rate video keeps pace with the audio when the
    /// thread falls behind.
    fn capture_frame(&mut self, now: Instant) {
        let snapshot = self.snapshot.snapshot();
        let report = self.compositor.compose(&snapshot, self.probe.as_ref());
        self.stats.record_compose(&report);

        let start = self.recording_started.unwrap_or(now);
        let due = self.clock.slots_elapsed(start, now);
        let repeats = due.saturating_sub(self.frames_pushed + 1);
        if repeats > 0 {
            debug!(repeats, "Recorder fell behind, repeating frame");
        }

        let mut frame = self.compositor.frame(CaptureTimestamp::at(start, now));
        while self.frames_pushed < due && self.resources.encoder_state().is_active() {
            frame.timestamp =
                CaptureTimestamp::at(start, self.clock.slot_time(start, self.frames_pushed));
            self.frames_pushed += 1;

            match self.resources.push_video(&frame) {
                Ok(()) => self.stats.record_frame_encoded(),
                Err(e) if e.is_fatal() => {
                    self.encoder_failed(e.to_string(), now);
                    return;
                }
                Err(e) => {
                    debug!(sequence = frame.sequence, "Frame refused: {}", e);
                    self.stats.record_encode_drop();
                }
            }
        }

        if let Err(e) = self.pump_audio() {
            self.encoder_failed(e.to_string(), now);
            return;
        }
        self.check_lost_inputs();
    }

    fn pump_audio(&mut self) -> EncoderResult<()> {
        let pump = self.resources.push_pending_audio()?;
        for _ in 0..pump.accepted {
            self.stats.record_audio_chunk();
        }
        for _ in 0..pump.dropped {
            self.stats.record_encode_drop();
        }
        Ok(())
    }

    /// The encoder can no longer take media: report it and finalize with
    /// whatever it already produced.
    fn encoder_failed(&mut self, message: String, now: Instant) {
        error!("Encoder error: {}", message);
        self.send_event(RecorderEvent::Error {
            recoverable: true,
            message: message.clone(),
        });
        self.stop_recording(StopReason::EncoderError { message }, now);
    }

    fn check_lost_inputs(&mut self) {
        for kind in self.resources.lost_inputs() {
            if self.reported_lost.contains(&kind) {
                continue;
            }
            warn!(source = kind.name(), "Audio input lost, recording continues");
            self.reported_lost.push(kind);
            self.send_event(RecorderEvent::Warning {
                message: format!("{}, continuing with silence", AudioError::DeviceLost(kind)),
            });
        }
    }

    fn handle_encoder_event(&mut self, event: EncoderEvent, now: Instant) {
        match event {
            EncoderEvent::DataAvailable(data) => {
                self.stats.record_bytes(data.len());
                self.collector.push(data);
            }
            EncoderEvent::Error(message) => self.encoder_failed(message, now),
            EncoderEvent::Stopped => match self.state {
                SessionState::Finalizing => self.finalize(now),
                SessionState::Recording => {
                    warn!("Encoder stopped on its own");
                    self.transition_to(SessionState::Finalizing);
                    self.finalize(now);
                }
                state => debug!(state = state.name(), "Ignoring encoder stop"),
            },
        }
    }

    fn encoder_gone(&mut self, now: Instant) {
        if self.state.is_finalizing() || self.state.is_recording() {
            warn!("Encoder event channel closed");
            if self.state.is_recording() {
                self.transition_to(SessionState::Finalizing);
            }
            self.finalize(now);
        }
    }

    /// Cancel the clock, assemble the artifact, then release resources.
    #[instrument(name = "finalize_recording", skip(self))]
    fn finalize(&mut self, now: Instant) {
        if !self.state.is_finalizing() {
            return;
        }

        self.clock.cancel();

        let unix_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let format = self.container.unwrap_or(ContainerFormat::Mp4Avc1);
        let artifact = self.collector.assemble(
            format,
            &self.config.file_prefix,
            unix_millis,
            self.stats.frames_encoded,
        );

        self.resources.release();
        self.container = None;
        self.recording_started = None;

        info!(
            file = %artifact.info.file_name,
            bytes = artifact.info.size_bytes,
            frames = artifact.info.frames,
            duration_ms = self.stats.elapsed(now).as_millis() as u64,
            "Recording finalized"
        );

        self.transition_to(SessionState::Idle);
        self.artifact = Some(artifact.clone());
        self.send_event(RecorderEvent::ArtifactReady(artifact));
    }

    #[instrument(name = "recorder_shutdown", skip(self))]
    fn shutdown(&mut self, now: Instant) {
        match self.state {
            SessionState::Idle => {}
            SessionState::CountingDown { .. } => {
                self.countdown = None;
                self.resources.rollback();
                self.transition_to(SessionState::Idle);
            }
            SessionState::Recording | SessionState::Finalizing => {
                self.stop_recording(StopReason::Shutdown, now);
                self.wait_for_flush(SHUTDOWN_FLUSH_TIMEOUT);
            }
        }

        self.send_event(RecorderEvent::Shutdown);
    }

    fn wait_for_flush(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;

        // Events already queued are handled without blocking.
        self.poll(Instant::now());

        while self.state.is_finalizing() {
            let Some(events) = self.resources.encoder_events().cloned() else {
                break;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(event) => self.handle_encoder_event(event, Instant::now()),
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Encoder did not flush in time, keeping partial output");
                    self.finalize(Instant::now());
                }
                Err(RecvTimeoutError::Disconnected) => self.encoder_gone(Instant::now()),
            }
        }
    }

    fn transition_to(&mut self, new_state: SessionState) {
        let previous = self.state;
        if !is_valid_transition(previous, new_state) {
            warn!(
                previous = previous.name(),
                current = new_state.name(),
                "Rejected state transition"
            );
            return;
        }
        self.state = new_state;

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(RecorderEvent::StateChanged {
            previous,
            current: new_state,
        });
    }

    fn send_event(&self, event: RecorderEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EncoderProbe, FakeBackend, FakeDevices, FakeSource, Ledger};
    use drawstream_encoder::FfmpegBackend;
    use drawstream_compositor::{RgbaFrame, SharedProbe, SharedSnapshot, SharedSurface};
    use drawstream_ipc::{FrameSnapshot, VideoFormat};
    use std::sync::atomic::Ordering;

    struct Harness {
        recorder: Recorder,
        events: Receiver<RecorderEvent>,
        ledger: Ledger,
        encoder: EncoderProbe,
        mic_feeds: Arc<parking_lot::Mutex<Vec<Sender<drawstream_audio::AudioChunk>>>>,
        _commands: Sender<RecorderCommand>,
        t0: Instant,
    }

    #[derive(Default)]
    struct Options {
        deny_mic: bool,
        no_containers: bool,
        fail_start: bool,
        backend: Option<Box<dyn EncoderBackend>>,
    }

    fn harness(options: Options) -> Harness {
        let ledger = Ledger::default();
        let video = SharedSurface::new();
        video.publish(RgbaFrame::solid(16, 9, [200, 0, 0, 255]));
        let camera = SharedSurface::new();

        let mut devices = FakeDevices::new(&ledger);
        devices.deny = options.deny_mic;
        let mic_feeds = devices.feeds.clone();
        let mut backend = FakeBackend::new(&ledger);
        backend.fail_start = options.fail_start;
        if options.no_containers {
            backend.supported.clear();
        }
        let encoder = backend.probe.clone();

        let collaborators = Collaborators {
            surfaces: Surfaces {
                main_video: Arc::new(video),
                camera: Arc::new(camera.clone()),
                camera_overlay: Arc::new(camera),
                annotation: Arc::new(SharedSurface::new()),
            },
            snapshot: Arc::new(SharedSnapshot::new(FrameSnapshot {
                format: VideoFormat::Phone,
                ..Default::default()
            })),
            probe: Arc::new(SharedProbe::new()),
            devices: Box::new(devices),
            source_audio: Box::new(FakeSource::new(&ledger)),
            backend: options.backend.unwrap_or_else(|| Box::new(backend)),
        };

        let (command_tx, command_rx) = drawstream_ipc::command_channel();
        let (event_tx, events) = drawstream_ipc::event_channel();
        Harness {
            recorder: Recorder::new(command_rx, event_tx, collaborators).unwrap(),
            events,
            ledger,
            encoder,
            mic_feeds,
            _commands: command_tx,
            t0: Instant::now(),
        }
    }

    impl Harness {
        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        fn start(&mut self) {
            let now = self.t0;
            self.recorder.handle_command(
                RecorderCommand::StartRecording {
                    config: RecordingConfig::default(),
                },
                now,
            );
        }

        /// Start and run the countdown through to recording.
        fn record(&mut self) {
            self.start();
            let settled = self.at(3800);
            self.recorder.poll(settled);
            assert!(self.recorder.is_recording());
        }

        fn drain(&self) -> Vec<RecorderEvent> {
            self.events.try_iter().collect()
        }
    }

    fn countdowns(events: &[RecorderEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::Countdown(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    fn warnings(events: &[RecorderEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::Warning { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_countdown_holds_pipeline_cold() {
        let mut h = harness(Options::default());
        h.start();

        assert_eq!(h.recorder.state(), SessionState::CountingDown { remaining: 3 });
        assert_eq!(h.recorder.held_resources(), 5);
        assert_eq!(h.ledger.live(), 3);
        assert_eq!(h.recorder.audio_state(), Some(EngineState::Suspended));
        assert_eq!(h.recorder.encoder_state(), EncoderState::Inactive);
        assert!(!h.recorder.clock().is_running());
        assert_eq!(h.recorder.compositor().canvas().height(), 1920);

        h.recorder.poll(h.at(999));
        assert_eq!(h.recorder.countdown(), Some(3));
        h.recorder.poll(h.at(1000));
        assert_eq!(h.recorder.countdown(), Some(2));
        h.recorder.poll(h.at(3000));
        assert_eq!(h.recorder.countdown(), Some(0));
        h.recorder.poll(h.at(3799));
        assert_eq!(h.recorder.countdown(), Some(0));
        assert_eq!(h.recorder.encoder_state(), EncoderState::Inactive);

        assert_eq!(countdowns(&h.drain()), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_settle_starts_audio_then_encoder_and_clock() {
        let mut h = harness(Options::default());
        h.record();

        assert_eq!(h.recorder.audio_state(), Some(EngineState::Running));
        assert_eq!(h.recorder.encoder_state(), EncoderState::Recording);
        assert!(h.recorder.clock().is_running());
        assert_eq!(h.encoder.frames.load(Ordering::SeqCst), 1);

        let interval = h.recorder.clock().interval();
        h.recorder.poll(h.at(3800) + interval);
        assert_eq!(h.encoder.frames.load(Ordering::SeqCst), 2);

        let events = h.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, RecorderEvent::RecordingStarted)));
    }

    #[test]
    fn test_full_session_releases_everything() {
        let mut h = harness(Options::default());
        h.record();

        let stop_at = h.at(5000);
        h.recorder.handle_command(RecorderCommand::StopRecording, stop_at);
        assert_eq!(h.recorder.state(), SessionState::Finalizing);
        assert_eq!(h.recorder.encoder_state(), EncoderState::Inactive);

        h.recorder.poll(stop_at);
        assert_eq!(h.recorder.state(), SessionState::Idle);
        assert_eq!(h.recorder.held_resources(), 0);
        assert_eq!(h.ledger.live(), 0);
        assert_eq!(h.recorder.compositor().active_taps(), 0);
        assert_eq!(h.recorder.audio_state(), None);
        assert!(!h.recorder.clock().is_running());
        assert!(!h.recorder.clock().is_due(h.at(60_000)));

        let artifact = h.recorder.artifact().unwrap();
        assert_eq!(&artifact.data[..], b"head-tail");
        assert!(artifact.info.file_name.starts_with("DrawStream-Pro-"));
        assert!(artifact.info.file_name.ends_with(".mp4"));
        assert_eq!(artifact.info.chunk_count, 2);
        assert_eq!(artifact.info.frames, 1);

        let events = h.drain();
        assert!(matches!(
            events.last(),
            Some(RecorderEvent::ArtifactReady(a)) if a.info.size_bytes == 9
        ));
    }

    #[test]
    fn test_start_while_active_is_ignored() {
        let mut h = harness(Options::default());
        h.record();
        h.drain();

        h.start();
        assert!(h.recorder.is_recording());
        assert_eq!(h.recorder.held_resources(), 5);
        assert_eq!(h.ledger.live(), 3);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_stop_during_countdown_is_ignored() {
        let mut h = harness(Options::default());
        h.start();
        h.recorder
            .handle_command(RecorderCommand::StopRecording, h.at(500));
        assert_eq!(h.recorder.countdown(), Some(3));
        assert_eq!(h.recorder.held_resources(), 5);

        h.recorder.poll(h.at(3800));
        assert!(h.recorder.is_recording());
    }

    #[test]
    fn test_stop_while_idle_is_ignored() {
        let mut h = harness(Options::default());
        h.recorder.handle_command(RecorderCommand::StopRecording, h.t0);
        assert!(h.recorder.state().is_idle());
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_denied_microphone_returns_to_idle_with_warning() {
        let mut h = harness(Options {
            deny_mic: true,
            ..Default::default()
        });
        h.start();

        assert!(h.recorder.state().is_idle());
        assert_eq!(h.recorder.held_resources(), 0);
        assert_eq!(h.ledger.live(), 0);
        assert!(h.encoder.created.lock().is_empty());

        let events = h.drain();
        let warnings = warnings(&events);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Opening microphone"));
        assert!(countdowns(&events).is_empty());
    }

    #[test]
    fn test_no_supported_container_fails_start() {
        let mut h = harness(Options {
            no_containers: true,
            ..Default::default()
        });
        h.start();

        assert!(h.recorder.state().is_idle());
        assert_eq!(h.ledger.live(), 0);
        assert_eq!(h.recorder.compositor().active_taps(), 0);
        assert_eq!(warnings(&h.drain()).len(), 1);
    }

    #[test]
    fn test_encoder_start_failure_rolls_back() {
        let mut h = harness(Options {
            fail_start: true,
            ..Default::default()
        });
        h.start();
        h.recorder.poll(h.at(3800));

        assert!(h.recorder.state().is_idle());
        assert_eq!(h.recorder.held_resources(), 0);
        assert_eq!(h.ledger.live(), 0);
        assert!(!h.recorder.clock().is_running());

        let events = h.drain();
        assert_eq!(warnings(&events).len(), 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, RecorderEvent::RecordingStarted)));
    }

    #[test]
    fn test_encoder_error_finalizes_with_partial_output() {
        let mut h = harness(Options::default());
        h.record();
        h.drain();

        h.encoder.fail_next_frame.store(true, Ordering::SeqCst);
        let interval = h.recorder.clock().interval();
        let t = h.at(3800) + interval;
        h.recorder.poll(t);
        h.recorder.poll(t);

        assert!(h.recorder.state().is_idle());
        assert_eq!(h.ledger.live(), 0);
        assert_eq!(&h.recorder.artifact().unwrap().data[..], b"partial");

        let events = h.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, RecorderEvent::Error { recoverable: true, message } if message == "disk full")));
        assert!(matches!(events.last(), Some(RecorderEvent::ArtifactReady(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_encoder_process_finalizes_with_error() {
        let work_dir =
            std::env::temp_dir().join(format!("drawstream-recorder-{}", std::process::id()));
        let encoders = ["libx264", "aac"].into_iter().map(String::from).collect();
        let backend = FfmpegBackend::from_encoder_list("/bin/true", &work_dir, encoders);
        let mut h = harness(Options {
            backend: Some(Box::new(backend)),
            ..Default::default()
        });
        h.start();

        let mut now = h.at(3800);
        h.recorder.poll(now);
        assert_eq!(h.recorder.stats().frames_encoded, 0);
        assert!(!h.recorder.is_recording());

        let deadline = Instant::now() + Duration::from_secs(10);
        while !h.recorder.state().is_idle() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            now += Duration::from_millis(10);
            h.recorder.poll(now);
        }

        assert!(h.recorder.state().is_idle());
        assert_eq!(h.recorder.held_resources(), 0);
        assert_eq!(h.ledger.live(), 0);
        assert!(!h.recorder.clock().is_running());

        let events = h.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, RecorderEvent::Error { recoverable: true, .. })));
        assert!(matches!(events.last(), Some(RecorderEvent::ArtifactReady(_))));
        let _ = std::fs::remove_dir_all(&work_dir);
    }

    #[test]
    fn test_late_ticks_keep_video_in_step_with_time() {
        let mut h = harness(Options::default());
        h.record();
        h.recorder.poll(h.at(4800));
        h.recorder.poll(h.at(5800));

        let expected = h.recorder.clock().slots_elapsed(h.at(3800), h.at(5800));
        assert_eq!(expected, 61);
        assert_eq!(h.recorder.stats().frames_composed, 3);
        assert_eq!(h.recorder.stats().frames_encoded, expected);
        assert_eq!(h.encoder.frames.load(Ordering::SeqCst) as u64, expected);
    }

    #[test]
    fn test_lost_microphone_warns_once() {
        let mut h = harness(Options::default());
        h.record();
        h.drain();

        h.mic_feeds.lock().clear();

        let interval = h.recorder.clock().interval();
        let mut now = h.at(3800);
        let mut lost = Vec::new();
        for _ in 0..200 {
            std::thread::sleep(Duration::from_millis(10));
            now += interval;
            h.recorder.poll(now);
            lost.extend(warnings(&h.drain()));
            if !lost.is_empty() {
                break;
            }
        }
        for _ in 0..5 {
            now += interval;
            h.recorder.poll(now);
            lost.extend(warnings(&h.drain()));
        }

        assert_eq!(lost.len(), 1);
        assert!(lost[0].contains("microphone"));
        assert!(h.recorder.is_recording());
    }

    #[test]
    fn test_get_state_reports_current() {
        let mut h = harness(Options::default());
        h.start();
        h.drain();

        assert!(h.recorder.handle_command(RecorderCommand::GetState, h.t0));
        let events = h.drain();
        assert!(matches!(
            events.as_slice(),
            [RecorderEvent::StateChanged { previous, current }]
                if *previous == *current && current.is_counting_down()
        ));
    }

    #[test]
    fn test_shutdown_during_countdown_releases() {
        let mut h = harness(Options::default());
        h.start();
        let keep_running = h.recorder.handle_command(RecorderCommand::Shutdown, h.at(200));

        assert!(!keep_running);
        assert!(h.recorder.state().is_idle());
        assert_eq!(h.ledger.live(), 0);
        assert!(matches!(h.drain().last(), Some(RecorderEvent::Shutdown)));
    }

    #[test]
    fn test_shutdown_while_recording_keeps_artifact() {
        let mut h = harness(Options::default());
        h.record();
        h.drain();

        assert!(!h.recorder.handle_command(RecorderCommand::Shutdown, h.at(4000)));
        assert!(h.recorder.state().is_idle());
        assert_eq!(h.ledger.live(), 0);

        let events = h.drain();
        let n = events.len();
        assert!(matches!(events[n - 2], RecorderEvent::ArtifactReady(_)));
        assert!(matches!(events[n - 1], RecorderEvent::Shutdown));
    }

    #[test]
    fn test_run_loop_records_in_real_time() {
        let h = harness(Options::default());
        let Harness {
            mut recorder,
            events,
            ledger,
            ..
        } = h;
        let (command_tx, command_rx) = drawstream_ipc::command_channel();
        recorder.command_rx = command_rx;

        let handle = std::thread::spawn(move || {
            recorder.run();
            recorder
        });

        let config = RecordingConfig {
            countdown_from: 1,
            countdown_step_ms: 20,
            settle_delay_ms: 20,
            ..Default::default()
        };
        command_tx
            .send(RecorderCommand::StartRecording { config })
            .unwrap();

        let wait_for = |pred: &dyn Fn(&RecorderEvent) -> bool| {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if let Ok(event) = events.recv_timeout(Duration::from_millis(50)) {
                    if pred(&event) {
                        return true;
                    }
                }
            }
            false
        };

        assert!(wait_for(&|e| matches!(e, RecorderEvent::RecordingStarted)));
        std::thread::sleep(Duration::from_millis(200));
        command_tx.send(RecorderCommand::StopRecording).unwrap();
        assert!(wait_for(&|e| matches!(e, RecorderEvent::ArtifactReady(_))));
        command_tx.send(RecorderCommand::Shutdown).unwrap();
        assert!(wait_for(&|e| matches!(e, RecorderEvent::Shutdown)));

        let recorder = handle.join().unwrap();
        assert!(recorder.stats().frames_encoded >= 1);
        assert!(recorder.artifact().is_some());
        assert_eq!(ledger.live(), 0);
    }
}
