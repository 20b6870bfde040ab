//! Fake collaborators for driving the recorder in tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Sender;
use parking_lot::Mutex;

use drawstream_audio::{
    AudioChunk, AudioError, AudioInput, AudioResult, AudioSourceKind, MediaDevices, MediaTrack,
    MicConstraints, MixedAudioChunk, SourceAudio,
};
use drawstream_compositor::CanvasFrame;
use drawstream_encoder::{
    EncoderBackend, EncoderConfig, EncoderError, EncoderEvent, EncoderResult, EncoderState,
    MediaEncoder,
};
use drawstream_ipc::ContainerFormat;

/// Counts live fake resources and records the order they were released in.
#[derive(Clone, Default)]
pub(crate) struct Ledger {
    live: Arc<AtomicUsize>,
    released: Arc<Mutex<Vec<&'static str>>>,
}

impl Ledger {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<&'static str> {
        self.released.lock().clone()
    }

    fn open(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self, what: &'static str) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.released.lock().push(what);
    }
}

struct FakeTrack {
    ledger: Ledger,
    name: &'static str,
    live: bool,
}

impl MediaTrack for FakeTrack {
    fn stop(&mut self) {
        if self.live {
            self.live = false;
            self.ledger.close(self.name);
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

fn open_input(
    ledger: &Ledger,
    kind: AudioSourceKind,
    feeds: &Mutex<Vec<Sender<AudioChunk>>>,
) -> AudioInput {
    let (tx, rx) = crossbeam_channel::bounded(16);
    feeds.lock().push(tx);
    ledger.open();
    let track = FakeTrack {
        ledger: ledger.clone(),
        name: kind.name(),
        live: true,
    };
    AudioInput::new(kind, rx, Box::new(track))
}

pub(crate) struct FakeDevices {
    pub ledger: Ledger,
    pub deny: bool,
    pub feeds: Arc<Mutex<Vec<Sender<AudioChunk>>>>,
    pub requested: Arc<Mutex<Vec<MicConstraints>>>,
}

impl FakeDevices {
    pub fn new(ledger: &Ledger) -> Self {
        Self {
            ledger: ledger.clone(),
            deny: false,
            feeds: Arc::default(),
            requested: Arc::default(),
        }
    }
}

impl MediaDevices for FakeDevices {
    fn open_microphone(&mut self, constraints: &MicConstraints) -> AudioResult<AudioInput> {
        self.requested.lock().push(constraints.clone());
        if self.deny {
            return Err(AudioError::PermissionDenied("microphone".into()));
        }
        Ok(open_input(&self.ledger, AudioSourceKind::Microphone, &self.feeds))
    }
}

pub(crate) struct FakeSource {
    pub ledger: Ledger,
    pub unavailable: bool,
    pub feeds: Arc<Mutex<Vec<Sender<AudioChunk>>>>,
}

impl FakeSource {
    pub fn new(ledger: &Ledger) -> Self {
        Self {
            ledger: ledger.clone(),
            unavailable: false,
            feeds: Arc::default(),
        }
    }
}

impl SourceAudio for FakeSource {
    fn tap(&mut self) -> AudioResult<AudioInput> {
        if self.unavailable {
            return Err(AudioError::SourceUnavailable("no video loaded".into()));
        }
        Ok(open_input(&self.ledger, AudioSourceKind::SourceVideo, &self.feeds))
    }
}

/// Shared switches and counters of the fake encoder.
#[derive(Clone, Default)]
pub(crate) struct EncoderProbe {
    pub fail_next_frame: Arc<AtomicBool>,
    pub start_calls: Arc<AtomicUsize>,
    pub frames: Arc<AtomicUsize>,
    pub created: Arc<Mutex<Vec<ContainerFormat>>>,
}

pub(crate) struct FakeBackend {
    pub ledger: Ledger,
    pub supported: Vec<ContainerFormat>,
    pub fail_start: bool,
    pub probe: EncoderProbe,
}

impl FakeBackend {
    pub fn new(ledger: &Ledger) -> Self {
        Self {
            ledger: ledger.clone(),
            supported: ContainerFormat::PREFERRED.to_vec(),
            fail_start: false,
            probe: EncoderProbe::default(),
        }
    }
}

impl EncoderBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports(&self, format: ContainerFormat) -> bool {
        self.supported.contains(&format)
    }

    fn create(
        &mut self,
        config: EncoderConfig,
        events: Sender<EncoderEvent>,
    ) -> EncoderResult<Box<dyn MediaEncoder>> {
        self.ledger.open();
        self.probe.created.lock().push(config.format);
        Ok(Box::new(FakeEncoder {
            ledger: self.ledger.clone(),
            format: config.format,
            state: EncoderState::Inactive,
            events,
            fail_start: self.fail_start,
            probe: self.probe.clone(),
        }))
    }
}

/// Emits all of its output synchronously when asked to stop.
struct FakeEncoder {
    ledger: Ledger,
    format: ContainerFormat,
    state: EncoderState,
    events: Sender<EncoderEvent>,
    fail_start: bool,
    probe: EncoderProbe,
}

impl MediaEncoder for FakeEncoder {
    fn state(&self) -> EncoderState {
        self.state
    }

    fn format(&self) -> ContainerFormat {
        self.format
    }

    fn start(&mut self) -> EncoderResult<()> {
        self.probe.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(EncoderError::Initialization("start refused".into()));
        }
        self.state = EncoderState::Recording;
        Ok(())
    }

    fn push_video(&mut self, _frame: &CanvasFrame) -> EncoderResult<()> {
        if !self.state.is_active() {
            return Err(EncoderError::NotRecording);
        }
        if self.probe.fail_next_frame.swap(false, Ordering::SeqCst) {
            self.state = EncoderState::Inactive;
            let _ = self.events.send(EncoderEvent::DataAvailable(Bytes::from_static(b"partial")));
            let _ = self.events.send(EncoderEvent::Error("disk full".into()));
            let _ = self.events.send(EncoderEvent::Stopped);
            return Ok(());
        }
        self.probe.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn push_audio(&mut self, _chunk: &MixedAudioChunk) -> EncoderResult<()> {
        if !self.state.is_active() {
            return Err(EncoderError::NotRecording);
        }
        Ok(())
    }

    fn request_stop(&mut self) -> EncoderResult<()> {
        if !self.state.is_active() {
            return Ok(());
        }
        self.state = EncoderState::Inactive;
        let _ = self.events.send(EncoderEvent::DataAvailable(Bytes::from_static(b"head-")));
        let _ = self.events.send(EncoderEvent::DataAvailable(Bytes::from_static(b"tail")));
        let _ = self.events.send(EncoderEvent::Stopped);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

impl Drop for FakeEncoder {
    fn drop(&mut self) {
        self.ledger.close("encoder");
    }
}
