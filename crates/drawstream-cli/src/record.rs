//! The `record` command: wire collaborators, run one session, save the file.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use kurbo::{Point, Rect};
use tracing::{debug, error, info, warn};

use drawstream_compositor::{SharedProbe, SharedSnapshot};
use drawstream_encoder::FfmpegBackend;
use drawstream_engine::{create_recorder, Collaborators};
use drawstream_ipc::{
    command_channel, event_channel, ContainerFormat, FrameSnapshot, RecorderCommand,
    RecorderEvent, RecordingArtifact, VideoFormat, VideoLayout, ZoomTransform,
};

use crate::config::{self, Overrides};
use crate::synthetic::{SyntheticScene, ToneMicrophone, ToneSource};

/// Extra time allowed for acquisition, countdown and flushing.
const SESSION_GRACE: Duration = Duration::from_secs(30);

/// How long to wait for one recorder event.
const EVENT_POLL: Duration = Duration::from_millis(50);

/// Size of the simulated camera widget in screen pixels.
const WIDGET_SIZE: (f64, f64) = (200.0, 150.0);

/// Widget margin from the recording area's corner.
const WIDGET_MARGIN: f64 = 16.0;

#[derive(Parser, Debug)]
pub struct RecordArgs {
    /// Recording configuration JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output aspect: desktop (16:9) or phone (9:16).
    #[arg(long, default_value = "desktop", value_parser = parse_format)]
    format: VideoFormat,

    /// Pane layout: solo or split.
    #[arg(long, default_value = "solo", value_parser = parse_layout)]
    layout: VideoLayout,

    /// Exchange the video and camera halves in split layout.
    #[arg(long, default_value_t = false)]
    swap: bool,

    /// Record with the camera switched off.
    #[arg(long, default_value_t = false)]
    no_camera: bool,

    /// Double-click zoom at an on-screen point of the recording area, "x,y".
    #[arg(long, value_parser = parse_point)]
    zoom_at: Option<Point>,

    /// Seconds to record after the countdown.
    #[arg(long, default_value_t = 5.0)]
    seconds: f64,

    /// Output directory.
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Microphone device id.
    #[arg(long)]
    mic: Option<String>,

    /// Record the microphone without the compressor.
    #[arg(long, default_value_t = false)]
    no_enhance: bool,

    /// Composite frame rate.
    #[arg(long)]
    fps: Option<u32>,

    /// Preferred container: mp4, webm-vp9 or webm-vp8.
    #[arg(long, value_parser = parse_container)]
    container: Option<ContainerFormat>,

    /// First countdown value.
    #[arg(long)]
    countdown: Option<u8>,

    /// ffmpeg executable.
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

impl RecordArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            mic_device: self.mic.clone(),
            no_enhance: self.no_enhance,
            fps: self.fps,
            container: self.container,
            countdown_from: self.countdown,
        }
    }

    fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            layout: self.layout,
            format: self.format,
            swapped: self.swap,
            camera_enabled: !self.no_camera,
            zoom: self
                .zoom_at
                .map(|p| ZoomTransform::identity().toggle_at(p))
                .unwrap_or_default(),
        }
    }
}

fn parse_format(s: &str) -> Result<VideoFormat, String> {
    VideoFormat::from_name(s).ok_or_else(|| format!("unknown format '{s}'"))
}

fn parse_layout(s: &str) -> Result<VideoLayout, String> {
    VideoLayout::from_name(s).ok_or_else(|| format!("unknown layout '{s}'"))
}

fn parse_container(s: &str) -> Result<ContainerFormat, String> {
    match s {
        "mp4" => Ok(ContainerFormat::Mp4Avc1),
        "webm-vp9" => Ok(ContainerFormat::WebmVp9Opus),
        "webm-vp8" => Ok(ContainerFormat::WebmVp8Opus),
        _ => Err(format!("unknown container '{s}'")),
    }
}

fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{s}'"))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("bad x: {e}"))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("bad y: {e}"))?;
    Ok(Point::new(x, y))
}

/// On-screen geometry of a window showing the canvas at half size, with the
/// camera widget in the bottom-right corner.
fn simulated_layout(format: VideoFormat) -> SharedProbe {
    let (w, h) = format.canvas_size();
    let area = Rect::new(0.0, 0.0, f64::from(w) / 2.0, f64::from(h) / 2.0);
    let widget = Rect::new(
        area.x1 - WIDGET_MARGIN - WIDGET_SIZE.0,
        area.y1 - WIDGET_MARGIN - WIDGET_SIZE.1,
        area.x1 - WIDGET_MARGIN,
        area.y1 - WIDGET_MARGIN,
    );

    let probe = SharedProbe::new();
    probe.set_recording_area(Some(area));
    probe.set_camera_overlay(Some(widget));
    probe
}

pub fn run(args: RecordArgs) -> anyhow::Result<()> {
    let mut config = config::load(args.config.as_deref())?;
    args.overrides().apply(&mut config);
    config::validate(&config)?;
    anyhow::ensure!(args.seconds > 0.0, "--seconds must be positive");

    let work_dir = std::env::temp_dir().join("drawstream");
    fs::create_dir_all(&work_dir)
        .with_context(|| format!("create work dir '{}'", work_dir.display()))?;
    let backend = FfmpegBackend::detect_with(&args.ffmpeg, &work_dir)
        .with_context(|| format!("run '{}'", args.ffmpeg.display()))?;

    let scene = SyntheticScene::start(config.fps, !args.no_camera)?;
    let collaborators = Collaborators {
        surfaces: scene.surfaces(),
        snapshot: Arc::new(SharedSnapshot::new(args.snapshot())),
        probe: Arc::new(simulated_layout(args.format)),
        devices: Box::new(ToneMicrophone::new()),
        source_audio: Box::new(ToneSource),
        backend: Box::new(backend),
    };

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();
    let mut recorder = create_recorder(command_rx, event_tx, collaborators)?;

    let handle = thread::Builder::new()
        .name("recorder".into())
        .spawn(move || {
            info!("Recorder thread starting");
            recorder.run();
            info!("Recorder thread stopped");
        })
        .context("spawn recorder thread")?;

    info!(
        format = ?args.format,
        layout = ?args.layout,
        seconds = args.seconds,
        "Starting recording"
    );
    command_tx.send(RecorderCommand::StartRecording { config })?;
    let outcome = drive(&command_tx, &event_rx, Duration::from_secs_f64(args.seconds));

    let _ = command_tx.send(RecorderCommand::Shutdown);
    if handle.join().is_err() {
        warn!("Recorder thread panicked");
    }
    drop(scene);

    let artifact = outcome?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("create output dir '{}'", args.out.display()))?;
    let path = args.out.join(&artifact.info.file_name);
    fs::write(&path, &artifact.data).with_context(|| format!("write '{}'", path.display()))?;

    info!(
        mime = %artifact.info.mime_type,
        bytes = artifact.info.size_bytes,
        frames = artifact.info.frames,
        "Saved recording"
    );
    println!("{}", path.display());
    Ok(())
}

/// Follow the session's events, stop after `length` of recording, and
/// return the finished artifact.
fn drive(
    commands: &Sender<RecorderCommand>,
    events: &Receiver<RecorderEvent>,
    length: Duration,
) -> anyhow::Result<RecordingArtifact> {
    let give_up = Instant::now() + length + SESSION_GRACE;
    let mut counting = false;
    let mut started: Option<Instant> = None;
    let mut stop_sent = false;
    let mut last_warning: Option<String> = None;

    loop {
        let now = Instant::now();
        anyhow::ensure!(now < give_up, "recording did not finish in time");

        if let Some(at) = started {
            if !stop_sent && now >= at + length {
                info!("Stopping recording");
                commands.send(RecorderCommand::StopRecording)?;
                stop_sent = true;
            }
        }

        let event = match events.recv_timeout(EVENT_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => bail!("recorder stopped unexpectedly"),
        };

        match event {
            RecorderEvent::Ready => debug!("Recorder ready"),
            RecorderEvent::Countdown(0) => {
                counting = true;
                info!("REC");
            }
            RecorderEvent::Countdown(n) => {
                counting = true;
                info!("{n}");
            }
            RecorderEvent::RecordingStarted => {
                info!(seconds = length.as_secs_f64(), "Recording");
                started = Some(Instant::now());
            }
            RecorderEvent::Warning { message } => {
                warn!("{message}");
                if !counting && started.is_none() {
                    bail!("could not start recording: {message}");
                }
                last_warning = Some(message);
            }
            RecorderEvent::Error {
                recoverable,
                message,
            } => {
                error!(recoverable, "{message}");
                if !recoverable {
                    bail!("recording failed: {message}");
                }
            }
            RecorderEvent::StateChanged { previous, current } => {
                debug!(previous = previous.name(), current = current.name(), "Session state");
                if previous.is_counting_down() && current.is_idle() {
                    let reason = last_warning.take().unwrap_or_else(|| "unknown error".into());
                    bail!("recording did not start: {reason}");
                }
            }
            RecorderEvent::ArtifactReady(artifact) => return Ok(artifact),
            RecorderEvent::Shutdown => bail!("recorder shut down before the recording finished"),
        }
    }
}
