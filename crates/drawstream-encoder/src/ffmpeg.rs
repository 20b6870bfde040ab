//! Encoder backed by the system `ffmpeg` binary.
//!
//! Video frames are piped as raw RGBA into one ffmpeg process while mixed
//! audio is spooled as f32le PCM. On stop a background thread muxes both
//! into the negotiated container and streams the file back as chunks.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam_channel::Sender;
use tracing::{debug, info, instrument, warn};

use drawstream_audio::MixedAudioChunk;
use drawstream_compositor::CanvasFrame;
use drawstream_ipc::ContainerFormat;

use crate::error::EncoderError;
use crate::{EncoderBackend, EncoderConfig, EncoderEvent, EncoderResult, EncoderState, MediaEncoder};

/// Size of the `DataAvailable` pieces the muxed file is delivered in.
const OUTPUT_CHUNK_SIZE: usize = 1 << 20;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

/// ffmpeg encoder names needed for a container.
fn codecs(format: ContainerFormat) -> (&'static str, &'static str) {
    match format {
        ContainerFormat::Mp4Avc1 => ("libx264", "aac"),
        ContainerFormat::WebmVp9Opus => ("libvpx-vp9", "libopus"),
        ContainerFormat::WebmVp8Opus => ("libvpx", "libopus"),
    }
}

/// Encoder names from the output of `ffmpeg -encoders`.
pub fn parse_encoder_list(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let flags = fields.next()?;
            let name = fields.next()?;
            flags
                .starts_with(['V', 'A', 'S'])
                .then(|| name.to_string())
        })
        .collect()
}

/// Creates [`FfmpegEncoder`]s for the containers the local ffmpeg supports.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    program: PathBuf,
    work_dir: PathBuf,
    encoders: HashSet<String>,
}

impl FfmpegBackend {
    /// Probe `ffmpeg` on PATH, spooling intermediates into `work_dir`.
    pub fn detect(work_dir: impl Into<PathBuf>) -> EncoderResult<Self> {
        Self::detect_with("ffmpeg", work_dir)
    }

    /// Probe a specific ffmpeg binary.
    #[instrument(name = "ffmpeg_detect", skip_all)]
    pub fn detect_with(
        program: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> EncoderResult<Self> {
        let program = program.into();
        let output = Command::new(&program)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| {
                EncoderError::NotAvailable(format!(
                    "failed to run '{}' (is ffmpeg installed and on PATH?): {e}",
                    program.display()
                ))
            })?;

        let encoders = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
        debug!(count = encoders.len(), "Detected ffmpeg encoders");
        Ok(Self::from_encoder_list(program, work_dir, encoders))
    }

    /// Backend with a known encoder list.
    pub fn from_encoder_list(
        program: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        encoders: HashSet<String>,
    ) -> Self {
        Self {
            program: program.into(),
            work_dir: work_dir.into(),
            encoders,
        }
    }

    /// Encoders the probed ffmpeg offers.
    pub fn encoders(&self) -> &HashSet<String> {
        &self.encoders
    }
}

impl EncoderBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn supports(&self, format: ContainerFormat) -> bool {
        let (video, audio) = codecs(format);
        self.encoders.contains(video) && self.encoders.contains(audio)
    }

    fn create(
        &mut self,
        config: EncoderConfig,
        events: Sender<EncoderEvent>,
    ) -> EncoderResult<Box<dyn MediaEncoder>> {
        if !self.supports(config.format) {
            return Err(EncoderError::NoSupportedFormat(vec![config.format]));
        }
        Ok(Box::new(FfmpegEncoder::new(
            config,
            self.program.clone(),
            &self.work_dir,
            events,
        )?))
    }
}

/// Arguments for the process that encodes piped RGBA frames.
pub(crate) fn video_args(config: &EncoderConfig, out: &Path) -> Vec<String> {
    let (codec, _) = codecs(config.format);
    let mut args: Vec<String> = [
        "-y",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
        "-s",
        &format!("{}x{}", config.width, config.height),
        "-r",
        &config.fps.to_string(),
        "-i",
        "pipe:0",
        "-an",
        "-c:v",
        codec,
        "-b:v",
        &config.video_bitrate_bps.to_string(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    match config.format {
        ContainerFormat::Mp4Avc1 => args.extend(["-preset", "veryfast"].map(String::from)),
        ContainerFormat::WebmVp9Opus | ContainerFormat::WebmVp8Opus => {
            args.extend(["-deadline", "realtime", "-cpu-used", "8"].map(String::from))
        }
    }

    args.extend(["-pix_fmt", "yuv420p"].map(String::from));
    args.push(out.display().to_string());
    args
}

/// Arguments for muxing the encoded video with the spooled PCM.
pub(crate) fn mux_args(
    config: &EncoderConfig,
    video: &Path,
    audio: Option<&Path>,
    out: &Path,
) -> Vec<String> {
    let (_, codec) = codecs(config.format);
    let mut args: Vec<String> = ["-y", "-loglevel", "error", "-i"]
        .map(String::from)
        .to_vec();
    args.push(video.display().to_string());

    match audio {
        Some(pcm) => {
            args.extend(
                [
                    "-f".to_string(),
                    "f32le".to_string(),
                    "-ar".to_string(),
                    config.sample_rate.to_string(),
                    "-ac".to_string(),
                    config.channels.to_string(),
                    "-i".to_string(),
                    pcm.display().to_string(),
                ],
            );
            args.extend(
                [
                    "-map".to_string(),
                    "0:v".to_string(),
                    "-map".to_string(),
                    "1:a".to_string(),
                    "-c:v".to_string(),
                    "copy".to_string(),
                    "-c:a".to_string(),
                    codec.to_string(),
                    "-b:a".to_string(),
                    config.audio_bitrate_bps.to_string(),
                ],
            );
        }
        None => args.extend(["-c:v", "copy", "-an"].map(String::from)),
    }

    if config.format == ContainerFormat::Mp4Avc1 {
        args.extend(["-movflags", "+faststart"].map(String::from));
    }
    args.push(out.display().to_string());
    args
}

/// Everything the finishing thread needs once capture has stopped.
struct FinishJob {
    config: EncoderConfig,
    program: PathBuf,
    video_proc: Child,
    stderr_drain: Option<JoinHandle<String>>,
    video_path: PathBuf,
    audio_path: Option<PathBuf>,
    output_path: PathBuf,
}

/// Encodes one session through ffmpeg.
pub struct FfmpegEncoder {
    config: EncoderConfig,
    program: PathBuf,
    events: Sender<EncoderEvent>,
    state: EncoderState,
    video_path: PathBuf,
    audio_path: PathBuf,
    output_path: PathBuf,
    video_proc: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<String>>,
    audio_spool: Option<BufWriter<File>>,
    audio_bytes: u64,
    frames: u64,
    finisher: Option<JoinHandle<()>>,
}

impl FfmpegEncoder {
    /// Create an inactive encoder spooling into `work_dir`.
    pub fn new(
        config: EncoderConfig,
        program: PathBuf,
        work_dir: &Path,
        events: Sender<EncoderEvent>,
    ) -> EncoderResult<Self> {
        config.validate()?;

        let session = NEXT_SESSION.fetch_add(1, Ordering::SeqCst);
        let stem = format!("drawstream-{}-{session}", std::process::id());

        Ok(Self {
            video_path: work_dir.join(format!("{stem}-video.mkv")),
            audio_path: work_dir.join(format!("{stem}-audio.pcm")),
            output_path: work_dir.join(format!("{stem}.{}", config.format.extension())),
            config,
            program,
            events,
            state: EncoderState::Inactive,
            video_proc: None,
            stdin: None,
            stderr_drain: None,
            audio_spool: None,
            audio_bytes: 0,
            frames: 0,
            finisher: None,
        })
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn spawn_video_process(&mut self) -> EncoderResult<()> {
        let mut child = Command::new(&self.program)
            .args(video_args(&self.config, &self.video_path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EncoderError::Initialization(format!(
                    "failed to spawn '{}': {e}",
                    self.program.display()
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            EncoderError::Initialization("failed to open ffmpeg stdin".into())
        })?;

        // ffmpeg blocks once the stderr pipe fills, so drain it.
        let stderr_drain = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });

        self.video_proc = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = stderr_drain;
        Ok(())
    }
}

impl MediaEncoder for FfmpegEncoder {
    fn state(&self) -> EncoderState {
        self.state
    }

    fn format(&self) -> ContainerFormat {
        self.config.format
    }

    #[instrument(name = "ffmpeg_start", skip(self), fields(mime = self.config.format.mime_type()))]
    fn start(&mut self) -> EncoderResult<()> {
        if self.state.is_active() || self.finisher.is_some() {
            return Err(EncoderError::AlreadyStarted);
        }
        if let Some(dir) = self.video_path.parent() {
            fs::create_dir_all(dir)?;
        }

        self.audio_spool = Some(BufWriter::new(File::create(&self.audio_path)?));
        self.spawn_video_process()?;
        self.state = EncoderState::Recording;

        info!(
            width = self.config.width,
            height = self.config.height,
            fps = self.config.fps,
            "ffmpeg encoder started"
        );
        Ok(())
    }

    fn push_video(&mut self, frame: &CanvasFrame) -> EncoderResult<()> {
        if self.state != EncoderState::Recording {
            return Err(EncoderError::NotRecording);
        }
        if frame.width != self.config.width || frame.height != self.config.height {
            return Err(EncoderError::InvalidInput(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.config.width, self.config.height
            )));
        }

        let stdin = self.stdin.as_mut().ok_or(EncoderError::NotRecording)?;
        stdin.write_all(&frame.data).map_err(|e| {
            EncoderError::Encoding(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;
        self.frames += 1;
        Ok(())
    }

    fn push_audio(&mut self, chunk: &MixedAudioChunk) -> EncoderResult<()> {
        if self.state != EncoderState::Recording {
            return Err(EncoderError::NotRecording);
        }
        let spool = self.audio_spool.as_mut().ok_or(EncoderError::NotRecording)?;
        spool.write_all(&chunk.data)?;
        self.audio_bytes += chunk.data.len() as u64;
        Ok(())
    }

    #[instrument(name = "ffmpeg_stop", skip(self))]
    fn request_stop(&mut self) -> EncoderResult<()> {
        if !self.state.is_active() {
            return Ok(());
        }
        self.state = EncoderState::Inactive;
        info!(frames = self.frames, audio_bytes = self.audio_bytes, "Stopping ffmpeg encoder");

        // Closing stdin lets ffmpeg flush and exit.
        drop(self.stdin.take());
        if let Some(mut spool) = self.audio_spool.take() {
            spool.flush()?;
        }

        let video_proc = self
            .video_proc
            .take()
            .ok_or_else(|| EncoderError::Encoding("ffmpeg process missing".into()))?;

        let job = FinishJob {
            config: self.config.clone(),
            program: self.program.clone(),
            video_proc,
            stderr_drain: self.stderr_drain.take(),
            video_path: self.video_path.clone(),
            audio_path: (self.audio_bytes > 0).then(|| self.audio_path.clone()),
            output_path: self.output_path.clone(),
        };
        let events = self.events.clone();
        let audio_path = self.audio_path.clone();

        let handle = thread::Builder::new()
            .name("ffmpeg-finish".into())
            .spawn(move || {
                match finish(job) {
                    Ok(data) => deliver(&events, data),
                    Err(e) => {
                        warn!("ffmpeg finalize failed: {}", e);
                        let _ = events.send(EncoderEvent::Error(e.to_string()));
                    }
                }
                let _ = fs::remove_file(&audio_path);
                let _ = events.send(EncoderEvent::Stopped);
            })?;

        self.finisher = Some(handle);
        Ok(())
    }

    fn name(&self) -> &'static str {
        codecs(self.config.format).0
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.video_proc.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.stderr_drain.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.finisher.take() {
            let _ = handle.join();
        }
        let _ = fs::remove_file(&self.audio_path);
        let _ = fs::remove_file(&self.video_path);
    }
}

/// Wait for the video encode, mux, and read the result back.
fn finish(mut job: FinishJob) -> EncoderResult<Bytes> {
    let status = job.video_proc.wait()?;
    let stderr = job
        .stderr_drain
        .take()
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    if !status.success() {
        return Err(EncoderError::Encoding(format!(
            "ffmpeg exited with status {status}: {}",
            stderr.trim()
        )));
    }

    let output = Command::new(&job.program)
        .args(mux_args(
            &job.config,
            &job.video_path,
            job.audio_path.as_deref(),
            &job.output_path,
        ))
        .stdin(Stdio::null())
        .output()?;
    let _ = fs::remove_file(&job.video_path);

    if !output.status.success() {
        return Err(EncoderError::Encoding(format!(
            "ffmpeg mux exited with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let data = fs::read(&job.output_path)?;
    let _ = fs::remove_file(&job.output_path);
    Ok(Bytes::from(data))
}

fn deliver(events: &Sender<EncoderEvent>, data: Bytes) {
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + OUTPUT_CHUNK_SIZE).min(data.len());
        if events
            .send(EncoderEvent::DataAvailable(data.slice(offset..end)))
            .is_err()
        {
            return;
        }
        offset = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drawstream_ipc::RecordingConfig;

    const ENCODERS: &str = "\
Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC
 V....D libvpx               libvpx VP8 (codec vp8)
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libopus              libopus Opus (codec opus)
";

    fn config(format: ContainerFormat) -> EncoderConfig {
        EncoderConfig::from_recording(&RecordingConfig::default(), format, 1920, 1080)
    }

    fn backend() -> FfmpegBackend {
        FfmpegBackend::from_encoder_list(
            "ffmpeg",
            std::env::temp_dir(),
            parse_encoder_list(ENCODERS),
        )
    }

    #[test]
    fn test_parse_encoder_list_skips_legend() {
        let names = parse_encoder_list(ENCODERS);
        assert!(names.contains("libx264"));
        assert!(names.contains("libopus"));
        assert!(!names.contains("="));
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_supports_requires_both_codecs() {
        let b = backend();
        assert!(b.supports(ContainerFormat::Mp4Avc1));
        assert!(!b.supports(ContainerFormat::WebmVp9Opus));
        assert!(b.supports(ContainerFormat::WebmVp8Opus));
    }

    #[test]
    fn test_video_args_pipe_rgba() {
        let args = video_args(&config(ContainerFormat::Mp4Avc1), Path::new("/tmp/v.mkv"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s 1920x1080 -r 30 -i pipe:0"));
        assert!(joined.contains("-c:v libx264 -b:v 12000000"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/v.mkv"));
    }

    #[test]
    fn test_mux_args_with_and_without_audio() {
        let cfg = config(ContainerFormat::WebmVp9Opus);
        let with = mux_args(&cfg, Path::new("v.mkv"), Some(Path::new("a.pcm")), Path::new("o.webm"));
        let joined = with.join(" ");
        assert!(joined.contains("-f f32le -ar 48000 -ac 2 -i a.pcm"));
        assert!(joined.contains("-c:a libopus -b:a 128000"));
        assert!(!joined.contains("faststart"));

        let without = mux_args(&cfg, Path::new("v.mkv"), None, Path::new("o.webm"));
        assert!(without.join(" ").contains("-c:v copy -an"));
    }

    #[test]
    fn test_detect_missing_binary() {
        let err = FfmpegBackend::detect_with("/nonexistent/ffmpeg-binary", std::env::temp_dir())
            .unwrap_err();
        assert!(matches!(err, EncoderError::NotAvailable(_)));
    }

    #[test]
    fn test_push_before_start_is_rejected() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut encoder = FfmpegEncoder::new(
            config(ContainerFormat::Mp4Avc1),
            PathBuf::from("/nonexistent/ffmpeg-binary"),
            &std::env::temp_dir(),
            tx,
        )
        .unwrap();
        let chunk = MixedAudioChunk {
            data: Bytes::from_static(&[0; 8]),
            pts_100ns: 0,
            sequence: 0,
        };
        assert!(matches!(encoder.push_audio(&chunk), Err(EncoderError::NotRecording)));
        assert!(encoder.request_stop().is_ok());
        assert!(matches!(encoder.start(), Err(EncoderError::Initialization(_))));
        assert_eq!(encoder.state(), EncoderState::Inactive);
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_process_fails_push_then_reports_stop() {
        let work_dir = std::env::temp_dir().join(format!("drawstream-exit-{}", std::process::id()));
        let mut backend = FfmpegBackend::from_encoder_list(
            "/bin/true",
            &work_dir,
            parse_encoder_list(ENCODERS),
        );
        let (tx, rx) = crossbeam_channel::unbounded();
        let cfg = EncoderConfig {
            width: 64,
            height: 36,
            ..config(ContainerFormat::Mp4Avc1)
        };
        let mut encoder = backend.create(cfg, tx).unwrap();
        encoder.start().unwrap();

        let frame = CanvasFrame {
            data: Bytes::from(vec![0u8; 64 * 36 * 4]),
            width: 64,
            height: 36,
            timestamp: drawstream_compositor::CaptureTimestamp::now(std::time::Instant::now()),
            sequence: 1,
        };
        let mut failure = None;
        for _ in 0..200 {
            if let Err(e) = encoder.push_video(&frame) {
                failure = Some(e);
                break;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }
        let failure = failure.expect("push into an exited process should fail");
        assert!(failure.is_fatal(), "{failure}");
        assert_eq!(encoder.state(), EncoderState::Recording);

        encoder.request_stop().unwrap();
        let events: Vec<EncoderEvent> = rx
            .iter()
            .take_while(|e| !matches!(e, EncoderEvent::Stopped))
            .collect();
        assert!(events.iter().any(|e| matches!(e, EncoderEvent::Error(_))));
        let _ = fs::remove_dir_all(&work_dir);
    }

    #[test]
    fn test_deliver_splits_large_output() {
        let (tx, rx) = crossbeam_channel::unbounded();
        deliver(&tx, Bytes::from(vec![7u8; OUTPUT_CHUNK_SIZE + 10]));
        let sizes: Vec<usize> = rx
            .try_iter()
            .map(|e| match e {
                EncoderEvent::DataAvailable(b) => b.len(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sizes, vec![OUTPUT_CHUNK_SIZE, 10]);
    }
}
