//! Per-session recording statistics.

use std::time::{Duration, Instant};

use tracing::info;

use drawstream_compositor::ComposeReport;

/// How often running totals are logged.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Counters for one recording, reset at every start.
#[derive(Debug, Clone, Default)]
pub struct RecordingStats {
    /// Compose passes run.
    pub frames_composed: u64,

    /// Frames accepted by the encoder.
    pub frames_encoded: u64,

    /// Panes skipped because their source had no frame.
    pub panes_skipped: u64,

    /// Mixed audio chunks accepted by the encoder.
    pub audio_chunks: u64,

    /// Frames or chunks the encoder refused.
    pub encode_drops: u64,

    /// Encoder output bytes collected.
    pub bytes_collected: u64,

    started: Option<Instant>,
    last_report: Option<Instant>,
    last_report_frames: u64,
}

impl RecordingStats {
    /// Zero every counter and start timing at `now`.
    pub fn start(&mut self, now: Instant) {
        *self = Self {
            started: Some(now),
            last_report: Some(now),
            ..Self::default()
        };
    }

    /// Record one compose pass.
    pub fn record_compose(&mut self, report: &ComposeReport) {
        self.frames_composed += 1;
        self.panes_skipped += report.skipped_empty as u64;
    }

    /// Record a frame handed to the encoder.
    pub fn record_frame_encoded(&mut self) {
        self.frames_encoded += 1;
    }

    /// Record a mixed chunk handed to the encoder.
    pub fn record_audio_chunk(&mut self) {
        self.audio_chunks += 1;
    }

    /// Record media the encoder refused.
    pub fn record_encode_drop(&mut self) {
        self.encode_drops += 1;
    }

    /// Record encoder output.
    pub fn record_bytes(&mut self, bytes: usize) {
        self.bytes_collected += bytes as u64;
    }

    /// Time since the recording started.
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started
            .map(|s| now.saturating_duration_since(s))
            .unwrap_or_default()
    }

    /// Log running totals at most once per report interval.
    pub fn maybe_report(&mut self, now: Instant) {
        let Some(last) = self.last_report else {
            return;
        };
        let since = now.saturating_duration_since(last);
        if since < REPORT_INTERVAL {
            return;
        }

        let fps = (self.frames_composed - self.last_report_frames) as f64 / since.as_secs_f64();
        info!(
            fps = %format_args!("{:.1}", fps),
            frames = self.frames_encoded,
            audio_chunks = self.audio_chunks,
            drops = self.encode_drops,
            skipped_panes = self.panes_skipped,
            bytes = self.bytes_collected,
            "Recording stats"
        );

        self.last_report = Some(now);
        self.last_report_frames = self.frames_composed;
    }
}
