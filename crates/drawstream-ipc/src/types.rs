//! Common types used across recorder messages.

use bytes::Bytes;
use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

/// Zoom factor applied by the double-click gesture.
pub const DEFAULT_ZOOM_SCALE: f64 = 2.5;

/// Output aspect of the recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    /// 16:9 landscape.
    #[default]
    Desktop,

    /// 9:16 portrait.
    Phone,
}

impl VideoFormat {
    /// Fixed recording resolution (width, height) for this format.
    pub fn canvas_size(self) -> (u32, u32) {
        match self {
            Self::Desktop => (1920, 1080),
            Self::Phone => (1080, 1920),
        }
    }

    /// Parse from the lowercase name used in configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "desktop" => Some(Self::Desktop),
            "phone" => Some(Self::Phone),
            _ => None,
        }
    }
}

/// Arrangement of the visual panes on the canvas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoLayout {
    /// Main video fills the canvas; the camera floats in a draggable widget.
    #[default]
    Solo,

    /// Canvas halved between the main video and the camera.
    Split,
}

impl VideoLayout {
    /// Parse from the lowercase name used in configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "solo" => Some(Self::Solo),
            "split" | "double" => Some(Self::Split),
            _ => None,
        }
    }
}

/// User zoom/pan of the main pane.
///
/// `offset` is in unscaled on-screen pixels of the recording area; the
/// compositor multiplies it by the screen→canvas scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomTransform {
    /// Zoom factor, never below 1.
    pub scale: f64,

    /// Pan offset applied before scaling.
    pub offset: Vec2,
}

impl Default for ZoomTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ZoomTransform {
    /// No zoom, no pan.
    pub const fn identity() -> Self {
        Self {
            scale: 1.0,
            offset: Vec2::ZERO,
        }
    }

    /// Zoom by `scale` keeping `anchor` at the same on-screen position.
    pub fn anchored_at(anchor: Point, scale: f64) -> Self {
        let scale = scale.max(1.0);
        Self {
            scale,
            offset: Vec2::new(anchor.x - anchor.x * scale, anchor.y - anchor.y * scale),
        }
    }

    /// Double-click gesture: zoom in at `point`, or reset when already zoomed.
    pub fn toggle_at(&self, point: Point) -> Self {
        if self.is_zoomed() {
            Self::identity()
        } else {
            Self::anchored_at(point, DEFAULT_ZOOM_SCALE)
        }
    }

    /// Returns true if any magnification is applied.
    pub fn is_zoomed(&self) -> bool {
        self.scale > 1.0
    }

    /// Map an on-screen point to the unzoomed pane space.
    pub fn screen_to_local(&self, point: Point) -> Point {
        Point::new(
            (point.x - self.offset.x) / self.scale,
            (point.y - self.offset.y) / self.scale,
        )
    }

    /// Map a point in unzoomed pane space to the screen.
    pub fn local_to_screen(&self, point: Point) -> Point {
        Point::new(
            point.x * self.scale + self.offset.x,
            point.y * self.scale + self.offset.y,
        )
    }
}

/// Read-only copy of UI state consumed by one compose pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    /// Pane arrangement.
    pub layout: VideoLayout,

    /// Output aspect.
    pub format: VideoFormat,

    /// Exchange the main and camera halves in split layout.
    pub swapped: bool,

    /// Whether the live camera is on.
    pub camera_enabled: bool,

    /// Zoom/pan of the main pane.
    pub zoom: ZoomTransform,
}

/// Container/codec combinations an encoder may produce, most preferred first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerFormat {
    /// MP4 with H.264 video and AAC audio.
    Mp4Avc1,

    /// WebM with VP9 video and Opus audio.
    WebmVp9Opus,

    /// WebM with VP8 video and Opus audio.
    WebmVp8Opus,
}

impl ContainerFormat {
    /// Default preference order used for negotiation.
    pub const PREFERRED: [Self; 3] = [Self::Mp4Avc1, Self::WebmVp9Opus, Self::WebmVp8Opus];

    /// MIME type including codec parameters.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Mp4Avc1 => "video/mp4;codecs=avc1",
            Self::WebmVp9Opus => "video/webm;codecs=vp9,opus",
            Self::WebmVp8Opus => "video/webm;codecs=vp8,opus",
        }
    }

    /// File extension for downloads.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4Avc1 => "mp4",
            Self::WebmVp9Opus | Self::WebmVp8Opus => "webm",
        }
    }

    /// Download name stamped with a unix-millisecond timestamp.
    pub fn file_name(self, prefix: &str, unix_millis: u128) -> String {
        format!("{prefix}-{unix_millis}.{}", self.extension())
    }
}

/// Configuration for starting a capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Microphone device identifier (None for the system default).
    pub mic_device: Option<String>,

    /// Route the microphone through the dynamics compressor.
    pub audio_enhanced: bool,

    /// Composite frames per second.
    pub fps: u32,

    /// Video bitrate in bits per second.
    pub video_bitrate_bps: u32,

    /// Audio bitrate in bits per second.
    pub audio_bitrate_bps: u32,

    /// First countdown value shown.
    pub countdown_from: u8,

    /// Delay between countdown values in milliseconds.
    pub countdown_step_ms: u64,

    /// Delay after the countdown reaches zero before recording starts.
    pub settle_delay_ms: u64,

    /// Containers to try, most preferred first.
    pub containers: Vec<ContainerFormat>,

    /// Prefix of the generated artifact name.
    pub file_prefix: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            mic_device: None,
            audio_enhanced: true,
            fps: 30,
            video_bitrate_bps: 12_000_000,
            audio_bitrate_bps: 128_000,
            countdown_from: 3,
            countdown_step_ms: 1000,
            settle_delay_ms: 800,
            containers: ContainerFormat::PREFERRED.to_vec(),
            file_prefix: "DrawStream-Pro".to_string(),
        }
    }
}

/// Metadata of a finished recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Generated download name.
    pub file_name: String,

    /// MIME type reported by the encoder.
    pub mime_type: String,

    /// Total size of the muxed file.
    pub size_bytes: u64,

    /// Number of encoded chunks concatenated.
    pub chunk_count: usize,

    /// Number of composited frames handed to the encoder.
    pub frames: u64,
}

/// A finished, muxed audio+video recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingArtifact {
    /// Name, type and size.
    pub info: ArtifactInfo,

    /// File contents. Not serialized; stays in process.
    #[serde(skip)]
    pub data: Bytes,
}
