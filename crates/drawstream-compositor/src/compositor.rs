//! The per-frame compose pass.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use drawstream_ipc::{FrameSnapshot, VideoFormat};

use crate::draw::{draw_pane, DrawOutcome};
use crate::frame::{Canvas, CanvasFrame, CaptureTimestamp, RgbaFrame};
use crate::layout::{camera_overlay_pane, compute_panes, PaneDescriptor, PaneSource};
use crate::probe::{scale_factor, LayoutProbe};
use crate::surface::Surface;
use crate::CompositorResult;

/// Canvas background, `#0a0f1e`.
pub const BACKGROUND_RGBA: [u8; 4] = [0x0a, 0x0f, 0x1e, 0xff];

/// The live inputs sampled every frame.
#[derive(Clone)]
pub struct Surfaces {
    /// The pre-recorded video.
    pub main_video: Arc<dyn Surface>,

    /// Camera feed shown in split layout.
    pub camera: Arc<dyn Surface>,

    /// Camera feed shown in the floating widget.
    pub camera_overlay: Arc<dyn Surface>,

    /// Composed annotation strokes, straight alpha.
    pub annotation: Arc<dyn Surface>,
}

/// What one compose pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeReport {
    /// Compose pass number.
    pub sequence: u64,

    /// Panes that received pixels.
    pub drawn: usize,

    /// Panes whose source had no frame yet.
    pub skipped_empty: usize,

    /// Camera panes left as background because the camera is off.
    pub unpainted: usize,
}

/// Handle for a live capture of the canvas, like a canvas capture stream.
///
/// Dropping it releases the tap.
#[derive(Debug)]
pub struct CanvasTap {
    fps: u32,
    taps: Arc<AtomicUsize>,
}

impl CanvasTap {
    /// Frame rate the tap was opened with.
    pub fn fps(&self) -> u32 {
        self.fps
    }
}

impl Drop for CanvasTap {
    fn drop(&mut self) {
        self.taps.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the output canvas and paints it from the live surfaces.
pub struct Compositor {
    canvas: Canvas,
    surfaces: Surfaces,
    background: [u8; 4],
    sequence: u64,
    taps: Arc<AtomicUsize>,
}

impl Compositor {
    /// Create a compositor sized for `format`.
    pub fn new(surfaces: Surfaces, format: VideoFormat) -> CompositorResult<Self> {
        let (width, height) = format.canvas_size();
        let mut canvas = Canvas::new(width, height)?;
        canvas.fill(BACKGROUND_RGBA);

        Ok(Self {
            canvas,
            surfaces,
            background: BACKGROUND_RGBA,
            sequence: 0,
            taps: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Resize the canvas to the recording resolution of `format`.
    pub fn set_format(&mut self, format: VideoFormat) -> CompositorResult<()> {
        let (width, height) = format.canvas_size();
        if (width, height) != (self.canvas.width(), self.canvas.height()) {
            debug!(width, height, "Resizing canvas");
            self.canvas.resize(width, height)?;
            self.canvas.fill(self.background);
        }
        Ok(())
    }

    /// The output canvas.
    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Open a live tap on the canvas at `fps`.
    pub fn capture_stream(&self, fps: u32) -> CanvasTap {
        self.taps.fetch_add(1, Ordering::SeqCst);
        CanvasTap {
            fps,
            taps: Arc::clone(&self.taps),
        }
    }

    /// Number of canvas taps still open.
    pub fn active_taps(&self) -> usize {
        self.taps.load(Ordering::SeqCst)
    }

    /// Paint one frame: background, primary panes in order, then the floating
    /// camera pane.
    #[instrument(name = "compose", skip_all, fields(sequence = self.sequence + 1))]
    pub fn compose(&mut self, snapshot: &FrameSnapshot, probe: &dyn LayoutProbe) -> ComposeReport {
        self.sequence += 1;
        let mut report = ComposeReport {
            sequence: self.sequence,
            ..Default::default()
        };

        self.canvas.fill(self.background);

        let geometry = probe.geometry();
        let scale = scale_factor(&geometry, self.canvas.width());
        let panes = compute_panes(snapshot, self.canvas.width(), self.canvas.height());
        let overlay = camera_overlay_pane(snapshot, &geometry, scale);

        let annotation = self.surfaces.annotation.current_frame();

        for pane in panes.iter().chain(overlay.iter()) {
            if pane.source == PaneSource::Camera && !snapshot.camera_enabled {
                report.unpainted += 1;
                continue;
            }

            let source = self.frame_for(pane);
            let overlay = pane.annotated.then_some(&annotation);

            match draw_pane(
                &mut self.canvas,
                pane,
                &source,
                overlay,
                &snapshot.zoom,
                scale,
            ) {
                DrawOutcome::Drawn => report.drawn += 1,
                DrawOutcome::SkippedEmpty => report.skipped_empty += 1,
                DrawOutcome::OutsideCanvas => {}
            }
        }

        trace!(?report, "Composed frame");
        report
    }

    /// Copy the canvas for the encoder.
    pub fn frame(&self, timestamp: CaptureTimestamp) -> CanvasFrame {
        CanvasFrame {
            data: Bytes::copy_from_slice(self.canvas.data()),
            width: self.canvas.width(),
            height: self.canvas.height(),
            timestamp,
            sequence: self.sequence,
        }
    }

    fn frame_for(&self, pane: &PaneDescriptor) -> RgbaFrame {
        match pane.source {
            PaneSource::MainVideo => self.surfaces.main_video.current_frame(),
            PaneSource::Camera => self.surfaces.camera.current_frame(),
            PaneSource::CameraOverlay => self.surfaces.camera_overlay.current_frame(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::SharedProbe;
    use crate::surface::SharedSurface;
    use drawstream_ipc::VideoLayout;
    use kurbo::Rect;

    const VIDEO: [u8; 4] = [200, 0, 0, 255];
    const CAMERA: [u8; 4] = [0, 200, 0, 255];

    struct Fixture {
        video: SharedSurface,
        camera: SharedSurface,
        overlay_camera: SharedSurface,
        compositor: Compositor,
    }

    fn fixture(format: VideoFormat) -> Fixture {
        let video = SharedSurface::new();
        let camera = SharedSurface::new();
        let overlay_camera = SharedSurface::new();
        let surfaces = Surfaces {
            main_video: Arc::new(video.clone()),
            camera: Arc::new(camera.clone()),
            camera_overlay: Arc::new(overlay_camera.clone()),
            annotation: Arc::new(SharedSurface::new()),
        };
        Fixture {
            video,
            camera,
            overlay_camera,
            compositor: Compositor::new(surfaces, format).unwrap(),
        }
    }

    #[test]
    fn test_split_desktop_paints_both_halves() {
        let mut fx = fixture(VideoFormat::Desktop);
        fx.video.publish(RgbaFrame::solid(16, 9, VIDEO));
        fx.camera.publish(RgbaFrame::solid(16, 9, CAMERA));

        let snapshot = FrameSnapshot {
            layout: VideoLayout::Split,
            camera_enabled: true,
            ..Default::default()
        };
        let report = fx.compositor.compose(&snapshot, &SharedProbe::new());

        assert_eq!(report.drawn, 2);
        let canvas = fx.compositor.canvas();
        assert_eq!(canvas.pixel(959, 540), VIDEO);
        assert_eq!(canvas.pixel(960, 540), CAMERA);
    }

    #[test]
    fn test_camera_off_leaves_half_unpainted() {
        let mut fx = fixture(VideoFormat::Desktop);
        fx.video.publish(RgbaFrame::solid(16, 9, VIDEO));
        fx.camera.publish(RgbaFrame::solid(16, 9, CAMERA));

        let snapshot = FrameSnapshot {
            layout: VideoLayout::Split,
            camera_enabled: false,
            ..Default::default()
        };
        let report = fx.compositor.compose(&snapshot, &SharedProbe::new());

        assert_eq!(report.unpainted, 1);
        assert_eq!(fx.compositor.canvas().pixel(1500, 540), BACKGROUND_RGBA);
        assert_eq!(fx.compositor.canvas().pixel(100, 540), VIDEO);
    }

    #[test]
    fn test_empty_source_skipped_until_it_has_frames() {
        let mut fx = fixture(VideoFormat::Desktop);
        let snapshot = FrameSnapshot::default();
        let probe = SharedProbe::new();

        for _ in 0..5 {
            let report = fx.compositor.compose(&snapshot, &probe);
            assert_eq!(report.skipped_empty, 1);
            assert_eq!(report.drawn, 0);
        }

        fx.video.publish(RgbaFrame::solid(16, 9, VIDEO));
        let report = fx.compositor.compose(&snapshot, &probe);
        assert_eq!(report.drawn, 1);
        assert_eq!(report.sequence, 6);
        assert_eq!(fx.compositor.canvas().pixel(0, 0), VIDEO);
    }

    #[test]
    fn test_malformed_source_frame_is_skipped() {
        let mut fx = fixture(VideoFormat::Desktop);
        fx.video.publish(RgbaFrame {
            data: bytes::Bytes::from(vec![0u8; 16]),
            width: 64,
            height: 36,
        });
        let snapshot = FrameSnapshot::default();
        let probe = SharedProbe::new();

        let report = fx.compositor.compose(&snapshot, &probe);
        assert_eq!(report.skipped_empty, 1);
        assert_eq!(report.drawn, 0);
        assert_eq!(fx.compositor.canvas().pixel(0, 0), BACKGROUND_RGBA);

        fx.video.publish(RgbaFrame::solid(64, 36, VIDEO));
        let report = fx.compositor.compose(&snapshot, &probe);
        assert_eq!(report.drawn, 1);
    }

    /// Counts rectangle reads; every read moves the widget.
    #[derive(Default)]
    struct MovingProbe {
        reads: AtomicUsize,
    }

    impl LayoutProbe for MovingProbe {
        fn recording_area(&self) -> Option<Rect> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) as f64;
            Some(Rect::new(0.0, 0.0, 960.0 + n, 540.0))
        }

        fn camera_overlay(&self) -> Option<Rect> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Some(Rect::new(20.0, 20.0, 340.0, 200.0))
        }
    }

    #[test]
    fn test_layout_geometry_read_once_per_compose() {
        let mut fx = fixture(VideoFormat::Desktop);
        fx.video.publish(RgbaFrame::solid(16, 9, VIDEO));
        fx.overlay_camera.publish(RgbaFrame::solid(16, 9, CAMERA));

        let probe = MovingProbe::default();
        let snapshot = FrameSnapshot {
            camera_enabled: true,
            ..Default::default()
        };
        let report = fx.compositor.compose(&snapshot, &probe);

        assert_eq!(report.drawn, 2);
        assert_eq!(probe.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_overlay_camera_drawn_last_in_solo() {
        let mut fx = fixture(VideoFormat::Desktop);
        fx.video.publish(RgbaFrame::solid(16, 9, VIDEO));
        fx.overlay_camera.publish(RgbaFrame::solid(16, 9, CAMERA));

        let probe = SharedProbe::new();
        probe.set_recording_area(Some(Rect::new(0.0, 0.0, 960.0, 540.0)));
        probe.set_camera_overlay(Some(Rect::new(20.0, 20.0, 340.0, 200.0)));

        let snapshot = FrameSnapshot {
            camera_enabled: true,
            ..Default::default()
        };
        let report = fx.compositor.compose(&snapshot, &probe);

        assert_eq!(report.drawn, 2);
        let canvas = fx.compositor.canvas();
        // Widget maps to (40,40)-(680,400) on the 2x canvas.
        assert_eq!(canvas.pixel(100, 100), CAMERA);
        assert_eq!(canvas.pixel(39, 39), VIDEO);
        assert_eq!(canvas.pixel(700, 100), VIDEO);
    }

    #[test]
    fn test_set_format_resizes_and_taps_are_counted() {
        let mut fx = fixture(VideoFormat::Desktop);
        fx.compositor.set_format(VideoFormat::Phone).unwrap();
        assert_eq!(fx.compositor.canvas().width(), 1080);
        assert_eq!(fx.compositor.canvas().height(), 1920);

        let tap = fx.compositor.capture_stream(30);
        assert_eq!(tap.fps(), 30);
        assert_eq!(fx.compositor.active_taps(), 1);
        drop(tap);
        assert_eq!(fx.compositor.active_taps(), 0);
    }

    #[test]
    fn test_frame_copies_canvas() {
        let mut fx = fixture(VideoFormat::Phone);
        fx.video.publish(RgbaFrame::solid(9, 16, VIDEO));
        fx.compositor
            .compose(&FrameSnapshot::default(), &SharedProbe::new());
        let start = std::time::Instant::now();
        let frame = fx.compositor.frame(CaptureTimestamp::at(start, start));
        assert!(frame.is_valid());
        assert_eq!((frame.width, frame.height), (1080, 1920));
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.timestamp.pts_100ns, 0);
    }
}
