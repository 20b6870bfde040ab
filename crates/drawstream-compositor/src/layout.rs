//! Layout engine: pane rectangles for a snapshot.

use kurbo::{Point, Rect};

use drawstream_ipc::{FrameSnapshot, VideoFormat, VideoLayout};

use crate::probe::LayoutProbe;

/// Which live surface a pane shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneSource {
    /// The pre-recorded video being annotated.
    MainVideo,

    /// The camera feed in split layout.
    Camera,

    /// The camera feed shown in the floating widget in solo layout.
    CameraOverlay,
}

/// One rectangular region of the canvas for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaneDescriptor {
    /// Surface painted into the pane.
    pub source: PaneSource,

    /// Whether the annotation layer is stretched over the pane.
    pub annotated: bool,

    /// Destination in canvas pixels.
    pub rect: Rect,

    /// Flip horizontally (self-view).
    pub mirrored: bool,

    /// Whether user zoom/pan applies.
    pub zoom_eligible: bool,
}

impl PaneDescriptor {
    /// The main video pane with its annotation layer.
    pub fn main(rect: Rect) -> Self {
        Self {
            source: PaneSource::MainVideo,
            annotated: true,
            rect,
            mirrored: false,
            zoom_eligible: true,
        }
    }

    /// The camera half in split layout.
    pub fn camera(rect: Rect) -> Self {
        Self {
            source: PaneSource::Camera,
            annotated: false,
            rect,
            mirrored: true,
            zoom_eligible: false,
        }
    }

    /// The floating camera widget in solo layout.
    pub fn camera_overlay(rect: Rect) -> Self {
        Self {
            source: PaneSource::CameraOverlay,
            ..Self::camera(rect)
        }
    }
}

/// Primary panes for `snapshot` on a `width`×`height` canvas.
///
/// Split layout always yields both halves, even with the camera off, so the
/// geometry does not depend on which sources are live.
pub fn compute_panes(snapshot: &FrameSnapshot, width: u32, height: u32) -> Vec<PaneDescriptor> {
    let (w, h) = (f64::from(width), f64::from(height));

    match snapshot.layout {
        VideoLayout::Solo => vec![PaneDescriptor::main(Rect::new(0.0, 0.0, w, h))],
        VideoLayout::Split => {
            let (first, second) = split_halves(snapshot.format, width, height);
            if snapshot.swapped {
                vec![PaneDescriptor::camera(first), PaneDescriptor::main(second)]
            } else {
                vec![PaneDescriptor::main(first), PaneDescriptor::camera(second)]
            }
        }
    }
}

/// Left/right for desktop, top/bottom for phone. The second half takes the
/// odd pixel so the two always tile the canvas.
fn split_halves(format: VideoFormat, width: u32, height: u32) -> (Rect, Rect) {
    let (w, h) = (f64::from(width), f64::from(height));
    match format {
        VideoFormat::Desktop => {
            let cut = f64::from(width / 2);
            (Rect::new(0.0, 0.0, cut, h), Rect::new(cut, 0.0, w, h))
        }
        VideoFormat::Phone => {
            let cut = f64::from(height / 2);
            (Rect::new(0.0, 0.0, w, cut), Rect::new(0.0, cut, w, h))
        }
    }
}

/// The floating camera pane in solo layout, drawn after the primary panes.
///
/// The widget's screen rectangle is made relative to the recording area and
/// scaled into canvas pixels by `scale_factor`.
pub fn camera_overlay_pane(
    snapshot: &FrameSnapshot,
    probe: &dyn LayoutProbe,
    scale_factor: f64,
) -> Option<PaneDescriptor> {
    if snapshot.layout != VideoLayout::Solo || !snapshot.camera_enabled {
        return None;
    }

    let area = probe.recording_area()?;
    let widget = probe.camera_overlay()?;

    let origin = Point::new(
        (widget.x0 - area.x0) * scale_factor,
        (widget.y0 - area.y0) * scale_factor,
    );
    let size = (widget.width() * scale_factor, widget.height() * scale_factor);

    Some(PaneDescriptor::camera_overlay(Rect::from_origin_size(
        origin, size,
    )))
}
