//! On-screen geometry the compositor needs from the presentation layer.

use std::sync::Arc;

use kurbo::Rect;
use parking_lot::RwLock;

/// Reports where the recording area and the camera widget sit on screen.
///
/// The compositor calls [`LayoutProbe::geometry`] once per compose pass.
/// Rectangles are in screen pixels.
pub trait LayoutProbe: Send + Sync {
    /// The on-screen recording area, if it is currently shown.
    fn recording_area(&self) -> Option<Rect>;

    /// The draggable camera overlay widget, if it is currently shown.
    fn camera_overlay(&self) -> Option<Rect>;

    /// Both rectangles as one consistent reading. Implementations that
    /// update the rectangles concurrently should override this.
    fn geometry(&self) -> ProbeGeometry {
        ProbeGeometry {
            recording_area: self.recording_area(),
            camera_overlay: self.camera_overlay(),
        }
    }
}

/// Ratio of canvas width to on-screen recording-area width.
///
/// Falls back to 1.0 when the area is unknown or collapsed.
pub fn scale_factor(probe: &dyn LayoutProbe, canvas_width: u32) -> f64 {
    match probe.recording_area() {
        Some(area) if area.width() > 0.0 => f64::from(canvas_width) / area.width(),
        _ => 1.0,
    }
}

/// Screen geometry captured at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeGeometry {
    /// The on-screen recording area.
    pub recording_area: Option<Rect>,

    /// The camera overlay widget.
    pub camera_overlay: Option<Rect>,
}

impl LayoutProbe for ProbeGeometry {
    fn recording_area(&self) -> Option<Rect> {
        self.recording_area
    }

    fn camera_overlay(&self) -> Option<Rect> {
        self.camera_overlay
    }

    fn geometry(&self) -> ProbeGeometry {
        *self
    }
}

/// Probe whose rectangles the UI layer updates as widgets move.
#[derive(Debug, Clone, Default)]
pub struct SharedProbe {
    inner: Arc<RwLock<ProbeGeometry>>,
}

impl SharedProbe {
    /// Create a probe with both rectangles unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recording area rectangle.
    pub fn set_recording_area(&self, area: Option<Rect>) {
        self.inner.write().recording_area = area;
    }

    /// Set the camera widget rectangle.
    pub fn set_camera_overlay(&self, overlay: Option<Rect>) {
        self.inner.write().camera_overlay = overlay;
    }

    /// Replace both rectangles at once.
    pub fn set_geometry(&self, geometry: ProbeGeometry) {
        *self.inner.write() = geometry;
    }
}

impl LayoutProbe for SharedProbe {
    fn recording_area(&self) -> Option<Rect> {
        self.inner.read().recording_area
    }

    fn camera_overlay(&self) -> Option<Rect> {
        self.inner.read().camera_overlay
    }

    fn geometry(&self) -> ProbeGeometry {
        *self.inner.read()
    }
}
