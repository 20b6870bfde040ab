//! Real-time frame compositor for DrawStream.
//!
//! Samples the main video, the live camera and the annotation layer into one
//! fixed-resolution canvas once per frame, according to the layout, swap and
//! zoom state captured in a [`FrameSnapshot`](drawstream_ipc::FrameSnapshot).

mod compositor;
mod draw;
mod error;
mod frame;
mod layout;
mod probe;
mod surface;

pub use compositor::{CanvasTap, ComposeReport, Compositor, Surfaces, BACKGROUND_RGBA};
pub use draw::{draw_pane, fit_cover, placement, DrawOutcome, Placement};
pub use error::CompositorError;
pub use frame::{Canvas, CanvasFrame, CaptureTimestamp, RgbaFrame};
pub use layout::{camera_overlay_pane, compute_panes, PaneDescriptor, PaneSource};
pub use probe::{scale_factor, LayoutProbe, ProbeGeometry, SharedProbe};
pub use surface::{SharedSnapshot, SharedSurface, SnapshotProvider, Surface};

/// Result type for compositor operations.
pub type CompositorResult<T> = Result<T, CompositorError>;

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;
