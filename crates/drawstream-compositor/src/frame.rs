//! Pixel buffers: surface frames, the output canvas, and canvas snapshots.

use std::time::Instant;

use bytes::Bytes;

use crate::error::CompositorError;
use crate::{CompositorResult, BYTES_PER_PIXEL};

/// Largest canvas side accepted, well above any recording format.
const MAX_CANVAS_SIDE: u32 = 8192;

/// Timestamp for a composited frame.
#[derive(Debug, Clone, Copy)]
pub struct CaptureTimestamp {
    /// Monotonic timestamp when the frame was composited.
    pub capture_time: Instant,

    /// Frame presentation timestamp in 100ns units (for AV sync).
    pub pts_100ns: u64,
}

impl CaptureTimestamp {
    /// Create a timestamp relative to the start of the recording.
    pub fn now(start_time: Instant) -> Self {
        Self::at(start_time, Instant::now())
    }

    /// Create a timestamp for `capture_time` relative to `start_time`.
    pub fn at(start_time: Instant, capture_time: Instant) -> Self {
        let elapsed = capture_time.saturating_duration_since(start_time);
        let pts_100ns = elapsed.as_nanos() as u64 / 100;

        Self {
            capture_time,
            pts_100ns,
        }
    }

    /// Get the presentation timestamp in milliseconds.
    pub fn pts_ms(&self) -> u64 {
        self.pts_100ns / 10_000
    }
}

/// One frame of a source surface, straight-alpha RGBA8.
///
/// A frame with zero width or height means the source has not produced
/// anything yet.
#[derive(Debug, Clone, Default)]
pub struct RgbaFrame {
    /// Row-major RGBA8 pixels.
    pub data: Bytes,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

impl RgbaFrame {
    /// Create a frame, validating the buffer length.
    pub fn new(data: Bytes, width: u32, height: u32) -> CompositorResult<Self> {
        let expected = Self::buffer_size(width, height);
        if data.len() != expected {
            return Err(CompositorError::FrameSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// A frame with no pixels.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A frame filled with one colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(Self::buffer_size(width, height));
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgba);
        }
        Self {
            data: Bytes::from(data),
            width,
            height,
        }
    }

    /// Calculate expected RGBA buffer size for given dimensions.
    pub fn buffer_size(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Returns true if the source has no intrinsic size yet.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns true if the buffer holds exactly `width * height` pixels.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == Self::buffer_size(self.width, self.height)
    }

    /// Returns true if the frame has pixels that can be sampled.
    pub fn is_drawable(&self) -> bool {
        !self.is_empty() && self.is_well_formed()
    }

    /// Read one pixel. Caller guarantees bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }
}

/// The fixed-resolution output canvas the compositor paints into.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Canvas {
    /// Create a canvas cleared to transparent black.
    pub fn new(width: u32, height: u32) -> CompositorResult<Self> {
        validate_dimensions(width, height)?;
        Ok(Self {
            width,
            height,
            data: vec![0; RgbaFrame::buffer_size(width, height)],
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 pixels.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Change the resolution; contents are cleared.
    pub fn resize(&mut self, width: u32, height: u32) -> CompositorResult<()> {
        validate_dimensions(width, height)?;
        self.width = width;
        self.height = height;
        self.data = vec![0; RgbaFrame::buffer_size(width, height)];
        Ok(())
    }

    /// Fill the whole canvas with one colour.
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Read one pixel. Caller guarantees bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Overwrite one pixel. Caller guarantees bounds.
    #[inline]
    pub(crate) fn put(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.data[i..i + BYTES_PER_PIXEL].copy_from_slice(&rgba);
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }
}

fn validate_dimensions(width: u32, height: u32) -> CompositorResult<()> {
    if width == 0 || height == 0 || width > MAX_CANVAS_SIDE || height > MAX_CANVAS_SIDE {
        return Err(CompositorError::InvalidDimensions { width, height });
    }
    Ok(())
}

/// A copy of the canvas handed to the encoder.
#[derive(Debug, Clone)]
pub struct CanvasFrame {
    /// RGBA8 pixel data.
    pub data: Bytes,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Composite timestamp.
    pub timestamp: CaptureTimestamp,

    /// Monotonically increasing compose pass number.
    pub sequence: u64,
}

impl CanvasFrame {
    /// Validate that the frame data matches expected dimensions.
    pub fn is_valid(&self) -> bool {
        self.data.len() == RgbaFrame::buffer_size(self.width, self.height)
    }
}
