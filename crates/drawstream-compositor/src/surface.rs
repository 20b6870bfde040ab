//! Externally updated inputs: visual surfaces and the frame snapshot.

use std::sync::Arc;

use parking_lot::RwLock;

use drawstream_ipc::FrameSnapshot;

use crate::frame::RgbaFrame;

/// A continuously updating visual source (video, camera, annotation layer).
///
/// Producers own the surface and replace its frame at their own pace; the
/// compositor only ever reads the latest frame.
pub trait Surface: Send + Sync {
    /// The most recent frame. Empty while the source is starting up.
    fn current_frame(&self) -> RgbaFrame;

    /// Intrinsic size of the source in pixels.
    fn intrinsic_size(&self) -> (u32, u32) {
        let frame = self.current_frame();
        (frame.width, frame.height)
    }
}

/// A surface producers publish frames into.
#[derive(Debug, Clone, Default)]
pub struct SharedSurface {
    frame: Arc<RwLock<RgbaFrame>>,
}

impl SharedSurface {
    /// Create a surface with no frame yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: RgbaFrame) {
        *self.frame.write() = frame;
    }

    /// Drop the current frame, e.g. when a camera is switched off.
    pub fn clear(&self) {
        *self.frame.write() = RgbaFrame::empty();
    }
}

impl Surface for SharedSurface {
    fn current_frame(&self) -> RgbaFrame {
        // Bytes clone is a refcount bump.
        self.frame.read().clone()
    }
}

/// Source of the per-frame UI snapshot.
pub trait SnapshotProvider: Send + Sync {
    /// A consistent copy of the current UI state.
    fn snapshot(&self) -> FrameSnapshot;
}

/// Snapshot holder the UI layer writes whole snapshots into.
#[derive(Debug, Clone, Default)]
pub struct SharedSnapshot {
    inner: Arc<RwLock<FrameSnapshot>>,
}

impl SharedSnapshot {
    /// Create a holder with the given initial state.
    pub fn new(initial: FrameSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Replace the whole snapshot.
    pub fn publish(&self, snapshot: FrameSnapshot) {
        *self.inner.write() = snapshot;
    }

    /// Edit the snapshot under one write lock.
    pub fn update(&self, f: impl FnOnce(&mut FrameSnapshot)) {
        f(&mut self.inner.write());
    }
}

impl SnapshotProvider for SharedSnapshot {
    fn snapshot(&self) -> FrameSnapshot {
        *self.inner.read()
    }
}
