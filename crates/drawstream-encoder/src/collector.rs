//! Accumulates encoder output and assembles the downloadable artifact.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use drawstream_ipc::{ArtifactInfo, ContainerFormat, RecordingArtifact};

/// Ordered encoder chunks for one session.
#[derive(Debug, Default)]
pub struct ChunkCollector {
    chunks: Vec<Bytes>,
    total_bytes: usize,
}

impl ChunkCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Empty chunks are dropped.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
    }

    /// Number of chunks kept.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes collected.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Concatenate every chunk, in arrival order, into the artifact and
    /// reset the collector.
    pub fn assemble(
        &mut self,
        format: ContainerFormat,
        file_prefix: &str,
        unix_millis: u128,
        frames: u64,
    ) -> RecordingArtifact {
        let mut data = BytesMut::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            data.extend_from_slice(chunk);
        }
        let chunk_count = self.chunks.len();
        self.chunks.clear();
        self.total_bytes = 0;

        let info = ArtifactInfo {
            file_name: format.file_name(file_prefix, unix_millis),
            mime_type: format.mime_type().to_string(),
            size_bytes: data.len() as u64,
            chunk_count,
            frames,
        };
        debug!(?info, "Assembled recording artifact");

        RecordingArtifact {
            info,
            data: data.freeze(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_concatenates_in_order() {
        let mut c = ChunkCollector::new();
        c.push(Bytes::from_static(b"ab"));
        c.push(Bytes::new());
        c.push(Bytes::from_static(b"cde"));
        assert_eq!(c.len(), 2);
        assert_eq!(c.total_bytes(), 5);

        let artifact = c.assemble(ContainerFormat::WebmVp9Opus, "DrawStream-Pro", 1700000000123, 90);
        assert_eq!(&artifact.data[..], b"abcde");
        assert_eq!(artifact.info.file_name, "DrawStream-Pro-1700000000123.webm");
        assert_eq!(artifact.info.mime_type, "video/webm;codecs=vp9,opus");
        assert_eq!(artifact.info.size_bytes, 5);
        assert_eq!(artifact.info.chunk_count, 2);
        assert_eq!(artifact.info.frames, 90);
        assert!(c.is_empty());
    }

    #[test]
    fn test_empty_session_gives_empty_artifact() {
        let mut c = ChunkCollector::new();
        let artifact = c.assemble(ContainerFormat::Mp4Avc1, "DrawStream-Pro", 5, 0);
        assert!(artifact.data.is_empty());
        assert_eq!(artifact.info.file_name, "DrawStream-Pro-5.mp4");
    }
}
