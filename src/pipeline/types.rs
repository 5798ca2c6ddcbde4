//! Core types for the pipeline system

use bytes::Bytes;
use std::time::{Duration, Instant};

/// Timestamp representation for media frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    /// Microseconds since pipeline start
    pub micros: u64,
}

impl Timestamp {
    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    /// Create a timestamp from instant relative to base
    pub fn from_instant(instant: Instant, base: Instant) -> Self {
        let duration = instant.saturating_duration_since(base);
        Self {
            micros: duration.as_micros() as u64,
        }
    }

    /// Convert to duration
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.micros)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// A video frame travelling between stages
///
/// Sources emit raw 8-bit luma planes; the encoder replaces `data` with the
/// compressed payload and decides `is_keyframe`.
#[derive(Clone)]
pub struct MediaFrame {
    /// Frame payload
    pub data: Bytes,

    /// Presentation timestamp
    pub pts: Timestamp,

    /// Monotonic frame counter assigned by the source
    pub sequence: u64,

    /// Index into the stream's camera list that produced this frame
    pub camera: usize,

    pub width: u32,

    pub height: u32,

    /// Whether this frame can be decoded on its own
    pub is_keyframe: bool,
}

impl MediaFrame {
    /// Create a new raw frame
    pub fn raw(data: Bytes, pts: Timestamp, sequence: u64, camera: usize, width: u32, height: u32) -> Self {
        Self {
            data,
            pts,
            sequence,
            camera,
            width,
            height,
            is_keyframe: false,
        }
    }

    /// Get the size of the frame data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for MediaFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFrame")
            .field("pts", &self.pts)
            .field("sequence", &self.sequence)
            .field("camera", &self.camera)
            .field("is_keyframe", &self.is_keyframe)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("size", &self.size())
            .finish()
    }
}
