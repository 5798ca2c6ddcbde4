//! Health counters for a running stream

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for a pipeline
///
/// Shared by every stage of one stream. All fields use atomic operations
/// for thread-safe access.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    /// Frames dropped because the next stage was not keeping up
    frame_drops: AtomicU64,

    /// Datagrams that could not be sent
    network_errors: AtomicU64,

    /// Frames successfully encoded
    frames_processed: AtomicU64,

    /// Encoded bytes
    bytes_processed: AtomicU64,

    keyframes_processed: AtomicU64,

    /// Datagrams handed to the network
    packets_sent: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully processed frame
    pub fn record_frame(&self, bytes: usize, is_keyframe: bool) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed
            .fetch_add(bytes as u64, Ordering::Relaxed);
        if is_keyframe {
            self.keyframes_processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_frame_drop(&self) {
        self.frame_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_drops(&self) -> u64 {
        self.frame_drops.load(Ordering::Relaxed)
    }

    pub fn network_errors(&self) -> u64 {
        self.network_errors.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Relaxed)
    }

    pub fn keyframes_processed(&self) -> u64 {
        self.keyframes_processed.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    /// Frame drop rate as a percentage of all frames offered
    pub fn frame_drop_rate(&self) -> f64 {
        let drops = self.frame_drops();
        let offered = self.frames_processed() + drops;
        if offered == 0 {
            return 0.0;
        }
        (drops as f64 / offered as f64) * 100.0
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_processed: self.frames_processed(),
            frame_drops: self.frame_drops(),
            network_errors: self.network_errors(),
            bytes_processed: self.bytes_processed(),
            keyframes_processed: self.keyframes_processed(),
            packets_sent: self.packets_sent(),
            frame_drop_rate: self.frame_drop_rate(),
        }
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSummary {
    pub frames_processed: u64,
    pub frame_drops: u64,
    pub network_errors: u64,
    pub bytes_processed: u64,
    pub keyframes_processed: u64,
    pub packets_sent: u64,
    pub frame_drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames ({} drops, {:.2}%), {} keyframes, {} bytes, {} packets, {} network errors",
            self.frames_processed,
            self.frame_drops,
            self.frame_drop_rate,
            self.keyframes_processed,
            self.bytes_processed,
            self.packets_sent,
            self.network_errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = PipelineHealth::new();

        health.record_frame(1000, false);
        health.record_frame(2000, true);
        health.record_frame(1500, false);

        assert_eq!(health.frames_processed(), 3);
        assert_eq!(health.bytes_processed(), 4500);
        assert_eq!(health.keyframes_processed(), 1);
        assert_eq!(health.frame_drops(), 0);
        assert_eq!(health.frame_drop_rate(), 0.0);

        health.record_frame_drop();
        assert_eq!(health.frame_drops(), 1);
        assert!((health.frame_drop_rate() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_display() {
        let health = PipelineHealth::new();
        health.record_packet();
        health.record_network_error();

        let summary = health.summary();
        assert_eq!(summary.packets_sent, 1);
        assert!(summary.to_string().contains("1 network errors"));
    }
}
