//! Shared publisher counters
//!
//! Telemetry reads these from other threads while the stream queue writes
//! them, so everything is atomic.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters for a publisher session
#[derive(Debug, Default)]
pub struct PublisherStats {
    /// Cumulative bytes written to the transport
    bytes_sent: AtomicI64,
    /// Audio frames sent
    audio_frames: AtomicU64,
    /// Video frames sent
    video_frames: AtomicU64,
    /// Frames dropped (negative rebased timestamps, empty samples)
    dropped_frames: AtomicU64,
}

impl PublisherStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to the cumulative byte counter
    pub fn add_bytes(&self, n: usize) {
        self.bytes_sent.fetch_add(n as i64, Ordering::Relaxed);
    }

    /// Cumulative bytes written
    pub fn byte_count(&self) -> i64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Record one sent audio frame
    pub fn record_audio_frame(&self) {
        self.audio_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one sent video frame
    pub fn record_video_frame(&self) {
        self.video_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one dropped frame
    pub fn record_dropped_frame(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Audio frames sent so far
    pub fn audio_frames(&self) -> u64 {
        self.audio_frames.load(Ordering::Relaxed)
    }

    /// Video frames sent so far
    pub fn video_frames(&self) -> u64 {
        self.video_frames.load(Ordering::Relaxed)
    }

    /// Frames dropped so far
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = PublisherStats::new();
        assert_eq!(stats.byte_count(), 0);

        stats.add_bytes(100);
        stats.add_bytes(28);
        assert_eq!(stats.byte_count(), 128);

        stats.record_audio_frame();
        stats.record_video_frame();
        stats.record_video_frame();
        stats.record_dropped_frame();
        assert_eq!(stats.audio_frames(), 1);
        assert_eq!(stats.video_frames(), 2);
        assert_eq!(stats.dropped_frames(), 1);
    }
}
