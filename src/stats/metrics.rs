//! Statistics for connected clients and the server

use std::time::{Duration, Instant};

use super::rate::RateTracker;

/// Weight of the frame-size moving average (`ewma = (ewma + size) / 2`)
const FRAME_SIZE_WEIGHT: u64 = 2;

/// Per-client delivery statistics
///
/// Updated by the fan-out loop for every frame written to the client and read
/// by the status handler.
#[derive(Debug, Clone)]
pub struct ClientStats {
    /// Frames per second
    pub frames: RateTracker,
    /// Bytes per second
    pub bytes: RateTracker,
    /// Exponentially weighted average frame size in bytes (0 = no frame yet)
    pub ewma_frame_size: u64,
    /// When the client connected
    pub connected_at: Instant,
}

impl ClientStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            frames: RateTracker::new(),
            bytes: RateTracker::new(),
            ewma_frame_size: 0,
            connected_at: Instant::now(),
        }
    }

    /// Account one delivered frame of `size` bytes
    pub fn record_frame(&mut self, size: usize) {
        self.record_frame_at(size, Instant::now());
    }

    /// Account one delivered frame of `size` bytes at `now`
    pub fn record_frame_at(&mut self, size: usize, now: Instant) {
        let size = size as u64;
        self.ewma_frame_size = if self.ewma_frame_size == 0 {
            size
        } else {
            (self.ewma_frame_size * (FRAME_SIZE_WEIGHT - 1) + size) / FRAME_SIZE_WEIGHT
        };
        self.frames.add_at(1, now);
        self.bytes.add_at(size, now);
    }

    /// Cumulative number of frames delivered
    pub fn frame_count(&self) -> u64 {
        self.frames.total()
    }

    /// Bitrate in kbit/s derived from the bytes/sec average
    pub fn bitrate_kbps(&self) -> f64 {
        self.bytes.average() as f64 * 8.0 / 1024.0
    }

    /// Frames per second over completed windows
    pub fn framerate(&self) -> u64 {
        self.frames.average()
    }

    /// Time since the client connected
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Default for ClientStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Currently open connections
    pub active_connections: u64,
    /// Connections currently streaming from a resource
    pub streaming_connections: u64,
    /// Registered resources
    pub resources: u64,
    /// Uptime
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_stats_new() {
        let stats = ClientStats::new();
        assert_eq!(stats.ewma_frame_size, 0);
        assert_eq!(stats.frame_count(), 0);
        assert_eq!(stats.framerate(), 0);
        assert_eq!(stats.bitrate_kbps(), 0.0);
    }

    #[test]
    fn test_ewma_seeded_with_first_frame() {
        let mut stats = ClientStats::new();
        stats.record_frame(1000);
        assert_eq!(stats.ewma_frame_size, 1000);

        stats.record_frame(2000);
        assert_eq!(stats.ewma_frame_size, 1500);

        stats.record_frame(500);
        assert_eq!(stats.ewma_frame_size, 1000);
    }

    #[test]
    fn test_record_frame_feeds_rate_trackers() {
        let start = Instant::now();
        let mut stats = ClientStats::new();
        stats.frames = RateTracker::with_epoch(1, start);
        stats.bytes = RateTracker::with_epoch(1, start);

        for _ in 0..4 {
            stats.record_frame_at(1024, start + Duration::from_millis(100));
        }
        stats.record_frame_at(1024, start + Duration::from_millis(1100));

        assert_eq!(stats.frame_count(), 5);
        assert_eq!(stats.framerate(), 4);
        assert_eq!(stats.bytes.average(), 4096);
        assert_eq!(stats.bitrate_kbps(), 32.0);
    }
}
