//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Monotonic counters updated by the producer thread.
#[derive(Debug, Default)]
pub struct Stats {
    packets_in: AtomicU64,
    bytes_in: AtomicU64,
    packets_dropped: AtomicU64,
    resync_bytes_dropped: AtomicU64,
    resyncs: AtomicU64,
    transfer_errors: AtomicU64,
    transfers_completed: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_packets(&self, packets: u64, bytes: u64) {
        self.packets_in.fetch_add(packets, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_dropped(&self, packets: u64) {
        if packets > 0 {
            self.packets_dropped.fetch_add(packets, Ordering::Relaxed);
        }
    }

    /// Bytes thrown away while out of sync.
    pub fn add_discarded(&self, bytes: u64) {
        self.resync_bytes_dropped.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_transfer_error(&self) {
        self.transfer_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_transfer_completed(&self) {
        self.transfers_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_in: self.packets_in.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            resync_bytes_dropped: self.resync_bytes_dropped.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            transfer_errors: self.transfer_errors.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Aligned packets produced.
    pub packets_in: u64,
    /// Bytes in aligned packets.
    pub bytes_in: u64,
    /// Packets evicted from the queue on overflow.
    pub packets_dropped: u64,
    /// Bytes discarded while searching for sync.
    pub resync_bytes_dropped: u64,
    pub resyncs: u64,
    pub transfer_errors: u64,
    pub transfers_completed: u64,
}

impl StatsSnapshot {
    /// Input bitrate in bits per second over `elapsed`.
    pub fn bitrate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_in as f64 * 8.0 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = Stats::new();
        stats.add_packets(2, 376);
        stats.add_dropped(0);
        stats.add_dropped(1);
        stats.add_discarded(5);
        stats.add_resync();
        stats.add_transfer_error();
        stats.add_transfer_completed();

        let snap = stats.snapshot();
        assert_eq!(snap.packets_in, 2);
        assert_eq!(snap.bytes_in, 376);
        assert_eq!(snap.packets_dropped, 1);
        assert_eq!(snap.resyncs, 1);
        assert_eq!(snap.resync_bytes_dropped, 5);
        assert_eq!(snap.transfer_errors, 1);
        assert_eq!(snap.transfers_completed, 1);
    }

    #[test]
    fn test_bitrate() {
        let snap = StatsSnapshot {
            bytes_in: 1_000_000,
            ..Default::default()
        };
        assert_eq!(snap.bitrate(Duration::from_secs(2)), 4_000_000.0);
        assert_eq!(snap.bitrate(Duration::ZERO), 0.0);
    }
}
