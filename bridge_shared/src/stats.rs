//! Traffic counters for an active tunnel.

use std::time::{SystemTime, UNIX_EPOCH};

/// Immutable snapshot of tunnel traffic, regenerated at every observation
/// tick. Absent (`None` at the publication layer) while not connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStatistics {
    /// Total bytes received through the tunnel
    pub bytes_received: u64,
    /// Total bytes sent through the tunnel
    pub bytes_sent: u64,
    /// When this snapshot was taken, in milliseconds since the Unix epoch
    pub observed_at_epoch_millis: i64,
}

/// Running receive/transmit counters fed by `>BYTECOUNT` directives.
///
/// The engine reports absolute totals, so `record` overwrites rather than
/// accumulates; the counters are monotonically non-decreasing for the
/// lifetime of a session.
#[derive(Debug, Default)]
pub struct StatsTracker {
    bytes_in: u64,
    bytes_out: u64,
    updated_at_ms: i64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest totals reported by the engine.
    pub fn record(&mut self, bytes_in: u64, bytes_out: u64) {
        self.bytes_in = bytes_in;
        self.bytes_out = bytes_out;
        self.updated_at_ms = epoch_millis_now();
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Produce a snapshot stamped with the sampling time.
    pub fn snapshot(&self) -> TunnelStatistics {
        TunnelStatistics {
            bytes_received: self.bytes_in,
            bytes_sent: self.bytes_out,
            observed_at_epoch_millis: epoch_millis_now(),
        }
    }
}

fn epoch_millis_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
