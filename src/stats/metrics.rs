//! Statistics for the hub, connections and the server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-connection statistics gathered by the reader
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Frames received from the peer (any type)
    pub frames_received: u64,
    /// Frames that did not decode as a message
    pub decode_errors: u64,
    /// Messages handed to dispatch
    pub actions_dispatched: u64,
    /// Requests that were refused or had no effect
    pub rejected_requests: u64,
    /// Connection duration
    pub duration: Duration,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Per-connection statistics gathered by the writer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Physical frames written
    pub frames_written: u64,
    /// Messages written (one frame may carry several)
    pub messages_written: u64,
    /// Liveness probes sent
    pub pings_sent: u64,
    /// Payload bytes written
    pub bytes_written: u64,
}

impl WriterStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages that rode along in another message's frame
    pub fn coalesced(&self) -> u64 {
        self.messages_written.saturating_sub(self.frames_written)
    }
}

/// Snapshot of the hub registries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Registered clients
    pub clients: usize,
    /// Channels ever created
    pub channels: usize,
    /// Of which private
    pub private_channels: usize,
}

impl HubStats {
    pub fn public_channels(&self) -> usize {
        self.channels - self.private_channels
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Connections refused by the limit, the handshake or the handler
    pub rejected_connections: u64,
    /// Uptime
    pub uptime: Duration,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Live counters behind [`ServerStats`]
#[derive(Debug)]
pub(crate) struct ServerCounters {
    started_at: Instant,
    total: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
}

impl ServerCounters {
    pub(crate) fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total: AtomicU64::new(0),
            active: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub(crate) fn connection_opened(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total.load(Ordering::Relaxed),
            active_connections: self.active.load(Ordering::Relaxed),
            rejected_connections: self.rejected.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_new() {
        let stats = SessionStats::new();
        assert_eq!(stats.frames_received, 0);
        assert_eq!(stats.decode_errors, 0);
        assert_eq!(stats.actions_dispatched, 0);
        assert_eq!(stats.rejected_requests, 0);
    }

    #[test]
    fn test_writer_stats_coalesced() {
        let mut stats = WriterStats::new();
        stats.frames_written = 2;
        stats.messages_written = 7;

        assert_eq!(stats.coalesced(), 5);
        assert_eq!(WriterStats::new().coalesced(), 0);
    }

    #[test]
    fn test_hub_stats_public_channels() {
        let stats = HubStats {
            clients: 3,
            channels: 5,
            private_channels: 2,
        };

        assert_eq!(stats.public_channels(), 3);
    }

    #[test]
    fn test_server_counters() {
        let counters = ServerCounters::new();
        counters.connection_opened();
        counters.connection_opened();
        counters.connection_closed();
        counters.connection_rejected();

        let stats = counters.snapshot();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.rejected_connections, 1);
    }
}
