//! Server counters.
//!
//! Updated only by the event loop thread, readable from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    setup_failed: AtomicU64,
    closed: AtomicU64,
    streams_started: AtomicU64,
    streams_completed: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections that were given a slot.
    pub accepted: u64,
    /// Connections closed on accept because the table was full or the
    /// backend could not watch them.
    pub rejected: u64,
    /// Accepted sockets dropped because per-connection setup failed.
    pub setup_failed: u64,
    /// Tracked connections torn down for any reason.
    pub closed: u64,
    pub streams_started: u64,
    pub streams_completed: u64,
    pub bytes_sent: u64,
}

impl StatsSnapshot {
    /// Connections currently holding a slot.
    pub fn active(&self) -> u64 {
        self.accepted.saturating_sub(self.closed)
    }
}

impl ServerStats {
    pub fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Release);
    }

    pub fn record_reject(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_setup_failure(&self) {
        self.setup_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.closed.fetch_add(1, Ordering::Release);
    }

    pub fn record_stream_start(&self) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_complete(&self) {
        self.streams_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        // A close is always recorded after its accept, so loading `closed`
        // first keeps `closed <= accepted` in the copy.
        let closed = self.closed.load(Ordering::Acquire);
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Relaxed),
            setup_failed: self.setup_failed.load(Ordering::Relaxed),
            closed,
            streams_started: self.streams_started.load(Ordering::Relaxed),
            streams_completed: self.streams_completed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_snapshot() {
        let stats = ServerStats::default();
        stats.record_accept();
        stats.record_accept();
        stats.record_reject();
        stats.record_setup_failure();
        stats.record_close();
        stats.record_stream_start();
        stats.record_sent(4096);
        stats.record_sent(10);

        let snap = stats.snapshot();
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.setup_failed, 1);
        assert_eq!(snap.closed, 1);
        assert_eq!(snap.active(), 1);
        assert_eq!(snap.streams_started, 1);
        assert_eq!(snap.streams_completed, 0);
        assert_eq!(snap.bytes_sent, 4106);
    }

    #[test]
    fn test_active_never_underflows_while_updating() {
        let stats = Arc::new(ServerStats::default());
        let writer = {
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                for _ in 0..500_000 {
                    stats.record_accept();
                    stats.record_close();
                }
            })
        };

        while !writer.is_finished() {
            let snap = stats.snapshot();
            assert!(snap.closed <= snap.accepted, "{snap:?}");
            let _ = snap.active();
        }
        writer.join().unwrap();
        assert_eq!(stats.snapshot().active(), 0);
    }

    #[test]
    fn test_active_saturates() {
        let snap = StatsSnapshot {
            accepted: 1,
            closed: 3,
            ..StatsSnapshot::default()
        };
        assert_eq!(snap.active(), 0);
    }
}
