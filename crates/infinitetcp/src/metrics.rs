//! Per-connection traffic counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A serializable snapshot of one connection's traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Records written to the socket.
    pub messages_sent: u64,
    /// Bytes written, terminators included.
    pub bytes_sent: u64,
    /// Records decoded and delivered to listeners.
    pub messages_received: u64,
    /// Bytes read, terminators included.
    pub bytes_received: u64,
    /// Inbound lines dropped because they were oversized or failed to decode.
    pub records_skipped: u64,
}

/// Lock-free counters updated by the reader and writer tasks.
#[derive(Debug, Default)]
pub(crate) struct AtomicStats {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    records_skipped: AtomicU64,
}

impl AtomicStats {
    pub(crate) fn record_sent(&self, line_len: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(line_len as u64 + 1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, line_len: usize) {
        self.bytes_received
            .fetch_add(line_len as u64 + 1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
        }
    }
}
