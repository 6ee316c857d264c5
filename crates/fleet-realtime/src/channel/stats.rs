//! Channel statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of channel counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Sockets created, including automatic retries
    pub connection_attempts: u64,
    /// Handshakes that completed
    pub connections_opened: u64,
    /// Inbound messages decoded and dispatched
    pub messages_received: u64,
    /// Caller payloads written to the socket
    pub messages_sent: u64,
    /// Keep-alive pings written to the socket
    pub keep_alives_sent: u64,
    /// Inbound frames dropped as malformed
    pub decode_failures: u64,
    /// Subscriber callbacks that panicked
    pub subscriber_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub connection_attempts: AtomicU64,
    pub connections_opened: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub keep_alives_sent: AtomicU64,
    pub decode_failures: AtomicU64,
    pub subscriber_failures: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            keep_alives_sent: self.keep_alives_sent.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
        }
    }
}
