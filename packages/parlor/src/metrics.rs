//! Server metrics for observability
//!
//! Counters are bumped from the hub control tasks and the connection pumps,
//! and read back as a JSON snapshot by the `/metrics` endpoint.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently registered chat connections
    pub chat_active: AtomicU64,
    /// Chat connections accepted since server start
    pub chat_total: AtomicU64,
    /// Currently registered signaling peers
    pub signaling_active: AtomicU64,
    /// Signaling peers accepted since server start
    pub signaling_total: AtomicU64,
    /// Connections dropped because their outbound queue was full
    pub evictions: AtomicU64,

    // Chat metrics
    /// Valid chat messages accepted by the hub
    pub chat_messages: AtomicU64,
    /// Chat frames discarded for missing author or text
    pub chat_rejected: AtomicU64,
    /// Store appends that failed (message still broadcast)
    pub persist_failures: AtomicU64,

    // Signaling metrics
    /// Negotiation envelopes delivered to their target
    pub relays_delivered: AtomicU64,
    /// Negotiation envelopes whose target was not connected
    pub relays_dropped: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn chat_connected(&self) {
        self.chat_active.fetch_add(1, Ordering::Relaxed);
        self.chat_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chat_disconnected(&self) {
        self.chat_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn peer_connected(&self) {
        self.signaling_active.fetch_add(1, Ordering::Relaxed);
        self.signaling_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peer_disconnected(&self) {
        self.signaling_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn evicted(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chat_message(&self) {
        self.chat_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chat_rejected(&self) {
        self.chat_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persist_failed(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn relay_delivered(&self) {
        self.relays_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn relay_dropped(&self) {
        self.relays_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            chat: ChatMetrics {
                active: self.chat_active.load(Ordering::Relaxed),
                total: self.chat_total.load(Ordering::Relaxed),
                messages: self.chat_messages.load(Ordering::Relaxed),
                rejected: self.chat_rejected.load(Ordering::Relaxed),
                persist_failures: self.persist_failures.load(Ordering::Relaxed),
            },
            signaling: SignalingMetrics {
                active: self.signaling_active.load(Ordering::Relaxed),
                total: self.signaling_total.load(Ordering::Relaxed),
                relays_delivered: self.relays_delivered.load(Ordering::Relaxed),
                relays_dropped: self.relays_dropped.load(Ordering::Relaxed),
            },
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub chat: ChatMetrics,
    pub signaling: SignalingMetrics,
    pub evictions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMetrics {
    pub active: u64,
    pub total: u64,
    pub messages: u64,
    pub rejected: u64,
    pub persist_failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingMetrics {
    pub active: u64,
    pub total: u64,
    pub relays_delivered: u64,
    pub relays_dropped: u64,
}

/// Body of `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub chat_connections: u64,
    pub signaling_peers: u64,
    pub uptime_secs: u64,
}
