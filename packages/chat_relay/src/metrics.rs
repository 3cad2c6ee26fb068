//! Server metrics for observability
//!
//! Runtime counters for monitoring relay health. Everything is a
//! relaxed atomic; snapshots are taken lock-free for the `/metrics`
//! and `/health` endpoints.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    // Generation session metrics
    /// Sessions started (upstream call issued)
    pub sessions_started: AtomicU64,
    /// Sessions that ran to natural completion
    pub sessions_completed: AtomicU64,
    /// Sessions stopped by the client (or by disconnect)
    pub sessions_stopped: AtomicU64,
    /// Sessions that failed with an upstream error
    pub sessions_failed: AtomicU64,
    /// Chat requests rejected because a session was already active
    pub sessions_rejected: AtomicU64,

    // Stream metrics
    /// Text increments relayed to clients
    pub chunks_relayed: AtomicU64,
    /// Malformed upstream records skipped by the decoder
    pub malformed_records_skipped: AtomicU64,

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

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    // Session tracking
    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_stopped(&self) {
        self.sessions_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // Stream tracking
    pub fn chunk_relayed(&self) {
        self.chunks_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_records(&self, n: u64) {
        self.malformed_records_skipped.fetch_add(n, Ordering::Relaxed);
    }

    /// Sessions started but not yet finished.
    pub fn active_sessions(&self) -> u64 {
        let started = self.sessions_started.load(Ordering::Relaxed);
        let finished = self.sessions_completed.load(Ordering::Relaxed)
            + self.sessions_stopped.load(Ordering::Relaxed)
            + self.sessions_failed.load(Ordering::Relaxed);
        started.saturating_sub(finished)
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            sessions: SessionMetrics {
                active: self.active_sessions(),
                started: self.sessions_started.load(Ordering::Relaxed),
                completed: self.sessions_completed.load(Ordering::Relaxed),
                stopped: self.sessions_stopped.load(Ordering::Relaxed),
                failed: self.sessions_failed.load(Ordering::Relaxed),
                rejected: self.sessions_rejected.load(Ordering::Relaxed),
            },
            stream: StreamMetrics {
                chunks_relayed: self.chunks_relayed.load(Ordering::Relaxed),
                malformed_records_skipped: self
                    .malformed_records_skipped
                    .load(Ordering::Relaxed),
            },
        }
    }
}

/// Point-in-time view of all metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub sessions: SessionMetrics,
    pub stream: StreamMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub active: u64,
    pub started: u64,
    pub completed: u64,
    pub stopped: u64,
    pub failed: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMetrics {
    pub chunks_relayed: u64,
    pub malformed_records_skipped: u64,
}

/// Health summary served at `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub active_sessions: u64,
    pub uptime_secs: u64,
}
