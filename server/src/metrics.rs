// Session metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters updated by session tasks.
#[derive(Debug)]
pub struct SessionMetrics {
    started_at: DateTime<Utc>,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    turns_completed: AtomicU64,
    turns_failed: AtomicU64,
    audio_chunks_sent: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub turns_completed: u64,
    pub turns_failed: u64,
    pub audio_chunks_sent: u64,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            turns_completed: AtomicU64::new(0),
            turns_failed: AtomicU64::new(0),
            audio_chunks_sent: AtomicU64::new(0),
        }
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_turn_completed(&self) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_turn_failed(&self) {
        self.turns_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_chunk(&self) {
        self.audio_chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            started_at: self.started_at,
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            turns_failed: self.turns_failed.load(Ordering::Relaxed),
            audio_chunks_sent: self.audio_chunks_sent.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = SessionMetrics::new();
        metrics.record_session_opened();
        metrics.record_turn_completed();
        metrics.record_turn_completed();
        metrics.record_turn_failed();
        metrics.record_audio_chunk();
        metrics.record_session_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_opened, 1);
        assert_eq!(snapshot.sessions_closed, 1);
        assert_eq!(snapshot.turns_completed, 2);
        assert_eq!(snapshot.turns_failed, 1);
        assert_eq!(snapshot.audio_chunks_sent, 1);
    }
}
