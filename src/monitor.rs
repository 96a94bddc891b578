//! Health/Status Monitor
//!
//! Keeps a bounded log of human-readable sync events and a smoothed health
//! score over recent transfer outcomes. Purely diagnostic: nothing in the
//! sync path branches on these values.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

use crate::config::MonitorConfig;

/// Severity of a logged sync event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// One entry in the diagnostics log
#[derive(Debug, Clone, Serialize)]
pub struct SyncLogEntry {
    pub at: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

impl std::fmt::Display for SyncLogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.level {
            EventLevel::Info => "INFO ",
            EventLevel::Warn => "WARN ",
            EventLevel::Error => "ERROR",
        };
        write!(f, "{} {} {}", self.at.format("%H:%M:%S"), tag, self.message)
    }
}

/// Statistics about transfer attempts
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferStats {
    pub successful: u64,
    pub failed: u64,
    pub consecutive_failures: u32,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct MonitorState {
    log: VecDeque<SyncLogEntry>,
    score: f64,
    stats: TransferStats,
}

pub struct HealthMonitor {
    capacity: usize,
    smoothing: f64,
    state: Mutex<MonitorState>,
}

impl HealthMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            capacity: config.log_capacity.max(1),
            smoothing: config.smoothing.clamp(0.0, 1.0),
            state: Mutex::new(MonitorState {
                log: VecDeque::with_capacity(config.log_capacity),
                score: 1.0,
                stats: TransferStats::default(),
            }),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(EventLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(EventLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(EventLevel::Error, message.into());
    }

    fn record(&self, level: EventLevel, message: String) {
        match level {
            EventLevel::Info => log::info!("{}", message),
            EventLevel::Warn => log::warn!("{}", message),
            EventLevel::Error => log::error!("{}", message),
        }

        let mut state = self.state.lock();
        if state.log.len() >= self.capacity {
            state.log.pop_front();
        }
        state.log.push_back(SyncLogEntry {
            at: Utc::now(),
            level,
            message,
        });
    }

    /// Record a successful exchange with the peer
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.score = self.smoothing + (1.0 - self.smoothing) * state.score;
        state.stats.successful += 1;
        state.stats.consecutive_failures = 0;
        state.stats.last_sync = Some(Utc::now());
    }

    /// Record a failed transfer attempt
    pub fn record_failure(&self, error: &str) {
        let mut state = self.state.lock();
        state.score *= 1.0 - self.smoothing;
        state.stats.failed += 1;
        state.stats.consecutive_failures += 1;
        state.stats.last_error = Some(error.to_string());
    }

    /// Smoothed success rate in [0, 1]
    pub fn health_score(&self) -> f64 {
        self.state.lock().score.clamp(0.0, 1.0)
    }

    pub fn stats(&self) -> TransferStats {
        self.state.lock().stats.clone()
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<SyncLogEntry> {
        self.state.lock().log.iter().cloned().collect()
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(&MonitorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let monitor = HealthMonitor::new(&MonitorConfig {
            log_capacity: 3,
            smoothing: 0.3,
        });
        for i in 0..5 {
            monitor.info(format!("event {}", i));
        }
        let entries = monitor.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "event 2");
        assert_eq!(entries[2].message, "event 4");
    }

    #[test]
    fn test_default_capacity_is_fifty() {
        let monitor = HealthMonitor::default();
        for i in 0..80 {
            monitor.warn(format!("w{}", i));
        }
        assert_eq!(monitor.entries().len(), 50);
    }

    #[test]
    fn test_score_starts_healthy_and_decays() {
        let monitor = HealthMonitor::default();
        assert_eq!(monitor.health_score(), 1.0);

        monitor.record_failure("timeout");
        let after_one = monitor.health_score();
        assert!((after_one - 0.7).abs() < 1e-9);

        monitor.record_failure("timeout");
        assert!(monitor.health_score() < after_one);
        assert_eq!(monitor.stats().consecutive_failures, 2);
    }

    #[test]
    fn test_success_recovers_score() {
        let monitor = HealthMonitor::default();
        for _ in 0..10 {
            monitor.record_failure("down");
        }
        let low = monitor.health_score();
        monitor.record_success();
        let stats = monitor.stats();

        assert!(monitor.health_score() > low);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.failed, 10);
        assert!(stats.last_sync.is_some());
    }

    #[test]
    fn test_score_stays_in_unit_range() {
        let monitor = HealthMonitor::default();
        for i in 0..100 {
            if i % 3 == 0 {
                monitor.record_success();
            } else {
                monitor.record_failure("x");
            }
            let score = monitor.health_score();
            assert!((0.0..=1.0).contains(&score));
        }
    }
}
