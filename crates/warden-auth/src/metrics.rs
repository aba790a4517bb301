//! Process metrics for the authorization pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

/// Pipeline decision and evaluator counters
#[derive(Debug, Default)]
pub struct AuthMetrics {
    /// Total evaluated requests
    pub requests_total: AtomicU64,
    /// Allowed requests
    pub allowed_total: AtomicU64,
    /// Denied requests
    pub denied_total: AtomicU64,
    /// Requests no config claimed
    pub no_match_total: AtomicU64,
    /// Internal errors
    pub errors_total: AtomicU64,
    /// Total evaluation time in microseconds
    pub evaluation_time_us_total: AtomicU64,
    /// Failure counts per evaluator name
    evaluator_failures: DashMap<String, u64>,
}

impl AuthMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allowed decision
    pub fn record_allowed(&self, evaluation_time: std::time::Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.allowed_total.fetch_add(1, Ordering::Relaxed);
        self.evaluation_time_us_total
            .fetch_add(evaluation_time.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a denied decision
    pub fn record_denied(&self, evaluation_time: std::time::Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.denied_total.fetch_add(1, Ordering::Relaxed);
        self.evaluation_time_us_total
            .fetch_add(evaluation_time.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a request no config claimed
    pub fn record_no_match(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.no_match_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an internal error
    pub fn record_error(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one evaluator failure by name
    pub fn record_evaluator_failure(&self, evaluator: &str) {
        *self
            .evaluator_failures
            .entry(evaluator.to_string())
            .or_insert(0) += 1;
    }

    /// Get total requests
    pub fn requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get allowed requests
    pub fn allowed(&self) -> u64 {
        self.allowed_total.load(Ordering::Relaxed)
    }

    /// Get denied requests
    pub fn denied(&self) -> u64 {
        self.denied_total.load(Ordering::Relaxed)
    }

    /// Get unclaimed requests
    pub fn no_match(&self) -> u64 {
        self.no_match_total.load(Ordering::Relaxed)
    }

    /// Get internal error count
    pub fn errors(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    /// Failure count of one evaluator
    pub fn evaluator_failures(&self, evaluator: &str) -> u64 {
        self.evaluator_failures
            .get(evaluator)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Names of evaluators with recorded failures
    pub fn failing_evaluators(&self) -> Vec<String> {
        self.evaluator_failures
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Average evaluation time in microseconds
    pub fn avg_evaluation_time_us(&self) -> u64 {
        let total = self.evaluation_time_us_total.load(Ordering::Relaxed);
        let count = self.allowed() + self.denied();
        if count > 0 {
            total / count
        } else {
            0
        }
    }
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_decision_counters() {
        let metrics = AuthMetrics::new();

        metrics.record_allowed(Duration::from_micros(100));
        metrics.record_denied(Duration::from_micros(300));
        metrics.record_no_match();
        metrics.record_error();

        assert_eq!(metrics.requests(), 4);
        assert_eq!(metrics.allowed(), 1);
        assert_eq!(metrics.denied(), 1);
        assert_eq!(metrics.no_match(), 1);
        assert_eq!(metrics.errors(), 1);
        assert_eq!(metrics.avg_evaluation_time_us(), 200);
    }

    #[test]
    fn test_per_evaluator_failures() {
        let metrics = AuthMetrics::new();

        metrics.record_evaluator_failure("strict-policy");
        metrics.record_evaluator_failure("strict-policy");

        assert_eq!(metrics.evaluator_failures("strict-policy"), 2);
        assert_eq!(metrics.evaluator_failures("unseen"), 0);
        assert_eq!(metrics.failing_evaluators(), vec!["strict-policy".to_string()]);
    }
}
