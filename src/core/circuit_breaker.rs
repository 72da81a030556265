//! Per-Worker Circuit Breaker
//!
//! This module tracks recent failures per worker and decides whether a worker is
//! currently eligible for selection. One breaker instance is shared by the load
//! balancer and the dispatcher for all workers.
//!
//! ## Entry lifecycle
//! - An entry is created lazily on the first recorded failure.
//! - Each further failure within `timeout` of the previous one increments the count
//!   and refreshes the failure timestamp. A failure arriving after the timeout starts
//!   a fresh count at one.
//! - A single success deletes the entry, forgiving every accumulated failure.
//! - Once `timeout` has elapsed since the last failure, `is_open` deletes the entry
//!   and the worker is admitted again.
//!
//! The state lives only in process memory. A restart closes every breaker; heartbeats
//! and live traffic re-derive worker health quickly.

use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of failures after which the worker is excluded
    pub failure_threshold: u32,

    /// How long an open breaker keeps the worker excluded after its last failure
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    failure_count: u32,
    last_failure: Instant,
}

/// Point-in-time view of one breaker entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub worker_id: String,
    pub failure_count: u32,
    pub open: bool,
    pub millis_since_last_failure: u64,
}

/// Failure-count/timeout breaker keyed by worker id
pub struct WorkerCircuitBreaker {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<String, BreakerEntry>>,
}

impl WorkerCircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether the worker is currently excluded, using the configured threshold and timeout
    pub fn is_open(&self, worker_id: &str) -> bool {
        self.is_open_with(worker_id, self.config.failure_threshold, self.config.timeout)
    }

    /// Whether the worker is currently excluded for the given threshold and timeout
    ///
    /// An entry whose timeout window has elapsed is deleted and reported closed.
    pub fn is_open_with(&self, worker_id: &str, threshold: u32, timeout: Duration) -> bool {
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get(worker_id) else {
            return false;
        };

        if entry.failure_count < threshold {
            return false;
        }

        if entry.last_failure.elapsed() < timeout {
            return true;
        }

        entries.remove(worker_id);
        counter!("circuit_breaker_expired_total").increment(1);
        debug!(worker_id = %worker_id, "Circuit breaker timeout elapsed, worker re-admitted");
        false
    }

    /// Record a failed request against the worker
    pub fn record_failure(&self, worker_id: &str) {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        let entry = entries.entry(worker_id.to_string()).or_insert(BreakerEntry {
            failure_count: 0,
            last_failure: now,
        });
        // Failures older than the window no longer count
        if now.duration_since(entry.last_failure) >= self.config.timeout {
            entry.failure_count = 0;
        }
        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure = now;

        if entry.failure_count == self.config.failure_threshold {
            counter!("circuit_breaker_opened_total").increment(1);
            warn!(
                worker_id = %worker_id,
                failures = entry.failure_count,
                "Circuit breaker opened for worker"
            );
        }
    }

    /// Record a successful request, forgiving every accumulated failure
    ///
    /// A flapping worker can oscillate between open and closed under this rule.
    pub fn record_success(&self, worker_id: &str) {
        if self.entries.lock().remove(worker_id).is_some() {
            debug!(worker_id = %worker_id, "Circuit breaker reset after success");
        }
    }

    /// Delete the entry with the oldest last failure across all workers
    ///
    /// Returns the id of the re-admitted worker, if any entry existed.
    pub fn reset_oldest(&self) -> Option<String> {
        let mut entries = self.entries.lock();
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_failure)
            .map(|(id, _)| id.clone())?;

        entries.remove(&oldest);
        counter!("circuit_breaker_probe_resets_total").increment(1);
        info!(worker_id = %oldest, "Reset oldest circuit breaker entry");
        Some(oldest)
    }

    /// Delete the oldest entry among the given candidate workers
    ///
    /// Used when every candidate of one service type is open so that the reset
    /// re-admits a worker that can actually serve the request.
    pub fn reset_oldest_among<'a, I>(&self, candidates: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut entries = self.entries.lock();
        let oldest = candidates
            .into_iter()
            .filter_map(|id| entries.get(id).map(|entry| (id, entry.last_failure)))
            .min_by_key(|(_, last_failure)| *last_failure)
            .map(|(id, _)| id.to_string())?;

        entries.remove(&oldest);
        counter!("circuit_breaker_probe_resets_total").increment(1);
        info!(worker_id = %oldest, "Reset oldest open circuit breaker among candidates");
        Some(oldest)
    }

    /// Drop the entry for one worker (administrative reset or worker removal)
    pub fn reset(&self, worker_id: &str) -> bool {
        self.entries.lock().remove(worker_id).is_some()
    }

    /// Current failure count for the worker, zero when no entry exists
    pub fn failure_count(&self, worker_id: &str) -> u32 {
        self.entries
            .lock()
            .get(worker_id)
            .map(|entry| entry.failure_count)
            .unwrap_or(0)
    }

    pub fn snapshot_for(&self, worker_id: &str) -> Option<BreakerSnapshot> {
        let entries = self.entries.lock();
        entries
            .get(worker_id)
            .map(|entry| self.describe(worker_id, entry))
    }

    /// Snapshot of every live entry, sorted by worker id
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let entries = self.entries.lock();
        let mut snapshots: Vec<_> = entries
            .iter()
            .map(|(id, entry)| self.describe(id, entry))
            .collect();
        snapshots.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        snapshots
    }

    fn describe(&self, worker_id: &str, entry: &BreakerEntry) -> BreakerSnapshot {
        let elapsed = entry.last_failure.elapsed();
        BreakerSnapshot {
            worker_id: worker_id.to_string(),
            failure_count: entry.failure_count,
            open: entry.failure_count >= self.config.failure_threshold && elapsed < self.config.timeout,
            millis_since_last_failure: elapsed.as_millis() as u64,
        }
    }
}

impl Default for WorkerCircuitBreaker {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn breaker(threshold: u32, timeout_ms: u64) -> WorkerCircuitBreaker {
        WorkerCircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[test]
    fn test_unknown_worker_is_closed() {
        let cb = WorkerCircuitBreaker::with_defaults();
        assert!(!cb.is_open("w1"));
        assert_eq!(cb.failure_count("w1"), 0);
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(3, 60_000);

        cb.record_failure("w1");
        cb.record_failure("w1");
        assert!(!cb.is_open("w1"));
        assert_eq!(cb.failure_count("w1"), 2);

        cb.record_failure("w1");
        assert!(cb.is_open("w1"));
        assert!(!cb.is_open("w2"));
    }

    #[test]
    fn test_success_forgives_all_failures() {
        let cb = breaker(3, 60_000);
        for _ in 0..5 {
            cb.record_failure("w1");
        }
        assert!(cb.is_open("w1"));

        cb.record_success("w1");
        assert!(!cb.is_open("w1"));
        assert_eq!(cb.failure_count("w1"), 0);
        assert!(cb.snapshot().is_empty());
    }

    #[test]
    fn test_entry_expires_after_timeout() {
        let cb = breaker(2, 100);
        cb.record_failure("w1");
        cb.record_failure("w1");
        assert!(cb.is_open("w1"));

        thread::sleep(Duration::from_millis(150));

        assert!(!cb.is_open("w1"));
        // Expiry deletes the entry, so the count starts over
        assert_eq!(cb.failure_count("w1"), 0);
    }

    #[test]
    fn test_stale_failures_below_threshold_do_not_accumulate() {
        let cb = breaker(3, 100);
        cb.record_failure("w1");
        cb.record_failure("w1");

        thread::sleep(Duration::from_millis(150));
        cb.record_failure("w1");

        assert_eq!(cb.failure_count("w1"), 1);
        assert!(!cb.is_open("w1"));

        // Failures inside the window still add up
        cb.record_failure("w1");
        cb.record_failure("w1");
        assert!(cb.is_open("w1"));
    }

    #[test]
    fn test_explicit_threshold_and_timeout() {
        let cb = breaker(5, 60_000);
        cb.record_failure("w1");
        cb.record_failure("w1");

        assert!(!cb.is_open("w1"));
        assert!(cb.is_open_with("w1", 2, Duration::from_secs(60)));
        assert!(!cb.is_open_with("w1", 2, Duration::from_millis(0)));
    }

    #[test]
    fn test_reset_oldest_picks_earliest_failure() {
        let cb = breaker(1, 60_000);
        cb.record_failure("old");
        thread::sleep(Duration::from_millis(5));
        cb.record_failure("new");

        assert_eq!(cb.reset_oldest(), Some("old".to_string()));
        assert!(!cb.is_open("old"));
        assert!(cb.is_open("new"));

        assert_eq!(cb.reset_oldest(), Some("new".to_string()));
        assert_eq!(cb.reset_oldest(), None);
    }

    #[test]
    fn test_reset_oldest_among_ignores_other_workers() {
        let cb = breaker(1, 60_000);
        cb.record_failure("other-type");
        thread::sleep(Duration::from_millis(5));
        cb.record_failure("a");
        thread::sleep(Duration::from_millis(5));
        cb.record_failure("b");

        let reset = cb.reset_oldest_among(["a", "b"]);
        assert_eq!(reset, Some("a".to_string()));
        assert!(cb.is_open("other-type"));
        assert!(cb.is_open("b"));

        assert_eq!(cb.reset_oldest_among(["missing"]), None);
    }

    #[test]
    fn test_snapshot_reports_open_state() {
        let cb = breaker(2, 60_000);
        cb.record_failure("w1");
        cb.record_failure("w2");
        cb.record_failure("w2");

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].worker_id, "w1");
        assert!(!snapshot[0].open);
        assert_eq!(snapshot[1].failure_count, 2);
        assert!(snapshot[1].open);
    }

    #[test]
    fn test_concurrent_failures_are_counted() {
        let cb = Arc::new(breaker(1_000, 60_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || {
                    for _ in 0..50 {
                        cb.record_failure("w1");
                        let _ = cb.is_open("w1");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cb.failure_count("w1"), 400);
    }
}
