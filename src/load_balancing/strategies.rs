//! Selection algorithms, one per balancing strategy.
//!
//! Every algorithm receives the already-filtered candidate list (no offline workers,
//! no open breakers) in registration order and returns one of them.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

use crate::core::types::{ServiceType, WorkerRecord};

/// Available balancing strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
    RoundRobin,
    LeastConnections,
    #[default]
    WeightedRoundRobin,
    ResponseTime,
}

impl BalancingStrategy {
    pub const ALL: [BalancingStrategy; 4] = [
        BalancingStrategy::RoundRobin,
        BalancingStrategy::LeastConnections,
        BalancingStrategy::WeightedRoundRobin,
        BalancingStrategy::ResponseTime,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BalancingStrategy::RoundRobin => "round_robin",
            BalancingStrategy::LeastConnections => "least_connections",
            BalancingStrategy::WeightedRoundRobin => "weighted_round_robin",
            BalancingStrategy::ResponseTime => "response_time",
        }
    }

    /// Exact lookup by name; hyphens and case are ignored
    pub fn parse_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|strategy| strategy.name() == normalized)
    }

    /// Lookup by name, falling back to weighted round robin for unknown names
    pub fn from_name(name: &str) -> Self {
        Self::parse_name(name).unwrap_or_else(|| {
            warn!(
                requested = %name,
                fallback = BalancingStrategy::WeightedRoundRobin.name(),
                "Unknown balancing strategy, falling back"
            );
            BalancingStrategy::WeightedRoundRobin
        })
    }

    pub fn description(&self) -> &'static str {
        match self {
            BalancingStrategy::RoundRobin => "Cycles through eligible workers in registration order",
            BalancingStrategy::LeastConnections => "Picks the worker with the fewest in-flight requests",
            BalancingStrategy::WeightedRoundRobin => {
                "Smooth weighted round robin, interleaving picks in proportion to weight"
            }
            BalancingStrategy::ResponseTime => "Picks the worker with the lowest average response time",
        }
    }
}

impl fmt::Display for BalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Common interface of the selection algorithms
pub trait SelectionAlgorithm: Send + Sync {
    fn select<'a>(&self, service_type: ServiceType, candidates: &'a [WorkerRecord]) -> Option<&'a WorkerRecord>;

    /// Drop any scheduling state kept for the worker
    fn forget(&self, _worker_id: &str) {}

    fn reset(&self) {}
}

/// Cyclic selection with one cursor per service type
pub struct RoundRobin {
    cursors: DashMap<ServiceType, AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            cursors: DashMap::new(),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionAlgorithm for RoundRobin {
    fn select<'a>(&self, service_type: ServiceType, candidates: &'a [WorkerRecord]) -> Option<&'a WorkerRecord> {
        if candidates.is_empty() {
            return None;
        }

        let cursor = self
            .cursors
            .entry(service_type)
            .or_insert_with(|| AtomicUsize::new(0));
        let index = cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(index)
    }

    fn reset(&self) {
        self.cursors.clear();
    }
}

/// Fewest in-flight connections, first candidate wins ties
pub struct LeastConnections;

impl SelectionAlgorithm for LeastConnections {
    fn select<'a>(&self, _service_type: ServiceType, candidates: &'a [WorkerRecord]) -> Option<&'a WorkerRecord> {
        let mut selected: Option<&WorkerRecord> = None;
        for candidate in candidates {
            match selected {
                Some(current) if candidate.current_connections >= current.current_connections => {}
                _ => selected = Some(candidate),
            }
        }
        selected
    }
}

/// Smooth weighted round robin
///
/// Each call adds every candidate's weight to its accumulator, picks the highest
/// accumulator (first one wins ties) and subtracts the total weight from the winner.
/// Weights 3/2/1 over six picks come out as A,B,A,C,B,A.
pub struct WeightedRoundRobin {
    current_weights: Mutex<HashMap<ServiceType, HashMap<String, i64>>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self {
            current_weights: Mutex::new(HashMap::new()),
        }
    }

    /// Accumulated weight of one worker, zero when never scheduled
    pub fn current_weight(&self, service_type: ServiceType, worker_id: &str) -> i64 {
        self.current_weights
            .lock()
            .get(&service_type)
            .and_then(|weights| weights.get(worker_id).copied())
            .unwrap_or(0)
    }
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionAlgorithm for WeightedRoundRobin {
    fn select<'a>(&self, service_type: ServiceType, candidates: &'a [WorkerRecord]) -> Option<&'a WorkerRecord> {
        if candidates.is_empty() {
            return None;
        }

        // The whole scan runs under the lock so concurrent picks see a consistent state
        let mut all_weights = self.current_weights.lock();
        let weights = all_weights.entry(service_type).or_default();

        let mut total_weight: i64 = 0;
        let mut best: Option<(usize, i64)> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            let weight = i64::from(candidate.weight.max(1));
            total_weight += weight;

            let current = weights.entry(candidate.id.clone()).or_insert(0);
            *current += weight;

            match best {
                Some((_, best_weight)) if *current <= best_weight => {}
                _ => best = Some((index, *current)),
            }
        }

        let (index, _) = best?;
        let winner = &candidates[index];
        if let Some(current) = weights.get_mut(&winner.id) {
            *current -= total_weight;
        }
        Some(winner)
    }

    fn forget(&self, worker_id: &str) {
        let mut all_weights = self.current_weights.lock();
        for weights in all_weights.values_mut() {
            weights.remove(worker_id);
        }
    }

    fn reset(&self) {
        self.current_weights.lock().clear();
    }
}

/// Lowest average response time
///
/// Workers without any recorded request count as infinitely slow; when nobody has
/// data yet the first candidate is picked.
pub struct ResponseTime;

impl SelectionAlgorithm for ResponseTime {
    fn select<'a>(&self, _service_type: ServiceType, candidates: &'a [WorkerRecord]) -> Option<&'a WorkerRecord> {
        let effective = |worker: &WorkerRecord| {
            if worker.has_response_data() {
                worker.avg_response_time_ms
            } else {
                f64::INFINITY
            }
        };

        let mut selected: Option<(&WorkerRecord, f64)> = None;
        for candidate in candidates {
            let time = effective(candidate);
            match selected {
                Some((_, best)) if time >= best => {}
                _ => selected = Some((candidate, time)),
            }
        }
        selected.map(|(worker, _)| worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NewWorker;
    use chrono::Utc;

    fn worker(id: &str, weight: u32) -> WorkerRecord {
        let new = NewWorker::new(id, "127.0.0.1", 8000, ServiceType::Render, weight);
        WorkerRecord::new(id.to_string(), new, Utc::now())
    }

    fn picks<A: SelectionAlgorithm>(algorithm: &A, candidates: &[WorkerRecord], n: usize) -> Vec<String> {
        (0..n)
            .map(|_| algorithm.select(ServiceType::Render, candidates).unwrap().id.clone())
            .collect()
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(BalancingStrategy::from_name("round_robin"), BalancingStrategy::RoundRobin);
        assert_eq!(BalancingStrategy::from_name("Least-Connections"), BalancingStrategy::LeastConnections);
        assert_eq!(BalancingStrategy::from_name("response_time"), BalancingStrategy::ResponseTime);
        assert_eq!(BalancingStrategy::from_name("random"), BalancingStrategy::WeightedRoundRobin);
        assert_eq!(BalancingStrategy::from_name(""), BalancingStrategy::WeightedRoundRobin);
        assert_eq!(BalancingStrategy::parse_name("bogus"), None);
        assert_eq!(BalancingStrategy::default(), BalancingStrategy::WeightedRoundRobin);
    }

    #[test]
    fn test_round_robin_cycles_from_first_candidate() {
        let rr = RoundRobin::new();
        let candidates = vec![worker("a", 1), worker("b", 1), worker("c", 1)];
        assert_eq!(picks(&rr, &candidates, 6), vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_round_robin_cursor_is_per_service_type() {
        let rr = RoundRobin::new();
        let candidates = vec![worker("a", 1), worker("b", 1)];

        assert_eq!(rr.select(ServiceType::Render, &candidates).unwrap().id, "a");
        assert_eq!(rr.select(ServiceType::Parse, &candidates).unwrap().id, "a");
        assert_eq!(rr.select(ServiceType::Render, &candidates).unwrap().id, "b");
        assert!(rr.select(ServiceType::Render, &[]).is_none());
    }

    #[test]
    fn test_least_connections_prefers_minimum_and_first_on_ties() {
        let mut a = worker("a", 1);
        let mut b = worker("b", 1);
        let mut c = worker("c", 1);
        a.current_connections = 3;
        b.current_connections = 1;
        c.current_connections = 1;

        let candidates = vec![a, b, c];
        assert_eq!(LeastConnections.select(ServiceType::Render, &candidates).unwrap().id, "b");
        assert!(LeastConnections.select(ServiceType::Render, &[]).is_none());
    }

    #[test]
    fn test_weighted_round_robin_is_smooth() {
        let wrr = WeightedRoundRobin::new();
        let candidates = vec![worker("a", 3), worker("b", 2), worker("c", 1)];

        let sequence = picks(&wrr, &candidates, 6);
        assert_eq!(sequence, vec!["a", "b", "a", "c", "b", "a"]);

        // A full cycle brings every accumulator back to zero
        for id in ["a", "b", "c"] {
            assert_eq!(wrr.current_weight(ServiceType::Render, id), 0);
        }
    }

    #[test]
    fn test_weighted_round_robin_two_to_one() {
        let wrr = WeightedRoundRobin::new();
        let candidates = vec![worker("r1", 2), worker("r2", 1)];
        assert_eq!(picks(&wrr, &candidates, 3), vec!["r1", "r2", "r1"]);
    }

    #[test]
    fn test_weighted_round_robin_equal_weights_behave_like_round_robin() {
        let wrr = WeightedRoundRobin::new();
        let candidates = vec![worker("a", 1), worker("b", 1), worker("c", 1)];
        assert_eq!(picks(&wrr, &candidates, 6), vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_weighted_round_robin_forget_clears_worker_state() {
        let wrr = WeightedRoundRobin::new();
        let candidates = vec![worker("a", 1), worker("b", 3)];
        wrr.select(ServiceType::Render, &candidates);
        assert_ne!(wrr.current_weight(ServiceType::Render, "a"), 0);

        wrr.forget("a");
        assert_eq!(wrr.current_weight(ServiceType::Render, "a"), 0);
    }

    #[test]
    fn test_response_time_prefers_fastest_with_data() {
        let mut fast = worker("fast", 1);
        fast.total_requests = 4;
        fast.avg_response_time_ms = 20.0;
        let mut slow = worker("slow", 1);
        slow.total_requests = 4;
        slow.avg_response_time_ms = 200.0;
        let fresh = worker("fresh", 1);

        let candidates = vec![fresh.clone(), slow, fast];
        assert_eq!(ResponseTime.select(ServiceType::Render, &candidates).unwrap().id, "fast");

        let untested = vec![fresh, worker("other", 1)];
        assert_eq!(ResponseTime.select(ServiceType::Render, &untested).unwrap().id, "fresh");
    }
}
