//! # Load Balancer Module
//!
//! The load balancer picks one eligible worker for a service type. It is constructed
//! explicitly with the registry it reads from and the circuit breaker it consults, so
//! each gateway (and each test) owns its own instance.
//!
//! ## Selection
//!
//! 1. Fetch every worker of the service type from the registry.
//! 2. Drop offline workers. They never consume scheduling state.
//! 3. Drop workers whose breaker is open.
//! 4. If step 3 emptied a pool of two or more workers, reset the oldest open breaker
//!    among the pool once and filter again. A single open worker stays excluded until
//!    its breaker times out.
//! 5. Apply the current strategy to whatever is left.
//!
//! Scheduling state (round-robin cursors, weighted accumulators) is process-wide and
//! is rebuilt from scratch after a restart.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, histogram};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::strategies::{
    BalancingStrategy, LeastConnections, ResponseTime, RoundRobin, SelectionAlgorithm, WeightedRoundRobin,
};
use crate::core::circuit_breaker::WorkerCircuitBreaker;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{ServiceType, WorkerRecord};
use crate::registry::WorkerRegistry;

/// Load balancer statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerStats {
    pub strategy: String,
    pub total_selections: u64,
    pub failed_selections: u64,
    pub probe_resets: u64,
    pub worker_stats: HashMap<String, WorkerSelectionStats>,
}

/// Per-worker selection statistics
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSelectionStats {
    pub selections: u64,
    pub last_selected: Option<DateTime<Utc>>,
}

/// Outcome of one selection attempt
enum Selection {
    Selected(WorkerRecord),
    /// No selectable worker is registered for the service type
    NoWorkers,
    /// Workers exist but every breaker stayed open after the probe reset
    AllOpen,
}

pub struct LoadBalancer {
    registry: Arc<dyn WorkerRegistry>,
    breaker: Arc<WorkerCircuitBreaker>,
    strategy: RwLock<BalancingStrategy>,
    round_robin: RoundRobin,
    least_connections: LeastConnections,
    weighted: WeightedRoundRobin,
    response_time: ResponseTime,
    stats: DashMap<String, WorkerSelectionStats>,
    total_selections: AtomicU64,
    failed_selections: AtomicU64,
    probe_resets: AtomicU64,
}

impl LoadBalancer {
    pub fn new(
        registry: Arc<dyn WorkerRegistry>,
        breaker: Arc<WorkerCircuitBreaker>,
        strategy: BalancingStrategy,
    ) -> Self {
        info!(strategy = %strategy, "Load balancer created");
        Self {
            registry,
            breaker,
            strategy: RwLock::new(strategy),
            round_robin: RoundRobin::new(),
            least_connections: LeastConnections,
            weighted: WeightedRoundRobin::new(),
            response_time: ResponseTime,
            stats: DashMap::new(),
            total_selections: AtomicU64::new(0),
            failed_selections: AtomicU64::new(0),
            probe_resets: AtomicU64::new(0),
        }
    }

    pub fn strategy(&self) -> BalancingStrategy {
        *self.strategy.read()
    }

    /// Switch strategy; only future selections are affected
    pub fn set_strategy(&self, strategy: BalancingStrategy) -> BalancingStrategy {
        let previous = std::mem::replace(&mut *self.strategy.write(), strategy);
        if previous != strategy {
            counter!("load_balancer_strategy_switches_total").increment(1);
            info!(previous = %previous, strategy = %strategy, "Switched balancing strategy");
        }
        previous
    }

    pub fn breaker(&self) -> &Arc<WorkerCircuitBreaker> {
        &self.breaker
    }

    /// Pick a worker for the service type, `None` when nothing is eligible
    pub async fn select_worker(&self, service_type: ServiceType) -> GatewayResult<Option<WorkerRecord>> {
        match self.select(service_type).await? {
            Selection::Selected(worker) => Ok(Some(worker)),
            Selection::NoWorkers | Selection::AllOpen => Ok(None),
        }
    }

    /// Pick a worker for the service type, reporting why nothing was eligible
    pub async fn try_select_worker(&self, service_type: ServiceType) -> GatewayResult<WorkerRecord> {
        match self.select(service_type).await? {
            Selection::Selected(worker) => Ok(worker),
            Selection::NoWorkers => Err(GatewayError::no_available_worker(service_type)),
            Selection::AllOpen => Err(GatewayError::all_workers_circuit_open(service_type)),
        }
    }

    async fn select(&self, service_type: ServiceType) -> GatewayResult<Selection> {
        let start = Instant::now();
        let pool: Vec<WorkerRecord> = self
            .registry
            .list_by_service_type(service_type)
            .await?
            .into_iter()
            .filter(WorkerRecord::is_selectable)
            .collect();

        if pool.is_empty() {
            self.record_failed_selection(service_type, "no_workers");
            return Ok(Selection::NoWorkers);
        }

        let mut candidates = self.eligible(&pool);
        // A lone worker has no peers to share a transient failure with
        if candidates.is_empty() && pool.len() > 1 {
            let reset = self
                .breaker
                .reset_oldest_among(pool.iter().map(|worker| worker.id.as_str()));
            if let Some(worker_id) = reset {
                self.probe_resets.fetch_add(1, Ordering::Relaxed);
                warn!(
                    service_type = %service_type,
                    worker_id = %worker_id,
                    "All workers had open breakers, re-admitting oldest for a probe request"
                );
            }
            candidates = self.eligible(&pool);
        }

        if candidates.is_empty() {
            self.record_failed_selection(service_type, "all_open");
            return Ok(Selection::AllOpen);
        }

        let strategy = self.strategy();
        let selected = self
            .algorithm(strategy)
            .select(service_type, &candidates)
            .cloned();

        histogram!("load_balancer_selection_duration_seconds").record(start.elapsed().as_secs_f64());

        match selected {
            Some(worker) => {
                self.record_selection(&worker);
                debug!(
                    worker_id = %worker.id,
                    address = %worker.address(),
                    service_type = %service_type,
                    strategy = %strategy,
                    candidates = candidates.len(),
                    "Selected worker"
                );
                Ok(Selection::Selected(worker))
            }
            None => {
                self.record_failed_selection(service_type, "strategy");
                Ok(Selection::NoWorkers)
            }
        }
    }

    fn eligible(&self, pool: &[WorkerRecord]) -> Vec<WorkerRecord> {
        pool.iter()
            .filter(|worker| !self.breaker.is_open(&worker.id))
            .cloned()
            .collect()
    }

    fn algorithm(&self, strategy: BalancingStrategy) -> &dyn SelectionAlgorithm {
        match strategy {
            BalancingStrategy::RoundRobin => &self.round_robin,
            BalancingStrategy::LeastConnections => &self.least_connections,
            BalancingStrategy::WeightedRoundRobin => &self.weighted,
            BalancingStrategy::ResponseTime => &self.response_time,
        }
    }

    fn record_selection(&self, worker: &WorkerRecord) {
        self.total_selections.fetch_add(1, Ordering::Relaxed);
        counter!("load_balancer_selections_total", "service_type" => worker.service_type.as_str())
            .increment(1);

        let mut stats = self
            .stats
            .entry(worker.id.clone())
            .or_insert_with(|| WorkerSelectionStats {
                selections: 0,
                last_selected: None,
            });
        stats.selections += 1;
        stats.last_selected = Some(Utc::now());
    }

    fn record_failed_selection(&self, service_type: ServiceType, reason: &'static str) {
        self.failed_selections.fetch_add(1, Ordering::Relaxed);
        counter!(
            "load_balancer_failed_selections_total",
            "service_type" => service_type.as_str(),
            "reason" => reason
        )
        .increment(1);
        debug!(service_type = %service_type, reason = reason, "No worker selected");
    }

    /// Drop scheduling state and statistics for a removed worker
    pub fn forget_worker(&self, worker_id: &str) {
        self.weighted.forget(worker_id);
        self.stats.remove(worker_id);
    }

    /// Clear selection statistics, keeping scheduling state
    pub fn reset_stats(&self) {
        self.stats.clear();
        self.total_selections.store(0, Ordering::Relaxed);
        self.failed_selections.store(0, Ordering::Relaxed);
        self.probe_resets.store(0, Ordering::Relaxed);
    }

    /// Clear scheduling state and statistics
    pub fn reset(&self) {
        self.round_robin.reset();
        self.weighted.reset();
        self.reset_stats();
    }

    pub fn stats(&self) -> LoadBalancerStats {
        LoadBalancerStats {
            strategy: self.strategy().name().to_string(),
            total_selections: self.total_selections.load(Ordering::Relaxed),
            failed_selections: self.failed_selections.load(Ordering::Relaxed),
            probe_resets: self.probe_resets.load(Ordering::Relaxed),
            worker_stats: self
                .stats
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }
}
