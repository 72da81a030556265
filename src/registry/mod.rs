//! # Worker Registry
//!
//! The registry owns worker records: identity, address, service type, weight, status
//! and the live counters updated on every dispatch. The core only depends on the
//! [`WorkerRegistry`] contract; two backends implement it:
//!
//! - [`InMemoryWorkerRegistry`] for single-process deployments and tests
//! - [`RedisWorkerRegistry`] for durable storage shared between gateway restarts
//!
//! Listings always come back in registration order, and status filtering is left to
//! the caller: `list_by_service_type` returns offline workers too.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::error::GatewayResult;
use crate::core::types::{HeartbeatRequest, NewWorker, ServiceType, WorkerRecord};

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryWorkerRegistry;
pub use redis_store::{RedisRegistryConfig, RedisWorkerRegistry};

/// Storage contract for worker records
///
/// Connection-count and outcome updates must be atomic per worker: concurrent
/// dispatches to the same worker never lose an update.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Persist a new worker with status online, zero counters and the current timestamp
    async fn register(&self, worker: NewWorker) -> GatewayResult<WorkerRecord>;

    /// Refresh the heartbeat timestamp and apply any provided field
    ///
    /// A heartbeat without an explicit status brings an offline worker back online.
    async fn heartbeat(&self, heartbeat: HeartbeatRequest) -> GatewayResult<WorkerRecord>;

    async fn get(&self, worker_id: &str) -> GatewayResult<WorkerRecord>;

    /// Every registered worker, any status, in registration order
    async fn list_all(&self) -> GatewayResult<Vec<WorkerRecord>>;

    /// Every worker of the service type, any status, in registration order
    async fn list_by_service_type(&self, service_type: ServiceType) -> GatewayResult<Vec<WorkerRecord>>;

    /// Adjust the in-flight connection count by `delta`, clamping at zero
    ///
    /// Returns the new count.
    async fn update_connections(&self, worker_id: &str, delta: i32) -> GatewayResult<u32>;

    /// Count one completed request and fold its duration into the average
    async fn record_outcome(&self, worker_id: &str, duration_ms: f64, success: bool) -> GatewayResult<()>;

    async fn mark_offline(&self, worker_id: &str) -> GatewayResult<()>;

    /// Mark the worker offline only if it is not offline yet and its last heartbeat
    /// is still older than `cutoff`
    ///
    /// The check and the write happen atomically per worker, so a heartbeat that lands
    /// after a listing is never overwritten. Returns whether the worker was marked.
    async fn mark_offline_if_stale(&self, worker_id: &str, cutoff: DateTime<Utc>) -> GatewayResult<bool>;

    /// Delete the worker and return its last record
    async fn remove(&self, worker_id: &str) -> GatewayResult<WorkerRecord>;
}

/// Incremental mean used by every backend: `avg + (d - avg) / n`
pub fn incremental_mean(previous_avg: f64, sample: f64, total_requests: u64) -> f64 {
    if total_requests == 0 {
        return previous_avg;
    }
    previous_avg + (sample - previous_avg) / total_requests as f64
}

/// Apply a signed delta to a connection count without going below zero
pub fn apply_connection_delta(current: u32, delta: i32) -> u32 {
    let next = i64::from(current) + i64::from(delta);
    next.clamp(0, i64::from(u32::MAX)) as u32
}

/// Which registry backend the gateway uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    #[default]
    Memory,
    Redis,
}

/// Build the configured registry backend
pub async fn create_registry(
    backend: RegistryBackend,
    redis: &RedisRegistryConfig,
) -> GatewayResult<Arc<dyn WorkerRegistry>> {
    match backend {
        RegistryBackend::Memory => Ok(Arc::new(InMemoryWorkerRegistry::new())),
        RegistryBackend::Redis => Ok(Arc::new(RedisWorkerRegistry::new(redis.clone()).await?)),
    }
}
