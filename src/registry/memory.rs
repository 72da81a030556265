//! In-memory worker registry backed by `DashMap`.
//!
//! Every read-modify-write on a record happens while holding the entry's shard
//! write lock, which makes counter updates atomic per worker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use super::{apply_connection_delta, incremental_mean, WorkerRegistry};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{HeartbeatRequest, NewWorker, ServiceType, WorkerRecord, WorkerStatus};

#[derive(Debug, Clone)]
struct StoredWorker {
    /// Registration sequence, used to keep listings in registration order
    seq: u64,
    record: WorkerRecord,
}

pub struct InMemoryWorkerRegistry {
    workers: DashMap<String, StoredWorker>,
    next_seq: AtomicU64,
}

impl InMemoryWorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    fn collect_sorted<F>(&self, predicate: F) -> Vec<WorkerRecord>
    where
        F: Fn(&WorkerRecord) -> bool,
    {
        let mut stored: Vec<(u64, WorkerRecord)> = self
            .workers
            .iter()
            .filter(|entry| predicate(&entry.value().record))
            .map(|entry| (entry.value().seq, entry.value().record.clone()))
            .collect();
        stored.sort_by_key(|(seq, _)| *seq);
        stored.into_iter().map(|(_, record)| record).collect()
    }
}

impl Default for InMemoryWorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerRegistry for InMemoryWorkerRegistry {
    async fn register(&self, worker: NewWorker) -> GatewayResult<WorkerRecord> {
        worker.validate()?;

        let id = Uuid::new_v4().to_string();
        let record = WorkerRecord::new(id.clone(), worker, Utc::now());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        self.workers.insert(
            id.clone(),
            StoredWorker {
                seq,
                record: record.clone(),
            },
        );

        info!(
            worker_id = %id,
            name = %record.name,
            address = %record.address(),
            service_type = %record.service_type,
            weight = record.weight,
            "Worker registered"
        );
        Ok(record)
    }

    async fn heartbeat(&self, heartbeat: HeartbeatRequest) -> GatewayResult<WorkerRecord> {
        let mut entry = self
            .workers
            .get_mut(&heartbeat.worker_id)
            .ok_or_else(|| GatewayError::worker_not_found(&heartbeat.worker_id))?;
        let record = &mut entry.record;

        record.last_heartbeat = Utc::now();
        match heartbeat.status {
            Some(status) => record.status = status,
            None if record.status == WorkerStatus::Offline => {
                info!(worker_id = %record.id, "Heartbeat received from offline worker, marking online");
                record.status = WorkerStatus::Online;
            }
            None => {}
        }
        if let Some(connections) = heartbeat.current_connections {
            record.current_connections = connections;
        }
        if let Some(cpu) = heartbeat.cpu_usage {
            record.cpu_usage = Some(cpu);
        }
        if let Some(memory) = heartbeat.memory_usage {
            record.memory_usage = Some(memory);
        }

        debug!(worker_id = %record.id, status = %record.status, "Heartbeat applied");
        Ok(record.clone())
    }

    async fn get(&self, worker_id: &str) -> GatewayResult<WorkerRecord> {
        self.workers
            .get(worker_id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| GatewayError::worker_not_found(worker_id))
    }

    async fn list_all(&self) -> GatewayResult<Vec<WorkerRecord>> {
        Ok(self.collect_sorted(|_| true))
    }

    async fn list_by_service_type(&self, service_type: ServiceType) -> GatewayResult<Vec<WorkerRecord>> {
        Ok(self.collect_sorted(|record| record.service_type == service_type))
    }

    async fn update_connections(&self, worker_id: &str, delta: i32) -> GatewayResult<u32> {
        let mut entry = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| GatewayError::worker_not_found(worker_id))?;

        let record = &mut entry.record;
        record.current_connections = apply_connection_delta(record.current_connections, delta);
        Ok(record.current_connections)
    }

    async fn record_outcome(&self, worker_id: &str, duration_ms: f64, success: bool) -> GatewayResult<()> {
        let mut entry = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| GatewayError::worker_not_found(worker_id))?;

        let record = &mut entry.record;
        record.total_requests += 1;
        if !success {
            record.failed_requests += 1;
        }
        record.avg_response_time_ms =
            incremental_mean(record.avg_response_time_ms, duration_ms, record.total_requests);
        Ok(())
    }

    async fn mark_offline(&self, worker_id: &str) -> GatewayResult<()> {
        let mut entry = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| GatewayError::worker_not_found(worker_id))?;

        entry.record.status = WorkerStatus::Offline;
        info!(worker_id = %worker_id, "Worker marked offline");
        Ok(())
    }

    async fn mark_offline_if_stale(&self, worker_id: &str, cutoff: DateTime<Utc>) -> GatewayResult<bool> {
        let mut entry = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| GatewayError::worker_not_found(worker_id))?;

        let record = &mut entry.record;
        if record.status == WorkerStatus::Offline || record.last_heartbeat >= cutoff {
            return Ok(false);
        }
        record.status = WorkerStatus::Offline;
        Ok(true)
    }

    async fn remove(&self, worker_id: &str) -> GatewayResult<WorkerRecord> {
        let (_, stored) = self
            .workers
            .remove(worker_id)
            .ok_or_else(|| GatewayError::worker_not_found(worker_id))?;

        info!(worker_id = %worker_id, "Worker removed from registry");
        Ok(stored.record)
    }
}
