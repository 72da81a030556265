//! # Worker Admin Endpoints
//!
//! Thin reads and writes against the registry. Removing a worker also drops its
//! breaker entry and balancer scheduling state.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AdminState;
use crate::core::circuit_breaker::BreakerSnapshot;
use crate::core::error::GatewayResult;
use crate::core::types::{ServiceType, WorkerRecord, WorkerStatus};

pub struct WorkerAdminRouter;

impl WorkerAdminRouter {
    pub fn routes() -> Router<AdminState> {
        Router::new()
            .route("/workers", get(list_workers))
            .route("/workers/:worker_id", get(get_worker).delete(delete_worker))
            .route("/workers/:worker_id/offline", post(mark_worker_offline))
            .route("/workers/:worker_id/stats", get(get_worker_stats))
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkerListQuery {
    pub service_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerListResponse {
    pub workers: Vec<WorkerRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerStatsResponse {
    pub worker_id: String,
    pub name: String,
    pub service_type: ServiceType,
    pub status: WorkerStatus,
    pub current_connections: u32,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub last_heartbeat: DateTime<Utc>,
    /// `None` when the worker has no recorded failures
    pub circuit_breaker: Option<BreakerSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveWorkerResponse {
    pub removed: WorkerRecord,
}

async fn list_workers(
    State(state): State<AdminState>,
    Query(query): Query<WorkerListQuery>,
) -> GatewayResult<Json<WorkerListResponse>> {
    let workers = match query.service_type.as_deref() {
        Some(service_type) => {
            let service_type: ServiceType = service_type.parse()?;
            state.registry.list_by_service_type(service_type).await?
        }
        None => state.registry.list_all().await?,
    };

    Ok(Json(WorkerListResponse {
        total: workers.len(),
        workers,
    }))
}

async fn get_worker(
    State(state): State<AdminState>,
    Path(worker_id): Path<String>,
) -> GatewayResult<Json<WorkerRecord>> {
    Ok(Json(state.registry.get(&worker_id).await?))
}

async fn delete_worker(
    State(state): State<AdminState>,
    Path(worker_id): Path<String>,
) -> GatewayResult<Json<RemoveWorkerResponse>> {
    let removed = state.registry.remove(&worker_id).await?;
    state.balancer.breaker().reset(&worker_id);
    state.balancer.forget_worker(&worker_id);

    info!(worker_id = %worker_id, service_type = %removed.service_type, "Worker deleted by admin");
    Ok(Json(RemoveWorkerResponse { removed }))
}

async fn mark_worker_offline(
    State(state): State<AdminState>,
    Path(worker_id): Path<String>,
) -> GatewayResult<Json<WorkerRecord>> {
    state.registry.mark_offline(&worker_id).await?;
    info!(worker_id = %worker_id, "Worker marked offline by admin");
    Ok(Json(state.registry.get(&worker_id).await?))
}

async fn get_worker_stats(
    State(state): State<AdminState>,
    Path(worker_id): Path<String>,
) -> GatewayResult<Json<WorkerStatsResponse>> {
    let worker = state.registry.get(&worker_id).await?;
    let circuit_breaker = state.balancer.breaker().snapshot_for(&worker_id);

    Ok(Json(WorkerStatsResponse {
        success_rate: worker.success_rate(),
        worker_id: worker.id,
        name: worker.name,
        service_type: worker.service_type,
        status: worker.status,
        current_connections: worker.current_connections,
        total_requests: worker.total_requests,
        failed_requests: worker.failed_requests,
        avg_response_time_ms: worker.avg_response_time_ms,
        last_heartbeat: worker.last_heartbeat,
        circuit_breaker,
    }))
}
