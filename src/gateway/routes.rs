//! Worker-facing and caller-facing HTTP routes.
//!
//! - `POST /api/workers/register`
//! - `POST /api/workers/heartbeat`
//! - `POST /api/dispatch/:service_type`
//! - `GET /health`

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{HeartbeatRequest, RegisterWorkerRequest, RegisterWorkerResponse, ServiceType, WorkerRecord};
use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::observability::logging::{CorrelationId, CORRELATION_ID_HEADER};
use crate::registry::WorkerRegistry;

/// Response header naming the worker that served a dispatch
pub const WORKER_ID_HEADER: &str = "x-worker-id";

#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<dyn WorkerRegistry>,
    pub dispatcher: Dispatcher,
    /// Heartbeat interval handed to registering workers
    pub heartbeat_interval_ms: u64,
}

pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/workers/register", post(register_worker))
        .route("/api/workers/heartbeat", post(heartbeat))
        .route("/api/dispatch/:service_type", post(dispatch))
        .route("/health", get(health))
        .with_state(state)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> GatewayResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| GatewayError::invalid_input("body", rejection.body_text()))
}

async fn register_worker(
    State(state): State<GatewayState>,
    payload: Result<Json<RegisterWorkerRequest>, JsonRejection>,
) -> GatewayResult<(StatusCode, Json<RegisterWorkerResponse>)> {
    let worker = json_body(payload)?.into_new_worker()?;
    let record = state.registry.register(worker).await?;

    counter!("workers_registered_total", "service_type" => record.service_type.as_str()).increment(1);

    Ok((
        StatusCode::CREATED,
        Json(RegisterWorkerResponse {
            worker_id: record.id,
            heartbeat_interval_ms: state.heartbeat_interval_ms,
        }),
    ))
}

async fn heartbeat(
    State(state): State<GatewayState>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> GatewayResult<Json<WorkerRecord>> {
    let heartbeat = json_body(payload)?;
    if heartbeat.worker_id.trim().is_empty() {
        return Err(GatewayError::invalid_input("workerId", "worker id is required"));
    }

    match state.registry.heartbeat(heartbeat).await {
        Ok(record) => Ok(Json(record)),
        Err(e @ GatewayError::NotFound { .. }) => {
            // Usually a worker that outlived a registry restart; it should re-register
            warn!(error = %e, "Heartbeat for unknown worker");
            Err(e)
        }
        Err(e) => Err(e),
    }
}

async fn dispatch(
    State(state): State<GatewayState>,
    Path(service_type): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = CorrelationId::from_header(
        headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    );

    let mut response = match dispatch_inner(&state, &service_type, &headers, body, &correlation_id).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_ID_HEADER), value);
    }
    response
}

async fn dispatch_inner(
    state: &GatewayState,
    service_type: &str,
    headers: &HeaderMap,
    body: Bytes,
    correlation_id: &CorrelationId,
) -> GatewayResult<Response> {
    let service_type: ServiceType = service_type.parse()?;

    let mut request = DispatchRequest::new(service_type, body).with_correlation_id(correlation_id.clone());
    if let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        request = request.with_content_type(content_type);
    }

    let result = state.dispatcher.dispatch(request).await?;

    let status = StatusCode::from_u16(result.status).unwrap_or(StatusCode::OK);
    let mut response_headers = HeaderMap::new();
    if let Some(value) = result
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&result.worker_id) {
        response_headers.insert(HeaderName::from_static(WORKER_ID_HEADER), value);
    }

    Ok((status, response_headers, result.body).into_response())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub workers: usize,
    pub strategy: String,
}

async fn health(State(state): State<GatewayState>) -> GatewayResult<Json<HealthResponse>> {
    let workers = state.registry.list_all().await?;
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workers: workers.iter().filter(|w| w.is_selectable()).count(),
        strategy: state.dispatcher.balancer().strategy().name().to_string(),
    };
    debug!(workers = response.workers, "Health check");
    Ok(Json(response))
}
