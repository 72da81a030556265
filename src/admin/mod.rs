//! # Admin Module
//!
//! Administrative endpoints over the worker registry, the load balancer and the
//! circuit breaker:
//! - Listing, inspecting, removing and retiring workers
//! - Per-worker statistics including breaker state
//! - Switching the balancing strategy at runtime
//! - Inspecting and resetting circuit breakers
//! - Prometheus scrape output
//!
//! ## Security Considerations
//! Admin endpoints change scheduling behaviour and remove workers. They carry no
//! authentication of their own and should only be reachable from trusted networks.

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::core::error::{GatewayError, GatewayResult};
use crate::load_balancing::LoadBalancer;
use crate::registry::WorkerRegistry;

pub mod load_balancer;
pub mod workers;

pub use load_balancer::LoadBalancerAdminRouter;
pub use workers::WorkerAdminRouter;

/// Shared state of every admin router
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<dyn WorkerRegistry>,
    pub balancer: Arc<LoadBalancer>,
    /// Present when the Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

/// Admin router, nested under `/admin` by the server
pub struct AdminRouter;

impl AdminRouter {
    pub fn create_router(state: AdminState) -> Router {
        Router::new()
            .merge(WorkerAdminRouter::routes())
            .merge(LoadBalancerAdminRouter::routes())
            .route("/metrics", get(render_metrics))
            .with_state(state)
    }
}

/// Prometheus text exposition
async fn render_metrics(State(state): State<AdminState>) -> GatewayResult<impl IntoResponse> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| GatewayError::NotFound {
            resource: "Metrics exporter".to_string(),
            id: "prometheus".to_string(),
        })?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
