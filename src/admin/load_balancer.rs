//! # Load Balancer Admin Endpoints
//!
//! Runtime strategy switching, selection statistics and circuit breaker management.
//! A strategy switch affects only selections made after it.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AdminState;
use crate::core::circuit_breaker::{BreakerSnapshot, CircuitBreakerConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::load_balancing::{BalancingStrategy, LoadBalancerStats};

pub struct LoadBalancerAdminRouter;

impl LoadBalancerAdminRouter {
    pub fn routes() -> Router<AdminState> {
        Router::new()
            // Strategy management
            .route("/load-balancer/strategy", get(get_strategy).put(switch_strategy))
            // Statistics
            .route("/load-balancer/stats", get(get_stats))
            .route("/load-balancer/stats/reset", post(reset_stats))
            // Circuit breakers
            .route("/circuit-breakers", get(list_circuit_breakers))
            .route("/circuit-breakers/:worker_id/reset", post(reset_circuit_breaker))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StrategyInfo {
    pub name: String,
    pub description: String,
    pub is_current: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentStrategyResponse {
    pub strategy: String,
    pub available: Vec<StrategyInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwitchStrategyRequest {
    pub strategy: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwitchStrategyResponse {
    pub previous_strategy: String,
    pub strategy: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CircuitBreakersResponse {
    pub config: CircuitBreakerConfig,
    pub breakers: Vec<BreakerSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetBreakerResponse {
    pub worker_id: String,
    /// False when the worker had no breaker entry
    pub reset: bool,
}

async fn get_strategy(State(state): State<AdminState>) -> Json<CurrentStrategyResponse> {
    let current = state.balancer.strategy();
    let available = BalancingStrategy::ALL
        .iter()
        .map(|strategy| StrategyInfo {
            name: strategy.name().to_string(),
            description: strategy.description().to_string(),
            is_current: *strategy == current,
        })
        .collect();

    Json(CurrentStrategyResponse {
        strategy: current.name().to_string(),
        available,
    })
}

/// Unknown names are rejected here rather than silently falling back
async fn switch_strategy(
    State(state): State<AdminState>,
    Json(request): Json<SwitchStrategyRequest>,
) -> GatewayResult<Json<SwitchStrategyResponse>> {
    let strategy = BalancingStrategy::parse_name(&request.strategy).ok_or_else(|| {
        GatewayError::invalid_input(
            "strategy",
            format!("unknown balancing strategy '{}'", request.strategy),
        )
    })?;

    let previous = state.balancer.set_strategy(strategy);
    info!(previous = %previous, strategy = %strategy, "Balancing strategy switched by admin");

    Ok(Json(SwitchStrategyResponse {
        previous_strategy: previous.name().to_string(),
        strategy: strategy.name().to_string(),
    }))
}

async fn get_stats(State(state): State<AdminState>) -> Json<LoadBalancerStats> {
    Json(state.balancer.stats())
}

async fn reset_stats(State(state): State<AdminState>) -> Json<LoadBalancerStats> {
    state.balancer.reset_stats();
    info!("Load balancer statistics reset by admin");
    Json(state.balancer.stats())
}

async fn list_circuit_breakers(State(state): State<AdminState>) -> Json<CircuitBreakersResponse> {
    let breaker = state.balancer.breaker();
    Json(CircuitBreakersResponse {
        config: breaker.config().clone(),
        breakers: breaker.snapshot(),
    })
}

async fn reset_circuit_breaker(
    State(state): State<AdminState>,
    Path(worker_id): Path<String>,
) -> Json<ResetBreakerResponse> {
    let reset = state.balancer.breaker().reset(&worker_id);
    if reset {
        info!(worker_id = %worker_id, "Circuit breaker reset by admin");
    }
    Json(ResetBreakerResponse { worker_id, reset })
}
