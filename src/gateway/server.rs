//! # HTTP Server Module
//!
//! Composes the registry, breaker, balancer and dispatcher from configuration and
//! serves them over axum. The gateway routes sit at the root and the admin routes
//! under `/admin`, on one listener.
//!
//! ## Lifecycle
//! - `start` binds the listener and spawns the liveness sweep.
//! - Cancelling the shutdown token stops accepting connections, lets in-flight
//!   requests drain, then stops the sweep.

use axum::{extract::DefaultBodyLimit, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::routes::{self, GatewayState};
use crate::admin::{AdminRouter, AdminState};
use crate::core::circuit_breaker::WorkerCircuitBreaker;
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::dispatch::{Dispatcher, HttpForwarder, LivenessSweep, RequestForwarder};
use crate::load_balancing::LoadBalancer;
use crate::registry::{create_registry, WorkerRegistry};

pub struct GatewayServer {
    config: GatewayConfig,
    registry: Arc<dyn WorkerRegistry>,
    balancer: Arc<LoadBalancer>,
    dispatcher: Dispatcher,
    liveness: Arc<LivenessSweep>,
    metrics: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Build every component from configuration, connecting to the registry backend
    pub async fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let registry = create_registry(config.registry.backend, &config.registry.redis).await?;
        let forwarder = Arc::new(HttpForwarder::new(&config.dispatch.forwarder)?);
        Ok(Self::from_parts(config, registry, forwarder))
    }

    /// Build from an existing registry and forwarder
    pub fn from_parts(
        config: GatewayConfig,
        registry: Arc<dyn WorkerRegistry>,
        forwarder: Arc<dyn RequestForwarder>,
    ) -> Self {
        let breaker = Arc::new(WorkerCircuitBreaker::new(config.circuit_breaker.clone()));
        let balancer = Arc::new(LoadBalancer::new(
            Arc::clone(&registry),
            breaker,
            config.load_balancing.strategy(),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&balancer),
            forwarder,
            config.dispatch.clone(),
        );
        let liveness = Arc::new(LivenessSweep::new(Arc::clone(&registry), config.liveness.clone()));

        info!(
            backend = ?config.registry.backend,
            strategy = %balancer.strategy(),
            failure_threshold = config.circuit_breaker.failure_threshold,
            "Gateway components initialized"
        );

        Self {
            config,
            registry,
            balancer,
            dispatcher,
            liveness,
            metrics: None,
        }
    }

    /// Serve Prometheus output at `/admin/metrics`
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn WorkerRegistry> {
        &self.registry
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn liveness(&self) -> &Arc<LivenessSweep> {
        &self.liveness
    }

    /// Gateway and admin routes with tracing and body-size layers
    pub fn router(&self) -> Router {
        let gateway = routes::create_router(GatewayState {
            registry: Arc::clone(&self.registry),
            dispatcher: self.dispatcher.clone(),
            heartbeat_interval_ms: self.config.registry.heartbeat_interval.as_millis() as u64,
        });

        let admin = AdminRouter::create_router(AdminState {
            registry: Arc::clone(&self.registry),
            balancer: Arc::clone(&self.balancer),
            metrics: self.metrics.clone(),
        });

        gateway.nest("/admin", admin).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(self.config.server.max_request_size)),
        )
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn start(self, shutdown: CancellationToken) -> GatewayResult<()> {
        let address = self.config.server.socket_address();
        let bind_addr: SocketAddr = address
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address {}: {}", address, e)))?;

        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| GatewayError::internal(format!("Failed to bind gateway server to {}: {}", bind_addr, e)))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` is cancelled
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> GatewayResult<()> {
        let local_addr = listener.local_addr()?;
        let router = self.router();

        let sweep_token = shutdown.child_token();
        let sweep = if self.config.liveness.enabled {
            Some(Arc::clone(&self.liveness).spawn(sweep_token.clone()))
        } else {
            warn!("Liveness sweep disabled, stale workers will stay online");
            None
        };

        info!(address = %local_addr, "Gateway HTTP server listening");

        let server_token = shutdown.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await
            .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)));

        sweep_token.cancel();
        if let Some(handle) = sweep {
            if let Err(e) = handle.await {
                warn!(error = %e, "Liveness sweep task ended abnormally");
            }
        }

        info!("Gateway HTTP server stopped");
        result
    }
}
