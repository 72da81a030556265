//! # Dispatcher
//!
//! Runs one request lifecycle: validate, select a worker, count the connection,
//! forward with a bounded timeout, then record the outcome in the breaker and the
//! registry and release the connection.
//!
//! ## Guarantees
//! - The connection increment is always matched by exactly one decrement, whether the
//!   forward succeeds, fails, times out or panics.
//! - The lifecycle runs in its own task. A caller that drops the dispatch future
//!   (client disconnect) does not interrupt the forward or its bookkeeping.
//! - Bookkeeping failures are logged and counted; they never fail a dispatch.
//! - No automatic retry on another worker. Callers may re-dispatch.

use bytes::Bytes;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::forwarder::{ForwardError, ForwardRequest, ForwardResponse, HttpForwarderConfig, RequestForwarder};
use crate::core::circuit_breaker::WorkerCircuitBreaker;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{ServiceType, WorkerRecord};
use crate::load_balancing::LoadBalancer;
use crate::observability::logging::CorrelationId;
use crate::registry::WorkerRegistry;

/// Forward timeouts and HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Timeout for service types without an override
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Per-service-type timeout overrides
    pub service_timeouts: ServiceTimeouts,

    pub forwarder: HttpForwarderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceTimeouts {
    #[serde(with = "humantime_serde")]
    pub render: Option<Duration>,

    #[serde(with = "humantime_serde")]
    pub parse: Option<Duration>,

    /// Multi-stage work gets a longer budget by default
    #[serde(with = "humantime_serde")]
    pub combo: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            service_timeouts: ServiceTimeouts::default(),
            forwarder: HttpForwarderConfig::default(),
        }
    }
}

impl Default for ServiceTimeouts {
    fn default() -> Self {
        Self {
            render: None,
            parse: None,
            combo: Some(Duration::from_secs(60)),
        }
    }
}

impl DispatcherConfig {
    pub fn timeout_for(&self, service_type: ServiceType) -> Duration {
        let override_timeout = match service_type {
            ServiceType::Render => self.service_timeouts.render,
            ServiceType::Parse => self.service_timeouts.parse,
            ServiceType::Combo => self.service_timeouts.combo,
        };
        override_timeout.unwrap_or(self.default_timeout)
    }
}

/// One unit of work submitted by a caller
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub service_type: ServiceType,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub correlation_id: CorrelationId,
}

impl DispatchRequest {
    pub fn new(service_type: ServiceType, body: impl Into<Bytes>) -> Self {
        Self {
            service_type,
            body: body.into(),
            content_type: None,
            correlation_id: CorrelationId::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.body.is_empty() {
            return Err(GatewayError::invalid_input("body", "request payload is required"));
        }
        Ok(())
    }
}

/// The worker's response together with who served it
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub worker_id: String,
    pub worker_address: String,
    pub correlation_id: CorrelationId,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub duration: Duration,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<dyn WorkerRegistry>,
    balancer: Arc<LoadBalancer>,
    breaker: Arc<WorkerCircuitBreaker>,
    forwarder: Arc<dyn RequestForwarder>,
    config: Arc<DispatcherConfig>,
}

impl Dispatcher {
    /// The breaker is taken from the balancer so selection and outcome share state
    pub fn new(
        registry: Arc<dyn WorkerRegistry>,
        balancer: Arc<LoadBalancer>,
        forwarder: Arc<dyn RequestForwarder>,
        config: DispatcherConfig,
    ) -> Self {
        let breaker = Arc::clone(balancer.breaker());
        Self {
            registry,
            balancer,
            breaker,
            forwarder,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> GatewayResult<DispatchResponse> {
        request.validate()?;

        let worker = self.balancer.try_select_worker(request.service_type).await?;

        let this = self.clone();
        let task = tokio::spawn(async move { this.run(worker, request).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Dispatch task aborted");
                Err(GatewayError::internal(format!("Dispatch task failed: {}", e)))
            }
        }
    }

    async fn run(&self, worker: WorkerRecord, request: DispatchRequest) -> GatewayResult<DispatchResponse> {
        let service_type = request.service_type;
        let correlation_id = request.correlation_id.clone();
        let timeout = self.config.timeout_for(service_type);

        let acquired = match self.registry.update_connections(&worker.id, 1).await {
            Ok(_) => true,
            Err(e) => {
                self.bookkeeping_failed(&worker.id, "increment_connections", &e);
                false
            }
        };
        gauge!("dispatch_in_flight").increment(1.0);

        debug!(
            worker_id = %worker.id,
            address = %worker.address(),
            service_type = %service_type,
            correlation_id = %correlation_id,
            timeout_ms = timeout.as_millis() as u64,
            "Forwarding request"
        );

        let forward_request = ForwardRequest::for_worker(
            &worker,
            request.body,
            request.content_type,
            correlation_id.clone(),
            timeout,
        );

        let start = Instant::now();
        let forward = tokio::time::timeout(timeout, self.forwarder.forward(forward_request));
        let outcome = match AssertUnwindSafe(forward).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(ForwardError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(_panic) => {
                error!(worker_id = %worker.id, correlation_id = %correlation_id, "Forwarder panicked");
                Err(ForwardError::Transport("forwarder panicked".to_string()))
            }
        };
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        let result = match outcome {
            Ok(response) => {
                self.breaker.record_success(&worker.id);
                self.record_outcome(&worker.id, elapsed_ms, true).await;
                Ok(response)
            }
            Err(cause) => {
                self.breaker.record_failure(&worker.id);
                self.record_outcome(&worker.id, elapsed_ms, false).await;
                Err(cause)
            }
        };

        if acquired {
            if let Err(e) = self.registry.update_connections(&worker.id, -1).await {
                self.bookkeeping_failed(&worker.id, "decrement_connections", &e);
            }
        }
        gauge!("dispatch_in_flight").decrement(1.0);

        let outcome_label = if result.is_ok() { "success" } else { "failure" };
        counter!(
            "dispatch_requests_total",
            "service_type" => service_type.as_str(),
            "outcome" => outcome_label
        )
        .increment(1);
        histogram!("dispatch_duration_seconds", "service_type" => service_type.as_str())
            .record(elapsed.as_secs_f64());

        match result {
            Ok(ForwardResponse {
                status,
                content_type,
                body,
            }) => {
                info!(
                    worker_id = %worker.id,
                    service_type = %service_type,
                    correlation_id = %correlation_id,
                    status = status,
                    duration_ms = elapsed_ms,
                    "Dispatch completed"
                );
                Ok(DispatchResponse {
                    worker_address: worker.address(),
                    worker_id: worker.id,
                    correlation_id,
                    status,
                    content_type,
                    body,
                    duration: elapsed,
                })
            }
            Err(cause) => {
                warn!(
                    worker_id = %worker.id,
                    service_type = %service_type,
                    correlation_id = %correlation_id,
                    error = %cause,
                    duration_ms = elapsed_ms,
                    "Dispatch failed"
                );
                Err(GatewayError::dispatch_failed(worker.id, cause))
            }
        }
    }

    async fn record_outcome(&self, worker_id: &str, elapsed_ms: f64, success: bool) {
        if let Err(e) = self.registry.record_outcome(worker_id, elapsed_ms, success).await {
            self.bookkeeping_failed(worker_id, "record_outcome", &e);
        }
    }

    fn bookkeeping_failed(&self, worker_id: &str, operation: &'static str, error: &GatewayError) {
        counter!("registry_bookkeeping_errors_total", "operation" => operation).increment(1);
        warn!(worker_id = %worker_id, operation = operation, error = %error, "Registry bookkeeping failed");
    }
}
