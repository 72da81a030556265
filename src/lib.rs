//! # Dispatch Gateway Library
//!
//! A request-dispatch gateway that keeps a registry of stateless backend workers
//! grouped by service type and routes each unit of work to exactly one healthy worker.
//!
//! ## Architecture Overview
//!
//! - `core`: error types, configuration, worker data model, per-worker circuit breaker
//! - `registry`: the worker registry contract with in-memory and Redis backends
//! - `load_balancing`: selection strategies and the load balancer
//! - `dispatch`: request forwarding, the dispatch lifecycle and the liveness sweep
//! - `observability`: structured logging, correlation ids and Prometheus metrics
//! - `admin`: administrative endpoints for workers, strategy and breakers
//! - `gateway`: HTTP routes and the server that composes everything
//!
//! Scheduling and breaker state live in process memory only and are rebuilt from
//! heartbeats and live traffic after a restart.

/// Error types, configuration, data model and circuit breaker
pub mod core;

/// Worker registry contract and backends
pub mod registry;

/// Selection strategies and the load balancer
pub mod load_balancing;

/// Forwarding, dispatch orchestration and liveness sweep
pub mod dispatch;

/// Logging, correlation ids and metrics
pub mod observability;

/// Admin API for workers, balancing strategy and circuit breakers
pub mod admin;

/// HTTP routes and server
pub mod gateway;

pub use core::circuit_breaker::{CircuitBreakerConfig, WorkerCircuitBreaker};
pub use core::config::GatewayConfig;
pub use core::error::{GatewayError, GatewayResult};
pub use core::types::{ServiceType, WorkerRecord, WorkerStatus};
pub use dispatch::{Dispatcher, DispatchRequest, DispatchResponse, LivenessSweep};
pub use gateway::GatewayServer;
pub use load_balancing::{BalancingStrategy, LoadBalancer};
pub use registry::{InMemoryWorkerRegistry, WorkerRegistry};
