//! # Dispatch
//!
//! Request lifecycle orchestration on top of the registry, the breaker and the load
//! balancer, plus the liveness sweep that retires workers whose heartbeats stopped.

pub mod dispatcher;
pub mod forwarder;
pub mod liveness;

pub use dispatcher::{DispatchRequest, DispatchResponse, Dispatcher, DispatcherConfig, ServiceTimeouts};
pub use forwarder::{
    ForwardError, ForwardRequest, ForwardResponse, HttpForwarder, HttpForwarderConfig, RequestForwarder,
};
pub use liveness::{LivenessConfig, LivenessSweep};
