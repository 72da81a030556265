//! # Error Handling Module
//!
//! This module provides error handling for the dispatch gateway using the `thiserror` crate.
//! It defines every error the registry, the balancer and the dispatcher can produce and
//! maps each one to the HTTP status code returned to clients.
//!
//! ## Propagation
//! Only selection failures (`NoAvailableWorker`, `AllWorkersCircuitOpen`) and forward
//! failures (`WorkerDispatchFailed`) reach the caller of a dispatch. Bookkeeping errors
//! from the registry are logged where they happen and never abort a dispatch.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::dispatch::forwarder::ForwardError;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error taxonomy of the dispatch gateway
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Configuration-related errors (invalid config, unreadable files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Malformed registration, heartbeat or dispatch input. Never retried.
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Unknown worker id or other missing resource
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// No worker is registered and selectable for the service type
    #[error("No available worker for service type: {service_type}")]
    NoAvailableWorker { service_type: String },

    /// Every candidate worker has an open breaker, even after the probe reset
    #[error("All workers for service type {service_type} have open circuit breakers")]
    AllWorkersCircuitOpen { service_type: String },

    /// The forward call to the selected worker failed
    #[error("Dispatch to worker {worker_id} failed: {cause}")]
    WorkerDispatchFailed { worker_id: String, cause: ForwardError },

    /// Worker registry backend failures
    #[error("Registry error: {message}")]
    Registry { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, socket binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid input error for a specific field
    pub fn invalid_input<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error for an unknown worker id
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound {
            resource: "Worker".to_string(),
            id: id.into(),
        }
    }

    pub fn no_available_worker<S: ToString>(service_type: S) -> Self {
        Self::NoAvailableWorker {
            service_type: service_type.to_string(),
        }
    }

    pub fn all_workers_circuit_open<S: ToString>(service_type: S) -> Self {
        Self::AllWorkersCircuitOpen {
            service_type: service_type.to_string(),
        }
    }

    pub fn dispatch_failed<S: Into<String>>(worker_id: S, cause: ForwardError) -> Self {
        Self::WorkerDispatchFailed {
            worker_id: worker_id.into(),
            cause,
        }
    }

    /// Create a registry backend error with a custom message
    pub fn registry<S: Into<String>>(message: S) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::NoAvailableWorker { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::AllWorkersCircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::WorkerDispatchFailed { cause, .. } => match cause {
                ForwardError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Registry { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if the caller may retry this request later
    ///
    /// A retried dispatch lands on whatever worker the balancer and breaker pick
    /// at that point, usually a different one.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoAvailableWorker { .. }
                | Self::AllWorkersCircuitOpen { .. }
                | Self::WorkerDispatchFailed { .. }
                | Self::Registry { .. }
                | Self::Io { .. }
        )
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::InvalidInput { .. } => "invalid_input",
            Self::NotFound { .. } => "not_found",
            Self::NoAvailableWorker { .. } => "no_available_worker",
            Self::AllWorkersCircuitOpen { .. } => "all_workers_circuit_open",
            Self::WorkerDispatchFailed { .. } => "worker_dispatch_failed",
            Self::Registry { .. } => "registry_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        Self::Registry {
            message: err.to_string(),
        }
    }
}

/// Render errors as `{ "error": { code, message, type, retryable } }`
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
                "retryable": self.is_retryable(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::invalid_input("name", "missing").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::worker_not_found("w-1").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::no_available_worker("render").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::all_workers_circuit_open("parse").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::dispatch_failed("w-1", ForwardError::Timeout { timeout_ms: 30_000 })
                .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::dispatch_failed("w-1", ForwardError::Connect("refused".into()))
                .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GatewayError::no_available_worker("render").is_retryable());
        assert!(GatewayError::all_workers_circuit_open("render").is_retryable());
        assert!(GatewayError::dispatch_failed(
            "w-1",
            ForwardError::Status { status: 500, body: String::new() }
        )
        .is_retryable());
        assert!(!GatewayError::invalid_input("port", "zero").is_retryable());
        assert!(!GatewayError::worker_not_found("w-1").is_retryable());
    }

    #[test]
    fn test_dispatch_failure_carries_cause() {
        let err = GatewayError::dispatch_failed("w-9", ForwardError::Connect("connection refused".into()));
        let message = err.to_string();
        assert!(message.contains("w-9"));
        assert!(message.contains("connection refused"));
    }
}
