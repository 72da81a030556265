//! # Request Forwarder
//!
//! Issues the actual call to a selected worker. The dispatcher only sees the
//! [`RequestForwarder`] contract, so tests can substitute a scripted forwarder and
//! the HTTP implementation stays a thin wrapper around `reqwest`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{ServiceType, WorkerRecord};
use crate::observability::logging::{CorrelationId, CORRELATION_ID_HEADER};

/// Longest worker error body kept in a [`ForwardError::Status`]
const MAX_ERROR_BODY_LEN: usize = 1024;

/// Why a forward call failed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ForwardError {
    #[error("worker did not respond within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("worker responded with status {status}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// One unit of work addressed to one worker
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub worker_id: String,
    pub url: String,
    pub service_type: ServiceType,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub correlation_id: CorrelationId,
    pub timeout: Duration,
}

impl ForwardRequest {
    /// Address the request to `http://{host}:{port}/{serviceType}` of the worker
    pub fn for_worker(
        worker: &WorkerRecord,
        body: Bytes,
        content_type: Option<String>,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> Self {
        Self {
            worker_id: worker.id.clone(),
            url: format!("{}/{}", worker.base_url(), worker.service_type.path_segment()),
            service_type: worker.service_type,
            body,
            content_type,
            correlation_id,
            timeout,
        }
    }
}

/// Successful (2xx) worker response
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[async_trait]
pub trait RequestForwarder: Send + Sync {
    /// Forward the request; any non-2xx status is a failure
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse, ForwardError>;
}

/// Connection settings of the HTTP forwarder's client pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpForwarderConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Duration,

    pub pool_max_idle_per_host: usize,
}

impl Default for HttpForwarderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
        }
    }
}

/// Forwards work as `POST` requests with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(config: &HttpForwarderConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| GatewayError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn classify(error: reqwest::Error, timeout: Duration) -> ForwardError {
        if error.is_timeout() {
            ForwardError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if error.is_connect() {
            ForwardError::Connect(error.to_string())
        } else {
            ForwardError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl RequestForwarder for HttpForwarder {
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse, ForwardError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(timeout)
            .header(CORRELATION_ID_HEADER, request.correlation_id.as_str())
            .body(request.body);

        if let Some(content_type) = &request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        debug!(
            worker_id = %request.worker_id,
            correlation_id = %request.correlation_id,
            status = status.as_u16(),
            bytes = body.len(),
            "Worker responded"
        );

        if !status.is_success() {
            let mut text = String::from_utf8_lossy(&body).into_owned();
            if text.len() > MAX_ERROR_BODY_LEN {
                let mut cut = MAX_ERROR_BODY_LEN;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(ForwardError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(ForwardResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
