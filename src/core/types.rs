//! # Core Types
//!
//! Data structures shared by the registry, the load balancer and the dispatcher:
//! worker records, service types, worker status and the wire payloads used for
//! registration and heartbeats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::{GatewayError, GatewayResult};

/// Recommended heartbeat interval handed back to workers on registration
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Category of work a worker performs
///
/// A worker serves exactly one service type for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Render,
    Parse,
    Combo,
}

impl ServiceType {
    /// Every service type the gateway accepts
    pub const ALL: [ServiceType; 3] = [ServiceType::Render, ServiceType::Parse, ServiceType::Combo];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Render => "render",
            ServiceType::Parse => "parse",
            ServiceType::Combo => "combo",
        }
    }

    /// Path segment used when forwarding work to a worker
    pub fn path_segment(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "render" => Ok(ServiceType::Render),
            "parse" => Ok(ServiceType::Parse),
            "combo" => Ok(ServiceType::Combo),
            other => Err(GatewayError::invalid_input(
                "serviceType",
                format!("unsupported service type '{}', expected one of render, parse, combo", other),
            )),
        }
    }
}

/// Status of a worker as reported by heartbeats and the liveness sweep
///
/// Breaker state is tracked separately and is not a status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
    Busy,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Busy => "busy",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(WorkerStatus::Online),
            "offline" => Ok(WorkerStatus::Offline),
            "busy" => Ok(WorkerStatus::Busy),
            other => Err(GatewayError::invalid_input(
                "status",
                format!("unsupported worker status '{}'", other),
            )),
        }
    }
}

/// One registered backend worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    /// Opaque identifier assigned by the registry
    pub id: String,

    /// Human-readable name supplied at registration
    pub name: String,

    pub host: String,
    pub port: u16,

    pub service_type: ServiceType,

    /// Relative capacity hint, always at least 1
    pub weight: u32,

    pub status: WorkerStatus,

    /// Requests currently being forwarded to this worker
    pub current_connections: u32,

    pub total_requests: u64,
    pub failed_requests: u64,

    /// Incremental mean of forward durations in milliseconds
    pub avg_response_time_ms: f64,

    /// Last CPU usage reported by the worker, if any
    pub cpu_usage: Option<f64>,

    /// Last memory usage reported by the worker, if any
    pub memory_usage: Option<f64>,

    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl WorkerRecord {
    /// Build a fresh record for a newly registered worker
    pub fn new(id: String, worker: NewWorker, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: worker.name,
            host: worker.host,
            port: worker.port,
            service_type: worker.service_type,
            weight: worker.weight,
            status: WorkerStatus::Online,
            current_connections: 0,
            total_requests: 0,
            failed_requests: 0,
            avg_response_time_ms: 0.0,
            cpu_usage: None,
            memory_usage: None,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.address())
    }

    /// Offline workers are never selected
    pub fn is_selectable(&self) -> bool {
        self.status != WorkerStatus::Offline
    }

    /// Whether the worker has completed at least one forwarded request
    pub fn has_response_data(&self) -> bool {
        self.total_requests > 0
    }

    /// Percentage of successful requests, 100 when nothing was recorded yet
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 100.0;
        }
        let succeeded = self.total_requests.saturating_sub(self.failed_requests);
        (succeeded as f64 / self.total_requests as f64) * 100.0
    }
}

/// Validated registration input
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorker {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub service_type: ServiceType,
    pub weight: u32,
}

impl NewWorker {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        service_type: ServiceType,
        weight: u32,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            service_type,
            weight,
        }
    }

    /// Reject empty names, empty hosts, port 0 and zero weights
    pub fn validate(&self) -> GatewayResult<()> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::invalid_input("name", "worker name is required"));
        }
        if self.host.trim().is_empty() {
            return Err(GatewayError::invalid_input("host", "worker host is required"));
        }
        if self.port == 0 {
            return Err(GatewayError::invalid_input("port", "worker port must be non-zero"));
        }
        if self.weight == 0 {
            return Err(GatewayError::invalid_input("weight", "worker weight must be at least 1"));
        }
        Ok(())
    }
}

/// Registration payload as sent by workers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWorkerRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub service_type: String,
    pub weight: Option<u32>,
}

impl RegisterWorkerRequest {
    /// Parse and validate into a [`NewWorker`]
    pub fn into_new_worker(self) -> GatewayResult<NewWorker> {
        let service_type: ServiceType = self.service_type.parse()?;
        let worker = NewWorker {
            name: self.name.trim().to_string(),
            host: self.host.trim().to_string(),
            port: self.port,
            service_type,
            weight: self.weight.unwrap_or(1),
        };
        worker.validate()?;
        Ok(worker)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWorkerResponse {
    pub worker_id: String,
    pub heartbeat_interval_ms: u64,
}

/// Heartbeat payload; every field except the id is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub status: Option<WorkerStatus>,
    pub current_connections: Option<u32>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
}

impl HeartbeatRequest {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}
