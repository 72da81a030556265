//! # Structured Logging
//!
//! Subscriber initialisation and the correlation id carried by every dispatch.
//!
//! Every log line is emitted through `tracing` with structured fields (`worker_id`,
//! `service_type`, `strategy`, `correlation_id`) so JSON output can be filtered per
//! worker or per request.

use std::fmt;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt as subscriber_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};
use uuid::Uuid;

use crate::core::error::GatewayResult;
use crate::observability::config::{LogConfig, LogFormat};

/// Header carrying the correlation id between callers, the gateway and workers
pub const CORRELATION_ID_HEADER: &str = "x-request-id";

/// Longest inbound correlation id accepted as-is
const MAX_CORRELATION_ID_LEN: usize = 128;

/// Correlation ID for tracking one dispatch across the gateway and the worker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse an inbound id when it is usable, otherwise generate a fresh one
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(id) if Self::is_acceptable(id) => Self(id.to_string()),
            _ => Self::new(),
        }
    }

    fn is_acceptable(id: &str) -> bool {
        !id.is_empty()
            && id.len() <= MAX_CORRELATION_ID_LEN
            && id.bytes().all(|b| b.is_ascii_graphic())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global tracing subscriber
///
/// Calling this more than once is harmless: later calls keep the first subscriber.
pub fn init_logging(config: &LogConfig) -> GatewayResult<()> {
    let env_filter = EnvFilter::from_default_env().add_directive(parse_level(&config.level).into());

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                subscriber_fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(subscriber_fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(level = %config.level, format = ?config.format, "Structured logging initialized");
    Ok(())
}
