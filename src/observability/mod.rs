// Logging and metrics configuration
pub mod config;

// Prometheus recorder and metric descriptions
pub mod metrics;

// Subscriber setup and correlation ids
pub mod logging;

pub use config::{LogConfig, LogFormat, MetricsConfig, ObservabilityConfig};
pub use logging::{init_logging, CorrelationId, CORRELATION_ID_HEADER};
pub use metrics::{build_prometheus_recorder, describe_metrics, install_prometheus_recorder};
