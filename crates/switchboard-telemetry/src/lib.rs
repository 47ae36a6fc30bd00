//! # Switchboard Telemetry
//!
//! Logging and metrics for the broker runtime.
//!
//! ## Components
//!
//! - **Tracing**: `tracing-subscriber` with an `EnvFilter` and either pretty
//!   console output or JSON lines for shipping.
//! - **Metrics**: Prometheus counters/gauges/histograms, exposed as an
//!   encoded text snapshot via [`encode_metrics`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use switchboard_telemetry::{TelemetryConfig, init_telemetry};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(config).expect("Failed to init telemetry");
//!
//!     // Broker runs here; logs and metrics are collected
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SB_SERVICE_NAME` | `switchboard` | Service name in log lines |
//! | `SB_CONTEXT_ID` | `background` | Execution context identifier |
//! | `SB_LOG_LEVEL` | `info` | Log level filter |
//! | `SB_CONSOLE_OUTPUT` | `true` | Console output toggle |
//! | `SB_JSON_LOGS` | `false` | JSON log format toggle |

mod config;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, CIRCUIT_TRANSITIONS,
    COMPRESSION_BYTES_SAVED, DEAD_LETTERS, DELIVERY_FAILURES, FRAMES_DROPPED, FRAMES_RECEIVED,
    FRAMES_SENT, MESSAGES_PUBLISHED, MESSAGES_RECEIVED, PUBLISH_DURATION, QUEUE_DEPTH,
    QUEUE_RETRIES, REQUEST_TIMEOUTS, ROUTES_MATCHED,
};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize tracing and metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first (registration is synchronous and idempotent per process)
    let metrics_handle = register_metrics()?;

    let tracing_guard = tracing_setup::init_tracing(&config)?;

    Ok(TelemetryGuard {
        _tracing: tracing_guard,
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
