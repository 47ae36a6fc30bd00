//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for log output and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to log lines
    pub service_name: String,

    /// Context identifier (background, popup, content-<tab>, ...)
    pub context_id: String,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to enable console output (for development)
    pub console_output: bool,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "switchboard".to_string(),
            context_id: "background".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SB_SERVICE_NAME`: Service name (default: switchboard)
    /// - `SB_CONTEXT_ID`: Context identifier (default: background)
    /// - `SB_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `SB_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `SB_JSON_LOGS`: Enable JSON logs (default: false)
    pub fn from_env() -> Self {
        Self {
            service_name: env::var("SB_SERVICE_NAME").unwrap_or_else(|_| "switchboard".to_string()),

            context_id: env::var("SB_CONTEXT_ID").unwrap_or_else(|_| "background".to_string()),

            log_level: env::var("SB_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("SB_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("SB_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Create configuration for a specific execution context.
    pub fn for_context(context_id: &str) -> Self {
        let mut config = Self::from_env();
        config.context_id = context_id.to_string();
        config
    }

    /// Get the full service name including the context.
    pub fn full_service_name(&self) -> String {
        if self.context_id == "background" {
            self.service_name.clone()
        } else {
            format!("{}-{}", self.service_name, self.context_id)
        }
    }
}
