//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the calculator service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// External calculator binary settings.
    pub calculator: CalculatorConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Settings for the external calculator process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CalculatorConfig {
    /// Path to the calculator executable.
    pub binary_path: PathBuf,

    /// Upper bound for a single invocation in seconds.
    pub timeout_secs: u64,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("./bin/calculator"),
            timeout_secs: 30,
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 120 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON record per line (default for production).
    #[default]
    Json,
    /// Human-readable output for development.
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Service name stamped on every log record.
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics collection and the scrape endpoint.
    pub metrics_enabled: bool,

    /// Emit span records for every request.
    pub tracing_enabled: bool,

    /// Directory shared by all worker processes for metric segments.
    pub metrics_dir: PathBuf,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "calculator-service".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: true,
            tracing_enabled: true,
            metrics_dir: PathBuf::from("/tmp/prometheus"),
        }
    }
}

impl ServiceConfig {
    /// Overlay environment-supplied settings.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`; it is a parameter
    /// so the overlay can be exercised without touching the process
    /// environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ENABLE_PROMETHEUS") {
            self.observability.metrics_enabled = parse_toggle(&v);
        }
        if let Some(v) = lookup("ENABLE_OPENTELEMETRY") {
            self.observability.tracing_enabled = parse_toggle(&v);
        }
        if let Some(v) = lookup("PROMETHEUS_MULTIPROC_DIR") {
            self.observability.metrics_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.observability.log_level = v.to_lowercase();
        }
        if let Some(v) = lookup("CALCULATOR_PATH") {
            self.calculator.binary_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("BIND_ADDRESS") {
            self.listener.bind_address = v;
        }
    }
}

/// Boolean toggles accept `true`, `1` and `t` in any case.
pub fn parse_toggle(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_toggle_parsing() {
        assert!(parse_toggle("True"));
        assert!(parse_toggle("1"));
        assert!(parse_toggle("t"));
        assert!(!parse_toggle("False"));
        assert!(!parse_toggle("yes"));
        assert!(!parse_toggle(""));
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("ENABLE_PROMETHEUS", "false"),
            ("ENABLE_OPENTELEMETRY", "TRUE"),
            ("PROMETHEUS_MULTIPROC_DIR", "/var/run/metrics"),
            ("LOG_LEVEL", "DEBUG"),
        ]
        .into_iter()
        .collect();

        let mut config = ServiceConfig::default();
        config.observability.tracing_enabled = false;
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert!(!config.observability.metrics_enabled);
        assert!(config.observability.tracing_enabled);
        assert_eq!(config.observability.metrics_dir, PathBuf::from("/var/run/metrics"));
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_partial_toml() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [calculator]
            binary_path = "/opt/calc"

            [observability]
            log_format = "pretty"
            "#,
        )
        .unwrap();

        assert_eq!(config.calculator.binary_path, PathBuf::from("/opt/calc"));
        assert_eq!(config.calculator.timeout_secs, 30);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(config.observability.metrics_enabled);
    }
}
