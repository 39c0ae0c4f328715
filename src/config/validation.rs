//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, address parses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServiceConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("calculator timeout ({calculator}s) exceeds request timeout ({request}s)")]
    TimeoutOrder { calculator: u64, request: u64 },

    #[error("unknown log level '{0}'")]
    LogLevel(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.calculator.timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("calculator.timeout_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.request_secs"));
    }
    if config.calculator.timeout_secs > config.timeouts.request_secs {
        errors.push(ValidationError::TimeoutOrder {
            calculator: config.calculator.timeout_secs,
            request: config.timeouts.request_secs,
        });
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.as_str()) {
        errors.push(ValidationError::LogLevel(observability.log_level.clone()));
    }
    if observability.service_name.trim().is_empty() {
        errors.push(ValidationError::Empty("observability.service_name"));
    }
    if observability.metrics_dir.as_os_str().is_empty() {
        errors.push(ValidationError::Empty("observability.metrics_dir"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
