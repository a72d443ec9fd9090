//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid, workers ≥ 1)
//! - Check the Data Plane URL is usable before the first request
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SyncConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::SyncConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic rule and collect all failures.
pub fn validate_config(config: &SyncConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.kubernetes.namespace.trim().is_empty() {
        errors.push(ValidationError::new("kubernetes.namespace", "must not be empty"));
    }
    if config.kubernetes.service_name.trim().is_empty() {
        errors.push(ValidationError::new("kubernetes.service_name", "must not be empty"));
    }

    match url::Url::parse(&config.dataplane.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            "dataplane.url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("dataplane.url", format!("invalid URL: {}", e))),
    }
    if config.dataplane.request_timeout_secs == 0 {
        errors.push(ValidationError::new("dataplane.request_timeout_secs", "must be greater than 0"));
    }

    if config.backend_name().trim().is_empty() {
        errors.push(ValidationError::new("backend.name", "must not be empty"));
    }
    if !(0..=65535).contains(&config.backend.port_override) {
        errors.push(ValidationError::new(
            "backend.port_override",
            format!("{} is outside 0..=65535", config.backend.port_override),
        ));
    }

    if config.health_check.interval_secs == 0 {
        errors.push(ValidationError::new("health_check.interval_secs", "must be greater than 0"));
    }

    if config.controller.worker_count < 1 {
        errors.push(ValidationError::new("controller.worker_count", "must be at least 1"));
    }

    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }
    if config.retries.qps == 0 {
        errors.push(ValidationError::new("retries.qps", "must be greater than 0"));
    }

    if config.probes.enabled && config.probes.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("probes.bind_address", "must be host:port"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "must be host:port"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
