//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::schema::SyncConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    /// An environment variable was set to an unusable value.
    Env { var: &'static str, message: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { var, message } => write!(f, "Invalid {}: {}", var, message),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

/// Load configuration from an optional TOML file, apply the process
/// environment on top and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`] with an injectable environment lookup.
pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<SyncConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(ConfigError::Parse)?
        }
        None => SyncConfig::default(),
    };

    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay environment variables onto `config`. Unset or blank variables
/// leave the current value untouched.
pub fn apply_env_overrides<F>(config: &mut SyncConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = get("INGRESS_NAMESPACE") {
        config.kubernetes.namespace = v;
    }
    if let Some(v) = get("INGRESS_SERVICE_NAME") {
        config.kubernetes.service_name = v;
    }
    if let Some(v) = get("KUBECONFIG") {
        config.kubernetes.kubeconfig = Some(v);
    }
    if let Some(v) = get("WATCH_NODES") {
        config.kubernetes.watch_nodes = parse_bool("WATCH_NODES", &v)?;
    }

    if let Some(v) = get("HAPROXY_DATAPLANE_URL") {
        config.dataplane.url = v;
    }
    if let Some(v) = get("HAPROXY_DATAPLANE_TOKEN") {
        config.dataplane.token = Some(v);
    }
    if let Some(v) = get("HAPROXY_DATAPLANE_USERNAME") {
        config.dataplane.username = Some(v);
    }
    if let Some(v) = get("HAPROXY_DATAPLANE_PASSWORD") {
        config.dataplane.password = Some(v);
    }

    if let Some(v) = get("HAPROXY_BACKEND_NAME") {
        config.backend.name = Some(v);
    }
    if let Some(v) = get("HAPROXY_BACKEND_PORT") {
        config.backend.port_override = v.parse().map_err(|e| ConfigError::Env {
            var: "HAPROXY_BACKEND_PORT",
            message: format!("'{}' is not a port: {}", v, e),
        })?;
    }
    if let Some(v) = get("HAPROXY_SEND_PROXY_V2") {
        config.backend.send_proxy_v2 = parse_bool("HAPROXY_SEND_PROXY_V2", &v)?;
    }

    if let Some(v) = get("WORKER_COUNT") {
        config.controller.worker_count = v.parse().map_err(|e| ConfigError::Env {
            var: "WORKER_COUNT",
            message: format!("'{}' is not a count: {}", v, e),
        })?;
    }
    if let Some(v) = get("RESYNC_PERIOD") {
        config.controller.resync_period_secs = whole_seconds(env_duration("RESYNC_PERIOD", &v)?);
    }
    if let Some(v) = get("CACHE_SYNC_TIMEOUT") {
        config.controller.cache_sync_timeout_secs = whole_seconds(env_duration("CACHE_SYNC_TIMEOUT", &v)?);
    }

    if let Some(v) = get("HEALTH_BIND_ADDRESS") {
        config.probes.bind_address = v;
    }
    if let Some(v) = get("METRICS_ADDRESS") {
        config.observability.metrics_address = v;
        config.observability.metrics_enabled = true;
    }
    if let Some(v) = get("LOG_LEVEL") {
        config.observability.log_level = v;
    }
    if let Some(v) = get("LOG_FORMAT") {
        config.observability.log_format = v;
    }

    Ok(())
}

/// Parse a duration: bare seconds (`45`) or a number with one of the
/// suffixes `ms`, `s`, `m`, `h`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;

    match unit {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        "h" => value.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

fn env_duration(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse_duration(raw).ok_or_else(|| ConfigError::Env {
        var,
        message: format!("'{}' is not a duration", raw),
    })
}

/// Sub-second durations round up to one second; zero stays zero.
fn whole_seconds(duration: Duration) -> u64 {
    if duration.subsec_nanos() > 0 {
        duration.as_secs() + 1
    } else {
        duration.as_secs()
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            var,
            message: format!("'{}' is not a boolean", raw),
        }),
    }
}
