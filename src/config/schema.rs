//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sync
//! controller. All types derive Serde traits for deserialization from TOML;
//! environment variables are layered on top by the loader.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::dataplane::HealthCheckPolicy;
use crate::membership::MappingOptions;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Which service to watch.
    pub kubernetes: KubernetesConfig,

    /// Data Plane API connection.
    pub dataplane: DataPlaneConfig,

    /// Target backend and per-server options.
    pub backend: BackendConfig,

    /// Backend-level check tuning.
    pub health_check: HealthCheckConfig,

    /// Worker pool and resync cadence.
    pub controller: ControllerConfig,

    /// Requeue backoff.
    pub retries: RetryConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Liveness/readiness endpoint.
    pub probes: ProbeConfig,
}

impl SyncConfig {
    /// Backend name, falling back to the watched service name.
    pub fn backend_name(&self) -> &str {
        match self.backend.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.kubernetes.service_name,
        }
    }

    pub fn mapping_options(&self) -> MappingOptions {
        MappingOptions {
            port_override: self.backend.port_override,
            send_proxy_v2: self.backend.send_proxy_v2,
        }
    }

    pub fn health_check_policy(&self) -> HealthCheckPolicy {
        HealthCheckPolicy {
            interval_secs: self.health_check.interval_secs,
            rise: self.health_check.rise,
            fall: self.health_check.fall,
            send_proxy_v2: self.backend.send_proxy_v2,
        }
    }
}

/// Watched service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct KubernetesConfig {
    pub namespace: String,

    pub service_name: String,

    /// Explicit kubeconfig; in-cluster or default discovery otherwise.
    pub kubeconfig: Option<String>,

    /// Watch nodes to publish internal node IPs instead of pod IPs.
    pub watch_nodes: bool,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: "ingress-nginx".to_string(),
            service_name: "ingress-nginx".to_string(),
            kubeconfig: None,
            watch_nodes: true,
        }
    }
}

/// Data Plane API connection.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DataPlaneConfig {
    /// Base URL (e.g., "http://haproxy:5555").
    pub url: String,

    /// API version prefix.
    pub api_path: String,

    /// Bearer token; wins over basic credentials.
    pub token: Option<String>,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            url: "http://haproxy:5555".to_string(),
            api_path: "/v3".to_string(),
            token: None,
            username: None,
            password: None,
            request_timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for DataPlaneConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("DataPlaneConfig")
            .field("url", &self.url)
            .field("api_path", &self.api_path)
            .field("token", &redacted(&self.token))
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Target backend.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct BackendConfig {
    /// HAProxy backend name (default: the service name).
    pub name: Option<String>,

    /// Fixed port for every server when positive.
    pub port_override: i32,

    /// Send PROXY protocol v2 to the servers.
    pub send_proxy_v2: bool,
}

/// Backend-level health check tuning.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Check interval in seconds.
    pub interval_secs: u32,

    /// Consecutive successes before a server is marked up.
    pub rise: u32,

    /// Consecutive failures before a server is marked down.
    pub fall: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            rise: 2,
            fall: 2,
        }
    }
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub worker_count: usize,

    /// Periodic re-enqueue interval in seconds; 0 disables it.
    pub resync_period_secs: u64,

    /// How long to wait for the initial watch listing.
    pub cache_sync_timeout_secs: u64,
}

impl ControllerConfig {
    pub fn resync_period(&self) -> Option<Duration> {
        (self.resync_period_secs > 0).then(|| Duration::from_secs(self.resync_period_secs))
    }

    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            resync_period_secs: 30,
            cache_sync_timeout_secs: 120,
        }
    }
}

/// Requeue backoff: per-key exponential delay combined with an overall bucket.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay after the first failure in milliseconds.
    pub base_delay_ms: u64,

    /// Cap on the per-key delay in milliseconds.
    pub max_delay_ms: u64,

    /// Sustained requeues per second across all keys.
    pub qps: u32,

    /// Requeues allowed before `qps` kicks in.
    pub burst: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
            qps: 10,
            burst: 100,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// `text` or `json`.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Liveness/readiness endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub enabled: bool,

    pub bind_address: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}
