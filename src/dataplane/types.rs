//! Desired-state types pushed to the control plane.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Desired state of one server slot in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendServerSpec {
    /// Unique within one pass, derived from host-or-address and port.
    pub name: String,
    pub address: String,
    pub port: i32,
    pub weight: u32,
    /// Per-server health checking.
    pub check: bool,
    /// PROXY protocol v2 towards the server.
    pub send_proxy_v2: bool,
}

/// Backend-level check tuning, constant for a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckPolicy {
    pub interval_secs: u32,
    pub rise: u32,
    pub fall: u32,
    pub send_proxy_v2: bool,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            rise: 2,
            fall: 2,
            send_proxy_v2: false,
        }
    }
}

impl HealthCheckPolicy {
    /// Check timeout sent to the backend, in milliseconds.
    pub fn check_timeout_ms(&self) -> u64 {
        u64::from(self.interval_secs) * 1000
    }
}

/// Opaque transaction handle returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
