//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! optional TOML file (--config)
//!     → loader.rs (parse & deserialize)
//!     → environment overrides (INGRESS_*, HAPROXY_*, ...)
//!     → validation.rs (semantic checks)
//!     → SyncConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow running from the environment alone
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_with, parse_duration, ConfigError};
pub use schema::{
    BackendConfig, ControllerConfig, DataPlaneConfig, HealthCheckConfig, KubernetesConfig, ObservabilityConfig,
    ProbeConfig, RetryConfig, SyncConfig,
};
pub use validation::{validate_config, ValidationError};
