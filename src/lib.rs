//! HAProxy endpoint sync controller library.
//!
//! Keeps one HAProxy backend in line with the ready endpoints of a Kubernetes
//! service, through the HAProxy Data Plane API.

// Core subsystems
pub mod config;
pub mod controller;
pub mod dataplane;
pub mod membership;
pub mod mirror;
pub mod sync;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod probes;

pub use config::SyncConfig;
pub use controller::Controller;
pub use dataplane::{ControlPlane, DataPlaneClient};
pub use lifecycle::Shutdown;
