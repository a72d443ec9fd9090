//! HAProxy Data Plane API subsystem.
//!
//! # Data Flow
//! ```text
//! SyncEngine
//!     → ControlPlane::begin (fetch configuration version, open transaction)
//!     → ControlPlane::apply_server per server (PUT, POST on 404)
//!     → ControlPlane::apply_health_check_policy (backend-level PUT)
//!     → ControlPlane::commit | ControlPlane::abort
//! ```
//!
//! # Design Decisions
//! - Every request carries the transaction id; nothing is live until commit
//! - Non-success responses keep the status and at most 4 KiB of body
//! - `client.rs` talks HTTP, `memory.rs` is the in-process stand-in for tests

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

use async_trait::async_trait;

pub use client::{DataPlaneAuth, DataPlaneClient};
pub use error::{DataPlaneError, DataPlaneResult, ErrorKind};
pub use memory::InMemoryControlPlane;
pub use types::{BackendServerSpec, HealthCheckPolicy, TransactionId};

/// Transactional session against a load-balancer control plane.
///
/// Exactly one of `commit` or `abort` is called for every id returned by `begin`.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> DataPlaneResult<TransactionId>;

    /// Update the server in place, creating it if the control plane does not know it.
    async fn apply_server(&self, transaction: &TransactionId, server: &BackendServerSpec) -> DataPlaneResult<()>;

    /// Update backend-level check settings. Per-server fields are untouched.
    async fn apply_health_check_policy(
        &self,
        transaction: &TransactionId,
        policy: &HealthCheckPolicy,
    ) -> DataPlaneResult<()>;

    async fn commit(&self, transaction: &TransactionId) -> DataPlaneResult<()>;

    async fn abort(&self, transaction: &TransactionId) -> DataPlaneResult<()>;
}
