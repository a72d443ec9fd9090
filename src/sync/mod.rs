//! Backend synchronization subsystem.
//!
//! # Data Flow
//! ```text
//! MembershipSnapshot
//!     → syncer.rs (map to BackendServerSpecs with the host table and options)
//!     → engine.rs (begin → servers → health checks → commit, abort on failure)
//!     → ControlPlane
//! ```

pub mod engine;
pub mod syncer;

use async_trait::async_trait;

use crate::lifecycle::ShutdownSignal;
use crate::membership::MembershipSnapshot;

pub use engine::{SyncEngine, SyncError, SyncStage};
pub use syncer::Syncer;

/// Pushes the backends derived from a membership snapshot.
#[async_trait]
pub trait BackendSync: Send + Sync {
    async fn sync(&self, snapshot: &MembershipSnapshot, cancel: &ShutdownSignal) -> Result<(), SyncError>;
}
