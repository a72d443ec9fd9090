//! Local mirror of the watched cluster state.
//!
//! # Data Flow
//! ```text
//! API server watches (kube.rs)
//!     → MirrorStore (store.rs): slices + legacy endpoints by name
//!     → ChangeHandler callbacks (controller enqueues its key)
//!     → list_membership() snapshot read by the workers
//! ```

pub mod kube;
pub mod store;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::lifecycle::ShutdownSignal;
use crate::membership::MembershipSnapshot;

pub use self::kube::KubeMirror;
pub use store::MirrorStore;

/// What happened to a mirrored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
    /// The whole set was replaced after a watch (re)list.
    Resynced,
}

/// Which kind of object changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Slice,
    Endpoints,
    Node,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Slice => "endpointslice",
            ResourceKind::Endpoints => "endpoints",
            ResourceKind::Node => "node",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub resource: ResourceKind,
    /// Object name; empty for [`ChangeKind::Resynced`].
    pub name: String,
}

/// Callback run synchronously on every change. Must not block.
pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Source of membership state for the controller.
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Start feeding the mirror. Returns immediately; feeding stops when
    /// `shutdown` fires.
    fn start(&self, shutdown: ShutdownSignal);

    /// Current membership of the watched service.
    fn list_membership(&self) -> MembershipSnapshot;

    /// Register a change callback.
    fn subscribe(&self, handler: ChangeHandler);

    /// Wait until every membership shape has been listed at least once.
    /// Returns `false` on timeout.
    async fn wait_for_initial_sync(&self, timeout: Duration) -> bool;
}
