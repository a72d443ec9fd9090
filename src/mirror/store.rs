//! In-memory mirror.
//!
//! Writers are the watch tasks (or tests); readers are the workers. Change
//! handlers run after the write lock is released.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;

use crate::lifecycle::ShutdownSignal;
use crate::membership::{LegacyEndpoints, MembershipSnapshot, TopologySlice};
use crate::mirror::{ChangeEvent, ChangeHandler, ChangeKind, Mirror, ResourceKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SyncFlags {
    slices: bool,
    endpoints: bool,
}

impl SyncFlags {
    fn complete(&self) -> bool {
        self.slices && self.endpoints
    }
}

struct Inner {
    slices: RwLock<BTreeMap<String, TopologySlice>>,
    endpoints: RwLock<BTreeMap<String, LegacyEndpoints>>,
    handlers: RwLock<Vec<ChangeHandler>>,
    synced: watch::Sender<SyncFlags>,
}

/// Shared mirror of slices and legacy endpoints keyed by object name.
#[derive(Clone)]
pub struct MirrorStore {
    inner: Arc<Inner>,
}

impl Default for MirrorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorStore {
    pub fn new() -> Self {
        let (synced, _) = watch::channel(SyncFlags::default());
        Self {
            inner: Arc::new(Inner {
                slices: RwLock::new(BTreeMap::new()),
                endpoints: RwLock::new(BTreeMap::new()),
                handlers: RwLock::new(Vec::new()),
                synced,
            }),
        }
    }

    pub fn apply_slice(&self, slice: TopologySlice) {
        let name = slice.name.clone();
        let previous = self
            .inner
            .slices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), slice);
        self.notify(upsert_kind(previous.is_some()), ResourceKind::Slice, name);
    }

    pub fn delete_slice(&self, name: &str) {
        let removed = self
            .inner
            .slices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            self.notify(ChangeKind::Deleted, ResourceKind::Slice, name.to_string());
        }
    }

    /// Replace every slice and mark slices as listed.
    pub fn reset_slices(&self, slices: Vec<TopologySlice>) {
        *self.inner.slices.write().unwrap_or_else(PoisonError::into_inner) =
            slices.into_iter().map(|s| (s.name.clone(), s)).collect();
        self.inner.synced.send_modify(|f| f.slices = true);
        self.notify(ChangeKind::Resynced, ResourceKind::Slice, String::new());
    }

    pub fn apply_endpoints(&self, endpoints: LegacyEndpoints) {
        let name = endpoints.name.clone();
        let previous = self
            .inner
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), endpoints);
        self.notify(upsert_kind(previous.is_some()), ResourceKind::Endpoints, name);
    }

    pub fn delete_endpoints(&self, name: &str) {
        let removed = self
            .inner
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            self.notify(ChangeKind::Deleted, ResourceKind::Endpoints, name.to_string());
        }
    }

    /// Replace every legacy endpoints object and mark them as listed.
    pub fn reset_endpoints(&self, endpoints: Vec<LegacyEndpoints>) {
        *self.inner.endpoints.write().unwrap_or_else(PoisonError::into_inner) =
            endpoints.into_iter().map(|e| (e.name.clone(), e)).collect();
        self.inner.synced.send_modify(|f| f.endpoints = true);
        self.notify(ChangeKind::Resynced, ResourceKind::Endpoints, String::new());
    }

    /// Host addresses live outside the store; a node change still changes
    /// the resolved backends.
    pub fn notify_host_change(&self, kind: ChangeKind, node: &str) {
        self.notify(kind, ResourceKind::Node, node.to_string());
    }

    pub fn is_synced(&self) -> bool {
        self.inner.synced.borrow().complete()
    }

    fn notify(&self, kind: ChangeKind, resource: ResourceKind, name: String) {
        let event = ChangeEvent { kind, resource, name };
        tracing::trace!(kind = ?event.kind, resource = %event.resource, name = %event.name, "Mirror changed");

        let handlers = self.inner.handlers.read().unwrap_or_else(PoisonError::into_inner).clone();
        for handler in handlers {
            handler(&event);
        }
    }
}

fn upsert_kind(existed: bool) -> ChangeKind {
    if existed {
        ChangeKind::Updated
    } else {
        ChangeKind::Added
    }
}

#[async_trait]
impl Mirror for MirrorStore {
    /// Fed directly by the caller; nothing to start.
    fn start(&self, _shutdown: ShutdownSignal) {}

    fn list_membership(&self) -> MembershipSnapshot {
        MembershipSnapshot {
            slices: self
                .inner
                .slices
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect(),
            legacy: self
                .inner
                .endpoints
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect(),
        }
    }

    fn subscribe(&self, handler: ChangeHandler) {
        self.inner.handlers.write().unwrap_or_else(PoisonError::into_inner).push(handler);
    }

    async fn wait_for_initial_sync(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.synced.subscribe();
        let synced = matches!(
            tokio::time::timeout(timeout, rx.wait_for(SyncFlags::complete)).await,
            Ok(Ok(_))
        );
        synced
    }
}
