//! Snapshot → control plane.

use async_trait::async_trait;
use std::time::Instant;

use crate::dataplane::HealthCheckPolicy;
use crate::lifecycle::ShutdownSignal;
use crate::membership::{map_to_backends, HostAddressTable, MappingOptions, MembershipSnapshot};
use crate::observability::metrics;
use crate::sync::engine::{SyncEngine, SyncError};
use crate::sync::BackendSync;

/// Maps membership to servers and pushes them through the engine.
#[derive(Clone)]
pub struct Syncer {
    engine: SyncEngine,
    hosts: HostAddressTable,
    options: MappingOptions,
    policy: HealthCheckPolicy,
}

impl Syncer {
    pub fn new(engine: SyncEngine, hosts: HostAddressTable, options: MappingOptions, policy: HealthCheckPolicy) -> Self {
        Self {
            engine,
            hosts,
            options,
            policy,
        }
    }
}

#[async_trait]
impl BackendSync for Syncer {
    async fn sync(&self, snapshot: &MembershipSnapshot, cancel: &ShutdownSignal) -> Result<(), SyncError> {
        let started = Instant::now();
        let backends = map_to_backends(snapshot, &self.hosts, &self.options);
        if backends.is_empty() {
            tracing::warn!(
                slices = snapshot.slices.len(),
                endpoints = snapshot.legacy.len(),
                "No ready endpoints; pushing health check settings only"
            );
        }

        let result = self.engine.sync(&backends, &self.policy, cancel).await;
        metrics::record_sync(result.is_ok(), started);
        if result.is_ok() {
            metrics::record_backend_servers(backends.len());
            tracing::info!(servers = backends.len(), elapsed = ?started.elapsed(), "Backends synchronized");
        }
        result
    }
}
