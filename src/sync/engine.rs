//! Transactional apply of the desired backend state.
//!
//! # States
//! ```text
//! Idle → TxOpen → BackendsApplied → HealthApplied → Committed
//!          │             │                │
//!          └─────────────┴────────────────┴──→ Aborted (first error, incl. commit)
//! ```
//!
//! A failed `begin` leaves nothing to abort. Every later failure triggers one
//! best-effort abort whose own error is logged and dropped.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::dataplane::{
    BackendServerSpec, ControlPlane, DataPlaneError, DataPlaneResult, ErrorKind, HealthCheckPolicy,
    TransactionId,
};
use crate::lifecycle::ShutdownSignal;

/// Step of a sync pass, attached to every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Begin,
    ApplyBackends,
    ApplyHealthChecks,
    Commit,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStage::Begin => "beginning transaction",
            SyncStage::ApplyBackends => "updating backends",
            SyncStage::ApplyHealthChecks => "updating health checks",
            SyncStage::Commit => "committing transaction",
        };
        f.write_str(label)
    }
}

/// Terminal error of a sync pass.
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct SyncError {
    pub stage: SyncStage,
    #[source]
    pub source: DataPlaneError,
}

impl SyncError {
    pub fn new(stage: SyncStage, source: DataPlaneError) -> Self {
        Self { stage, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Drives one transaction per call against the control plane.
#[derive(Clone)]
pub struct SyncEngine {
    control_plane: Arc<dyn ControlPlane>,
}

impl SyncEngine {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Apply `backends` and `policy` atomically.
    ///
    /// Either the whole sequence commits or the transaction is aborted. Each
    /// call is raced against `cancel`; a cancelled pass fails with
    /// [`DataPlaneError::Cancelled`] after the abort.
    pub async fn sync(
        &self,
        backends: &[BackendServerSpec],
        policy: &HealthCheckPolicy,
        cancel: &ShutdownSignal,
    ) -> Result<(), SyncError> {
        let transaction = guarded(cancel, self.control_plane.begin())
            .await
            .map_err(|e| SyncError::new(SyncStage::Begin, e))?;
        tracing::debug!(transaction_id = %transaction, servers = backends.len(), "Transaction open");

        match self.apply(&transaction, backends, policy, cancel).await {
            Ok(()) => {
                tracing::debug!(transaction_id = %transaction, "Transaction committed");
                Ok(())
            }
            Err(err) => {
                tracing::debug!(transaction_id = %transaction, stage = %err.stage, "Aborting transaction");
                self.abort(&transaction).await;
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        transaction: &TransactionId,
        backends: &[BackendServerSpec],
        policy: &HealthCheckPolicy,
        cancel: &ShutdownSignal,
    ) -> Result<(), SyncError> {
        for server in backends {
            guarded(cancel, self.control_plane.apply_server(transaction, server))
                .await
                .map_err(|e| SyncError::new(SyncStage::ApplyBackends, e))?;
        }

        guarded(cancel, self.control_plane.apply_health_check_policy(transaction, policy))
            .await
            .map_err(|e| SyncError::new(SyncStage::ApplyHealthChecks, e))?;

        guarded(cancel, self.control_plane.commit(transaction))
            .await
            .map_err(|e| SyncError::new(SyncStage::Commit, e))
    }

    /// Not raced against cancellation; bounded by the client's request timeout.
    async fn abort(&self, transaction: &TransactionId) {
        if let Err(e) = self.control_plane.abort(transaction).await {
            tracing::warn!(transaction_id = %transaction, error = %e, "Failed to abort transaction");
        }
    }
}

async fn guarded<T>(cancel: &ShutdownSignal, call: impl Future<Output = DataPlaneResult<T>>) -> DataPlaneResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DataPlaneError::Cancelled),
        res = call => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::memory::{Call, InMemoryControlPlane, Operation};
    use crate::lifecycle::Shutdown;
    use async_trait::async_trait;
    use std::time::Duration;

    fn servers(names: &[&str]) -> Vec<BackendServerSpec> {
        names
            .iter()
            .map(|n| BackendServerSpec {
                name: n.to_string(),
                address: "10.0.0.1".into(),
                port: 80,
                weight: 1,
                check: true,
                send_proxy_v2: false,
            })
            .collect()
    }

    fn is_abort(c: &Call) -> bool {
        matches!(c, Call::Abort(_))
    }

    fn is_commit(c: &Call) -> bool {
        matches!(c, Call::Commit(_))
    }

    #[tokio::test]
    async fn test_sync_commits_everything() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let engine = SyncEngine::new(cp.clone());
        let backends = servers(&["a-80", "b-80"]);

        engine
            .sync(&backends, &HealthCheckPolicy::default(), &ShutdownSignal::never())
            .await
            .unwrap();

        assert_eq!(cp.committed_servers(), backends);
        assert_eq!(cp.committed_policy(), Some(HealthCheckPolicy::default()));
        assert_eq!(cp.count(is_abort), 0);
        assert_eq!(cp.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_server_failure_aborts_without_commit() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.fail_server("b-80");
        let engine = SyncEngine::new(cp.clone());

        let err = engine
            .sync(&servers(&["a-80", "b-80", "c-80"]), &HealthCheckPolicy::default(), &ShutdownSignal::never())
            .await
            .unwrap_err();

        assert_eq!(err.stage, SyncStage::ApplyBackends);
        assert_eq!(cp.count(is_commit), 0);
        assert_eq!(cp.count(is_abort), 1);
        assert_eq!(cp.count(|c| *c == Call::ApplyServer("c-80".into())), 0);
        assert!(cp.committed_servers().is_empty());
        assert_eq!(cp.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_begin_failure_has_nothing_to_abort() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.fail_next(Operation::Begin, 1);
        let engine = SyncEngine::new(cp.clone());

        let err = engine
            .sync(&servers(&["a-80"]), &HealthCheckPolicy::default(), &ShutdownSignal::never())
            .await
            .unwrap_err();

        assert_eq!(err.stage, SyncStage::Begin);
        assert_eq!(cp.calls(), vec![Call::Begin]);
    }

    #[tokio::test]
    async fn test_commit_failure_aborts() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.fail_next(Operation::Commit, 1);
        let engine = SyncEngine::new(cp.clone());

        let err = engine
            .sync(&servers(&["a-80"]), &HealthCheckPolicy::default(), &ShutdownSignal::never())
            .await
            .unwrap_err();

        assert_eq!(err.stage, SyncStage::Commit);
        assert!(err.to_string().starts_with("committing transaction: status 500"));
        assert_eq!(cp.count(is_abort), 1);
    }

    #[tokio::test]
    async fn test_abort_failure_keeps_original_error() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.fail_next(Operation::ApplyHealthCheckPolicy, 1);
        cp.fail_next(Operation::Abort, 1);
        let engine = SyncEngine::new(cp.clone());

        let err = engine
            .sync(&servers(&["a-80"]), &HealthCheckPolicy::default(), &ShutdownSignal::never())
            .await
            .unwrap_err();

        assert_eq!(err.stage, SyncStage::ApplyHealthChecks);
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(cp.count(is_abort), 1);
    }

    /// Hangs on every server upsert.
    struct StallingControlPlane {
        inner: InMemoryControlPlane,
    }

    #[async_trait]
    impl ControlPlane for StallingControlPlane {
        async fn begin(&self) -> DataPlaneResult<TransactionId> {
            self.inner.begin().await
        }

        async fn apply_server(&self, _: &TransactionId, _: &BackendServerSpec) -> DataPlaneResult<()> {
            std::future::pending().await
        }

        async fn apply_health_check_policy(&self, tx: &TransactionId, policy: &HealthCheckPolicy) -> DataPlaneResult<()> {
            self.inner.apply_health_check_policy(tx, policy).await
        }

        async fn commit(&self, tx: &TransactionId) -> DataPlaneResult<()> {
            self.inner.commit(tx).await
        }

        async fn abort(&self, tx: &TransactionId) -> DataPlaneResult<()> {
            self.inner.abort(tx).await
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_inflight_call() {
        let cp = Arc::new(StallingControlPlane { inner: InMemoryControlPlane::new() });
        let engine = SyncEngine::new(cp.clone());
        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();

        let pass = tokio::spawn(async move {
            engine
                .sync(&servers(&["a-80"]), &HealthCheckPolicy::default(), &signal)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();

        let err = tokio::time::timeout(Duration::from_secs(1), pass)
            .await
            .expect("pass should stop promptly")
            .unwrap()
            .unwrap_err();

        assert_eq!(err.stage, SyncStage::ApplyBackends);
        assert!(matches!(err.source, DataPlaneError::Cancelled));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(cp.inner.count(is_abort), 1);
        assert_eq!(cp.inner.open_transactions(), 0);
    }
}
