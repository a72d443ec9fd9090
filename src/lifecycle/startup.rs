//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (signals, metrics, probes)
//! - Run the controller until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Probes start before the watches so `/healthz` answers during cache sync
//! - An unreachable Data Plane API at startup is only a warning; the
//!   controller retries it with backoff

use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::SyncConfig;
use crate::controller::{
    Controller, ControllerError, ControllerSettings, RateLimiter, RateLimitingQueue,
};
use crate::dataplane::{DataPlaneClient, DataPlaneError};
use crate::lifecycle::{signals, Shutdown};
use crate::membership::HostAddressTable;
use crate::mirror::kube::{build_client, MirrorError};
use crate::mirror::KubeMirror;
use crate::observability::metrics;
use crate::probes::{self, Readiness};
use crate::sync::{SyncEngine, Syncer};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind probe listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error(transparent)]
    Kubernetes(#[from] MirrorError),

    #[error("invalid Data Plane API settings: {0}")]
    DataPlane(#[from] DataPlaneError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Wire every subsystem from `config` and run until a signal arrives.
pub async fn run(config: SyncConfig) -> Result<(), StartupError> {
    let shutdown = Arc::new(Shutdown::new());
    signals::install(Arc::clone(&shutdown));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let readiness = Readiness::new();
    let probe_task = if config.probes.enabled {
        let listener = TcpListener::bind(&config.probes.bind_address)
            .await
            .map_err(StartupError::Bind)?;
        Some(tokio::spawn(probes::serve(listener, readiness.clone(), shutdown.subscribe())))
    } else {
        None
    };

    let backend = config.backend_name().to_string();
    let client = DataPlaneClient::from_config(&config.dataplane, &backend)?;
    match client.fetch_configuration_version().await {
        Ok(version) => tracing::info!(url = %config.dataplane.url, backend = %backend, version, "Data Plane API reachable"),
        Err(e) => tracing::warn!(url = %config.dataplane.url, error = %e, "Data Plane API not reachable yet"),
    }

    let kube = build_client(config.kubernetes.kubeconfig.as_deref()).await?;
    let hosts = HostAddressTable::new();
    let mirror = Arc::new(KubeMirror::new(kube, &config.kubernetes, hosts.clone()));

    let syncer = Syncer::new(
        SyncEngine::new(Arc::new(client)),
        hosts,
        config.mapping_options(),
        config.health_check_policy(),
    );
    let controller = Controller::new(
        RateLimitingQueue::new(RateLimiter::new(&config.retries)),
        mirror,
        Arc::new(syncer),
        ControllerSettings {
            worker_count: config.controller.worker_count,
            resync_period: config.controller.resync_period(),
            cache_sync_timeout: config.controller.cache_sync_timeout(),
        },
        readiness,
    );

    tracing::info!(
        namespace = %config.kubernetes.namespace,
        service = %config.kubernetes.service_name,
        backend = %backend,
        workers = config.controller.worker_count,
        "Controller starting"
    );
    let result = controller.run(&shutdown).await;

    shutdown.trigger();
    if let Some(task) = probe_task {
        match task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "Probe server failed"),
            Err(e) => tracing::error!(error = %e, "Probe server task panicked"),
            Ok(Ok(())) => {}
        }
    }

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}
