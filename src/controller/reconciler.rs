//! Level-triggered reconcile loop.
//!
//! Every change collapses into one constant key; a worker that picks it up
//! reads the whole mirror and pushes the full backend state. Failed passes
//! are requeued with backoff, successful ones reset it.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::controller::queue::RateLimitingQueue;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::mirror::{ChangeEvent, Mirror};
use crate::observability::metrics;
use crate::probes::Readiness;
use crate::sync::BackendSync;

/// The only key ever enqueued.
pub const RECONCILE_KEY: &str = "ingress-backends";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("timed out after {0:?} waiting for the initial watch listing")]
    CacheSync(Duration),
}

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub worker_count: usize,
    /// `None` disables the periodic re-enqueue.
    pub resync_period: Option<Duration>,
    pub cache_sync_timeout: Duration,
}

pub struct Controller {
    queue: RateLimitingQueue<&'static str>,
    mirror: Arc<dyn Mirror>,
    syncer: Arc<dyn BackendSync>,
    settings: ControllerSettings,
    readiness: Readiness,
}

impl Controller {
    /// Wire the controller and register the change handler on `mirror`.
    pub fn new(
        queue: RateLimitingQueue<&'static str>,
        mirror: Arc<dyn Mirror>,
        syncer: Arc<dyn BackendSync>,
        settings: ControllerSettings,
        readiness: Readiness,
    ) -> Self {
        let handler_queue = queue.clone();
        mirror.subscribe(Arc::new(move |event: &ChangeEvent| {
            tracing::trace!(kind = ?event.kind, resource = %event.resource, name = %event.name, "Enqueueing");
            handler_queue.add(RECONCILE_KEY);
        }));

        Self {
            queue,
            mirror,
            syncer,
            settings,
            readiness,
        }
    }

    pub fn queue(&self) -> &RateLimitingQueue<&'static str> {
        &self.queue
    }

    /// Run until `shutdown` fires.
    ///
    /// Starts the mirror and waits for its initial listing, then runs the
    /// workers. On shutdown the queue stops handing out work and the call
    /// returns once every worker has finished its current pass.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), ControllerError> {
        let signal = shutdown.subscribe();
        self.mirror.start(signal.clone());

        tracing::info!(timeout = ?self.settings.cache_sync_timeout, "Waiting for initial watch listing");
        let synced = tokio::select! {
            synced = self.mirror.wait_for_initial_sync(self.settings.cache_sync_timeout) => synced,
            _ = signal.cancelled() => return Ok(()),
        };
        if !synced {
            return Err(ControllerError::CacheSync(self.settings.cache_sync_timeout));
        }
        self.readiness.set_ready(true);

        self.queue.add(RECONCILE_KEY);

        let workers = self.settings.worker_count.max(1);
        tracing::info!(workers, "Starting workers");
        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let worker = Worker {
                id,
                queue: self.queue.clone(),
                mirror: Arc::clone(&self.mirror),
                syncer: Arc::clone(&self.syncer),
                cancel: signal.clone(),
            };
            tasks.spawn(worker.run());
        }
        if let Some(period) = self.settings.resync_period {
            tasks.spawn(resync(self.queue.clone(), period, signal.clone()));
        }

        signal.cancelled().await;
        tracing::info!("Shutting down workers");
        self.queue.shut_down();

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        self.readiness.set_ready(false);
        tracing::info!("Controller stopped");
        Ok(())
    }
}

struct Worker {
    id: usize,
    queue: RateLimitingQueue<&'static str>,
    mirror: Arc<dyn Mirror>,
    syncer: Arc<dyn BackendSync>,
    cancel: ShutdownSignal,
}

impl Worker {
    async fn run(self) {
        while self.process_next_work_item().await {}
        tracing::debug!(worker = self.id, "Worker stopped");
    }

    /// Returns `false` once the queue is shut down.
    async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let snapshot = self.mirror.list_membership();
        match self.syncer.sync(&snapshot, &self.cancel).await {
            Ok(()) => self.queue.forget(&key),
            Err(e) => {
                let delay = self.queue.add_rate_limited(key);
                metrics::record_requeue();
                tracing::warn!(
                    worker = self.id,
                    stage = %e.stage,
                    error = %e.source,
                    requeues = self.queue.num_requeues(&key),
                    delay = ?delay,
                    "Sync failed; requeueing"
                );
            }
        }
        self.queue.done(&key);
        true
    }
}

async fn resync(queue: RateLimitingQueue<&'static str>, period: Duration, cancel: ShutdownSignal) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tracing::debug!("Periodic resync");
                queue.add(RECONCILE_KEY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::rate_limiter::RateLimiter;
    use crate::dataplane::DataPlaneError;
    use crate::membership::MembershipSnapshot;
    use crate::mirror::MirrorStore;
    use crate::sync::{SyncError, SyncStage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts passes and fails the first `failures` of them.
    #[derive(Default)]
    struct CountingSync {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl BackendSync for CountingSync {
        async fn sync(&self, _: &MembershipSnapshot, _: &ShutdownSignal) -> Result<(), SyncError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(SyncError::new(
                    SyncStage::Commit,
                    DataPlaneError::Status { status: 500, body: "boom".into() },
                ))
            } else {
                Ok(())
            }
        }
    }

    fn settings() -> ControllerSettings {
        ControllerSettings {
            worker_count: 2,
            resync_period: None,
            cache_sync_timeout: Duration::from_secs(1),
        }
    }

    fn synced_store() -> MirrorStore {
        let store = MirrorStore::new();
        store.reset_slices(vec![]);
        store.reset_endpoints(vec![]);
        store
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_change_events_collapse_into_one_key() {
        let store = MirrorStore::new();
        let queue = RateLimitingQueue::new(RateLimiter::default());
        let _controller = Controller::new(
            queue.clone(),
            Arc::new(store.clone()),
            Arc::new(CountingSync::default()),
            settings(),
            Readiness::new(),
        );

        store.reset_slices(vec![]);
        store.reset_endpoints(vec![]);
        store.notify_host_change(crate::mirror::ChangeKind::Updated, "node1");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_workers_sync_and_stop() {
        let syncer = Arc::new(CountingSync::default());
        let readiness = Readiness::new();
        let controller = Arc::new(Controller::new(
            RateLimitingQueue::new(RateLimiter::default()),
            Arc::new(synced_store()),
            syncer.clone(),
            settings(),
            readiness.clone(),
        ));
        let shutdown = Arc::new(Shutdown::new());

        let run = {
            let (controller, shutdown) = (controller.clone(), shutdown.clone());
            tokio::spawn(async move { controller.run(&shutdown).await })
        };

        wait_until(|| syncer.calls.load(Ordering::SeqCst) >= 1).await;
        assert!(readiness.is_ready());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), run).await.unwrap().unwrap().unwrap();
        assert!(controller.queue().is_shutting_down());
        assert!(!readiness.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sync_is_requeued_after_backoff() {
        let syncer = Arc::new(CountingSync { calls: AtomicUsize::new(0), failures: 1 });
        let retries = crate::config::RetryConfig {
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
            ..Default::default()
        };
        let controller = Arc::new(Controller::new(
            RateLimitingQueue::new(RateLimiter::new(&retries)),
            Arc::new(synced_store()),
            syncer.clone(),
            settings(),
            Readiness::new(),
        ));
        let shutdown = Arc::new(Shutdown::new());
        let run = {
            let (controller, shutdown) = (controller.clone(), shutdown.clone());
            tokio::spawn(async move { controller.run(&shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(syncer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.queue().num_requeues(&RECONCILE_KEY), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(syncer.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(syncer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(controller.queue().num_requeues(&RECONCILE_KEY), 0);

        shutdown.trigger();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsynced_mirror_is_fatal() {
        let controller = Controller::new(
            RateLimitingQueue::new(RateLimiter::default()),
            Arc::new(MirrorStore::new()),
            Arc::new(CountingSync::default()),
            settings(),
            Readiness::new(),
        );

        let err = controller.run(&Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, ControllerError::CacheSync(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_resync_enqueues() {
        let syncer = Arc::new(CountingSync::default());
        let controller = Arc::new(Controller::new(
            RateLimitingQueue::new(RateLimiter::default()),
            Arc::new(synced_store()),
            syncer.clone(),
            ControllerSettings {
                resync_period: Some(Duration::from_secs(30)),
                ..settings()
            },
            Readiness::new(),
        ));
        let shutdown = Arc::new(Shutdown::new());
        let run = {
            let (controller, shutdown) = (controller.clone(), shutdown.clone());
            tokio::spawn(async move { controller.run(&shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(syncer.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(syncer.calls.load(Ordering::SeqCst), 3);

        shutdown.trigger();
        run.await.unwrap().unwrap();
    }
}
