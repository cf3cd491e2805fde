//! Job queue manager: owns the worker pool and the producer-facing API.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use glance_core::defaults::EVENT_BUS_CAPACITY;
use glance_core::{
    CaptureContext, EngineFactory, Error, EventBus, Job, JobStore, NotificationSink,
    PayloadCache, PostProcessHook, Priority, QueueStats, Result,
};

use crate::cache::MemoryPayloadCache;
use crate::config::QueueConfig;
use crate::enrichment::Enrichers;
use crate::notify::{EventBusSink, NoopSink};
use crate::pipeline::Pipeline;
use crate::retry::FailureHandler;
use crate::worker::{shutdown_requested, Worker, WorkerEvent};

/// Lifecycle owner of the worker pool.
///
/// Construct once at process start with [`QueueManagerBuilder`] and share by
/// reference (or `Arc`) with every producer.
pub struct JobQueueManager {
    store: Arc<dyn JobStore>,
    cache: Arc<dyn PayloadCache>,
    factory: Arc<dyn EngineFactory>,
    pipeline: Arc<Pipeline>,
    config: QueueConfig,
    events: broadcast::Sender<WorkerEvent>,
    running: AtomicBool,
    active_workers: Arc<AtomicUsize>,
    pool_id: String,
    lifecycle: Mutex<Lifecycle>,
}

/// Handles of a running pool. `start` and `stop` hold this lock throughout,
/// so they never interleave.
#[derive(Default)]
struct Lifecycle {
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl JobQueueManager {
    pub fn builder(store: Arc<dyn JobStore>, factory: Arc<dyn EngineFactory>) -> QueueManagerBuilder {
        QueueManagerBuilder::new(store, factory)
    }

    /// Spawn the worker pool. A no-op while already running.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.shutdown_tx.is_some() {
            debug!(subsystem = "queue", "start() ignored; pool already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = &mut lifecycle.tasks;
        for index in 0..self.config.worker_count {
            let worker = Worker::new(
                format!("{}-{index}", self.pool_id),
                self.store.clone(),
                self.pipeline.clone(),
                self.factory.clone(),
                self.events.clone(),
                shutdown_rx.clone(),
                self.active_workers.clone(),
                self.config.poll_interval(),
                self.config.error_backoff(),
            );
            tasks.push(tokio::spawn(worker.run()));
        }

        if let Some(stale_after) = self.config.stale_after() {
            let pipeline = self.pipeline.clone();
            let interval = self.config.sweep_interval();
            let mut shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_requested(&mut shutdown) => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    if let Err(e) = pipeline.failures().recover_stale(stale_after).await {
                        warn!(subsystem = "queue", op = "recover_stale", error = %e, "Stale sweep failed");
                    }
                }
            }));
        }
        lifecycle.shutdown_tx = Some(shutdown_tx);
        self.running.store(true, Ordering::SeqCst);

        info!(
            subsystem = "queue",
            pool_id = %self.pool_id,
            workers = self.config.worker_count,
            engine = self.factory.name(),
            stale_sweep = self.config.stale_after_secs.is_some(),
            "Worker pool started"
        );
    }

    /// Signal every worker to stop and wait for them to exit.
    ///
    /// Jobs mid-analysis stay in `processing`. Idempotent.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(shutdown_tx) = lifecycle.shutdown_tx.take() else {
            debug!(subsystem = "queue", "stop() ignored; pool not running");
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        let _ = shutdown_tx.send(true);
        for task in lifecycle.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(subsystem = "queue", error = ?e, "Worker task panicked");
            }
        }
        info!(subsystem = "queue", pool_id = %self.pool_id, "Worker pool stopped");
    }

    /// Accept a capture for analysis and return its job ID without waiting.
    pub async fn enqueue(
        &self,
        payload: impl Into<Arc<[u8]>>,
        context: CaptureContext,
        priority: Priority,
    ) -> Result<Uuid> {
        let payload: Arc<[u8]> = payload.into();
        let context = context.validate()?;
        if payload.is_empty() {
            return Err(Error::Validation("payload is empty".to_string()));
        }

        let job = Job::new(context, priority, self.config.max_retries);
        let job_id = job.id;
        let payload_bytes = payload.len();

        // The payload goes in first so a worker can never claim a job whose
        // bytes are not yet cached.
        self.cache.put(job_id, payload).await?;
        if let Err(e) = self.store.insert(&job).await {
            let _ = self.cache.remove(job_id).await;
            return Err(e);
        }

        info!(
            subsystem = "queue",
            op = "enqueue",
            %job_id,
            priority = %priority,
            user_id = %job.context.user_id,
            session_id = %job.context.session_id,
            payload_bytes,
            "Job enqueued"
        );
        let _ = self.events.send(WorkerEvent::JobQueued { job_id, priority });
        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<Job> {
        self.store
            .get(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    pub async fn get_stats(&self) -> Result<QueueStats> {
        let counts = self.store.counts().await?;
        Ok(QueueStats {
            pending_count: counts.pending,
            processing_count: counts.processing,
            active_worker_count: self.active_workers.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
        })
    }

    /// Subscribe to queue and worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Run one stale-job sweep now. Requires a configured stale threshold.
    pub async fn recover_stale(&self) -> Result<usize> {
        let stale_after = self.config.stale_after().ok_or_else(|| {
            Error::Config("stale recovery needs GLANCE_STALE_AFTER_SECS".to_string())
        })?;
        self.pipeline.failures().recover_stale(stale_after).await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

/// Builder for [`JobQueueManager`].
pub struct QueueManagerBuilder {
    store: Arc<dyn JobStore>,
    factory: Arc<dyn EngineFactory>,
    cache: Option<Arc<dyn PayloadCache>>,
    config: QueueConfig,
    enrichers: Enrichers,
    sink: Option<Arc<dyn NotificationSink>>,
    hooks: Vec<Arc<dyn PostProcessHook>>,
    event_bus: Option<Arc<EventBus>>,
}

impl QueueManagerBuilder {
    pub fn new(store: Arc<dyn JobStore>, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            store,
            factory,
            cache: None,
            config: QueueConfig::default(),
            enrichers: Enrichers::heuristic(),
            sink: None,
            hooks: Vec::new(),
            event_bus: None,
        }
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Payload cache; defaults to a fresh [`MemoryPayloadCache`].
    pub fn with_payload_cache(mut self, cache: Arc<dyn PayloadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Enrichers; defaults to [`Enrichers::heuristic`].
    pub fn with_enrichers(mut self, enrichers: Enrichers) -> Self {
        self.enrichers = enrichers;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostProcessHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Publish queue status on `bus` after each completion. Also becomes the
    /// notification sink unless one is set explicitly.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn build(self) -> JobQueueManager {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryPayloadCache::new()));
        let sink: Arc<dyn NotificationSink> = match (self.sink, &self.event_bus) {
            (Some(sink), _) => sink,
            (None, Some(bus)) => Arc::new(EventBusSink::new(bus.clone())),
            (None, None) => Arc::new(NoopSink),
        };

        let failures = FailureHandler::new(
            self.store.clone(),
            cache.clone(),
            events.clone(),
            self.config.terminal_write_attempts,
            self.config.terminal_write_backoff(),
        );
        let pipeline = Pipeline::new(
            self.store.clone(),
            cache.clone(),
            self.enrichers,
            sink,
            self.hooks,
            failures,
            events.clone(),
            self.event_bus,
            self.config.analysis_timeout(),
        );

        let suffix = glance_core::new_v7().simple().to_string();
        JobQueueManager {
            store: self.store,
            cache,
            factory: self.factory,
            pipeline: Arc::new(pipeline),
            config: self.config,
            events,
            running: AtomicBool::new(false),
            active_workers: Arc::new(AtomicUsize::new(0)),
            pool_id: format!("worker-{}", &suffix[suffix.len() - 6..]),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }
}
