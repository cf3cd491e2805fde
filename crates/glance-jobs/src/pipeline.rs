//! Processing pipeline for one claimed job.
//!
//! payload → analysis → enrichment → persist → purge → notify → hooks.
//! Failures before persistence go through the [`FailureHandler`]; failures
//! after it are logged and never change the job's outcome.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use glance_core::{
    Analysis, CaptureResult, Error, EventBus, Job, JobStore, NotificationSink, PayloadCache,
    PostProcessHook, Result, ServerEvent,
};

use crate::engines::EngineSlot;
use crate::enrichment::Enrichers;
use crate::retry::{FailureHandler, Outcome};
use crate::worker::{panic_message, shutdown_requested, WorkerEvent};

enum Analyzed {
    Done(Result<Analysis>),
    Cancelled,
}

/// Everything a worker needs to carry a job from claim to settlement.
pub struct Pipeline {
    store: Arc<dyn JobStore>,
    cache: Arc<dyn PayloadCache>,
    enrichers: Enrichers,
    sink: Arc<dyn NotificationSink>,
    hooks: Vec<Arc<dyn PostProcessHook>>,
    failures: FailureHandler,
    events: broadcast::Sender<WorkerEvent>,
    status_bus: Option<Arc<EventBus>>,
    analysis_timeout: Duration,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        cache: Arc<dyn PayloadCache>,
        enrichers: Enrichers,
        sink: Arc<dyn NotificationSink>,
        hooks: Vec<Arc<dyn PostProcessHook>>,
        failures: FailureHandler,
        events: broadcast::Sender<WorkerEvent>,
        status_bus: Option<Arc<EventBus>>,
        analysis_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            enrichers,
            sink,
            hooks,
            failures,
            events,
            status_bus,
            analysis_timeout,
        }
    }

    pub fn failures(&self) -> &FailureHandler {
        &self.failures
    }

    /// Carry a job claimed by `worker_id` to its outcome.
    pub async fn process(
        &self,
        job: &Job,
        worker_id: &str,
        engine: &mut EngineSlot,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let start = Instant::now();
        let job_id = job.id;

        let payload = match self.cache.get(job_id).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                return self
                    .failures
                    .handle(job, worker_id, &Error::PayloadLost(job_id))
                    .await
            }
            Err(e) => return self.failures.handle(job, worker_id, &e).await,
        };
        debug!(subsystem = "jobs", %job_id, payload_bytes = payload.len(), "Payload loaded");

        let analysis = match self.analyze(payload, engine, shutdown).await {
            Analyzed::Done(Ok(analysis)) => analysis,
            Analyzed::Done(Err(e)) => return self.failures.handle(job, worker_id, &e).await,
            Analyzed::Cancelled => {
                warn!(
                    subsystem = "jobs",
                    %job_id,
                    worker_id,
                    "Shutdown during analysis; job left in processing"
                );
                let _ = self.events.send(WorkerEvent::JobAbandoned {
                    job_id,
                    worker_id: worker_id.to_string(),
                });
                return Outcome::Abandoned;
            }
        };
        let line_count = analysis.lines.len();

        let result = self.enrichers.enrich(job_id, &job.context, analysis).await;

        let now = Utc::now();
        let store = &self.store;
        let stored = &result;
        match self
            .failures
            .write_with_retry("complete", job_id, move || {
                store.complete(job_id, worker_id, stored, now)
            })
            .await
        {
            Some(true) => {}
            Some(false) => {
                warn!(
                    subsystem = "jobs",
                    %job_id,
                    worker_id,
                    "Job no longer held by this worker; result discarded"
                );
                return Outcome::Superseded;
            }
            None => return Outcome::Stuck,
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            subsystem = "jobs",
            %job_id,
            worker_id,
            user_id = %job.context.user_id,
            line_count,
            interaction = result.interaction.as_str(),
            duration_ms,
            "Job completed"
        );

        self.failures.purge(job_id).await;
        let _ = self.events.send(WorkerEvent::JobCompleted {
            job_id,
            worker_id: worker_id.to_string(),
            duration_ms,
        });

        self.notify(job, &result).await;
        self.run_hooks(job, &result).await;
        Outcome::Completed
    }

    /// Run the engine on a blocking thread, bounded by the analysis timeout
    /// and interruptible by shutdown.
    async fn analyze(
        &self,
        payload: Arc<[u8]>,
        slot: &mut EngineSlot,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Analyzed {
        let mut engine = match slot.take().await {
            Ok(engine) => engine,
            Err(e) => {
                return Analyzed::Done(Err(Error::Analysis(format!(
                    "analysis engine unavailable: {e}"
                ))))
            }
        };
        let engine_name = engine.name().to_string();
        let timeout = self.analysis_timeout;

        let call = tokio::task::spawn_blocking(move || {
            let result = engine.process(&payload);
            (engine, result)
        });

        tokio::select! {
            joined = tokio::time::timeout(timeout, call) => Analyzed::Done(match joined {
                Ok(Ok((engine, result))) => {
                    slot.restore(engine);
                    result
                }
                Ok(Err(e)) => Err(Error::Analysis(format!("{engine_name} engine panicked: {e}"))),
                Err(_) => Err(Error::Analysis(format!(
                    "{engine_name} engine exceeded timeout of {timeout:?}"
                ))),
            }),
            _ = shutdown_requested(shutdown) => Analyzed::Cancelled,
        }
    }

    async fn notify(&self, job: &Job, result: &CaptureResult) {
        let summary = result.summarize_for(job.id);
        let delivery = self
            .sink
            .notify_completion(&job.context.user_id, job.id, &summary);
        match AssertUnwindSafe(delivery).catch_unwind().await {
            Ok(Ok(delivered)) => debug!(subsystem = "notify", job_id = %job.id, delivered, "Completion notified"),
            Ok(Err(e)) => warn!(
                subsystem = "notify",
                job_id = %job.id,
                user_id = %job.context.user_id,
                error = %e,
                "Completion notification failed"
            ),
            Err(panic) => warn!(
                subsystem = "notify",
                job_id = %job.id,
                user_id = %job.context.user_id,
                panic = %panic_message(panic.as_ref()),
                "Notification sink panicked"
            ),
        }

        if let Some(bus) = &self.status_bus {
            if let Ok(counts) = self.store.counts().await {
                bus.emit(ServerEvent::QueueStatus {
                    pending: counts.pending,
                    processing: counts.processing,
                });
            }
        }
    }

    async fn run_hooks(&self, job: &Job, result: &CaptureResult) {
        for hook in &self.hooks {
            match AssertUnwindSafe(hook.after_completion(job, result))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    subsystem = "hooks",
                    hook = hook.name(),
                    job_id = %job.id,
                    error = %e,
                    "Post-processing hook failed"
                ),
                Err(panic) => warn!(
                    subsystem = "hooks",
                    hook = hook.name(),
                    job_id = %job.id,
                    panic = %panic_message(panic.as_ref()),
                    "Post-processing hook panicked"
                ),
            }
        }
    }
}
