//! Worker loop: select, claim, process, repeat.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use glance_core::{EngineFactory, Job, JobStore, Priority, Result};

use crate::engines::EngineSlot;
use crate::pipeline::Pipeline;
use crate::retry::Outcome;

/// Event emitted by the queue manager and its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A job was accepted by `enqueue`.
    JobQueued { job_id: Uuid, priority: Priority },
    /// A worker claimed a job and started processing it.
    JobStarted { job_id: Uuid, worker_id: String },
    /// An attempt failed and the job went back to pending.
    JobRetrying {
        job_id: Uuid,
        retry_count: i32,
        error: String,
    },
    /// A job was persisted as completed.
    JobCompleted {
        job_id: Uuid,
        worker_id: String,
        duration_ms: u64,
    },
    /// A job was persisted as failed.
    JobFailed { job_id: Uuid, error: String },
    /// Shutdown interrupted analysis; the job remains in processing.
    JobAbandoned { job_id: Uuid, worker_id: String },
    /// The worker let go of a job without settling it: another holder took
    /// over (`Superseded`) or the outcome could not be written (`Stuck`).
    JobReleased {
        job_id: Uuid,
        worker_id: String,
        outcome: Outcome,
    },
    /// A worker loop started.
    WorkerStarted { worker_id: String },
    /// A worker loop exited.
    WorkerStopped { worker_id: String },
}

impl WorkerEvent {
    /// Job this event concerns, if any.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            WorkerEvent::JobQueued { job_id, .. }
            | WorkerEvent::JobStarted { job_id, .. }
            | WorkerEvent::JobRetrying { job_id, .. }
            | WorkerEvent::JobCompleted { job_id, .. }
            | WorkerEvent::JobFailed { job_id, .. }
            | WorkerEvent::JobAbandoned { job_id, .. }
            | WorkerEvent::JobReleased { job_id, .. } => Some(*job_id),
            WorkerEvent::WorkerStarted { .. } | WorkerEvent::WorkerStopped { .. } => None,
        }
    }
}

/// Resolves once shutdown is signalled or the signal sender is gone.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

enum Tick {
    /// A job was claimed and its attempt ended.
    Processed(Uuid, Outcome),
    /// Nothing pending.
    Idle,
    /// Another worker claimed the candidate first.
    LostRace,
}

/// One member of the worker pool. Owns its analysis engine.
pub(crate) struct Worker {
    id: String,
    store: Arc<dyn JobStore>,
    pipeline: Arc<Pipeline>,
    engine: EngineSlot,
    events: broadcast::Sender<WorkerEvent>,
    shutdown: watch::Receiver<bool>,
    active: Arc<AtomicUsize>,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        store: Arc<dyn JobStore>,
        pipeline: Arc<Pipeline>,
        factory: Arc<dyn EngineFactory>,
        events: broadcast::Sender<WorkerEvent>,
        shutdown: watch::Receiver<bool>,
        active: Arc<AtomicUsize>,
        poll_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            engine: EngineSlot::new(factory, id.clone()),
            id,
            store,
            pipeline,
            events,
            shutdown,
            active,
            poll_interval,
            error_backoff,
        }
    }

    #[instrument(skip(self), fields(subsystem = "worker", worker_id = %self.id))]
    pub(crate) async fn run(mut self) {
        self.active.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(WorkerEvent::WorkerStarted {
            worker_id: self.id.clone(),
        });
        info!("Worker started");

        self.engine.warm_up().await;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let pause = match self.tick().await {
                Ok(Tick::Processed(_, Outcome::Abandoned)) => break,
                Ok(Tick::Processed(job_id, outcome)) => {
                    if matches!(outcome, Outcome::Superseded | Outcome::Stuck) {
                        let _ = self.events.send(WorkerEvent::JobReleased {
                            job_id,
                            worker_id: self.id.clone(),
                            outcome,
                        });
                    }
                    debug!(%job_id, ?outcome, "Attempt finished");
                    continue;
                }
                Ok(Tick::LostRace) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Ok(Tick::Idle) => self.poll_interval,
                Err(e) => {
                    error!(error = %e, "Worker iteration failed; backing off");
                    self.error_backoff
                }
            };
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break,
                _ = sleep(pause) => {}
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        let _ = self.events.send(WorkerEvent::WorkerStopped {
            worker_id: self.id.clone(),
        });
        info!("Worker stopped");
    }

    async fn tick(&mut self) -> Result<Tick> {
        let Some(candidate) = self.store.next_candidate().await? else {
            return Ok(Tick::Idle);
        };
        let Some(job) = self.store.try_claim(candidate, &self.id, Utc::now()).await? else {
            debug!(job_id = %candidate, "Claim lost to another worker");
            return Ok(Tick::LostRace);
        };

        info!(
            job_id = %job.id,
            priority = %job.priority,
            retry_count = job.retry_count,
            "Job claimed"
        );
        let _ = self.events.send(WorkerEvent::JobStarted {
            job_id: job.id,
            worker_id: self.id.clone(),
        });

        Ok(Tick::Processed(job.id, self.process(&job).await))
    }

    /// Run the pipeline, converting a panic into a failed attempt.
    async fn process(&mut self, job: &Job) -> Outcome {
        let pipeline = self.pipeline.clone();
        let attempt = pipeline.process(job, &self.id, &mut self.engine, &mut self.shutdown);
        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(job_id = %job.id, panic = %message, "Pipeline panicked");
                let cause = glance_core::Error::Internal(format!("pipeline panicked: {message}"));
                let outcome = pipeline.failures().handle(job, &self.id, &cause).await;
                sleep(self.error_backoff).await;
                outcome
            }
        }
    }
}
