//! Bounded retries and terminal failure handling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use glance_core::{Error, Job, JobStore, PayloadCache, Result};

use crate::worker::WorkerEvent;

/// How a claimed attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Persisted as completed.
    Completed,
    /// Returned to pending with one more retry used.
    Retried,
    /// Persisted as failed.
    Failed,
    /// Shutdown interrupted analysis; the job stays in processing.
    Abandoned,
    /// The job was no longer held by this worker when writing the outcome.
    Superseded,
    /// The outcome could not be persisted; the job stays in processing.
    Stuck,
}

/// Applies the retry policy and writes terminal states with bounded retries.
pub struct FailureHandler {
    store: Arc<dyn JobStore>,
    cache: Arc<dyn PayloadCache>,
    events: broadcast::Sender<WorkerEvent>,
    write_attempts: u32,
    write_backoff: Duration,
}

impl FailureHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        cache: Arc<dyn PayloadCache>,
        events: broadcast::Sender<WorkerEvent>,
        write_attempts: u32,
        write_backoff: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            write_attempts: write_attempts.max(1),
            write_backoff,
        }
    }

    /// Settle a failed attempt of `job`, held by `worker_id`.
    ///
    /// Retriable errors re-queue the job while `retry_count < max_retries`.
    /// Everything else, and a retriable error with no budget left, fails it.
    pub async fn handle(&self, job: &Job, worker_id: &str, cause: &Error) -> Outcome {
        let job_id = job.id;
        if cause.is_retriable() && job.can_retry() {
            let store = &self.store;
            match self
                .write_with_retry("requeue", job_id, move || store.requeue(job_id, worker_id))
                .await
            {
                Some(true) => {
                    let retry_count = job.retry_count + 1;
                    warn!(
                        subsystem = "jobs",
                        %job_id,
                        worker_id,
                        retry_count,
                        max_retries = job.max_retries,
                        error = %cause,
                        "Attempt failed; job re-queued"
                    );
                    let _ = self.events.send(WorkerEvent::JobRetrying {
                        job_id,
                        retry_count,
                        error: cause.to_string(),
                    });
                    return Outcome::Retried;
                }
                Some(false) => return superseded(job_id, worker_id, "requeue"),
                None => return Outcome::Stuck,
            }
        }
        self.fail(job, worker_id, &cause.to_string()).await
    }

    /// Persist `failed` with `message`, then purge the payload.
    pub async fn fail(&self, job: &Job, worker_id: &str, message: &str) -> Outcome {
        let job_id = job.id;
        let now = Utc::now();
        let store = &self.store;
        match self
            .write_with_retry("fail", job_id, move || {
                store.fail(job_id, worker_id, message, now)
            })
            .await
        {
            Some(true) => {
                error!(
                    subsystem = "jobs",
                    %job_id,
                    worker_id,
                    retry_count = job.retry_count,
                    error = message,
                    "Job failed permanently"
                );
                self.purge(job_id).await;
                let _ = self.events.send(WorkerEvent::JobFailed {
                    job_id,
                    error: message.to_string(),
                });
                Outcome::Failed
            }
            Some(false) => superseded(job_id, worker_id, "fail"),
            None => Outcome::Stuck,
        }
    }

    /// Run a conditional status write, retrying store errors.
    ///
    /// `Some(applied)` once the store answered; `None` when every attempt
    /// errored, in which case the job is left as it is.
    pub async fn write_with_retry<F, Fut>(&self, op: &str, job_id: Uuid, mut write: F) -> Option<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        for attempt in 1..=self.write_attempts {
            match write().await {
                Ok(applied) => return Some(applied),
                Err(e) if attempt < self.write_attempts => {
                    warn!(
                        subsystem = "jobs",
                        op,
                        %job_id,
                        attempt,
                        error = %e,
                        "Status write failed; retrying"
                    );
                    tokio::time::sleep(self.write_backoff).await;
                }
                Err(e) => {
                    error!(
                        subsystem = "jobs",
                        op,
                        %job_id,
                        attempts = self.write_attempts,
                        error = %e,
                        "Status write failed on every attempt; job left in processing"
                    );
                }
            }
        }
        None
    }

    /// Drop the payload of a job that reached a terminal state.
    pub async fn purge(&self, job_id: Uuid) {
        if let Err(e) = self.cache.remove(job_id).await {
            warn!(subsystem = "jobs", op = "purge", %job_id, error = %e, "Payload purge failed");
        }
    }

    /// Treat processing jobs claimed before `stale_after` ago as failed
    /// attempts. Returns how many were settled.
    pub async fn recover_stale(&self, stale_after: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(stale_after)
            .map_err(|e| Error::Config(format!("stale threshold out of range: {e}")))?;
        let stale = self.store.stale_processing(Utc::now() - age).await?;

        let mut settled = 0;
        for job in stale {
            let Some(worker_id) = job.assigned_worker().map(str::to_string) else {
                continue;
            };
            let cause = Error::Internal(format!(
                "attempt abandoned by {worker_id}: processing longer than {}s",
                stale_after.as_secs()
            ));
            match self.handle(&job, &worker_id, &cause).await {
                Outcome::Retried | Outcome::Failed => settled += 1,
                _ => {}
            }
        }
        if settled > 0 {
            info!(subsystem = "jobs", op = "recover_stale", settled, "Recovered stale jobs");
        }
        Ok(settled)
    }
}

fn superseded(job_id: Uuid, worker_id: &str, op: &str) -> Outcome {
    warn!(
        subsystem = "jobs",
        op,
        %job_id,
        worker_id,
        "Job no longer held by this worker; outcome discarded"
    );
    Outcome::Superseded
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use glance_core::{CaptureContext, JobStatus, Priority};
    use glance_db::MemoryJobStore;

    use super::*;
    use crate::cache::MemoryPayloadCache;

    struct Fixture {
        store: Arc<MemoryJobStore>,
        cache: Arc<MemoryPayloadCache>,
        handler: FailureHandler,
        events: broadcast::Receiver<WorkerEvent>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let cache = Arc::new(MemoryPayloadCache::new());
        let (tx, rx) = broadcast::channel(16);
        let handler = FailureHandler::new(
            store.clone(),
            cache.clone(),
            tx,
            3,
            Duration::from_millis(1),
        );
        Fixture {
            store,
            cache,
            handler,
            events: rx,
        }
    }

    async fn claimed_job(fx: &Fixture, max_retries: i32) -> Job {
        let ctx = CaptureContext::new("s", "u").validate().unwrap();
        let job = Job::new(ctx, Priority::Normal, max_retries);
        fx.store.insert(&job).await.unwrap();
        fx.cache.put(job.id, Arc::from(&b"x"[..])).await.unwrap();
        fx.store
            .try_claim(job.id, "w-0", Utc::now())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_retriable_error_requeues() {
        let mut fx = fixture();
        let job = claimed_job(&fx, 2).await;

        let outcome = fx
            .handler
            .handle(&job, "w-0", &Error::Analysis("blurry".into()))
            .await;
        assert_eq!(outcome, Outcome::Retried);

        let stored = fx.store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert!(fx.cache.get(job.id).await.unwrap().is_some());
        assert!(matches!(
            fx.events.try_recv().unwrap(),
            WorkerEvent::JobRetrying { retry_count: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_exhausted_budget_fails_and_purges() {
        let mut fx = fixture();
        let job = claimed_job(&fx, 0).await;

        let outcome = fx
            .handler
            .handle(&job, "w-0", &Error::Analysis("blurry".into()))
            .await;
        assert_eq!(outcome, Outcome::Failed);

        let stored = fx.store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Failed);
        assert_eq!(stored.error_message(), Some("Analysis error: blurry"));
        assert!(fx.cache.get(job.id).await.unwrap().is_none());
        assert!(matches!(
            fx.events.try_recv().unwrap(),
            WorkerEvent::JobFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_payload_lost_skips_retries() {
        let fx = fixture();
        let job = claimed_job(&fx, 5).await;

        let outcome = fx
            .handler
            .handle(&job, "w-0", &Error::PayloadLost(job.id))
            .await;
        assert_eq!(outcome, Outcome::Failed);
        let stored = fx.store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_not_holder_is_superseded() {
        let fx = fixture();
        let job = claimed_job(&fx, 2).await;

        let outcome = fx
            .handler
            .handle(&job, "w-other", &Error::Analysis("x".into()))
            .await;
        assert_eq!(outcome, Outcome::Superseded);
        assert_eq!(
            fx.store.get(job.id).await.unwrap().unwrap().status(),
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_write_with_retry_gives_up_after_attempts() {
        let fx = fixture();
        let calls = AtomicU32::new(0);
        let result = fx
            .handler
            .write_with_retry("complete", Uuid::new_v4(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<bool, _>(Error::Store("connection reset".into())) }
            })
            .await;
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_write_with_retry_recovers() {
        let fx = fixture();
        let calls = AtomicU32::new(0);
        let result = fx
            .handler
            .write_with_retry("complete", Uuid::new_v4(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::Store("blip".into()))
                    } else {
                        Ok(true)
                    }
                }
            })
            .await;
        assert_eq!(result, Some(true));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_recover_stale_requeues_old_claims() {
        let fx = fixture();
        let ctx = CaptureContext::new("s", "u").validate().unwrap();
        let job = Job::new(ctx, Priority::Normal, 1);
        fx.store.insert(&job).await.unwrap();
        fx.store
            .try_claim(job.id, "w-dead", Utc::now() - chrono::Duration::minutes(30))
            .await
            .unwrap();

        let settled = fx
            .handler
            .recover_stale(Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(settled, 1);
        let stored = fx.store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Pending);
        assert_eq!(stored.retry_count, 1);
    }
}
