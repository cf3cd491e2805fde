//! In-process job store.
//!
//! Used for single-process deployments and tests. Every conditional update
//! checks and mutates under one write guard, which makes it atomic with
//! respect to every other store call.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use glance_core::{CaptureResult, Error, Job, JobStatus, JobStore, Result, StoreCounts};

struct Entry {
    job: Job,
    /// Insertion order, the final FIFO tiebreak.
    seq: u64,
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Entry>>,
    next_seq: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of any status.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        if job.status() != JobStatus::Pending {
            return Err(Error::Store(format!(
                "job {} must be inserted as pending, not {}",
                job.id,
                job.status()
            )));
        }

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(Error::Store(format!("duplicate job id {}", job.id)));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        jobs.insert(
            job.id,
            Entry {
                job: job.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .await
            .get(&job_id)
            .map(|entry| entry.job.clone()))
    }

    async fn next_candidate(&self) -> Result<Option<Uuid>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|entry| entry.job.status() == JobStatus::Pending)
            .min_by_key(|entry| {
                (
                    Reverse(entry.job.priority.rank()),
                    entry.job.created_at,
                    entry.seq,
                )
            })
            .map(|entry| entry.job.id))
    }

    async fn try_claim(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs
            .get_mut(&job_id)
            .filter(|entry| entry.job.status() == JobStatus::Pending)
            .and_then(|entry| {
                entry
                    .job
                    .claim(worker_id, now)
                    .then(|| entry.job.clone())
            }))
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: &CaptureResult,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs
            .get_mut(&job_id)
            .is_some_and(|entry| entry.job.complete(worker_id, result.clone(), now)))
    }

    async fn requeue(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs
            .get_mut(&job_id)
            .is_some_and(|entry| entry.job.requeue(worker_id)))
    }

    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs
            .get_mut(&job_id)
            .is_some_and(|entry| entry.job.fail(worker_id, error, now)))
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let jobs = self.jobs.read().await;
        let mut counts = StoreCounts::default();
        for entry in jobs.values() {
            match entry.job.status() {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed | JobStatus::Failed => {}
            }
        }
        Ok(counts)
    }

    async fn stale_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut stale: Vec<Job> = jobs
            .values()
            .filter(|entry| entry.job.status() == JobStatus::Processing)
            .filter(|entry| entry.job.started_at().is_some_and(|t| t < older_than))
            .map(|entry| entry.job.clone())
            .collect();
        stale.sort_by_key(|job| job.started_at());
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use glance_core::{Analysis, CaptureContext, Priority};

    use super::*;

    fn job(priority: Priority) -> Job {
        let ctx = CaptureContext::new("sess", "user").validate().unwrap();
        Job::new(ctx, priority, 2)
    }

    fn result() -> CaptureResult {
        CaptureResult::bare(Analysis::new("text", vec!["hi".into()]))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryJobStore::new();
        let j = job(Priority::Normal);
        store.insert(&j).await.unwrap();
        assert_eq!(store.get(j.id).await.unwrap(), Some(j));
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let store = MemoryJobStore::new();
        let j = job(Priority::Normal);
        store.insert(&j).await.unwrap();
        assert!(matches!(store.insert(&j).await, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_candidate_prefers_priority_then_fifo() {
        let store = MemoryJobStore::new();
        let low = job(Priority::Low);
        let first_normal = job(Priority::Normal);
        let second_normal = job(Priority::Normal);
        let high = job(Priority::High);
        for j in [&low, &first_normal, &second_normal, &high] {
            store.insert(j).await.unwrap();
        }

        let mut order = Vec::new();
        while let Some(id) = store.next_candidate().await.unwrap() {
            store.try_claim(id, "w", Utc::now()).await.unwrap().unwrap();
            order.push(id);
        }
        assert_eq!(order, vec![high.id, first_normal.id, second_normal.id, low.id]);
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let store = MemoryJobStore::new();
        let j = job(Priority::Normal);
        store.insert(&j).await.unwrap();

        let claimed = store.try_claim(j.id, "w-0", Utc::now()).await.unwrap();
        assert_eq!(claimed.unwrap().assigned_worker(), Some("w-0"));
        assert!(store.try_claim(j.id, "w-1", Utc::now()).await.unwrap().is_none());
        assert!(store.next_candidate().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_single_winner() {
        let store = Arc::new(MemoryJobStore::new());
        let j = job(Priority::High);
        store.insert(&j).await.unwrap();
        let job_id = j.id;

        let attempts: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .try_claim(job_id, &format!("w-{i}"), Utc::now())
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut winners = 0;
        for handle in attempts {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_terminal_writes_require_holder() {
        let store = MemoryJobStore::new();
        let j = job(Priority::Normal);
        store.insert(&j).await.unwrap();
        store.try_claim(j.id, "w-0", Utc::now()).await.unwrap();

        assert!(!store.complete(j.id, "w-1", &result(), Utc::now()).await.unwrap());
        assert!(!store.fail(j.id, "w-1", "x", Utc::now()).await.unwrap());
        assert!(store.complete(j.id, "w-0", &result(), Utc::now()).await.unwrap());
        assert!(!store.fail(j.id, "w-0", "late", Utc::now()).await.unwrap());

        let stored = store.get(j.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Completed);
        assert!(stored.error_message().is_none());
    }

    #[tokio::test]
    async fn test_requeue_respects_bound() {
        let store = MemoryJobStore::new();
        let j = job(Priority::Normal);
        store.insert(&j).await.unwrap();

        for attempt in 0..2 {
            store.try_claim(j.id, "w", Utc::now()).await.unwrap().unwrap();
            assert!(store.requeue(j.id, "w").await.unwrap(), "attempt {attempt}");
        }
        store.try_claim(j.id, "w", Utc::now()).await.unwrap().unwrap();
        assert!(!store.requeue(j.id, "w").await.unwrap());

        let stored = store.get(j.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 2);
        assert_eq!(stored.status(), JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_counts() {
        let store = MemoryJobStore::new();
        let a = job(Priority::Normal);
        let b = job(Priority::Normal);
        let c = job(Priority::Normal);
        for j in [&a, &b, &c] {
            store.insert(j).await.unwrap();
        }
        store.try_claim(a.id, "w", Utc::now()).await.unwrap();
        store.try_claim(b.id, "w", Utc::now()).await.unwrap();
        store.fail(b.id, "w", "bad", Utc::now()).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts, StoreCounts { pending: 1, processing: 1 });
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_stale_processing_cutoff() {
        let store = MemoryJobStore::new();
        let old = job(Priority::Normal);
        let fresh = job(Priority::Normal);
        store.insert(&old).await.unwrap();
        store.insert(&fresh).await.unwrap();

        let now = Utc::now();
        store
            .try_claim(old.id, "w", now - Duration::minutes(10))
            .await
            .unwrap();
        store.try_claim(fresh.id, "w", now).await.unwrap();

        let stale = store
            .stale_processing(now - Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }
}
