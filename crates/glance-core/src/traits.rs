//! Core traits for glance abstractions.
//!
//! These traits define the seams between the job pipeline and its
//! collaborators, enabling pluggable backends and testability.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// JOB STORE
// =============================================================================

/// Durable job records.
///
/// Every mutating operation is a single-row conditional update. Correctness
/// of the claim protocol rests on `try_claim` being atomic in the backend;
/// no other locking is involved.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new (pending) job record.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Fetch a job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Best pending candidate: highest priority, then oldest.
    async fn next_candidate(&self) -> Result<Option<Uuid>>;

    /// Conditionally move `job_id` from pending to processing.
    ///
    /// Returns `None` when the job is no longer pending (another worker won).
    async fn try_claim(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>>;

    /// Processing → completed, if still held by `worker_id`.
    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: &CaptureResult,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Processing → pending with an incremented retry count, if still held
    /// by `worker_id` and below the job's retry bound.
    async fn requeue(&self, job_id: Uuid, worker_id: &str) -> Result<bool>;

    /// Processing → failed, if still held by `worker_id`.
    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Pending and processing counts.
    async fn counts(&self) -> Result<StoreCounts>;

    /// Processing jobs whose `started_at` precedes `older_than`.
    async fn stale_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Job>>;
}

// =============================================================================
// PAYLOAD CACHE
// =============================================================================

/// Transient key-value storage for raw job payloads.
///
/// Payload bytes never enter the job store. Async so an out-of-process
/// cache can stand in for the in-memory one.
#[async_trait]
pub trait PayloadCache: Send + Sync {
    async fn put(&self, job_id: Uuid, payload: Arc<[u8]>) -> Result<()>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Arc<[u8]>>>;

    /// Remove an entry. Returns whether it existed.
    async fn remove(&self, job_id: Uuid) -> Result<bool>;

    /// Number of cached payloads.
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

// =============================================================================
// ANALYSIS ENGINE
// =============================================================================

/// Content extraction over a captured payload.
///
/// Implementations are not required to be `Sync`: each worker owns one
/// instance and calls it sequentially, possibly from a blocking thread.
pub trait AnalysisEngine: Send {
    /// Engine name recorded in results.
    fn name(&self) -> &str;

    /// Analyze one payload. May be CPU-bound.
    fn process(&mut self, payload: &[u8]) -> Result<Analysis>;
}

/// Creates one [`AnalysisEngine`] per worker.
pub trait EngineFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> Result<Box<dyn AnalysisEngine>>;
}

// =============================================================================
// ENRICHMENT
// =============================================================================

/// Produces a short human-readable summary of an analysis.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, analysis: &Analysis, context: &JobContext) -> Result<String>;
}

/// Labels the kind of interaction visible in a capture.
#[async_trait]
pub trait InteractionClassifier: Send + Sync {
    async fn classify_interaction(&self, analysis: &Analysis) -> Result<InteractionKind>;
}

/// Pulls structured entities out of extracted text.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract_entities(&self, analysis: &Analysis) -> Result<Vec<Entity>>;
}

// =============================================================================
// NOTIFICATION & HOOKS
// =============================================================================

/// Push channel towards a user's connected listeners. Best-effort.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Returns whether the notification reached at least one listener.
    async fn notify_completion(
        &self,
        user_id: &str,
        job_id: Uuid,
        summary: &ResultSummary,
    ) -> Result<bool>;
}

/// Follow-up work after a job completes (session, context, graph updates).
#[async_trait]
pub trait PostProcessHook: Send + Sync {
    fn name(&self) -> &str;

    async fn after_completion(&self, job: &Job, result: &CaptureResult) -> Result<()>;
}
