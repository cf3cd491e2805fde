//! PostgreSQL job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use glance_core::{
    CaptureResult, Error, Job, JobContext, JobState, JobStatus, JobStore, Priority, Result,
    StoreCounts,
};

const JOB_COLUMNS: &str = "id, status, priority, app_name, window_title, bundle_id, session_id, \
     user_id, assigned_worker, retry_count, max_retries, created_at, started_at, completed_at, \
     result, error_message";

/// PostgreSQL implementation of [`JobStore`].
///
/// Claims are a candidate `SELECT` followed by an `UPDATE … WHERE status =
/// 'pending'`; losing a race shows up as zero affected rows.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Rebuild a job from a row, rejecting rows whose columns contradict
    /// their status.
    fn parse_job_row(row: PgRow) -> Result<Job> {
        let id: Uuid = row.try_get("id")?;
        let status: JobStatus = row.try_get::<String, _>("status")?.parse()?;
        let rank: i16 = row.try_get("priority")?;
        let priority = Priority::from_rank(rank)
            .ok_or_else(|| Error::Store(format!("job {id} has unknown priority rank {rank}")))?;

        let started_at: Option<DateTime<Utc>> = row.try_get("started_at")?;
        let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at")?;
        let missing = |column: &str| Error::Store(format!("{status} job {id} has no {column}"));

        let state = match status {
            JobStatus::Pending => JobState::Pending,
            JobStatus::Processing => JobState::Processing {
                worker_id: row
                    .try_get::<Option<String>, _>("assigned_worker")?
                    .ok_or_else(|| missing("assigned_worker"))?,
                started_at: started_at.ok_or_else(|| missing("started_at"))?,
            },
            JobStatus::Completed => {
                let raw: JsonValue = row
                    .try_get::<Option<JsonValue>, _>("result")?
                    .ok_or_else(|| missing("result"))?;
                JobState::Completed {
                    started_at: started_at.ok_or_else(|| missing("started_at"))?,
                    completed_at: completed_at.ok_or_else(|| missing("completed_at"))?,
                    result: serde_json::from_value(raw)?,
                }
            }
            JobStatus::Failed => JobState::Failed {
                started_at,
                completed_at: completed_at.ok_or_else(|| missing("completed_at"))?,
                error_message: row
                    .try_get::<Option<String>, _>("error_message")?
                    .ok_or_else(|| missing("error_message"))?,
            },
        };

        Ok(Job {
            id,
            priority,
            context: JobContext {
                app_name: row.try_get("app_name")?,
                window_title: row.try_get("window_title")?,
                bundle_id: row.try_get("bundle_id")?,
                session_id: row.try_get("session_id")?,
                user_id: row.try_get("user_id")?,
            },
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            created_at: row.try_get("created_at")?,
            state,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        if job.status() != JobStatus::Pending {
            return Err(Error::Store(format!(
                "job {} must be inserted as pending, not {}",
                job.id,
                job.status()
            )));
        }

        sqlx::query(
            "INSERT INTO capture_jobs (id, status, priority, app_name, window_title, bundle_id,
                                       session_id, user_id, retry_count, max_retries, created_at)
             VALUES ($1, 'pending', $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(job.id)
        .bind(job.priority.rank())
        .bind(&job.context.app_name)
        .bind(&job.context.window_title)
        .bind(&job.context.bundle_id)
        .bind(&job.context.session_id)
        .bind(&job.context.user_id)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM capture_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn next_candidate(&self) -> Result<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM capture_jobs
             WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn try_claim(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "UPDATE capture_jobs
             SET status = 'processing', assigned_worker = $2, started_at = $3
             WHERE id = $1 AND status = 'pending'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if row.is_none() {
            debug!(%job_id, worker_id, "Claim lost, job no longer pending");
        }
        row.map(Self::parse_job_row).transpose()
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: &CaptureResult,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result_json = serde_json::to_value(result)?;
        let done = sqlx::query(
            "UPDATE capture_jobs
             SET status = 'completed', assigned_worker = NULL, completed_at = $3, result = $4
             WHERE id = $1 AND status = 'processing' AND assigned_worker = $2",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .bind(result_json)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(done.rows_affected() == 1)
    }

    async fn requeue(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE capture_jobs
             SET status = 'pending', assigned_worker = NULL, started_at = NULL,
                 retry_count = retry_count + 1
             WHERE id = $1 AND status = 'processing' AND assigned_worker = $2
               AND retry_count < max_retries",
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(done.rows_affected() == 1)
    }

    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE capture_jobs
             SET status = 'failed', assigned_worker = NULL, completed_at = $3, error_message = $4
             WHERE id = $1 AND status = 'processing' AND assigned_worker = $2",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(done.rows_affected() == 1)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing
             FROM capture_jobs",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(StoreCounts {
            pending: row.try_get("pending")?,
            processing: row.try_get("processing")?,
        })
    }

    async fn stale_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM capture_jobs
             WHERE status = 'processing' AND started_at < $1
             ORDER BY started_at ASC"
        ))
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }
}
