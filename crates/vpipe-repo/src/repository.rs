//! Job table operations.

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use vpipe_models::{Job, JobId, JobStatus, TaskEvent};

use crate::error::{RepoError, RepoResult};

const JOB_COLUMNS: &str = "id, source_path, destination_path, priority, status, event_id, \
                           scheduled_at, last_event_at, worker_name, last_message, created_at";

// Qualified flavor for statements where `jobs` is joined against a CTE.
const JOB_COLUMNS_QUALIFIED: &str =
    "j.id, j.source_path, j.destination_path, j.priority, j.status, j.event_id, \
     j.scheduled_at, j.last_event_at, j.worker_name, j.last_message, j.created_at";

/// Durable store of jobs and their event history.
#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Connect and run migrations.
    pub async fn connect(database_url: &str) -> RepoResult<Self> {
        info!("Connecting to PostgreSQL");
        let pool = PgPool::connect(database_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations applied");

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a job, idempotent by `(source, destination)`.
    ///
    /// Re-submitting an existing job returns its ID unchanged, except
    /// that a `failed` job is requeued (the operator's retry path).
    /// `Canceled` and `completed` are terminal and stay untouched.
    pub async fn add_job(
        &self,
        source_path: &str,
        destination_path: &str,
        priority: i32,
    ) -> RepoResult<JobId> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (id, source_path, destination_path, priority, status)
            VALUES ($1, $2, $3, $4, 'queued')
            ON CONFLICT (source_path, destination_path) DO UPDATE
            SET priority = EXCLUDED.priority,
                status = CASE WHEN jobs.status = 'failed' THEN 'queued' ELSE jobs.status END,
                event_id = CASE WHEN jobs.status = 'failed' THEN 0 ELSE jobs.event_id END,
                worker_name = CASE WHEN jobs.status = 'failed' THEN NULL ELSE jobs.worker_name END,
                last_message = CASE WHEN jobs.status = 'failed' THEN NULL ELSE jobs.last_message END
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source_path)
        .bind(destination_path)
        .bind(priority)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobId::from(id))
    }

    /// Pick the next batch of dispatchable jobs and mark them `added`.
    ///
    /// Selects `queued` jobs plus stuck ones: jobs in `added` or an
    /// active state whose last sign of life is older than
    /// `schedule_timeout`. Row locks (`SKIP LOCKED`) keep concurrent
    /// ticks from double-dispatching. Reclaimed jobs get their event
    /// counter reset so the replacement worker's sequence applies;
    /// late events from the abandoned worker lose the race and are
    /// discarded by the monotonic guard.
    pub async fn select_schedulable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        schedule_timeout: Duration,
    ) -> RepoResult<Vec<Job>> {
        let cutoff = now - schedule_timeout;

        let rows = sqlx::query(&format!(
            r#"
            WITH picked AS (
                SELECT id
                FROM jobs
                WHERE status = 'queued'
                   OR (status IN ('added', 'downloading', 'encoding', 'uploading')
                       AND COALESCE(last_event_at, scheduled_at, created_at) < $2)
                ORDER BY priority DESC, scheduled_at ASC NULLS FIRST
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs AS j
            SET status = 'added',
                scheduled_at = $3,
                event_id = CASE WHEN j.status = 'queued' THEN j.event_id ELSE 0 END,
                worker_name = NULL
            FROM picked
            WHERE j.id = picked.id
            RETURNING {JOB_COLUMNS_QUALIFIED}
            "#
        ))
        .bind(limit)
        .bind(cutoff)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows
            .into_iter()
            .map(job_from_row)
            .collect::<RepoResult<Vec<_>>>()?;

        if !jobs.is_empty() {
            debug!(count = jobs.len(), "Selected schedulable jobs");
        }

        Ok(jobs)
    }

    /// Apply a worker event if it advances the job's event sequence.
    ///
    /// Replayed or out-of-order events (`event_id` at or below the
    /// stored value) and events against terminal jobs are no-ops.
    /// Returns whether the job row was advanced.
    pub async fn apply_event(&self, event: &TaskEvent) -> RepoResult<bool> {
        let status = event.job_status();
        let worker_name = status.is_active().then(|| event.worker_name.clone());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO job_events
                (job_id, event_id, worker_name, event_time, notification_type, status, message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (job_id, event_id) DO NOTHING
            "#,
        )
        .bind(event.job_id.as_uuid())
        .bind(event.event_id)
        .bind(&event.worker_name)
        .bind(event.event_time)
        .bind(event.notification_type.to_string())
        .bind(event.status.to_string())
        .bind(&event.message)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET event_id = $2,
                status = $3,
                worker_name = $4,
                last_message = NULLIF($5, ''),
                last_event_at = $6
            WHERE id = $1
              AND event_id < $2
              AND status NOT IN ('completed', 'canceled')
            "#,
        )
        .bind(event.job_id.as_uuid())
        .bind(event.event_id)
        .bind(status.as_str())
        .bind(worker_name)
        .bind(&event.message)
        .bind(event.event_time)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let applied = result.rows_affected() > 0;
        if !applied {
            debug!(
                job_id = %event.job_id,
                event_id = event.event_id,
                "Discarded stale or terminal event"
            );
        }

        Ok(applied)
    }

    /// Transition a non-terminal job to `canceled`.
    pub async fn cancel(&self, id: JobId) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'canceled', worker_name = NULL
            WHERE id = $1 AND status NOT IN ('completed', 'canceled')
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a job by ID.
    pub async fn get(&self, id: JobId) -> RepoResult<Job> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::JobNotFound(id.to_string()))?;

        job_from_row(row)
    }

    /// List jobs, optionally filtered by status, newest first.
    pub async fn list(&self, status: Option<JobStatus>, limit: i64) -> RepoResult<Vec<Job>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 \
                     ORDER BY created_at DESC LIMIT $2"
                ))
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT $1"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(job_from_row).collect()
    }
}

fn job_from_row(row: PgRow) -> RepoResult<Job> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(RepoError::decode)?;

    Ok(Job {
        id: JobId::from(row.try_get::<Uuid, _>("id")?),
        source_path: row.try_get("source_path")?,
        destination_path: row.try_get("destination_path")?,
        priority: row.try_get("priority")?,
        status,
        event_id: row.try_get("event_id")?,
        scheduled_at: row.try_get("scheduled_at")?,
        last_event_at: row.try_get("last_event_at")?,
        worker_name: row.try_get("worker_name")?,
        last_message: row.try_get("last_message")?,
        created_at: row.try_get("created_at")?,
    })
}
