//! Job Store over the `videos` table
//!
//! All reads and writes of job rows go through [`JobStore`]. The Postgres
//! implementation, [`PgJobStore`], enforces the lifecycle graph in SQL: every
//! status update is guarded by `WHERE status = <predecessor>`, so an illegal
//! transition never reaches the row even when two processes disagree about it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_common::{Job, JobStatus, NewJob, StatusCounts};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashSet;

use super::{claim, StoreError, StoreResult};

/// Column list shared by every query that returns a full job row
pub(crate) const JOB_COLUMNS: &str = "id, title, url, duration_secs, prefix, version, status, \
     start_at, end_at, last_error, created_at";

/// Rows per multi-row INSERT / IN list
const CHUNK_SIZE: usize = 500;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert every job whose id is not already stored, in one transaction.
    ///
    /// Ids repeated inside `jobs` are inserted once. Returns the number of
    /// rows written. On error nothing from the batch is committed.
    async fn insert_new(&self, jobs: &[NewJob]) -> StoreResult<u64>;

    /// Atomically take the oldest pending job and mark it cooking.
    ///
    /// `Ok(None)` means the queue is empty (or every pending row is locked by
    /// another claimer).
    async fn claim_next_pending(&self) -> StoreResult<Option<Job>>;

    /// Move a job to `status`, stamping `start_at` or `end_at`.
    ///
    /// `error` is stored in `last_error` when entering a terminal state.
    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<Job>;

    async fn get(&self, id: &str) -> StoreResult<Option<Job>>;

    async fn status_counts(&self) -> StoreResult<StatusCounts>;

    /// Subset of `ids` already present in the table
    async fn existing_ids(&self, ids: &[String]) -> StoreResult<HashSet<String>>;
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    id: String,
    title: String,
    url: String,
    duration_secs: Option<i64>,
    prefix: String,
    version: Option<String>,
    status: String,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl JobRow {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|e| StoreError::CorruptRow {
            id: row.id.clone(),
            reason: format!("{e}"),
        })?;

        Ok(Job {
            id: row.id,
            title: row.title,
            url: row.url,
            duration_secs: row.duration_secs,
            prefix: row.prefix,
            version: row.version,
            status,
            start_at: row.start_at,
            end_at: row.end_at,
            last_error: row.last_error,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL-backed job store
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn current_status(&self, id: &str) -> StoreResult<Option<JobStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM videos WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        status
            .map(|s| {
                s.parse().map_err(|e| StoreError::CorruptRow {
                    id: id.to_string(),
                    reason: format!("{e}"),
                })
            })
            .transpose()
    }

    /// Explain why a guarded update matched no row
    async fn rejection(&self, id: &str, to: JobStatus) -> StoreError {
        match self.current_status(id).await {
            Ok(Some(from)) => StoreError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            },
            Ok(None) => StoreError::not_found(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_new(&self, jobs: &[NewJob]) -> StoreResult<u64> {
        let mut seen = HashSet::with_capacity(jobs.len());
        let unique: Vec<&NewJob> = jobs.iter().filter(|j| seen.insert(j.id.as_str())).collect();
        if unique.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> = unique.iter().map(|j| j.id.clone()).collect();
        let existing = fetch_existing_ids(&mut *tx, &ids).await?;
        let fresh: Vec<&NewJob> = unique
            .into_iter()
            .filter(|j| !existing.contains(&j.id))
            .collect();

        let mut inserted = 0;
        for chunk in fresh.chunks(CHUNK_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO videos (id, title, url, duration_secs, prefix, version, status) ",
            );

            query_builder.push_values(chunk, |mut b, job| {
                b.push_bind(&job.id)
                    .push_bind(&job.title)
                    .push_bind(&job.url)
                    .push_bind(job.duration_secs)
                    .push_bind(&job.prefix)
                    .push_bind(&job.version)
                    .push_bind(JobStatus::Pending.as_str());
            });

            // Another producer may have inserted the same id since the read.
            query_builder.push(" ON CONFLICT (id) DO NOTHING");

            let result = query_builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        tracing::debug!(
            batch = jobs.len(),
            skipped_existing = existing.len(),
            inserted,
            "Inserted new jobs"
        );

        Ok(inserted)
    }

    async fn claim_next_pending(&self) -> StoreResult<Option<Job>> {
        claim::claim_next_pending(&self.pool).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<Job> {
        let Some(from) = status.predecessor() else {
            // Nothing moves back into pending.
            return Err(self.rejection(id, status).await);
        };

        let row: Option<JobRow> = if status.is_terminal() {
            let sql = format!(
                "UPDATE videos SET status = $2, end_at = NOW(), last_error = $3 \
                 WHERE id = $1 AND status = $4 RETURNING {JOB_COLUMNS}"
            );
            sqlx::query_as(&sql)
                .bind(id)
                .bind(status.as_str())
                .bind(error)
                .bind(from.as_str())
                .fetch_optional(&self.pool)
                .await?
        } else {
            let sql = format!(
                "UPDATE videos SET status = $2, start_at = NOW() \
                 WHERE id = $1 AND status = $3 RETURNING {JOB_COLUMNS}"
            );
            sqlx::query_as(&sql)
                .bind(id)
                .bind(status.as_str())
                .bind(from.as_str())
                .fetch_optional(&self.pool)
                .await?
        };

        match row {
            Some(row) => Job::try_from(row),
            None => Err(self.rejection(id, status).await),
        }
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM videos WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM videos GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let status: JobStatus = status.parse().map_err(|e| StoreError::CorruptRow {
                id: String::from("<aggregate>"),
                reason: format!("{e}"),
            })?;
            counts.set(status, count);
        }
        Ok(counts)
    }

    async fn existing_ids(&self, ids: &[String]) -> StoreResult<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut conn = self.pool.acquire().await?;
        fetch_existing_ids(&mut *conn, ids).await
    }
}

async fn fetch_existing_ids(
    conn: &mut PgConnection,
    ids: &[String],
) -> StoreResult<HashSet<String>> {
    let mut existing = HashSet::new();

    for chunk in ids.chunks(CHUNK_SIZE) {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT id FROM videos WHERE id IN (");

        let mut separated = query_builder.separated(", ");
        for id in chunk {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows = query_builder.build().fetch_all(&mut *conn).await?;
        for row in rows {
            existing.insert(row.try_get::<String, _>("id")?);
        }
    }

    Ok(existing)
}
