//! Claim Protocol
//!
//! One transaction per attempt:
//!
//! 1. `SELECT ... WHERE status = 'pending' ... FOR UPDATE SKIP LOCKED` picks the
//!    oldest row no other transaction holds.
//! 2. The same transaction flips it to `cooking` and stamps `start_at`.
//! 3. Commit.
//!
//! Rows locked by a concurrent claimer are skipped rather than waited on, so
//! two workers never receive the same job and never block each other. Any
//! error drops the transaction, which rolls it back; no partial claim is ever
//! visible.

use harvest_common::{Job, JobStatus};
use sqlx::PgPool;

use super::jobs::{JobRow, JOB_COLUMNS};
use super::StoreResult;

/// The status literal must match the `idx_videos_pending` predicate, so it is
/// inlined rather than bound.
fn select_sql() -> String {
    format!(
        "SELECT {JOB_COLUMNS} FROM videos \
         WHERE status = 'pending' \
         ORDER BY created_at, id \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED"
    )
}

pub(super) async fn claim_next_pending(pool: &PgPool) -> StoreResult<Option<Job>> {
    let mut tx = pool.begin().await?;

    let candidate: Option<JobRow> = sqlx::query_as(&select_sql())
        .fetch_optional(&mut *tx)
        .await?;

    let Some(candidate) = candidate else {
        tx.commit().await?;
        return Ok(None);
    };

    let update = format!(
        "UPDATE videos SET status = $2, start_at = NOW() \
         WHERE id = $1 \
         RETURNING {JOB_COLUMNS}"
    );
    let claimed: JobRow = sqlx::query_as(&update)
        .bind(candidate.id())
        .bind(JobStatus::Cooking.as_str())
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    let job = Job::try_from(claimed)?;
    tracing::debug!(job_id = %job.id, "Claimed pending job");
    Ok(Some(job))
}
