//! Queue operations: skip-locked claim, insert-if-absent, mark, requeue sweep.
//!
//! Each operation is a single atomic statement, so no in-memory state needs
//! sharing across workers — all coordination lives in the `work_queue` table.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::{CertId, ItemOutcome, Status, WorkItem};

/// Validate a status transition, returning an error if disallowed.
fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

impl super::Db {
    /// Atomically claim one pending item, ordered by cert id.
    ///
    /// `FOR UPDATE SKIP LOCKED` makes concurrent claimants move past each
    /// other's locked rows: exactly one worker wins any given row, and no
    /// claimant ever blocks on another.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<WorkItem>> {
        let row: Option<WorkItemRow> = sqlx::query_as(
            "WITH next_job AS (
                 SELECT cert_id
                 FROM work_queue
                 WHERE status = 'pending'
                 ORDER BY cert_id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE work_queue
             SET status = 'in_progress',
                 claimed_by = $1,
                 updated_at = now()
             FROM next_job
             WHERE work_queue.cert_id = next_job.cert_id
               AND work_queue.status = 'pending'
             RETURNING work_queue.cert_id, work_queue.status,
                       work_queue.claimed_by, work_queue.updated_at",
        )
        .bind(worker_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(WorkItemRow::try_into_work_item).transpose()
    }

    /// Insert a new pending item unless the identifier is already known.
    ///
    /// Returns whether an insert occurred. A concurrent duplicate insert is
    /// a benign race: the loser just observes `false`.
    pub async fn insert_if_absent(&self, id: CertId) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO work_queue (cert_id, status)
             VALUES ($1, 'pending')
             ON CONFLICT (cert_id) DO NOTHING",
        )
        .bind(id.0)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Claim-or-insert for chain traversal and exploration: reserve an
    /// unknown identifier as in_progress, or take over a pending one.
    ///
    /// Returns `None` when another worker already owns or finished the item,
    /// which ends the chain without error.
    pub async fn claim_for_chain(&self, id: CertId, worker_id: &str) -> Result<Option<WorkItem>> {
        let row: Option<WorkItemRow> = sqlx::query_as(
            "INSERT INTO work_queue (cert_id, status, claimed_by, updated_at)
             VALUES ($1, 'in_progress', $2, now())
             ON CONFLICT (cert_id) DO UPDATE
             SET status = 'in_progress', claimed_by = $2, updated_at = now()
             WHERE work_queue.status = 'pending'
             RETURNING cert_id, status, claimed_by, updated_at",
        )
        .bind(id.0)
        .bind(worker_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(WorkItemRow::try_into_work_item).transpose()
    }

    /// Record the outcome of an in_progress item.
    pub async fn mark(&self, id: CertId, outcome: ItemOutcome) -> Result<()> {
        let to = outcome.status();
        validate_transition(Status::InProgress, to)?;

        let rows_affected = sqlx::query(
            "UPDATE work_queue
             SET status = $1, updated_at = now()
             WHERE cert_id = $2 AND status = 'in_progress'",
        )
        .bind(to.as_str())
        .bind(id.0)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: Status::InProgress,
                to,
            });
        }

        Ok(())
    }

    /// Route recoverable items back to pending after a cooldown.
    ///
    /// Covers error and stale rows, and in_progress rows orphaned by a
    /// crashed worker — a row stuck longer than `cooldown` is treated the
    /// same as an error. Returns how many rows were requeued.
    pub async fn requeue_stale_and_errors(&self, cooldown: Duration) -> Result<u64> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(cooldown)
                .map_err(|e| Error::Other(format!("cooldown out of range: {e}")))?;

        let result = sqlx::query(
            "UPDATE work_queue
             SET status = 'pending', claimed_by = NULL, updated_at = now()
             WHERE status IN ('error', 'stale', 'in_progress')
               AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Lightweight check: is there any pending work?
    pub async fn pending_exists(&self) -> Result<bool> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM work_queue WHERE status = 'pending' LIMIT 1")
                .fetch_optional(self.pool())
                .await?;
        Ok(row.is_some())
    }

    /// Fetch one item by identifier.
    pub async fn get(&self, id: CertId) -> Result<Option<WorkItem>> {
        let row: Option<WorkItemRow> = sqlx::query_as(
            "SELECT cert_id, status, claimed_by, updated_at
             FROM work_queue WHERE cert_id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.map(WorkItemRow::try_into_work_item).transpose()
    }

    /// Pre-seed a contiguous identifier range as pending. Existing rows are
    /// left untouched. Returns how many rows were inserted.
    pub async fn seed_range(&self, from: CertId, to: CertId) -> Result<u64> {
        let result = sqlx::query(
            "INSERT INTO work_queue (cert_id, status)
             SELECT gs, 'pending' FROM generate_series($1::bigint, $2::bigint) AS gs
             ON CONFLICT (cert_id) DO NOTHING",
        )
        .bind(from.0)
        .bind(to.0)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Status distribution, for the operator CLI.
    pub async fn status_counts(&self) -> Result<Vec<(Status, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM work_queue GROUP BY status ORDER BY status",
        )
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(status, count)| Ok((status.parse()?, count)))
            .collect()
    }
}

impl crate::worker::Queue for super::Db {
    async fn claim_next(&self, worker_id: &str) -> Result<Option<WorkItem>> {
        Self::claim_next(self, worker_id).await
    }

    async fn insert_if_absent(&self, id: CertId) -> Result<bool> {
        Self::insert_if_absent(self, id).await
    }

    async fn claim_for_chain(&self, id: CertId, worker_id: &str) -> Result<Option<WorkItem>> {
        Self::claim_for_chain(self, id, worker_id).await
    }

    async fn mark(&self, id: CertId, outcome: ItemOutcome) -> Result<()> {
        Self::mark(self, id, outcome).await
    }

    async fn pending_exists(&self) -> Result<bool> {
        Self::pending_exists(self).await
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    cert_id: i64,
    status: String,
    claimed_by: Option<String>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            cert_id: CertId(self.cert_id),
            status: self.status.parse()?,
            claimed_by: self.claimed_by,
            updated_at: self.updated_at,
        })
    }
}
