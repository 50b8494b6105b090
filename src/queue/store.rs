//! # Queue Store (C3)
//!
//! Durable queue items in the relational store (spec §4.3), grounded on the
//! teacher's `notification_repository.rs` idiom: raw `sqlx::query()` with a
//! manual row-mapper, rather than the `query_as!` macro. Ordering and the
//! claim-by-CAS contract are the load-bearing parts of this module — see
//! `NextReady` and `transition`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};

use crate::clock::SharedClock;
use crate::domain::{EnqueueRequest, QueueItem, QueueStats, QueueStatus};
use crate::queue::error::{backoff_seconds, QueueError, QueueResult};

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, req: EnqueueRequest) -> QueueResult<QueueItem>;
    async fn get(&self, id: i64) -> QueueResult<QueueItem>;
    /// `status = pending ∧ scheduled_for ≤ now`, ordered
    /// `(priority ASC, scheduled_for ASC, id ASC)` (spec §4.3/§8).
    async fn next_ready(&self, limit: i64) -> QueueResult<Vec<QueueItem>>;
    /// The sole contention point: only `pending → processing` succeeds.
    /// Returns `Conflict` if the item is not `pending`.
    async fn transition(&self, id: i64, worker_id: &str) -> QueueResult<QueueItem>;
    /// Idempotent: a second call on an already-`completed` item returns its
    /// current state rather than erroring.
    async fn complete(&self, id: i64) -> QueueResult<QueueItem>;
    async fn fail(&self, id: i64, error_message: &str) -> QueueResult<QueueItem>;
    /// Forces terminal `failed` regardless of remaining attempts, for
    /// `PermanentTransport` errors (spec §6 Transport port contract).
    async fn fail_terminal(&self, id: i64, error_message: &str) -> QueueResult<QueueItem>;
    /// Valid from `pending` or `processing`; `Conflict` from a terminal state.
    async fn cancel(&self, id: i64) -> QueueResult<QueueItem>;
    async fn stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> QueueResult<QueueStats>;
    async fn reset_stuck(&self, threshold: ChronoDuration) -> QueueResult<Vec<QueueItem>>;
    async fn cleanup(&self, older_than: DateTime<Utc>) -> QueueResult<u64>;
    /// Count of items not yet in a terminal state.
    async fn length(&self) -> QueueResult<i64>;
}

pub struct PostgresQueueStore {
    pool: PgPool,
    clock: SharedClock,
    backoff_base_seconds: u64,
    backoff_cap_seconds: u64,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool, clock: SharedClock, backoff_base_seconds: u64, backoff_cap_seconds: u64) -> Self {
        Self {
            pool,
            clock,
            backoff_base_seconds,
            backoff_cap_seconds,
        }
    }
}

fn map_queue_row(row: sqlx::postgres::PgRow) -> Result<QueueItem, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse()
        .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
    Ok(QueueItem {
        id: row.try_get("id")?,
        notification_id: row.try_get("notification_id")?,
        priority: row.try_get("priority")?,
        scheduled_for: row.try_get("scheduled_for")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        status,
        worker_id: row.try_get("worker_id")?,
        processing_started_at: row.try_get("processing_started_at")?,
        processing_completed_at: row.try_get("processing_completed_at")?,
        error_message: row.try_get("error_message")?,
        metadata: row.try_get("queue_metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_COLUMNS: &str = r#"
    id, notification_id, priority, scheduled_for, attempts, max_attempts, status,
    worker_id, processing_started_at, processing_completed_at, error_message,
    queue_metadata, created_at, updated_at
"#;

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn enqueue(&self, req: EnqueueRequest) -> QueueResult<QueueItem> {
        let now = self.clock.now();
        if req.scheduled_for < now - ChronoDuration::hours(1) {
            return Err(QueueError::InvalidRequest(
                "scheduled_for is more than one hour in the past".into(),
            ));
        }

        let query = format!(
            r#"
            INSERT INTO email_queue
                (notification_id, priority, scheduled_for, attempts, max_attempts, status,
                 queue_metadata, created_at, updated_at)
            VALUES ($1, $2, $3, 0, $4, 'pending', $5, $6, $6)
            RETURNING {SELECT_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(req.notification_id)
            .bind(req.priority.value())
            .bind(req.scheduled_for)
            .bind(req.max_attempts.value())
            .bind(&req.metadata)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(map_queue_row(row)?)
    }

    async fn get(&self, id: i64) -> QueueResult<QueueItem> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM email_queue WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QueueError::NotFound(id))?;
        Ok(map_queue_row(row)?)
    }

    async fn next_ready(&self, limit: i64) -> QueueResult<Vec<QueueItem>> {
        let now = self.clock.now();
        let query = format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM email_queue
            WHERE status = 'pending' AND scheduled_for <= $1
            ORDER BY priority ASC, scheduled_for ASC, id ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(map_queue_row)
            .collect::<Result<_, _>>()
            .map_err(QueueError::from)
    }

    async fn transition(&self, id: i64, worker_id: &str) -> QueueResult<QueueItem> {
        let now = self.clock.now();
        let query = format!(
            r#"
            UPDATE email_queue
            SET status = 'processing', worker_id = $2, processing_started_at = $3, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(worker_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(map_queue_row(row)?),
            None => {
                // Either absent or already claimed/terminal: disambiguate for the caller.
                match self.get(id).await {
                    Ok(_) => Err(QueueError::Conflict(format!(
                        "queue item {id} is not pending"
                    ))),
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn complete(&self, id: i64) -> QueueResult<QueueItem> {
        let existing = self.get(id).await?;
        if existing.status == QueueStatus::Completed {
            return Ok(existing);
        }
        let now = self.clock.now();
        let query = format!(
            r#"
            UPDATE email_queue
            SET status = 'completed', processing_completed_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QueueError::NotFound(id))?;
        Ok(map_queue_row(row)?)
    }

    async fn fail(&self, id: i64, error_message: &str) -> QueueResult<QueueItem> {
        let existing = self.get(id).await?;
        if existing.status.is_terminal() {
            return Err(QueueError::Conflict(format!(
                "queue item {id} is already terminal ({})",
                existing.status
            )));
        }
        let now = self.clock.now();
        let attempts = existing.attempts + 1;

        let row = if attempts < existing.max_attempts {
            let delay = backoff_seconds(attempts, self.backoff_base_seconds, self.backoff_cap_seconds);
            let next_scheduled = now + ChronoDuration::seconds(delay as i64);
            let query = format!(
                r#"
                UPDATE email_queue
                SET status = 'pending', attempts = $2, error_message = $3, scheduled_for = $4,
                    worker_id = NULL, processing_started_at = NULL, updated_at = $5
                WHERE id = $1
                RETURNING {SELECT_COLUMNS}
                "#
            );
            sqlx::query(&query)
                .bind(id)
                .bind(attempts)
                .bind(error_message)
                .bind(next_scheduled)
                .bind(now)
                .fetch_optional(&self.pool)
                .await?
        } else {
            let query = format!(
                r#"
                UPDATE email_queue
                SET status = 'failed', attempts = $2, error_message = $3,
                    processing_completed_at = $4, updated_at = $4
                WHERE id = $1
                RETURNING {SELECT_COLUMNS}
                "#
            );
            sqlx::query(&query)
                .bind(id)
                .bind(attempts)
                .bind(error_message)
                .bind(now)
                .fetch_optional(&self.pool)
                .await?
        };

        let row = row.ok_or(QueueError::NotFound(id))?;
        Ok(map_queue_row(row)?)
    }

    async fn fail_terminal(&self, id: i64, error_message: &str) -> QueueResult<QueueItem> {
        let existing = self.get(id).await?;
        if existing.status.is_terminal() {
            return Err(QueueError::Conflict(format!(
                "queue item {id} is already terminal ({})",
                existing.status
            )));
        }
        let now = self.clock.now();
        let attempts = existing.attempts + 1;
        let query = format!(
            r#"
            UPDATE email_queue
            SET status = 'failed', attempts = $2, error_message = $3,
                processing_completed_at = $4, updated_at = $4
            WHERE id = $1
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(attempts)
            .bind(error_message)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QueueError::NotFound(id))?;
        Ok(map_queue_row(row)?)
    }

    async fn cancel(&self, id: i64) -> QueueResult<QueueItem> {
        let existing = self.get(id).await?;
        if existing.status.is_terminal() {
            return Err(QueueError::Conflict(format!(
                "queue item {id} is already terminal ({})",
                existing.status
            )));
        }
        let now = self.clock.now();
        let query = format!(
            r#"
            UPDATE email_queue SET status = 'cancelled', updated_at = $2
            WHERE id = $1
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QueueError::NotFound(id))?;
        Ok(map_queue_row(row)?)
    }

    async fn stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> QueueResult<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled
            FROM email_queue
            WHERE created_at >= $1 AND created_at < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.try_get("pending")?,
            processing: row.try_get("processing")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            cancelled: row.try_get("cancelled")?,
        })
    }

    async fn reset_stuck(&self, threshold: ChronoDuration) -> QueueResult<Vec<QueueItem>> {
        let now = self.clock.now();
        let cutoff = now - threshold;
        let query = format!(
            r#"
            UPDATE email_queue
            SET status = 'pending', attempts = attempts + 1, worker_id = NULL,
                processing_started_at = NULL, updated_at = $2
            WHERE status = 'processing' AND processing_started_at < $1
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let rows = sqlx::query(&query)
            .bind(cutoff)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(map_queue_row)
            .collect::<Result<_, _>>()
            .map_err(QueueError::from)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM email_queue
            WHERE created_at < $1 AND status IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn length(&self) -> QueueResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM email_queue WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }
}
