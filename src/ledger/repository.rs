//! # Delivery Ledger (C2)
//!
//! Persistent per-recipient delivery attempts, status transitions, and
//! statistics (spec §4.2): raw `sqlx::query()` plus a manual row-mapping
//! function rather than the `query_as!` macro, so the schema stays a
//! runtime contract instead of a compile-time one tied to a `DATABASE_URL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::clock::SharedClock;
use crate::domain::{DeliveryAttempt, DeliveryStats, DeliveryStatus, NewDeliveryAttempt};
use crate::ledger::error::{LedgerError, LedgerResult};

#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn create(&self, req: NewDeliveryAttempt) -> LedgerResult<DeliveryAttempt>;
    async fn get(&self, id: i64) -> LedgerResult<DeliveryAttempt>;
    async fn by_notification(&self, notification_id: i64) -> LedgerResult<Vec<DeliveryAttempt>>;
    async fn set_status(&self, id: i64, status: DeliveryStatus) -> LedgerResult<DeliveryAttempt>;
    async fn record_error(&self, id: i64, message: &str) -> LedgerResult<DeliveryAttempt>;
    async fn update_provider(
        &self,
        id: i64,
        provider_message_id: &str,
        metadata: serde_json::Value,
    ) -> LedgerResult<DeliveryAttempt>;
    async fn pending(&self, limit: i64) -> LedgerResult<Vec<DeliveryAttempt>>;
    async fn failed(&self, limit: i64) -> LedgerResult<Vec<DeliveryAttempt>>;
    /// Moves failed-but-retriable rows (`retry_count < max_retries`) back to
    /// `pending`; returns the number of rows moved.
    async fn retry_failed(&self, limit: i64) -> LedgerResult<u64>;
    async fn stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> LedgerResult<DeliveryStats>;
    async fn history(&self, email: &str, page: i64, limit: i64) -> LedgerResult<Vec<DeliveryAttempt>>;
    async fn cleanup(&self, older_than: DateTime<Utc>) -> LedgerResult<u64>;
}

/// PostgreSQL-backed `DeliveryLedger`.
pub struct PostgresDeliveryLedger {
    pool: PgPool,
    clock: SharedClock,
}

impl PostgresDeliveryLedger {
    pub fn new(pool: PgPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }
}

fn map_delivery_row(row: sqlx::postgres::PgRow) -> Result<DeliveryAttempt, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse()
        .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
    Ok(DeliveryAttempt {
        id: row.try_get("id")?,
        notification_id: row.try_get("notification_id")?,
        email_address: row.try_get("email_address")?,
        status,
        sent_at: row.try_get("sent_at")?,
        delivered_at: row.try_get("delivered_at")?,
        failed_at: row.try_get("failed_at")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        provider_message_id: row.try_get("provider_message_id")?,
        metadata: row.try_get("delivery_metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl DeliveryLedger for PostgresDeliveryLedger {
    async fn create(&self, req: NewDeliveryAttempt) -> LedgerResult<DeliveryAttempt> {
        if req.max_retries < 0 {
            return Err(LedgerError::InvalidRequest(
                "max_retries must be non-negative".into(),
            ));
        }
        let now = self.clock.now();
        let row = sqlx::query(
            r#"
            INSERT INTO email_deliveries
                (notification_id, email_address, status, retry_count, max_retries,
                 delivery_metadata, created_at, updated_at)
            VALUES ($1, $2, 'pending', 0, $3, $4, $5, $5)
            RETURNING id, notification_id, email_address, status, sent_at, delivered_at,
                      failed_at, error_message, retry_count, max_retries,
                      provider_message_id, delivery_metadata, created_at, updated_at
            "#,
        )
        .bind(req.notification_id)
        .bind(req.email_address.as_str())
        .bind(req.max_retries)
        .bind(&req.metadata)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(map_delivery_row(row)?)
    }

    async fn get(&self, id: i64) -> LedgerResult<DeliveryAttempt> {
        let row = sqlx::query(
            r#"
            SELECT id, notification_id, email_address, status, sent_at, delivered_at,
                   failed_at, error_message, retry_count, max_retries,
                   provider_message_id, delivery_metadata, created_at, updated_at
            FROM email_deliveries WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound(id))?;

        Ok(map_delivery_row(row)?)
    }

    async fn by_notification(&self, notification_id: i64) -> LedgerResult<Vec<DeliveryAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, notification_id, email_address, status, sent_at, delivered_at,
                   failed_at, error_message, retry_count, max_retries,
                   provider_message_id, delivery_metadata, created_at, updated_at
            FROM email_deliveries WHERE notification_id = $1 ORDER BY created_at ASC
            "#,
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(map_delivery_row)
            .collect::<Result<_, _>>()
            .map_err(LedgerError::from)
    }

    async fn set_status(&self, id: i64, status: DeliveryStatus) -> LedgerResult<DeliveryAttempt> {
        let now = self.clock.now();
        let (sent_at_clause, delivered_at_clause, retry_increment) = match status {
            DeliveryStatus::Sent => ("sent_at = $3", "delivered_at = delivered_at", ""),
            DeliveryStatus::Delivered => ("sent_at = sent_at", "delivered_at = $3", ""),
            DeliveryStatus::Failed => ("sent_at = sent_at", "delivered_at = delivered_at", ", retry_count = retry_count + 1, failed_at = $3"),
            DeliveryStatus::Bounced | DeliveryStatus::Pending => {
                ("sent_at = sent_at", "delivered_at = delivered_at", "")
            }
        };

        let status_str = status.to_string();
        let query = format!(
            "UPDATE email_deliveries SET status = $1, updated_at = $3, {sent_at_clause}, {delivered_at_clause}{retry_increment} \
             WHERE id = $2 RETURNING id, notification_id, email_address, status, sent_at, delivered_at, \
             failed_at, error_message, retry_count, max_retries, provider_message_id, delivery_metadata, created_at, updated_at"
        );

        let row = sqlx::query(&query)
            .bind(&status_str)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound(id))?;

        Ok(map_delivery_row(row)?)
    }

    async fn record_error(&self, id: i64, message: &str) -> LedgerResult<DeliveryAttempt> {
        let now = self.clock.now();
        let row = sqlx::query(
            r#"
            UPDATE email_deliveries
            SET status = 'failed', error_message = $2, failed_at = $3,
                retry_count = retry_count + 1, updated_at = $3
            WHERE id = $1
            RETURNING id, notification_id, email_address, status, sent_at, delivered_at,
                      failed_at, error_message, retry_count, max_retries,
                      provider_message_id, delivery_metadata, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(message)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound(id))?;

        Ok(map_delivery_row(row)?)
    }

    async fn update_provider(
        &self,
        id: i64,
        provider_message_id: &str,
        metadata: serde_json::Value,
    ) -> LedgerResult<DeliveryAttempt> {
        let now = self.clock.now();
        let row = sqlx::query(
            r#"
            UPDATE email_deliveries
            SET provider_message_id = $2,
                delivery_metadata = delivery_metadata || $3,
                updated_at = $4
            WHERE id = $1
            RETURNING id, notification_id, email_address, status, sent_at, delivered_at,
                      failed_at, error_message, retry_count, max_retries,
                      provider_message_id, delivery_metadata, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(provider_message_id)
        .bind(metadata)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound(id))?;

        Ok(map_delivery_row(row)?)
    }

    async fn pending(&self, limit: i64) -> LedgerResult<Vec<DeliveryAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, notification_id, email_address, status, sent_at, delivered_at,
                   failed_at, error_message, retry_count, max_retries,
                   provider_message_id, delivery_metadata, created_at, updated_at
            FROM email_deliveries WHERE status = 'pending'
            ORDER BY created_at ASC LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(map_delivery_row)
            .collect::<Result<_, _>>()
            .map_err(LedgerError::from)
    }

    async fn failed(&self, limit: i64) -> LedgerResult<Vec<DeliveryAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, notification_id, email_address, status, sent_at, delivered_at,
                   failed_at, error_message, retry_count, max_retries,
                   provider_message_id, delivery_metadata, created_at, updated_at
            FROM email_deliveries WHERE status = 'failed'
            ORDER BY created_at ASC LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(map_delivery_row)
            .collect::<Result<_, _>>()
            .map_err(LedgerError::from)
    }

    async fn retry_failed(&self, limit: i64) -> LedgerResult<u64> {
        let now = self.clock.now();
        let result = sqlx::query(
            r#"
            UPDATE email_deliveries
            SET status = 'pending', updated_at = $1
            WHERE id IN (
                SELECT id FROM email_deliveries
                WHERE status = 'failed' AND retry_count < max_retries
                ORDER BY created_at ASC LIMIT $2
            )
            "#,
        )
        .bind(now)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> LedgerResult<DeliveryStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'sent') AS sent,
                COUNT(*) FILTER (WHERE status = 'delivered') AS delivered,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'bounced') AS bounced,
                AVG(EXTRACT(EPOCH FROM (delivered_at - created_at)))
                    FILTER (WHERE status = 'delivered') AS avg_latency_seconds
            FROM email_deliveries
            WHERE created_at >= $1 AND created_at < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(DeliveryStats {
            pending: row.try_get::<i64, _>("pending")?,
            sent: row.try_get::<i64, _>("sent")?,
            delivered: row.try_get::<i64, _>("delivered")?,
            failed: row.try_get::<i64, _>("failed")?,
            bounced: row.try_get::<i64, _>("bounced")?,
            avg_delivery_latency_seconds: row.try_get::<Option<f64>, _>("avg_latency_seconds")?,
        })
    }

    async fn history(&self, email: &str, page: i64, limit: i64) -> LedgerResult<Vec<DeliveryAttempt>> {
        if page < 1 || limit < 1 {
            return Err(LedgerError::InvalidRequest(
                "page and limit must be >= 1".into(),
            ));
        }
        let offset = (page - 1) * limit;
        let rows = sqlx::query(
            r#"
            SELECT id, notification_id, email_address, status, sent_at, delivered_at,
                   failed_at, error_message, retry_count, max_retries,
                   provider_message_id, delivery_metadata, created_at, updated_at
            FROM email_deliveries WHERE email_address = $1
            ORDER BY created_at DESC LIMIT $2 OFFSET $3
            "#,
        )
        .bind(email)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(map_delivery_row)
            .collect::<Result<_, _>>()
            .map_err(LedgerError::from)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> LedgerResult<u64> {
        let result = sqlx::query("DELETE FROM email_deliveries WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
