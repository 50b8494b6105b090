//! `NotificationStore`: persistence for the `notifications` table, owned by
//! the orchestrator (C6). Grounded on the same raw-`sqlx::query()` idiom as
//! the queue store and delivery ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::clock::SharedClock;
use crate::domain::{NewNotification, Notification, NotificationType, RecipientType};
use crate::orchestrator::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub recipient_id: Option<i64>,
    pub recipient_type: Option<RecipientType>,
    pub notification_type: Option<NotificationType>,
    pub is_read: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct NotificationStats {
    pub total: i64,
    pub unread: i64,
    pub by_type: HashMap<String, i64>,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, req: NewNotification) -> OrchestratorResult<Notification>;
    async fn get(&self, id: i64) -> OrchestratorResult<Notification>;
    async fn mark_read(&self, id: i64) -> OrchestratorResult<Notification>;
    async fn mark_sent(&self, id: i64) -> OrchestratorResult<Notification>;
    async fn list(&self, filter: NotificationFilter) -> OrchestratorResult<Vec<Notification>>;
    async fn delete(&self, id: i64) -> OrchestratorResult<()>;
    async fn stats(&self) -> OrchestratorResult<NotificationStats>;
    async fn cleanup(&self, older_than: DateTime<Utc>) -> OrchestratorResult<u64>;
}

pub struct PostgresNotificationStore {
    pool: PgPool,
    clock: SharedClock,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }
}

const SELECT_COLUMNS: &str =
    "id, recipient_id, recipient_type, type, title, message, is_read, sent_at, created_at";

fn map_notification_row(row: sqlx::postgres::PgRow) -> Result<Notification, sqlx::Error> {
    let recipient_type_str: String = row.try_get("recipient_type")?;
    let type_str: String = row.try_get("type")?;
    Ok(Notification {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        recipient_type: recipient_type_str
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        notification_type: type_str
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        is_read: row.try_get("is_read")?,
        sent_at: row.try_get("sent_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    async fn create(&self, req: NewNotification) -> OrchestratorResult<Notification> {
        if req.recipient_id <= 0 {
            return Err(OrchestratorError::InvalidRequest(
                "recipient_id must be > 0".into(),
            ));
        }
        let now = self.clock.now();
        let query = format!(
            r#"
            INSERT INTO notifications
                (recipient_id, recipient_type, type, title, message, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, false, $6)
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(req.recipient_id)
            .bind(req.recipient_type.to_string())
            .bind(req.notification_type.to_string())
            .bind(req.title.as_str())
            .bind(req.message.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(map_notification_row(row)?)
    }

    async fn get(&self, id: i64) -> OrchestratorResult<Notification> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM notifications WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(OrchestratorError::NotFound(id))?;
        Ok(map_notification_row(row)?)
    }

    async fn mark_read(&self, id: i64) -> OrchestratorResult<Notification> {
        let query = format!(
            "UPDATE notifications SET is_read = true WHERE id = $1 RETURNING {SELECT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(OrchestratorError::NotFound(id))?;
        Ok(map_notification_row(row)?)
    }

    async fn mark_sent(&self, id: i64) -> OrchestratorResult<Notification> {
        let existing = self.get(id).await?;
        if existing.sent_at.is_some() {
            return Ok(existing);
        }
        let now = self.clock.now();
        let query = format!(
            "UPDATE notifications SET sent_at = $2 WHERE id = $1 RETURNING {SELECT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(OrchestratorError::NotFound(id))?;
        Ok(map_notification_row(row)?)
    }

    async fn list(&self, filter: NotificationFilter) -> OrchestratorResult<Vec<Notification>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut idx = 1;
        if filter.recipient_id.is_some() {
            clauses.push(format!("recipient_id = ${idx}"));
            idx += 1;
        }
        if filter.recipient_type.is_some() {
            clauses.push(format!("recipient_type = ${idx}"));
            idx += 1;
        }
        if filter.notification_type.is_some() {
            clauses.push(format!("type = ${idx}"));
            idx += 1;
        }
        if filter.is_read.is_some() {
            clauses.push(format!("is_read = ${idx}"));
            idx += 1;
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit_idx = idx;
        let offset_idx = idx + 1;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM notifications {where_clause} \
             ORDER BY created_at DESC LIMIT ${limit_idx} OFFSET ${offset_idx}"
        );

        let mut query = sqlx::query(&sql);
        if let Some(recipient_id) = filter.recipient_id {
            query = query.bind(recipient_id);
        }
        if let Some(recipient_type) = filter.recipient_type {
            query = query.bind(recipient_type.to_string());
        }
        if let Some(notification_type) = filter.notification_type {
            query = query.bind(notification_type.to_string());
        }
        if let Some(is_read) = filter.is_read {
            query = query.bind(is_read);
        }
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        query = query.bind(limit).bind(filter.offset.max(0));

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(map_notification_row)
            .collect::<Result<_, _>>()
            .map_err(OrchestratorError::Storage)
    }

    async fn delete(&self, id: i64) -> OrchestratorResult<()> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(id));
        }
        Ok(())
    }

    async fn stats(&self) -> OrchestratorResult<NotificationStats> {
        let totals = sqlx::query(
            r#"
            SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE NOT is_read) AS unread
            FROM notifications
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let by_type_rows = sqlx::query("SELECT type, COUNT(*) AS n FROM notifications GROUP BY type")
            .fetch_all(&self.pool)
            .await?;

        let mut by_type = HashMap::new();
        for row in by_type_rows {
            let type_name: String = row.try_get("type")?;
            let count: i64 = row.try_get("n")?;
            by_type.insert(type_name, count);
        }

        Ok(NotificationStats {
            total: totals.try_get("total")?,
            unread: totals.try_get("unread")?,
            by_type,
        })
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> OrchestratorResult<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
