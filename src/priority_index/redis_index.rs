//! Redis-backed `PriorityIndex`: an auto-reconnecting `ConnectionManager`
//! rather than a bare `Client`/`Connection` pair.

use async_trait::async_trait;
use chrono::DateTime;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::domain::PriorityTask;
use crate::priority_index::port::{IndexResult, PriorityIndex};

pub struct RedisPriorityIndex {
    connection: ConnectionManager,
    key: String,
}

impl RedisPriorityIndex {
    /// Connects and wraps a `ConnectionManager` over `url`.
    pub async fn connect(url: &str, key: impl Into<String>) -> IndexResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            key: key.into(),
        })
    }
}

#[async_trait]
impl PriorityIndex for RedisPriorityIndex {
    async fn push(&self, task: PriorityTask) -> IndexResult<()> {
        let mut conn = self.connection.clone();
        let member = serde_json::to_string(&task).expect("PriorityTask serializes");
        let _: () = conn.zadd(&self.key, member, task.score()).await?;
        Ok(())
    }

    async fn pop(&self, n: i64) -> IndexResult<Vec<PriorityTask>> {
        let mut conn = self.connection.clone();
        let raw: Vec<(String, f64)> = conn.zpopmin(&self.key, n.max(0) as isize).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(member, _score)| serde_json::from_str(&member).ok())
            .collect())
    }

    async fn len(&self) -> IndexResult<i64> {
        let mut conn = self.connection.clone();
        conn.zcard(&self.key).await
    }

    async fn clear(&self) -> IndexResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(&self.key).await?;
        Ok(())
    }
}

/// Recomputes a `PriorityTask`'s score the way the Redis-backed index
/// would, for callers that only have the epoch seconds on hand.
pub fn score_for(priority: i32, scheduled_for_epoch: i64) -> f64 {
    priority as f64 + scheduled_for_epoch as f64 / 1e9
}

/// Rehydrates a `DateTime<Utc>` from a score fragment, used only by tests
/// that want to assert against the lossy encoding spec §9 flags.
pub fn epoch_from_score(score: f64, priority: i32) -> i64 {
    ((score - priority as f64) * 1e9).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_for_matches_priority_task_score() {
        let scheduled = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let task = PriorityTask {
            queue_item_id: 1,
            priority: 3,
            scheduled_for: scheduled,
        };
        assert!((score_for(3, scheduled.timestamp()) - task.score()).abs() < 1e-9);
    }
}
