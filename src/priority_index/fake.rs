//! In-memory `PriorityIndex` double, and a variant that always fails, used
//! to exercise the "index write fails" tolerance scenario (spec §8
//! scenario 6).

use std::sync::Mutex;

use async_trait::async_trait;
use redis::{ErrorKind, RedisError};

use crate::domain::PriorityTask;
use crate::priority_index::port::{IndexResult, PriorityIndex};

#[derive(Default)]
pub struct InMemoryPriorityIndex {
    tasks: Mutex<Vec<PriorityTask>>,
}

impl InMemoryPriorityIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriorityIndex for InMemoryPriorityIndex {
    async fn push(&self, task: PriorityTask) -> IndexResult<()> {
        self.tasks.lock().expect("index mutex poisoned").push(task);
        Ok(())
    }

    async fn pop(&self, n: i64) -> IndexResult<Vec<PriorityTask>> {
        let mut guard = self.tasks.lock().expect("index mutex poisoned");
        guard.sort_by(|a, b| a.score().partial_cmp(&b.score()).unwrap());
        let count = (n.max(0) as usize).min(guard.len());
        Ok(guard.drain(0..count).collect())
    }

    async fn len(&self) -> IndexResult<i64> {
        Ok(self.tasks.lock().expect("index mutex poisoned").len() as i64)
    }

    async fn clear(&self) -> IndexResult<()> {
        self.tasks.lock().expect("index mutex poisoned").clear();
        Ok(())
    }
}

/// A `PriorityIndex` that always returns an error, modeling "index
/// unavailable" so callers can prove they fall back to `NextReady`.
#[derive(Default)]
pub struct UnavailablePriorityIndex;

#[async_trait]
impl PriorityIndex for UnavailablePriorityIndex {
    async fn push(&self, _task: PriorityTask) -> IndexResult<()> {
        Err(RedisError::from((ErrorKind::IoError, "index unavailable")))
    }

    async fn pop(&self, _n: i64) -> IndexResult<Vec<PriorityTask>> {
        Err(RedisError::from((ErrorKind::IoError, "index unavailable")))
    }

    async fn len(&self) -> IndexResult<i64> {
        Err(RedisError::from((ErrorKind::IoError, "index unavailable")))
    }

    async fn clear(&self) -> IndexResult<()> {
        Err(RedisError::from((ErrorKind::IoError, "index unavailable")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn pop_returns_lowest_score_first() {
        let index = InMemoryPriorityIndex::new();
        index
            .push(PriorityTask {
                queue_item_id: 1,
                priority: 10,
                scheduled_for: Utc::now(),
            })
            .await
            .unwrap();
        index
            .push(PriorityTask {
                queue_item_id: 2,
                priority: 1,
                scheduled_for: Utc::now(),
            })
            .await
            .unwrap();

        let popped = index.pop(1).await.unwrap();
        assert_eq!(popped[0].queue_item_id, 2);
    }
}
