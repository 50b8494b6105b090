//! In-memory `QueueStore` double. This is where the state-machine
//! invariants of spec §4.3/§8 are exercised directly in unit tests, without
//! a live Postgres instance.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::clock::SharedClock;
use crate::domain::{EnqueueRequest, QueueItem, QueueStats, QueueStatus};
use crate::queue::error::{backoff_seconds, QueueError, QueueResult};
use crate::queue::store::QueueStore;

pub struct InMemoryQueueStore {
    clock: SharedClock,
    items: Mutex<Vec<QueueItem>>,
    next_id: Mutex<i64>,
    backoff_base_seconds: u64,
    backoff_cap_seconds: u64,
}

impl InMemoryQueueStore {
    pub fn new(clock: SharedClock, backoff_base_seconds: u64, backoff_cap_seconds: u64) -> Self {
        Self {
            clock,
            items: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            backoff_base_seconds,
            backoff_cap_seconds,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<QueueItem>> {
        self.items.lock().expect("queue store mutex poisoned")
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, req: EnqueueRequest) -> QueueResult<QueueItem> {
        let now = self.clock.now();
        if req.scheduled_for < now - ChronoDuration::hours(1) {
            return Err(QueueError::InvalidRequest(
                "scheduled_for is more than one hour in the past".into(),
            ));
        }

        let mut id_guard = self.next_id.lock().expect("id mutex poisoned");
        let id = *id_guard;
        *id_guard += 1;

        let item = QueueItem {
            id,
            notification_id: req.notification_id,
            priority: req.priority.value(),
            scheduled_for: req.scheduled_for,
            attempts: 0,
            max_attempts: req.max_attempts.value(),
            status: QueueStatus::Pending,
            worker_id: None,
            processing_started_at: None,
            processing_completed_at: None,
            error_message: None,
            metadata: req.metadata,
            created_at: now,
            updated_at: now,
        };
        self.lock().push(item.clone());
        Ok(item)
    }

    async fn get(&self, id: i64) -> QueueResult<QueueItem> {
        self.lock()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(QueueError::NotFound(id))
    }

    async fn next_ready(&self, limit: i64) -> QueueResult<Vec<QueueItem>> {
        let now = self.clock.now();
        let mut ready: Vec<QueueItem> = self
            .lock()
            .iter()
            .filter(|i| i.status == QueueStatus::Pending && i.scheduled_for <= now)
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.scheduled_for.cmp(&b.scheduled_for))
                .then(a.id.cmp(&b.id))
        });
        ready.truncate(limit.max(0) as usize);
        Ok(ready)
    }

    async fn transition(&self, id: i64, worker_id: &str) -> QueueResult<QueueItem> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let item = guard.iter_mut().find(|i| i.id == id).ok_or(QueueError::NotFound(id))?;
        if item.status != QueueStatus::Pending {
            return Err(QueueError::Conflict(format!(
                "queue item {id} is not pending"
            )));
        }
        item.status = QueueStatus::Processing;
        item.worker_id = Some(worker_id.to_string());
        item.processing_started_at = Some(now);
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn complete(&self, id: i64) -> QueueResult<QueueItem> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let item = guard.iter_mut().find(|i| i.id == id).ok_or(QueueError::NotFound(id))?;
        if item.status == QueueStatus::Completed {
            return Ok(item.clone());
        }
        item.status = QueueStatus::Completed;
        item.processing_completed_at = Some(now);
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn fail(&self, id: i64, error_message: &str) -> QueueResult<QueueItem> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let item = guard.iter_mut().find(|i| i.id == id).ok_or(QueueError::NotFound(id))?;
        if item.status.is_terminal() {
            return Err(QueueError::Conflict(format!(
                "queue item {id} is already terminal ({})",
                item.status
            )));
        }
        item.attempts += 1;
        item.error_message = Some(error_message.to_string());
        item.updated_at = now;

        if item.attempts < item.max_attempts {
            let delay = backoff_seconds(item.attempts, self.backoff_base_seconds, self.backoff_cap_seconds);
            item.status = QueueStatus::Pending;
            item.scheduled_for = now + ChronoDuration::seconds(delay as i64);
            item.worker_id = None;
            item.processing_started_at = None;
        } else {
            item.status = QueueStatus::Failed;
            item.processing_completed_at = Some(now);
        }
        Ok(item.clone())
    }

    async fn fail_terminal(&self, id: i64, error_message: &str) -> QueueResult<QueueItem> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let item = guard.iter_mut().find(|i| i.id == id).ok_or(QueueError::NotFound(id))?;
        if item.status.is_terminal() {
            return Err(QueueError::Conflict(format!(
                "queue item {id} is already terminal ({})",
                item.status
            )));
        }
        item.attempts += 1;
        item.error_message = Some(error_message.to_string());
        item.status = QueueStatus::Failed;
        item.processing_completed_at = Some(now);
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn cancel(&self, id: i64) -> QueueResult<QueueItem> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let item = guard.iter_mut().find(|i| i.id == id).ok_or(QueueError::NotFound(id))?;
        if item.status.is_terminal() {
            return Err(QueueError::Conflict(format!(
                "queue item {id} is already terminal ({})",
                item.status
            )));
        }
        item.status = QueueStatus::Cancelled;
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> QueueResult<QueueStats> {
        let guard = self.lock();
        let mut stats = QueueStats::default();
        for item in guard.iter().filter(|i| i.created_at >= from && i.created_at < to) {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
                QueueStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    async fn reset_stuck(&self, threshold: ChronoDuration) -> QueueResult<Vec<QueueItem>> {
        let now = self.clock.now();
        let cutoff = now - threshold;
        let mut guard = self.lock();
        let mut reset = Vec::new();
        for item in guard.iter_mut() {
            if item.status == QueueStatus::Processing {
                if let Some(started) = item.processing_started_at {
                    if started < cutoff {
                        item.status = QueueStatus::Pending;
                        item.attempts += 1;
                        item.worker_id = None;
                        item.processing_started_at = None;
                        item.updated_at = now;
                        reset.push(item.clone());
                    }
                }
            }
        }
        Ok(reset)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> QueueResult<u64> {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|i| {
            !(i.created_at < older_than
                && matches!(
                    i.status,
                    QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
                ))
        });
        Ok((before - guard.len()) as u64)
    }

    async fn length(&self) -> QueueResult<i64> {
        Ok(self
            .lock()
            .iter()
            .filter(|i| matches!(i.status, QueueStatus::Pending | QueueStatus::Processing))
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use std::sync::Arc;

    fn store() -> (InMemoryQueueStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryQueueStore::new(clock.clone(), 60, 3600);
        (store, clock)
    }

    fn enqueue_req(notification_id: i64, priority: i32, scheduled_for: DateTime<Utc>) -> EnqueueRequest {
        EnqueueRequest::new(notification_id, priority, scheduled_for, 3, serde_json::json!({}))
            .expect("valid enqueue request")
    }

    #[tokio::test]
    async fn next_ready_orders_by_priority_then_schedule_then_id() {
        let (store, clock) = store();
        let now = clock.now();
        let a = store.enqueue(enqueue_req(1, 10, now)).await.unwrap();
        let b = store.enqueue(enqueue_req(2, 1, now + ChronoDuration::seconds(1))).await.unwrap();
        let c = store.enqueue(enqueue_req(3, 5, now)).await.unwrap();

        let ready = store.next_ready(3).await.unwrap();
        assert_eq!(ready.iter().map(|i| i.id).collect::<Vec<_>>(), vec![b.id, c.id, a.id]);
    }

    #[tokio::test]
    async fn next_ready_excludes_future_items() {
        let (store, clock) = store();
        let now = clock.now();
        store.enqueue(enqueue_req(1, 5, now + ChronoDuration::hours(1))).await.unwrap();
        let ready = store.next_ready(10).await.unwrap();
        assert!(ready.is_empty());
    }

    #[tokio::test]
    async fn transition_is_claim_once() {
        let (store, clock) = store();
        let item = store.enqueue(enqueue_req(1, 5, clock.now())).await.unwrap();
        let claimed = store.transition(item.id, "worker-a").await.unwrap();
        assert_eq!(claimed.status, QueueStatus::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-a"));

        let lost = store.transition(item.id, "worker-b").await;
        assert!(matches!(lost, Err(QueueError::Conflict(_))));
    }

    #[tokio::test]
    async fn fail_requeues_with_backoff_until_max_attempts() {
        let (store, clock) = store();
        let item = store.enqueue(enqueue_req(1, 5, clock.now())).await.unwrap();
        store.transition(item.id, "w1").await.unwrap();
        let failed_once = store.fail(item.id, "timeout").await.unwrap();
        assert_eq!(failed_once.status, QueueStatus::Pending);
        assert_eq!(failed_once.attempts, 1);
        assert!(failed_once.scheduled_for > clock.now());

        store.transition(item.id, "w1").await.unwrap();
        let failed_twice = store.fail(item.id, "timeout").await.unwrap();
        assert_eq!(failed_twice.status, QueueStatus::Pending);

        store.transition(item.id, "w1").await.unwrap();
        let failed_thrice = store.fail(item.id, "timeout").await.unwrap();
        assert_eq!(failed_thrice.status, QueueStatus::Failed);
        assert_eq!(failed_thrice.attempts, 3);
    }

    #[tokio::test]
    async fn max_attempts_one_fails_terminally_on_first_error() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryQueueStore::new(clock.clone(), 60, 3600);
        let mut req = enqueue_req(1, 5, clock.now());
        req.max_attempts = crate::domain::MaxAttempts::new(1).unwrap();
        let item = store.enqueue(req).await.unwrap();
        store.transition(item.id, "w1").await.unwrap();
        let failed = store.fail(item.id, "boom").await.unwrap();
        assert_eq!(failed.status, QueueStatus::Failed);
    }

    #[tokio::test]
    async fn complete_is_idempotent() {
        let (store, clock) = store();
        let item = store.enqueue(enqueue_req(1, 5, clock.now())).await.unwrap();
        store.transition(item.id, "w1").await.unwrap();
        let first = store.complete(item.id).await.unwrap();
        let second = store.complete(item.id).await.unwrap();
        assert_eq!(first.processing_completed_at, second.processing_completed_at);
    }

    #[tokio::test]
    async fn cancel_from_terminal_state_conflicts() {
        let (store, clock) = store();
        let item = store.enqueue(enqueue_req(1, 5, clock.now())).await.unwrap();
        store.transition(item.id, "w1").await.unwrap();
        store.complete(item.id).await.unwrap();
        assert!(matches!(store.cancel(item.id).await, Err(QueueError::Conflict(_))));
    }

    #[tokio::test]
    async fn reset_stuck_returns_items_past_threshold() {
        let (store, clock) = store();
        let item = store.enqueue(enqueue_req(1, 5, clock.now())).await.unwrap();
        store.transition(item.id, "w1").await.unwrap();
        clock.advance(ChronoDuration::minutes(6));

        let reset = store.reset_stuck(ChronoDuration::minutes(5)).await.unwrap();
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].status, QueueStatus::Pending);

        let refetched = store.get(item.id).await.unwrap();
        assert!(refetched.processing_started_at.is_none());
    }
}
