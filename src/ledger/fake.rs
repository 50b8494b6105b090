//! In-memory `DeliveryLedger` double used by worker/orchestrator unit tests
//! so they run deterministically without a live Postgres instance (spec
//! §9 "Ambient time"; SPEC_FULL.md test-tooling section).

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::clock::SharedClock;
use crate::domain::{DeliveryAttempt, DeliveryStats, DeliveryStatus, NewDeliveryAttempt};
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::repository::DeliveryLedger;

pub struct InMemoryDeliveryLedger {
    clock: SharedClock,
    rows: Mutex<Vec<DeliveryAttempt>>,
    next_id: Mutex<i64>,
}

impl InMemoryDeliveryLedger {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            rows: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DeliveryAttempt>> {
        self.rows.lock().expect("ledger mutex poisoned")
    }
}

#[async_trait]
impl DeliveryLedger for InMemoryDeliveryLedger {
    async fn create(&self, req: NewDeliveryAttempt) -> LedgerResult<DeliveryAttempt> {
        let mut id_guard = self.next_id.lock().expect("id mutex poisoned");
        let id = *id_guard;
        *id_guard += 1;
        let now = self.clock.now();
        let attempt = DeliveryAttempt {
            id,
            notification_id: req.notification_id,
            email_address: req.email_address.to_string(),
            status: DeliveryStatus::Pending,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: req.max_retries,
            provider_message_id: None,
            metadata: req.metadata,
            created_at: now,
            updated_at: now,
        };
        self.lock().push(attempt.clone());
        Ok(attempt)
    }

    async fn get(&self, id: i64) -> LedgerResult<DeliveryAttempt> {
        self.lock()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    async fn by_notification(&self, notification_id: i64) -> LedgerResult<Vec<DeliveryAttempt>> {
        Ok(self
            .lock()
            .iter()
            .filter(|a| a.notification_id == notification_id)
            .cloned()
            .collect())
    }

    async fn set_status(&self, id: i64, status: DeliveryStatus) -> LedgerResult<DeliveryAttempt> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let attempt = guard.iter_mut().find(|a| a.id == id).ok_or(LedgerError::NotFound(id))?;
        attempt.status = status;
        attempt.updated_at = now;
        match status {
            DeliveryStatus::Sent => attempt.sent_at = Some(now),
            DeliveryStatus::Delivered => attempt.delivered_at = Some(now),
            DeliveryStatus::Failed => {
                attempt.failed_at = Some(now);
                attempt.retry_count += 1;
            }
            DeliveryStatus::Bounced | DeliveryStatus::Pending => {}
        }
        Ok(attempt.clone())
    }

    async fn record_error(&self, id: i64, message: &str) -> LedgerResult<DeliveryAttempt> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let attempt = guard.iter_mut().find(|a| a.id == id).ok_or(LedgerError::NotFound(id))?;
        attempt.status = DeliveryStatus::Failed;
        attempt.error_message = Some(message.to_string());
        attempt.failed_at = Some(now);
        attempt.retry_count += 1;
        attempt.updated_at = now;
        Ok(attempt.clone())
    }

    async fn update_provider(
        &self,
        id: i64,
        provider_message_id: &str,
        metadata: serde_json::Value,
    ) -> LedgerResult<DeliveryAttempt> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let attempt = guard.iter_mut().find(|a| a.id == id).ok_or(LedgerError::NotFound(id))?;
        attempt.provider_message_id = Some(provider_message_id.to_string());
        if let Some(map) = attempt.metadata.as_object_mut() {
            if let Some(extra) = metadata.as_object() {
                for (k, v) in extra {
                    map.insert(k.clone(), v.clone());
                }
            }
        } else {
            attempt.metadata = json!(metadata);
        }
        attempt.updated_at = now;
        Ok(attempt.clone())
    }

    async fn pending(&self, limit: i64) -> LedgerResult<Vec<DeliveryAttempt>> {
        Ok(self
            .lock()
            .iter()
            .filter(|a| a.status == DeliveryStatus::Pending)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn failed(&self, limit: i64) -> LedgerResult<Vec<DeliveryAttempt>> {
        Ok(self
            .lock()
            .iter()
            .filter(|a| a.status == DeliveryStatus::Failed)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn retry_failed(&self, limit: i64) -> LedgerResult<u64> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let mut moved = 0u64;
        for attempt in guard.iter_mut() {
            if moved as i64 >= limit {
                break;
            }
            if attempt.status == DeliveryStatus::Failed && attempt.retry_count < attempt.max_retries {
                attempt.status = DeliveryStatus::Pending;
                attempt.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> LedgerResult<DeliveryStats> {
        let guard = self.lock();
        let mut stats = DeliveryStats::default();
        let mut latency_sum = 0f64;
        let mut latency_count = 0u32;
        for attempt in guard.iter().filter(|a| a.created_at >= from && a.created_at < to) {
            match attempt.status {
                DeliveryStatus::Pending => stats.pending += 1,
                DeliveryStatus::Sent => stats.sent += 1,
                DeliveryStatus::Delivered => {
                    stats.delivered += 1;
                    if let Some(delivered_at) = attempt.delivered_at {
                        latency_sum += (delivered_at - attempt.created_at).num_milliseconds() as f64 / 1000.0;
                        latency_count += 1;
                    }
                }
                DeliveryStatus::Failed => stats.failed += 1,
                DeliveryStatus::Bounced => stats.bounced += 1,
            }
        }
        stats.avg_delivery_latency_seconds = if latency_count > 0 {
            Some(latency_sum / latency_count as f64)
        } else {
            None
        };
        Ok(stats)
    }

    async fn history(&self, email: &str, page: i64, limit: i64) -> LedgerResult<Vec<DeliveryAttempt>> {
        if page < 1 || limit < 1 {
            return Err(LedgerError::InvalidRequest(
                "page and limit must be >= 1".into(),
            ));
        }
        let mut matches: Vec<DeliveryAttempt> = self
            .lock()
            .iter()
            .filter(|a| a.email_address == email)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = ((page - 1) * limit) as usize;
        Ok(matches.into_iter().skip(offset).take(limit as usize).collect())
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> LedgerResult<u64> {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|a| a.created_at >= older_than);
        Ok((before - guard.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::sync::Arc;

    fn ledger() -> InMemoryDeliveryLedger {
        InMemoryDeliveryLedger::new(Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn set_status_sent_stamps_sent_at() {
        let ledger = ledger();
        let attempt = ledger
            .create(NewDeliveryAttempt {
                notification_id: 1,
                email_address: crate::domain::EmailAddress::new("a@example.com").unwrap(),
                max_retries: 2,
                metadata: json!({}),
            })
            .await
            .unwrap();
        let updated = ledger.set_status(attempt.id, DeliveryStatus::Sent).await.unwrap();
        assert!(updated.sent_at.is_some());
    }

    #[tokio::test]
    async fn record_error_increments_retry_count() {
        let ledger = ledger();
        let attempt = ledger
            .create(NewDeliveryAttempt {
                notification_id: 1,
                email_address: crate::domain::EmailAddress::new("a@example.com").unwrap(),
                max_retries: 2,
                metadata: json!({}),
            })
            .await
            .unwrap();
        let updated = ledger.record_error(attempt.id, "timeout").await.unwrap();
        assert_eq!(updated.retry_count, 1);
        assert_eq!(updated.status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn retry_failed_only_moves_rows_with_retries_remaining() {
        let ledger = ledger();
        let attempt = ledger
            .create(NewDeliveryAttempt {
                notification_id: 1,
                email_address: crate::domain::EmailAddress::new("a@example.com").unwrap(),
                max_retries: 1,
                metadata: json!({}),
            })
            .await
            .unwrap();
        ledger.record_error(attempt.id, "boom").await.unwrap();
        // retry_count (1) == max_retries (1): exhausted, should not move.
        let moved = ledger.retry_failed(10).await.unwrap();
        assert_eq!(moved, 0);
    }
}
