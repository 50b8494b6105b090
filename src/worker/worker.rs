//! # Per-Item Worker Loop (C5)
//!
//! The sequence a single claimed `QueueItem` goes through: claim → render →
//! create attempt → transport → finalize (spec §4.5/§5). `process_item` is
//! the unit the pool calls once per popped item; kept free of any pool
//! bookkeeping so it can be exercised directly in tests.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::domain::{DeliveryAttempt, DeliveryStatus, EmailAddress, NewDeliveryAttempt, QueueItem, RecipientType};
use crate::domain_source::DomainDataSource;
use crate::ledger::DeliveryLedger;
use crate::orchestrator::NotificationStore;
use crate::queue::QueueStore;
use crate::worker::transport::{Transport, TransportError};

/// Shared collaborators every worker task needs; cloned (via `Arc`) into
/// each spawned loop rather than re-resolved per tick.
pub struct WorkerDeps {
    pub queue: Arc<dyn QueueStore>,
    pub ledger: Arc<dyn DeliveryLedger>,
    pub notifications: Arc<dyn NotificationStore>,
    pub transport: Arc<dyn Transport>,
    pub directory: Arc<dyn DomainDataSource>,
    pub transport_timeout: Duration,
}

/// Outcome of processing one item, for batch-level logging/metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed,
    RetriedLater,
    FailedTerminal,
    ClaimLost,
}

/// Runs the full per-item sequence against an already-popped candidate.
/// Re-checks status via `transition` first (the CAS claim), so a stale hint
/// from the Priority Index or a duplicate batch entry is harmless.
pub async fn process_item(deps: &WorkerDeps, item_id: i64, worker_id: &str) -> ItemOutcome {
    let item = match deps.queue.transition(item_id, worker_id).await {
        Ok(item) => item,
        Err(_) => {
            // Lost the claim, or the item is no longer pending (cancelled,
            // already claimed, or already terminal). Not an error: another
            // worker owns it, or there is nothing left to do.
            return ItemOutcome::ClaimLost;
        }
    };

    match process_claimed_item(deps, &item).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(queue_item_id = item.id, error = %err, "failed to finalize queue item after claim");
            ItemOutcome::RetriedLater
        }
    }
}

async fn process_claimed_item(deps: &WorkerDeps, item: &QueueItem) -> anyhow::Result<ItemOutcome> {
    let notification = deps.notifications.get(item.notification_id).await?;

    let email = deps
        .directory
        .recipient_email(notification.recipient_id, notification.recipient_type)
        .await?;
    let Some(email) = email else {
        let message = format!(
            "no email address on file for {} {}",
            describe_recipient(notification.recipient_type),
            notification.recipient_id
        );
        deps.queue.fail_terminal(item.id, &message).await?;
        return Ok(ItemOutcome::FailedTerminal);
    };

    let email_address = match EmailAddress::new(&email) {
        Ok(addr) => addr,
        Err(msg) => {
            deps.queue.fail_terminal(item.id, &msg).await?;
            return Ok(ItemOutcome::FailedTerminal);
        }
    };

    if let Err(err) = deps.transport.validate(email_address.as_str()) {
        deps.queue.fail_terminal(item.id, &err.to_string()).await?;
        return Ok(ItemOutcome::FailedTerminal);
    }

    let attempt = resolve_attempt(deps, notification.id, &email_address, item.max_attempts).await?;

    let send_result = tokio::time::timeout(
        deps.transport_timeout,
        deps.transport
            .send(email_address.as_str(), &notification.title, &notification.message, false),
    )
    .await;

    match send_result {
        Ok(Ok(message_id)) => {
            deps.ledger.set_status(attempt.id, DeliveryStatus::Sent).await?;
            deps.ledger
                .update_provider(attempt.id, &message_id, serde_json::json!({}))
                .await?;
            deps.queue.complete(item.id).await?;
            deps.notifications.mark_sent(notification.id).await?;
            info!(queue_item_id = item.id, notification_id = notification.id, "delivered");
            Ok(ItemOutcome::Completed)
        }
        Ok(Err(TransportError::Transient(msg))) => {
            deps.ledger.record_error(attempt.id, &msg).await?;
            let updated = deps.queue.fail(item.id, &msg).await?;
            warn!(queue_item_id = item.id, attempts = updated.attempts, "transient transport failure");
            Ok(if updated.status.is_terminal() {
                ItemOutcome::FailedTerminal
            } else {
                ItemOutcome::RetriedLater
            })
        }
        Ok(Err(TransportError::Permanent(msg))) => {
            deps.ledger.record_error(attempt.id, &msg).await?;
            deps.queue.fail_terminal(item.id, &msg).await?;
            warn!(queue_item_id = item.id, "permanent transport failure");
            Ok(ItemOutcome::FailedTerminal)
        }
        Err(_elapsed) => {
            let msg = "transport call exceeded deadline".to_string();
            deps.ledger.record_error(attempt.id, &msg).await?;
            let updated = deps.queue.fail(item.id, &msg).await?;
            Ok(if updated.status.is_terminal() {
                ItemOutcome::FailedTerminal
            } else {
                ItemOutcome::RetriedLater
            })
        }
    }
}

/// Reuses the notification's open `DeliveryAttempt` across claims instead of
/// opening a new row on every retry, so `retry_count` accumulates on one row
/// until it is terminal (spec §4.5/§8 scenario 3) and `DeliveryLedger::
/// retry_failed` has rows to find. Only the first claim for a notification
/// creates a row.
async fn resolve_attempt(
    deps: &WorkerDeps,
    notification_id: i64,
    email_address: &EmailAddress,
    max_attempts: i32,
) -> anyhow::Result<DeliveryAttempt> {
    let existing = deps.ledger.by_notification(notification_id).await?;
    if let Some(attempt) = existing.into_iter().rev().find(|a| !a.is_terminal()) {
        return Ok(attempt);
    }
    let attempt = deps
        .ledger
        .create(NewDeliveryAttempt {
            notification_id,
            email_address: email_address.clone(),
            max_retries: max_attempts,
            metadata: serde_json::json!({}),
        })
        .await?;
    Ok(attempt)
}

fn describe_recipient(recipient_type: RecipientType) -> &'static str {
    match recipient_type {
        RecipientType::Student => "student",
        RecipientType::Librarian => "librarian",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::{NewNotification, NotificationType};
    use crate::domain_source::{FineRecord, LoanRecord, ReservationRecord};
    use crate::ledger::InMemoryDeliveryLedger;
    use crate::orchestrator::InMemoryNotificationStore;
    use crate::queue::InMemoryQueueStore;
    use crate::worker::transport::MockTransport;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeDirectory {
        email: Option<String>,
    }

    #[async_trait::async_trait]
    impl DomainDataSource for FakeDirectory {
        async fn recipient_email(&self, _id: i64, _t: RecipientType) -> anyhow::Result<Option<String>> {
            Ok(self.email.clone())
        }
        async fn due_soon_loans(&self) -> anyhow::Result<Vec<LoanRecord>> {
            Ok(vec![])
        }
        async fn overdue_loans(&self) -> anyhow::Result<Vec<LoanRecord>> {
            Ok(vec![])
        }
        async fn reservations_for_book(&self, _book_id: i64) -> anyhow::Result<Vec<ReservationRecord>> {
            Ok(vec![])
        }
        async fn unpaid_fines(&self) -> anyhow::Result<Vec<FineRecord>> {
            Ok(vec![])
        }
    }

    async fn setup(transport: MockTransport) -> (WorkerDeps, Arc<InMemoryQueueStore>, i64) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone(), 60, 3600));
        let notifications = Arc::new(InMemoryNotificationStore::new(clock.clone()));
        let notification = notifications
            .create(
                NewNotification::new(
                    42,
                    RecipientType::Student,
                    NotificationType::DueSoon,
                    "Due soon",
                    "Your book is due soon",
                )
                .unwrap(),
            )
            .await
            .unwrap();
        let item = queue
            .enqueue(
                crate::domain::EnqueueRequest::new(notification.id, 5, clock.now(), 3, serde_json::json!({}))
                    .unwrap(),
            )
            .await
            .unwrap();

        let deps = WorkerDeps {
            queue: queue.clone(),
            ledger: Arc::new(InMemoryDeliveryLedger::new(clock.clone())),
            notifications,
            transport: Arc::new(transport),
            directory: Arc::new(FakeDirectory {
                email: Some("student@example.com".into()),
            }),
            transport_timeout: std::time::Duration::from_secs(5),
        };
        (deps, queue, item.id)
    }

    #[tokio::test]
    async fn successful_send_completes_item_and_marks_notification_sent() {
        let mut transport = MockTransport::new();
        transport.expect_validate().returning(|_| Ok(()));
        transport
            .expect_send()
            .returning(|_, _, _, _| Ok("provider-msg-1".to_string()));

        let (deps, queue, item_id) = setup(transport).await;
        let outcome = process_item(&deps, item_id, "worker-1").await;
        assert_eq!(outcome, ItemOutcome::Completed);
        let item = queue.get(item_id).await.unwrap();
        assert_eq!(item.status, crate::domain::QueueStatus::Completed);
    }

    #[tokio::test]
    async fn transient_failure_requeues_for_retry() {
        let mut transport = MockTransport::new();
        transport.expect_validate().returning(|_| Ok(()));
        transport
            .expect_send()
            .returning(|_, _, _, _| Err(TransportError::Transient("timeout".into())));

        let (deps, queue, item_id) = setup(transport).await;
        let outcome = process_item(&deps, item_id, "worker-1").await;
        assert_eq!(outcome, ItemOutcome::RetriedLater);
        let item = queue.get(item_id).await.unwrap();
        assert_eq!(item.status, crate::domain::QueueStatus::Pending);
        assert_eq!(item.attempts, 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_terminal_regardless_of_remaining_attempts() {
        let mut transport = MockTransport::new();
        transport.expect_validate().returning(|_| Ok(()));
        transport
            .expect_send()
            .returning(|_, _, _, _| Err(TransportError::Permanent("rejected address".into())));

        let (deps, queue, item_id) = setup(transport).await;
        let outcome = process_item(&deps, item_id, "worker-1").await;
        assert_eq!(outcome, ItemOutcome::FailedTerminal);
        let item = queue.get(item_id).await.unwrap();
        assert_eq!(item.status, crate::domain::QueueStatus::Failed);
    }

    #[tokio::test]
    async fn retry_count_accumulates_on_one_attempt_row_until_terminal() {
        // spec §8 scenario 3: max_attempts = 2, transport always transient.
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone(), 60, 3600));
        let notifications = Arc::new(InMemoryNotificationStore::new(clock.clone()));
        let notification = notifications
            .create(
                NewNotification::new(
                    42,
                    RecipientType::Student,
                    NotificationType::DueSoon,
                    "Due soon",
                    "Your book is due soon",
                )
                .unwrap(),
            )
            .await
            .unwrap();
        let item = queue
            .enqueue(crate::domain::EnqueueRequest::new(notification.id, 5, clock.now(), 2, serde_json::json!({})).unwrap())
            .await
            .unwrap();
        let ledger = Arc::new(InMemoryDeliveryLedger::new(clock.clone()));

        let mut transport = MockTransport::new();
        transport.expect_validate().returning(|_| Ok(()));
        transport
            .expect_send()
            .returning(|_, _, _, _| Err(TransportError::Transient("timeout".into())));

        let deps = WorkerDeps {
            queue: queue.clone(),
            ledger: ledger.clone(),
            notifications,
            transport: Arc::new(transport),
            directory: Arc::new(FakeDirectory {
                email: Some("student@example.com".into()),
            }),
            transport_timeout: std::time::Duration::from_secs(5),
        };

        let first = process_item(&deps, item.id, "worker-1").await;
        assert_eq!(first, ItemOutcome::RetriedLater);
        let second = process_item(&deps, item.id, "worker-1").await;
        assert_eq!(second, ItemOutcome::FailedTerminal);

        let attempts = ledger.by_notification(notification.id).await.unwrap();
        assert_eq!(attempts.len(), 1, "one claim should reuse the same attempt row, not open another");
        assert_eq!(attempts[0].retry_count, 2);
        assert_eq!(attempts[0].status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn second_claimer_loses_the_race() {
        let mut transport = MockTransport::new();
        transport.expect_validate().returning(|_| Ok(()));
        transport
            .expect_send()
            .returning(|_, _, _, _| Ok("msg".to_string()));

        let (deps, _queue, item_id) = setup(transport).await;
        let claimed = AtomicBool::new(false);
        let first = deps.queue.transition(item_id, "worker-a").await;
        assert!(first.is_ok());
        claimed.store(true, Ordering::SeqCst);

        let second = deps.queue.transition(item_id, "worker-b").await;
        assert!(second.is_err());
    }
}
