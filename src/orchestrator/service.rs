//! # Notification Orchestrator (C6)
//!
//! Creates notifications, enqueues into the Queue Store and Priority Index,
//! and exposes the maintenance operations workers and schedulers call into
//! (spec §4.6). A thin façade over a repository plus sibling ports,
//! returning domain errors rather than reaching into storage directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::clock::SharedClock;
use crate::domain::{
    EnqueueRequest, NewNotification, Notification, NotificationType, PriorityTask, RecipientType,
};
use crate::orchestrator::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::store::{NotificationFilter, NotificationStats, NotificationStore};
use crate::priority_index::PriorityIndex;
use crate::queue::QueueStore;
use crate::template::TemplateEngine;

/// Request to create a single notification (spec §4.6).
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub recipient_id: i64,
    pub recipient_type: RecipientType,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: i32,
    /// Defaults to `now` when absent — immediate enqueue.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_attempts: i32,
}

/// One recipient in a `CreateBatch` call, sharing a notification type and
/// scheduling parameters but rendering its own title/message.
#[derive(Debug, Clone)]
pub struct BatchRecipient {
    pub recipient_id: i64,
    pub recipient_type: RecipientType,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub notification_type: NotificationType,
    pub recipients: Vec<BatchRecipient>,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_attempts: i32,
}

/// A `BatchRequest` whose recipients are rendered from a shared template
/// (spec §4.6: "renders the per-recipient message from `message_template` +
/// `message_data`") instead of carrying pre-rendered title/message.
#[derive(Debug, Clone)]
pub struct TemplatedBatchRequest {
    pub notification_type: NotificationType,
    pub template_name: String,
    pub recipients: Vec<TemplatedBatchRecipient>,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_attempts: i32,
}

/// One recipient in a `TemplatedBatchRequest`: a recipient identity plus the
/// substitution data rendered against the batch's shared template.
#[derive(Debug, Clone)]
pub struct TemplatedBatchRecipient {
    pub recipient_id: i64,
    pub recipient_type: RecipientType,
    pub message_data: serde_json::Value,
}

/// Result of `CreateBatch`: the notifications that were created, plus the
/// recipients that failed and why (spec §4.6: "partial failure is
/// tolerated").
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub created: Vec<Notification>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Serialize)]
pub struct BatchFailure {
    pub recipient_id: i64,
    pub error: String,
}

pub struct NotificationOrchestrator {
    notifications: Arc<dyn NotificationStore>,
    queue: Arc<dyn QueueStore>,
    index: Arc<dyn PriorityIndex>,
    template_engine: Arc<TemplateEngine>,
    clock: SharedClock,
}

impl NotificationOrchestrator {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        queue: Arc<dyn QueueStore>,
        index: Arc<dyn PriorityIndex>,
        template_engine: Arc<TemplateEngine>,
        clock: SharedClock,
    ) -> Self {
        Self {
            notifications,
            queue,
            index,
            template_engine,
            clock,
        }
    }

    /// `Render(template, data) → (subject, body)` via C1, for callers (batch
    /// creation, scheduled-reminder producers) that hold a template name and
    /// a data map rather than pre-rendered text.
    pub async fn render(
        &self,
        template_name: &str,
        data: &serde_json::Value,
    ) -> OrchestratorResult<(String, String)> {
        let template = self.template_engine.get(template_name).await?;
        let rendered = self.template_engine.render(&template, data);
        Ok((rendered.subject, rendered.body))
    }

    /// `Create(req) → notification`.
    pub async fn create(&self, req: NotificationRequest) -> OrchestratorResult<Notification> {
        let notification = self
            .notifications
            .create(
                NewNotification::new(
                    req.recipient_id,
                    req.recipient_type,
                    req.notification_type,
                    req.title,
                    req.message,
                )
                .map_err(OrchestratorError::InvalidRequest)?,
            )
            .await?;

        self.enqueue_for(&notification, req.priority, req.scheduled_for, req.max_attempts)
            .await?;
        Ok(notification)
    }

    /// `CreateBatch(batch) → [notification]`. Iterates recipients,
    /// collecting successes; a per-recipient failure is logged and recorded
    /// in the outcome rather than aborting the batch.
    pub async fn create_batch(&self, batch: BatchRequest) -> BatchOutcome {
        let mut created = Vec::with_capacity(batch.recipients.len());
        let mut failed = Vec::new();

        for recipient in batch.recipients {
            let req = NotificationRequest {
                recipient_id: recipient.recipient_id,
                recipient_type: recipient.recipient_type,
                notification_type: batch.notification_type,
                title: recipient.title,
                message: recipient.message,
                priority: batch.priority,
                scheduled_for: batch.scheduled_for,
                max_attempts: batch.max_attempts,
            };
            match self.create(req).await {
                Ok(notification) => created.push(notification),
                Err(err) => {
                    warn!(recipient_id = recipient.recipient_id, error = %err, "batch recipient failed");
                    failed.push(BatchFailure {
                        recipient_id: recipient.recipient_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        BatchOutcome { created, failed }
    }

    /// `CreateBatch` variant that renders each recipient's title/message
    /// from a shared template plus per-recipient data (spec §4.6), rather
    /// than requiring the caller to pre-render text. A per-recipient render
    /// or creation failure is recorded in the outcome; the batch continues.
    pub async fn create_templated_batch(&self, batch: TemplatedBatchRequest) -> BatchOutcome {
        let mut created = Vec::with_capacity(batch.recipients.len());
        let mut failed = Vec::new();

        for recipient in batch.recipients {
            let rendered = match self.render(&batch.template_name, &recipient.message_data).await {
                Ok(rendered) => rendered,
                Err(err) => {
                    warn!(recipient_id = recipient.recipient_id, error = %err, "batch recipient template render failed");
                    failed.push(BatchFailure {
                        recipient_id: recipient.recipient_id,
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            let (subject, body) = rendered;
            let req = NotificationRequest {
                recipient_id: recipient.recipient_id,
                recipient_type: recipient.recipient_type,
                notification_type: batch.notification_type,
                title: subject,
                message: body,
                priority: batch.priority,
                scheduled_for: batch.scheduled_for,
                max_attempts: batch.max_attempts,
            };
            match self.create(req).await {
                Ok(notification) => created.push(notification),
                Err(err) => {
                    warn!(recipient_id = recipient.recipient_id, error = %err, "batch recipient failed");
                    failed.push(BatchFailure {
                        recipient_id: recipient.recipient_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        BatchOutcome { created, failed }
    }

    async fn enqueue_for(
        &self,
        notification: &Notification,
        priority: i32,
        scheduled_for: Option<DateTime<Utc>>,
        max_attempts: i32,
    ) -> OrchestratorResult<()> {
        let now = self.clock.now();
        let scheduled_for = scheduled_for.unwrap_or(now);

        let enqueue_req = EnqueueRequest::new(
            notification.id,
            priority,
            scheduled_for,
            max_attempts,
            serde_json::json!({}),
        )
        .map_err(OrchestratorError::InvalidRequest)?;

        let item = self.queue.enqueue(enqueue_req).await?;

        // Future-scheduled items are left out of the index: it has no
        // time filter on pop, so an early push would let a worker dispatch
        // it before it's due. The next worker tick's `NextReady` fallback
        // finds it once `scheduled_for` passes (spec §4.4/§4.6).
        if scheduled_for <= now {
            if let Err(err) = self
                .index
                .push(PriorityTask {
                    queue_item_id: item.id,
                    priority,
                    scheduled_for,
                })
                .await
            {
                warn!(queue_item_id = item.id, error = %err, "priority index push failed, falling back to NextReady");
            }
        }

        Ok(())
    }

    pub async fn get(&self, id: i64) -> OrchestratorResult<Notification> {
        self.notifications.get(id).await
    }

    /// Idempotent.
    pub async fn mark_read(&self, id: i64) -> OrchestratorResult<Notification> {
        self.notifications.mark_read(id).await
    }

    /// Stamps `sent_at` on first call; subsequent calls are no-ops (spec §3).
    pub async fn mark_sent(&self, id: i64) -> OrchestratorResult<Notification> {
        self.notifications.mark_sent(id).await
    }

    pub async fn list(&self, filter: NotificationFilter) -> OrchestratorResult<Vec<Notification>> {
        self.notifications.list(filter).await
    }

    pub async fn delete(&self, id: i64) -> OrchestratorResult<()> {
        self.notifications.delete(id).await
    }

    pub async fn stats(&self) -> OrchestratorResult<NotificationStats> {
        self.notifications.stats().await
    }

    /// `ProcessPending(limit)`: promotes queue items whose `scheduled_for`
    /// has come due into the Priority Index, for notifications created with
    /// a future schedule. Mirrors `NextReady`'s ordering so the index stays
    /// consistent with the store's dispatch order.
    pub async fn process_pending(&self, limit: i64) -> OrchestratorResult<u64> {
        let ready = self.queue.next_ready(limit).await?;
        let mut promoted = 0u64;
        for item in ready {
            if let Err(err) = self
                .index
                .push(PriorityTask {
                    queue_item_id: item.id,
                    priority: item.priority,
                    scheduled_for: item.scheduled_for,
                })
                .await
            {
                warn!(queue_item_id = item.id, error = %err, "priority index push failed during ProcessPending");
                continue;
            }
            promoted += 1;
        }
        Ok(promoted)
    }

    /// `CleanupOld(days)`: deletes notifications older than `days` days.
    pub async fn cleanup_old(&self, days: i64) -> OrchestratorResult<u64> {
        let cutoff = self.clock.now() - chrono::Duration::days(days);
        self.notifications.cleanup(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::QueueStatus;
    use crate::orchestrator::fake::InMemoryNotificationStore;
    use crate::priority_index::InMemoryPriorityIndex;
    use crate::priority_index::UnavailablePriorityIndex;
    use crate::queue::InMemoryQueueStore;
    use crate::template::{InMemoryTemplateStore, TemplateEngine};

    async fn test_template_engine() -> Arc<TemplateEngine> {
        Arc::new(
            TemplateEngine::new(Arc::new(InMemoryTemplateStore::new()))
                .await
                .expect("template engine construction"),
        )
    }

    async fn orchestrator() -> (NotificationOrchestrator, Arc<InMemoryQueueStore>, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone(), 60, 3600));
        let orchestrator = NotificationOrchestrator::new(
            Arc::new(InMemoryNotificationStore::new(clock.clone())),
            queue.clone(),
            Arc::new(InMemoryPriorityIndex::new()),
            test_template_engine().await,
            clock.clone(),
        );
        (orchestrator, queue, clock)
    }

    fn req(priority: i32, scheduled_for: Option<DateTime<Utc>>) -> NotificationRequest {
        NotificationRequest {
            recipient_id: 42,
            recipient_type: RecipientType::Student,
            notification_type: NotificationType::DueSoon,
            title: "Due soon".into(),
            message: "Your book is due soon".into(),
            priority,
            scheduled_for,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn create_enqueues_immediately_when_not_scheduled_future() {
        let (orchestrator, queue, _clock) = orchestrator().await;
        let notification = orchestrator.create(req(5, None)).await.unwrap();
        let ready = queue.next_ready(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].notification_id, notification.id);
    }

    #[tokio::test]
    async fn create_rejects_invalid_recipient_id() {
        let (orchestrator, _queue, _clock) = orchestrator().await;
        let mut bad = req(5, None);
        bad.recipient_id = 0;
        assert!(orchestrator.create(bad).await.is_err());
    }

    #[tokio::test]
    async fn future_scheduled_item_is_queued_but_not_yet_ready() {
        let (orchestrator, queue, clock) = orchestrator().await;
        let future = clock.now() + chrono::Duration::hours(2);
        orchestrator.create(req(5, Some(future))).await.unwrap();
        assert!(queue.next_ready(10).await.unwrap().is_empty());
        assert_eq!(queue.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_batch_tolerates_partial_failure() {
        let (orchestrator, _queue, _clock) = orchestrator().await;
        let batch = BatchRequest {
            notification_type: NotificationType::DueSoon,
            recipients: vec![
                BatchRecipient {
                    recipient_id: 1,
                    recipient_type: RecipientType::Student,
                    title: "ok".into(),
                    message: "ok".into(),
                },
                BatchRecipient {
                    recipient_id: 0,
                    recipient_type: RecipientType::Student,
                    title: "bad".into(),
                    message: "bad".into(),
                },
            ],
            priority: 5,
            scheduled_for: None,
            max_attempts: 3,
        };
        let outcome = orchestrator.create_batch(batch).await;
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
    }

    #[tokio::test]
    async fn create_templated_batch_renders_from_the_shared_template() {
        let (orchestrator, queue, _clock) = orchestrator().await;
        let batch = TemplatedBatchRequest {
            notification_type: NotificationType::DueSoon,
            template_name: "due_soon".into(),
            recipients: vec![
                TemplatedBatchRecipient {
                    recipient_id: 1,
                    recipient_type: RecipientType::Student,
                    message_data: serde_json::json!({
                        "RecipientName": "Ada",
                        "BookTitle": "Dune",
                        "DueDate": "2026-08-01",
                    }),
                },
                TemplatedBatchRecipient {
                    recipient_id: 2,
                    recipient_type: RecipientType::Student,
                    message_data: serde_json::json!({"RecipientName": "Grace"}),
                },
            ],
            priority: 5,
            scheduled_for: None,
            max_attempts: 3,
        };

        let outcome = orchestrator.create_templated_batch(batch).await;

        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        let notification = &outcome.created[0];
        assert_eq!(notification.title, "Due soon: Dune");
        assert!(notification.message.contains("Ada"));
        assert_eq!(queue.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn render_surfaces_template_not_found() {
        let (orchestrator, _queue, _clock) = orchestrator().await;
        let err = orchestrator
            .render("does_not_exist", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Template(_)));
    }

    #[tokio::test]
    async fn index_failure_during_enqueue_does_not_fail_create() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone(), 60, 3600));
        let orchestrator = NotificationOrchestrator::new(
            Arc::new(InMemoryNotificationStore::new(clock.clone())),
            queue.clone(),
            Arc::new(UnavailablePriorityIndex),
            test_template_engine().await,
            clock.clone(),
        );
        let notification = orchestrator.create(req(5, None)).await.unwrap();
        let ready = queue.next_ready(10).await.unwrap();
        assert_eq!(ready[0].notification_id, notification.id);
    }

    #[tokio::test]
    async fn mark_sent_is_idempotent() {
        let (orchestrator, _queue, _clock) = orchestrator().await;
        let notification = orchestrator.create(req(5, None)).await.unwrap();
        let first = orchestrator.mark_sent(notification.id).await.unwrap();
        let second = orchestrator.mark_sent(notification.id).await.unwrap();
        assert_eq!(first.sent_at, second.sent_at);
    }

    #[tokio::test]
    async fn process_pending_promotes_due_items_into_index() {
        let (orchestrator, queue, clock) = orchestrator().await;
        let future = clock.now() + chrono::Duration::seconds(5);
        orchestrator.create(req(5, Some(future))).await.unwrap();
        clock.advance(chrono::Duration::seconds(10));

        let promoted = orchestrator.process_pending(10).await.unwrap();
        assert_eq!(promoted, 1);
        let ready = queue.next_ready(10).await.unwrap();
        assert_eq!(ready[0].status, QueueStatus::Pending);
    }
}
