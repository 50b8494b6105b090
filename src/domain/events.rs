//! # Domain Events
//!
//! A tagged enum per aggregate, each variant carrying the data needed to
//! describe what happened, with an
//! `event_type()` accessor returning a dotted string suitable for a log
//! field or an outbox row. Nothing here is persisted by this crate today;
//! it exists as the seam a future outbox/event-bus integration would use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entities::{DeliveryStatus, QueueStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum QueueItemEvent {
    Enqueued {
        queue_item_id: i64,
        notification_id: i64,
        priority: i32,
        scheduled_for: DateTime<Utc>,
    },
    Claimed {
        queue_item_id: i64,
        worker_id: String,
        attempt: i32,
    },
    Completed {
        queue_item_id: i64,
    },
    Failed {
        queue_item_id: i64,
        error_message: String,
        will_retry: bool,
        next_attempt_at: Option<DateTime<Utc>>,
    },
    Cancelled {
        queue_item_id: i64,
    },
    Reset {
        queue_item_id: i64,
        previous_status: QueueStatus,
    },
}

impl QueueItemEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueItemEvent::Enqueued { .. } => "queue_item.enqueued",
            QueueItemEvent::Claimed { .. } => "queue_item.claimed",
            QueueItemEvent::Completed { .. } => "queue_item.completed",
            QueueItemEvent::Failed { .. } => "queue_item.failed",
            QueueItemEvent::Cancelled { .. } => "queue_item.cancelled",
            QueueItemEvent::Reset { .. } => "queue_item.reset",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Recorded {
        delivery_id: i64,
        notification_id: i64,
    },
    StatusChanged {
        delivery_id: i64,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
    ProviderAcknowledged {
        delivery_id: i64,
        provider_message_id: String,
    },
}

impl DeliveryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DeliveryEvent::Recorded { .. } => "delivery.recorded",
            DeliveryEvent::StatusChanged { .. } => "delivery.status_changed",
            DeliveryEvent::ProviderAcknowledged { .. } => "delivery.provider_acknowledged",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TemplateEvent {
    Created { name: String },
    Updated { name: String },
    Deleted { name: String },
}

impl TemplateEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TemplateEvent::Created { .. } => "template.created",
            TemplateEvent::Updated { .. } => "template.updated",
            TemplateEvent::Deleted { .. } => "template.deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_strings_are_dotted() {
        let event = QueueItemEvent::Completed { queue_item_id: 1 };
        assert_eq!(event.event_type(), "queue_item.completed");
    }
}
