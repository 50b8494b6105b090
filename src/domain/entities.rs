//! # Core Domain Entities
//!
//! `Notification`, `QueueItem`, `DeliveryAttempt`, and `Template` as defined
//! in spec §3, plus their closed status/type vocabularies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{EmailAddress, MaxAttempts, NonEmptyText, Priority};

// =============================================================================
// ENUMS — closed vocabularies (spec §3/§6: "unknown values fail validation")
// =============================================================================

/// Who the notification is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Student,
    Librarian,
}

impl std::fmt::Display for RecipientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientType::Student => write!(f, "student"),
            RecipientType::Librarian => write!(f, "librarian"),
        }
    }
}

impl std::str::FromStr for RecipientType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(RecipientType::Student),
            "librarian" => Ok(RecipientType::Librarian),
            other => Err(format!("invalid recipient type: {other}")),
        }
    }
}

/// The kind of event the notification informs about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    OverdueReminder,
    DueSoon,
    BookAvailable,
    FineNotice,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationType::OverdueReminder => "overdue_reminder",
            NotificationType::DueSoon => "due_soon",
            NotificationType::BookAvailable => "book_available",
            NotificationType::FineNotice => "fine_notice",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overdue_reminder" => Ok(NotificationType::OverdueReminder),
            "due_soon" => Ok(NotificationType::DueSoon),
            "book_available" => Ok(NotificationType::BookAvailable),
            "fine_notice" => Ok(NotificationType::FineNotice),
            other => Err(format!("invalid notification type: {other}")),
        }
    }
}

/// Durable scheduling status of a `QueueItem` (spec §4.3 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    /// Terminal statuses are never transitioned out of (spec §3 invariant).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(format!("invalid queue status: {other}")),
        }
    }
}

/// Provider-interaction status of a `DeliveryAttempt` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Bounced,
}

impl DeliveryStatus {
    /// Terminal statuses per spec §3: `delivered`, `bounced`, and `failed`
    /// once `retry_count = max_retries`. The retry-exhaustion case is a
    /// function of the row's counters, not the status alone, so callers
    /// should prefer `DeliveryAttempt::is_terminal`.
    pub fn is_unconditionally_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Bounced)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Bounced => "bounced",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            "bounced" => Ok(DeliveryStatus::Bounced),
            other => Err(format!("invalid delivery status: {other}")),
        }
    }
}

// =============================================================================
// NOTIFICATION
// =============================================================================

/// The logical intent to inform a recipient (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub recipient_type: RecipientType,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Data required to create a new notification. `title`/`message` are
/// `NonEmptyText`, so an empty or blank value cannot reach the store —
/// construction is the validation (spec §3).
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub recipient_type: RecipientType,
    pub notification_type: NotificationType,
    pub title: NonEmptyText,
    pub message: NonEmptyText,
}

impl NewNotification {
    pub fn new(
        recipient_id: i64,
        recipient_type: RecipientType,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Self, String> {
        Ok(Self {
            recipient_id,
            recipient_type,
            notification_type,
            title: NonEmptyText::new(title)?,
            message: NonEmptyText::new(message)?,
        })
    }
}

// =============================================================================
// QUEUE ITEM
// =============================================================================

/// The durable scheduling record for one notification (spec §3/§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub notification_id: i64,
    pub priority: i32,
    pub scheduled_for: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub status: QueueStatus,
    pub worker_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Whether this item still has retries remaining.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Request to enqueue a new `QueueItem` (spec §4.3). `priority`/`max_attempts`
/// are `Priority`/`MaxAttempts`, so an out-of-range value cannot reach the
/// store — construction is the validation.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub notification_id: i64,
    pub priority: Priority,
    pub scheduled_for: DateTime<Utc>,
    pub max_attempts: MaxAttempts,
    pub metadata: serde_json::Value,
}

impl EnqueueRequest {
    /// Validates raw `priority`/`max_attempts` ints from a caller (API
    /// request, producer) into an `EnqueueRequest` in one step.
    pub fn new(
        notification_id: i64,
        priority: i32,
        scheduled_for: DateTime<Utc>,
        max_attempts: i32,
        metadata: serde_json::Value,
    ) -> Result<Self, String> {
        Ok(Self {
            notification_id,
            priority: Priority::new(priority)?,
            scheduled_for,
            max_attempts: MaxAttempts::new(max_attempts)?,
            metadata,
        })
    }
}

// =============================================================================
// DELIVERY ATTEMPT
// =============================================================================

/// One recorded provider interaction for a notification (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: i64,
    pub notification_id: i64,
    pub email_address: String,
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub provider_message_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    /// Terminal per spec §3: delivered, bounced, or failed-with-no-retries-left.
    pub fn is_terminal(&self) -> bool {
        self.status.is_unconditionally_terminal()
            || (self.status == DeliveryStatus::Failed && self.retry_count >= self.max_retries)
    }
}

/// Data required to create a new `DeliveryAttempt` row. `email_address` is
/// an `EmailAddress`, so a malformed address cannot reach the ledger —
/// construction is the validation.
#[derive(Debug, Clone)]
pub struct NewDeliveryAttempt {
    pub notification_id: i64,
    pub email_address: EmailAddress,
    pub max_retries: i32,
    pub metadata: serde_json::Value,
}

// =============================================================================
// TEMPLATE
// =============================================================================

/// A named, versioned notification template (spec §3/§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub variables: Vec<String>,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a new template.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub variables: Vec<String>,
}

/// Partial update for a template.
#[derive(Debug, Clone, Default)]
pub struct UpdateTemplate {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub is_html: Option<bool>,
    pub variables: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

// =============================================================================
// PRIORITY TASK (ephemeral — spec §3/§6)
// =============================================================================

/// The compact payload written to the Priority Index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriorityTask {
    pub queue_item_id: i64,
    pub priority: i32,
    pub scheduled_for: DateTime<Utc>,
}

impl PriorityTask {
    /// Score `priority + scheduled_for/1e9` per spec §3, lower sorts first.
    ///
    /// Lossy for very large timestamps (spec §9 open question); the Redis
    /// port documents a lexicographic alternative.
    pub fn score(&self) -> f64 {
        self.priority as f64 + (self.scheduled_for.timestamp() as f64) / 1e9
    }
}

// =============================================================================
// STATISTICS AGGREGATES
// =============================================================================

/// Per-status counts plus average delivery latency (spec §4.2).
#[derive(Debug, Clone, Serialize, Default)]
pub struct DeliveryStats {
    pub pending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub bounced: i64,
    pub avg_delivery_latency_seconds: Option<f64>,
}

/// Per-status counts for queue items (spec §4.3).
#[derive(Debug, Clone, Serialize, Default)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_status_terminal_states() {
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
        assert!(QueueStatus::Cancelled.is_terminal());
        assert!(!QueueStatus::Pending.is_terminal());
        assert!(!QueueStatus::Processing.is_terminal());
    }

    #[test]
    fn priority_task_score_orders_priority_before_time() {
        let earlier = PriorityTask {
            queue_item_id: 1,
            priority: 10,
            scheduled_for: DateTime::from_timestamp(1_000, 0).unwrap(),
        };
        let later_but_urgent = PriorityTask {
            queue_item_id: 2,
            priority: 1,
            scheduled_for: DateTime::from_timestamp(2_000, 0).unwrap(),
        };
        assert!(later_but_urgent.score() < earlier.score());
    }

    #[test]
    fn delivery_attempt_terminal_when_retries_exhausted() {
        let mut attempt = DeliveryAttempt {
            id: 1,
            notification_id: 1,
            email_address: "a@example.com".into(),
            status: DeliveryStatus::Failed,
            sent_at: None,
            delivered_at: None,
            failed_at: Some(Utc::now()),
            error_message: Some("boom".into()),
            retry_count: 1,
            max_retries: 2,
            provider_message_id: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!attempt.is_terminal());
        attempt.retry_count = 2;
        assert!(attempt.is_terminal());
    }
}
