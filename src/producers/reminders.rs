//! # Scheduled-Reminder Producers (C7)
//!
//! Four periodic scans over the external domain, each funneling matched
//! records into the Notification Orchestrator (spec §4.7). Failures on
//! individual rows are logged and do not abort the scan.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::domain::{NotificationType, RecipientType};
use crate::domain_source::DomainDataSource;
use crate::orchestrator::{NotificationOrchestrator, NotificationRequest};

/// Per-scan outcome: how many notifications were created and how many rows
/// failed (spec §4.7: "failures per row are logged and do not abort the scan").
#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct ScanOutcome {
    pub created: u32,
    pub failed: u32,
}

/// The default priority and retry budget new reminder notifications get.
/// Producers don't expose these as per-call parameters, so they're fixed
/// constants here rather than plumbed through every call site.
const REMINDER_PRIORITY: i32 = 5;
const REMINDER_MAX_ATTEMPTS: i32 = 3;

pub struct ReminderProducers {
    orchestrator: Arc<NotificationOrchestrator>,
    directory: Arc<dyn DomainDataSource>,
}

impl ReminderProducers {
    pub fn new(orchestrator: Arc<NotificationOrchestrator>, directory: Arc<dyn DomainDataSource>) -> Self {
        Self {
            orchestrator,
            directory,
        }
    }

    /// `SendDueSoonReminders()`.
    pub async fn send_due_soon_reminders(&self) -> ScanOutcome {
        let loans = match self.directory.due_soon_loans().await {
            Ok(loans) => loans,
            Err(err) => {
                warn!(error = %err, "due-soon scan failed to read domain data");
                return ScanOutcome::default();
            }
        };

        let mut outcome = ScanOutcome::default();
        for loan in loans {
            let title = format!("Due soon: {}", loan.book_title);
            let message = format!(
                "Your loan of \"{}\" is due on {}.",
                loan.book_title,
                loan.due_date.format("%Y-%m-%d")
            );
            self.create_reminder(
                &mut outcome,
                loan.recipient_id,
                loan.recipient_type,
                NotificationType::DueSoon,
                title,
                message,
            )
            .await;
        }
        outcome
    }

    /// `SendOverdueReminders()`.
    pub async fn send_overdue_reminders(&self) -> ScanOutcome {
        let loans = match self.directory.overdue_loans().await {
            Ok(loans) => loans,
            Err(err) => {
                warn!(error = %err, "overdue scan failed to read domain data");
                return ScanOutcome::default();
            }
        };

        let mut outcome = ScanOutcome::default();
        for loan in loans {
            let title = format!("Overdue: {}", loan.book_title);
            let message = format!(
                "Your loan of \"{}\" was due on {} and is now overdue. Please return it as soon as possible.",
                loan.book_title,
                loan.due_date.format("%Y-%m-%d")
            );
            self.create_reminder(
                &mut outcome,
                loan.recipient_id,
                loan.recipient_type,
                NotificationType::OverdueReminder,
                title,
                message,
            )
            .await;
        }
        outcome
    }

    /// `SendBookAvailableNotifications(book_id)`. Reservations are already
    /// returned in reservation order by the directory port.
    pub async fn send_book_available_notifications(&self, book_id: i64) -> ScanOutcome {
        let reservations = match self.directory.reservations_for_book(book_id).await {
            Ok(reservations) => reservations,
            Err(err) => {
                warn!(book_id, error = %err, "book-available scan failed to read domain data");
                return ScanOutcome::default();
            }
        };

        let mut outcome = ScanOutcome::default();
        for reservation in reservations {
            let title = format!("Reserved book available: {}", reservation.book_title);
            let message = format!(
                "\"{}\" that you reserved is now available for pickup.",
                reservation.book_title
            );
            self.create_reminder(
                &mut outcome,
                reservation.recipient_id,
                reservation.recipient_type,
                NotificationType::BookAvailable,
                title,
                message,
            )
            .await;
        }
        outcome
    }

    /// `SendFineNotices()`.
    pub async fn send_fine_notices(&self) -> ScanOutcome {
        let fines = match self.directory.unpaid_fines().await {
            Ok(fines) => fines,
            Err(err) => {
                warn!(error = %err, "fine-notice scan failed to read domain data");
                return ScanOutcome::default();
            }
        };

        let mut outcome = ScanOutcome::default();
        for fine in fines {
            let title = format!("Outstanding fine: {}", fine.amount);
            let message = format!(
                "You have an outstanding fine of {} related to \"{}\". Please settle it at your earliest convenience.",
                fine.amount, fine.book_title
            );
            self.create_reminder(
                &mut outcome,
                fine.recipient_id,
                fine.recipient_type,
                NotificationType::FineNotice,
                title,
                message,
            )
            .await;
        }
        outcome
    }

    async fn create_reminder(
        &self,
        outcome: &mut ScanOutcome,
        recipient_id: i64,
        recipient_type: RecipientType,
        notification_type: NotificationType,
        title: String,
        message: String,
    ) {
        let req = NotificationRequest {
            recipient_id,
            recipient_type,
            notification_type,
            title,
            message,
            priority: REMINDER_PRIORITY,
            scheduled_for: None,
            max_attempts: REMINDER_MAX_ATTEMPTS,
        };
        match self.orchestrator.create(req).await {
            Ok(_) => outcome.created += 1,
            Err(err) => {
                warn!(recipient_id, error = %err, "reminder scan row failed");
                outcome.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain_source::{FineRecord, LoanRecord, ReservationRecord};
    use crate::priority_index::InMemoryPriorityIndex;
    use crate::orchestrator::InMemoryNotificationStore;
    use crate::queue::InMemoryQueueStore;
    use crate::template::{InMemoryTemplateStore, TemplateEngine};
    use chrono::{Duration, Utc};

    struct FakeDirectory {
        due_soon: Vec<LoanRecord>,
        overdue: Vec<LoanRecord>,
        reservations: Vec<ReservationRecord>,
        fines: Vec<FineRecord>,
        fail_due_soon: bool,
    }

    impl Default for FakeDirectory {
        fn default() -> Self {
            Self {
                due_soon: vec![],
                overdue: vec![],
                reservations: vec![],
                fines: vec![],
                fail_due_soon: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl DomainDataSource for FakeDirectory {
        async fn recipient_email(&self, _id: i64, _t: RecipientType) -> anyhow::Result<Option<String>> {
            Ok(Some("student@example.com".into()))
        }
        async fn due_soon_loans(&self) -> anyhow::Result<Vec<LoanRecord>> {
            if self.fail_due_soon {
                anyhow::bail!("domain source unavailable");
            }
            Ok(self.due_soon.clone())
        }
        async fn overdue_loans(&self) -> anyhow::Result<Vec<LoanRecord>> {
            Ok(self.overdue.clone())
        }
        async fn reservations_for_book(&self, _book_id: i64) -> anyhow::Result<Vec<ReservationRecord>> {
            Ok(self.reservations.clone())
        }
        async fn unpaid_fines(&self) -> anyhow::Result<Vec<FineRecord>> {
            Ok(self.fines.clone())
        }
    }

    async fn producers(directory: FakeDirectory) -> ReminderProducers {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone(), 60, 3600));
        let template_engine = Arc::new(
            TemplateEngine::new(Arc::new(InMemoryTemplateStore::new()))
                .await
                .expect("template engine construction"),
        );
        let orchestrator = Arc::new(NotificationOrchestrator::new(
            Arc::new(InMemoryNotificationStore::new(clock.clone())),
            queue,
            Arc::new(InMemoryPriorityIndex::new()),
            template_engine,
            clock,
        ));
        ReminderProducers::new(orchestrator, Arc::new(directory))
    }

    #[tokio::test]
    async fn due_soon_scan_creates_one_notification_per_loan() {
        let directory = FakeDirectory {
            due_soon: vec![
                LoanRecord {
                    transaction_id: 1,
                    recipient_id: 10,
                    recipient_type: RecipientType::Student,
                    book_title: "Dune".into(),
                    due_date: Utc::now() + Duration::days(2),
                },
                LoanRecord {
                    transaction_id: 2,
                    recipient_id: 11,
                    recipient_type: RecipientType::Student,
                    book_title: "Foundation".into(),
                    due_date: Utc::now() + Duration::days(1),
                },
            ],
            ..Default::default()
        };
        let outcome = producers(directory).await.send_due_soon_reminders().await;
        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn scan_tolerates_domain_source_failure_without_panicking() {
        let directory = FakeDirectory {
            fail_due_soon: true,
            ..Default::default()
        };
        let outcome = producers(directory).await.send_due_soon_reminders().await;
        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn book_available_scan_notifies_every_reservation_in_order() {
        let directory = FakeDirectory {
            reservations: vec![ReservationRecord {
                reservation_id: 1,
                recipient_id: 20,
                recipient_type: RecipientType::Student,
                book_id: 99,
                book_title: "Neuromancer".into(),
                reserved_at: Utc::now(),
            }],
            ..Default::default()
        };
        let outcome = producers(directory).await.send_book_available_notifications(99).await;
        assert_eq!(outcome.created, 1);
    }

    #[tokio::test]
    async fn fine_notice_scan_creates_a_notification_per_unpaid_fine() {
        let directory = FakeDirectory {
            fines: vec![FineRecord {
                transaction_id: 5,
                recipient_id: 30,
                recipient_type: RecipientType::Librarian,
                book_title: "Snow Crash".into(),
                amount: "4.50".into(),
            }],
            ..Default::default()
        };
        let outcome = producers(directory).await.send_fine_notices().await;
        assert_eq!(outcome.created, 1);
    }
}
