//! # Domain Data Source Port
//!
//! Student/book/transaction schema access is explicitly out of scope (spec
//! §1 Non-goals). The Worker Pool (for recipient email resolution) and the
//! Scheduled-Reminder Producers (for the four periodic scans, spec §4.7)
//! both need a narrow read-only view of that external domain, so it is
//! modeled as a single port rather than duplicated ad hoc.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::RecipientType;

/// A loan/transaction row relevant to due-soon and overdue scans.
#[derive(Debug, Clone)]
pub struct LoanRecord {
    pub transaction_id: i64,
    pub recipient_id: i64,
    pub recipient_type: RecipientType,
    pub book_title: String,
    pub due_date: DateTime<Utc>,
}

/// An active reservation for a book that just became available.
#[derive(Debug, Clone)]
pub struct ReservationRecord {
    pub reservation_id: i64,
    pub recipient_id: i64,
    pub recipient_type: RecipientType,
    pub book_id: i64,
    pub book_title: String,
    pub reserved_at: DateTime<Utc>,
}

/// A transaction carrying an unpaid fine.
#[derive(Debug, Clone)]
pub struct FineRecord {
    pub transaction_id: i64,
    pub recipient_id: i64,
    pub recipient_type: RecipientType,
    pub book_title: String,
    pub amount: String,
}

#[async_trait]
pub trait DomainDataSource: Send + Sync {
    /// Resolves the delivery email address for a recipient. Returns `None`
    /// if the recipient has no usable address on file.
    async fn recipient_email(
        &self,
        recipient_id: i64,
        recipient_type: RecipientType,
    ) -> anyhow::Result<Option<String>>;

    /// Loans with `due_date ∈ (now, now+3d]`, not yet returned.
    async fn due_soon_loans(&self) -> anyhow::Result<Vec<LoanRecord>>;

    /// Loans past due, not yet returned.
    async fn overdue_loans(&self) -> anyhow::Result<Vec<LoanRecord>>;

    /// Active reservations for `book_id`, in reservation order.
    async fn reservations_for_book(&self, book_id: i64) -> anyhow::Result<Vec<ReservationRecord>>;

    /// Transactions with an unpaid fine.
    async fn unpaid_fines(&self) -> anyhow::Result<Vec<FineRecord>>;
}

/// A `DomainDataSource` that never matches anything: every scan returns
/// empty, and recipient email resolution always reports "no address on
/// file". The student/book/transaction schema is out of scope for this
/// crate (spec §1), so the binary wires this in by default; a deployment
/// that owns that schema supplies its own `DomainDataSource` in its place.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDomainDataSource;

#[async_trait]
impl DomainDataSource for NullDomainDataSource {
    async fn recipient_email(
        &self,
        _recipient_id: i64,
        _recipient_type: RecipientType,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn due_soon_loans(&self) -> anyhow::Result<Vec<LoanRecord>> {
        Ok(Vec::new())
    }

    async fn overdue_loans(&self) -> anyhow::Result<Vec<LoanRecord>> {
        Ok(Vec::new())
    }

    async fn reservations_for_book(&self, _book_id: i64) -> anyhow::Result<Vec<ReservationRecord>> {
        Ok(Vec::new())
    }

    async fn unpaid_fines(&self) -> anyhow::Result<Vec<FineRecord>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_source_reports_no_email_and_empty_scans() {
        let source = NullDomainDataSource;
        assert_eq!(
            source.recipient_email(1, RecipientType::Student).await.unwrap(),
            None
        );
        assert!(source.due_soon_loans().await.unwrap().is_empty());
        assert!(source.overdue_loans().await.unwrap().is_empty());
        assert!(source.reservations_for_book(1).await.unwrap().is_empty());
        assert!(source.unpaid_fines().await.unwrap().is_empty());
    }
}
