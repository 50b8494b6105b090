//! Delivery Ledger (C2): persistent per-recipient delivery attempts.

pub mod error;
pub mod fake;
pub mod repository;

pub use error::{LedgerError, LedgerResult};
pub use fake::InMemoryDeliveryLedger;
pub use repository::{DeliveryLedger, PostgresDeliveryLedger};
