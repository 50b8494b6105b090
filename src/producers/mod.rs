//! Scheduled-Reminder Producers (C7): periodic domain scans that funnel
//! matched records into the Notification Orchestrator.

pub mod reminders;

pub use reminders::{ReminderProducers, ScanOutcome};
