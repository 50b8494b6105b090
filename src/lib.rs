//! # Notification Delivery Pipeline
//!
//! Prioritized email notification delivery: durable scheduling, worker-pool
//! dispatch under priority and retry policies, and a per-recipient delivery
//! ledger.
//!
//! ## Architecture
//!
//! Four interacting state machines — notification → queue item → delivery
//! attempt → provider acknowledgement — span two storage tiers: a relational
//! system of record and an in-memory priority index used as an opportunistic
//! dispatch hint.
//!
//! | Module | Component | Purpose |
//! |--------|-----------|---------|
//! | [`template`] | C1 Template Engine | Variable substitution, validation, default templates |
//! | [`ledger`] | C2 Delivery Ledger | Per-recipient delivery attempts and statistics |
//! | [`queue`] | C3 Queue Store | Durable scheduling, claim-by-CAS, backoff retry |
//! | [`priority_index`] | C4 Priority Index | In-memory sorted dispatch hint |
//! | [`worker`] | C5 Worker Pool | Cooperative workers, Transport port, claim loop |
//! | [`orchestrator`] | C6 Notification Orchestrator | Creates notifications, enqueues them |
//! | [`producers`] | C7 Scheduled-Reminder Producers | Periodic domain scans |
//!
//! The relational store is always the source of truth; the priority index is
//! a cache workers consult for low-latency dispatch and otherwise fall back
//! past. See [`queue::QueueStore::next_ready`] for the authoritative ordering.

pub mod clock;
pub mod config;
pub mod database;
pub mod domain;
pub mod domain_source;
pub mod errors;
pub mod ledger;
pub mod orchestrator;
pub mod priority_index;
pub mod producers;
pub mod queue;
pub mod template;
pub mod tracing_config;
pub mod worker;

pub use errors::{PipelineError, PipelineResult};
