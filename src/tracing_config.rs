//! # Structured Logging Setup
//!
//! Initializes `tracing-subscriber` with environment-appropriate output:
//! pretty, colored output in development, JSON in staging/production for
//! log aggregation. Controlled by `RUST_LOG`, same as the rest of the
//! workspace.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppEnvironment;

/// Initializes the global tracing subscriber. Call once at process startup.
pub fn init_tracing(environment: AppEnvironment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,notify_pipeline=debug"));

    let registry = tracing_subscriber::registry().with(filter);

    match environment {
        AppEnvironment::Production | AppEnvironment::Staging => {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        }
        AppEnvironment::Development => {
            registry.with(tracing_subscriber::fmt::layer().pretty()).init();
        }
    }
}
