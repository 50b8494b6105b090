//! # Notify Worker
//!
//! Binary entry point for the notification delivery pipeline: wires
//! configuration, a Postgres pool, a Redis-backed priority index, and
//! structured logging together, then runs the worker pool and the
//! scheduled-reminder producers until a shutdown signal arrives.
//!
//! HTTP/CLI surfaces, auth, and the student/book/transaction domain schema
//! are out of scope (spec §1) — this binary wires the pipeline itself and a
//! [`NullDomainDataSource`] placeholder; a deployment that owns the LMS
//! schema supplies its own `DomainDataSource` in its place.

use std::sync::Arc;
use std::time::Duration;

use notify_pipeline::clock::{SharedClock, SystemClock};
use notify_pipeline::config::PipelineConfig;
use notify_pipeline::database;
use notify_pipeline::domain_source::NullDomainDataSource;
use notify_pipeline::ledger::PostgresDeliveryLedger;
use notify_pipeline::orchestrator::{NotificationOrchestrator, PostgresNotificationStore};
use notify_pipeline::priority_index::{PriorityIndex, RedisPriorityIndex, UnavailablePriorityIndex};
use notify_pipeline::producers::ReminderProducers;
use notify_pipeline::queue::PostgresQueueStore;
use notify_pipeline::template::{InMemoryTemplateStore, TemplateEngine};
use notify_pipeline::tracing_config;
use notify_pipeline::worker::{WorkerDeps, WorkerPool};

/// Built-in `Transport` placeholder: the SMTP transport itself is a
/// pluggable external collaborator (spec §1/§6) supplied by the deployment
/// that owns outbound mail credentials. Logs what it would send and always
/// succeeds, so the pipeline is exercisable end-to-end before a real
/// transport is wired in.
struct LoggingTransport;

#[async_trait::async_trait]
impl notify_pipeline::worker::Transport for LoggingTransport {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        _body: &str,
        _is_html: bool,
    ) -> Result<String, notify_pipeline::worker::TransportError> {
        let message_id = format!("logging-transport-{}", uuid::Uuid::new_v4());
        tracing::info!(to, subject, message_id, "transport: would send email (no transport configured)");
        Ok(message_id)
    }

    fn validate(&self, email: &str) -> Result<(), notify_pipeline::worker::TransportError> {
        if validator::ValidateEmail::validate_email(&email.to_string()) {
            Ok(())
        } else {
            Err(notify_pipeline::worker::TransportError::Permanent(format!(
                "'{email}' is not a syntactically valid email address"
            )))
        }
    }
}

/// Count of concurrent worker tasks to start. Max concurrent workers is
/// unbounded and operator-managed (§6), so it's read directly from the
/// environment here.
fn worker_count() -> usize {
    std::env::var("WORKER_COUNT")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(2)
}

/// How often the four scheduled-reminder scans run. Not named by spec §6's
/// configuration table; defaulted to once an hour, overridable for tests
/// and operators who want tighter cycles.
fn producer_interval() -> Duration {
    std::env::var("PRODUCER_INTERVAL_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(3600))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env()?;
    tracing_config::init_tracing(config.environment);

    tracing::info!(service = %config.service_name, "starting notification delivery pipeline");

    let pool = database::create_pool(&config.database).await?;
    database::health_check(&pool).await?;
    database::run_migrations(&pool).await?;

    let clock: SharedClock = Arc::new(SystemClock);

    let index: Option<Arc<dyn PriorityIndex>> =
        match RedisPriorityIndex::connect(&config.priority_index.url, &config.priority_index.key).await {
            Ok(redis_index) => {
                tracing::info!("connected to priority index");
                Some(Arc::new(redis_index))
            }
            Err(err) => {
                tracing::warn!(error = %err, "priority index unavailable, falling back to NextReady only");
                None
            }
        };
    let orchestrator_index: Arc<dyn PriorityIndex> = match &index {
        Some(index) => index.clone(),
        None => Arc::new(UnavailablePriorityIndex),
    };

    let notifications = Arc::new(PostgresNotificationStore::new(pool.clone(), clock.clone()));
    let queue = Arc::new(PostgresQueueStore::new(
        pool.clone(),
        clock.clone(),
        config.retry.backoff_base_seconds as u64,
        config.retry.backoff_cap_seconds as u64,
    ));
    let ledger = Arc::new(PostgresDeliveryLedger::new(pool.clone(), clock.clone()));

    let template_engine = Arc::new(TemplateEngine::new(Arc::new(InMemoryTemplateStore::new())).await?);

    let directory = Arc::new(NullDomainDataSource);

    let orchestrator = Arc::new(NotificationOrchestrator::new(
        notifications.clone(),
        queue.clone(),
        orchestrator_index,
        template_engine,
        clock.clone(),
    ));

    let worker_deps = WorkerDeps {
        queue: queue.clone(),
        ledger: ledger.clone(),
        notifications: notifications.clone(),
        transport: Arc::new(LoggingTransport),
        directory: directory.clone(),
        transport_timeout: Duration::from_secs(config.worker.transport_timeout_seconds),
    };
    let worker_pool = WorkerPool::new(worker_deps, index, config.worker.clone(), clock.clone());

    let count = worker_count();
    for i in 0..count {
        worker_pool.start_worker(format!("worker-{i}"))?;
    }
    tracing::info!(count, "worker pool started");

    let stuck_queue = queue.clone();
    let stuck_threshold = chrono::Duration::seconds(config.worker.stuck_threshold_seconds);
    let stuck_tick = Duration::from_secs(config.worker.stuck_threshold_seconds as u64);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(stuck_tick);
        loop {
            ticker.tick().await;
            match stuck_queue.reset_stuck(stuck_threshold).await {
                Ok(reset) if !reset.is_empty() => {
                    tracing::warn!(count = reset.len(), "recovered stuck queue items");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "stuck-item recovery scan failed"),
            }
        }
    });

    let producers = ReminderProducers::new(orchestrator.clone(), directory);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(producer_interval());
        loop {
            ticker.tick().await;
            let due_soon = producers.send_due_soon_reminders().await;
            let overdue = producers.send_overdue_reminders().await;
            let fines = producers.send_fine_notices().await;
            tracing::info!(
                due_soon_created = due_soon.created,
                overdue_created = overdue.created,
                fine_created = fines.created,
                "scheduled-reminder scan complete"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping workers");
    for i in 0..count {
        let _ = worker_pool.stop_worker(&format!("worker-{i}"));
    }

    Ok(())
}
