//! # Worker Pool (C5)
//!
//! A dynamic registry of worker handles behind a readers/writer lock (spec
//! §4.5/§9 "Worker registry with dynamic lifetime"). `StartWorker` spawns a
//! cooperative polling loop; `StopWorker` signals cancellation and
//! deregisters. A shared map guards mutable in-process state, with a
//! per-worker cancel flag rather than a single resource lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::WorkerConfig;
use crate::priority_index::PriorityIndex;
use crate::worker::error::{WorkerError, WorkerResult};
use crate::worker::worker::{process_item, WorkerDeps};

/// Live bookkeeping for one registered worker.
pub struct WorkerHandle {
    pub started_at: DateTime<Utc>,
    pub is_processing: AtomicBool,
    pub processed_jobs: AtomicU64,
    pub last_job_at: Mutex<Option<DateTime<Utc>>>,
    cancelled: AtomicBool,
}

/// A read-only snapshot of a worker's state, for admin/observability calls.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub is_processing: bool,
    pub processed_jobs: u64,
    pub started_at: DateTime<Utc>,
    pub last_job_at: Option<DateTime<Utc>>,
}

pub struct WorkerPool {
    deps: Arc<WorkerDeps>,
    index: Option<Arc<dyn PriorityIndex>>,
    config: WorkerConfig,
    clock: SharedClock,
    workers: RwLock<HashMap<String, Arc<WorkerHandle>>>,
}

impl WorkerPool {
    pub fn new(
        deps: WorkerDeps,
        index: Option<Arc<dyn PriorityIndex>>,
        config: WorkerConfig,
        clock: SharedClock,
    ) -> Arc<Self> {
        Arc::new(Self {
            deps: Arc::new(deps),
            index,
            config,
            clock,
            workers: RwLock::new(HashMap::new()),
        })
    }

    /// `StartWorker(id)`: registers the worker and spawns its loop. Fails
    /// with `WorkerExists` if `id` is already registered.
    pub fn start_worker(self: &Arc<Self>, worker_id: impl Into<String>) -> WorkerResult<()> {
        let worker_id = worker_id.into();
        let mut guard = self.workers.write().expect("worker registry poisoned");
        if guard.contains_key(&worker_id) {
            return Err(WorkerError::Exists(worker_id));
        }

        let handle = Arc::new(WorkerHandle {
            started_at: self.clock.now(),
            is_processing: AtomicBool::new(false),
            processed_jobs: AtomicU64::new(0),
            last_job_at: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        });
        guard.insert(worker_id.clone(), handle.clone());
        drop(guard);

        let pool = Arc::clone(self);
        let id_for_task = worker_id.clone();
        tokio::spawn(async move { pool.run_loop(id_for_task, handle).await });

        info!(worker_id = %worker_id, "worker started");
        Ok(())
    }

    /// `StopWorker(id)`: signals cancellation and deregisters immediately.
    /// The running task notices the flag on its next tick boundary and
    /// exits without being forcibly aborted, so any in-flight item finishes
    /// its current I/O first.
    pub fn stop_worker(&self, worker_id: &str) -> WorkerResult<()> {
        let mut guard = self.workers.write().expect("worker registry poisoned");
        let handle = guard.remove(worker_id).ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;
        handle.cancelled.store(true, Ordering::SeqCst);
        info!(worker_id, "worker stop requested");
        Ok(())
    }

    /// Read-only listing for admin/observability callers.
    pub fn list_workers(&self) -> Vec<WorkerStatus> {
        let guard = self.workers.read().expect("worker registry poisoned");
        guard
            .iter()
            .map(|(id, handle)| WorkerStatus {
                worker_id: id.clone(),
                is_processing: handle.is_processing.load(Ordering::SeqCst),
                processed_jobs: handle.processed_jobs.load(Ordering::SeqCst),
                started_at: handle.started_at,
                last_job_at: *handle.last_job_at.lock().expect("handle mutex poisoned"),
            })
            .collect()
    }

    async fn run_loop(self: Arc<Self>, worker_id: String, handle: Arc<WorkerHandle>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_seconds));
        loop {
            ticker.tick().await;
            if handle.cancelled.load(Ordering::SeqCst) {
                break;
            }

            handle.is_processing.store(true, Ordering::SeqCst);
            let processed = self.process_batch(&worker_id).await;
            handle.is_processing.store(false, Ordering::SeqCst);

            if processed > 0 {
                handle.processed_jobs.fetch_add(processed, Ordering::SeqCst);
                *handle.last_job_at.lock().expect("handle mutex poisoned") = Some(self.clock.now());
            }

            if handle.cancelled.load(Ordering::SeqCst) {
                break;
            }
        }
        debug!(worker_id, "worker loop exited");
    }

    /// Pops a batch of candidate ids: from the Priority Index first when
    /// present, falling back to `NextReady` when the index is empty,
    /// unavailable, or absent (spec §4.4).
    async fn process_batch(&self, worker_id: &str) -> u64 {
        let candidate_ids = self.candidate_ids().await;
        let mut processed = 0u64;
        for id in candidate_ids {
            process_item(&self.deps, id, worker_id).await;
            processed += 1;
        }
        processed
    }

    async fn candidate_ids(&self) -> Vec<i64> {
        if let Some(index) = &self.index {
            match index.pop(self.config.batch_size as i64).await {
                Ok(tasks) if !tasks.is_empty() => {
                    return tasks.into_iter().map(|t| t.queue_item_id).collect();
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(error = %err, "priority index pop failed, falling back to NextReady");
                }
            }
        }

        match self.deps.queue.next_ready(self.config.batch_size as i64).await {
            Ok(items) => items.into_iter().map(|i| i.id).collect(),
            Err(err) => {
                debug!(error = %err, "NextReady failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::RecipientType;
    use crate::domain_source::{DomainDataSource, FineRecord, LoanRecord, ReservationRecord};
    use crate::ledger::InMemoryDeliveryLedger;
    use crate::orchestrator::InMemoryNotificationStore;
    use crate::queue::InMemoryQueueStore;
    use crate::worker::transport::MockTransport;

    struct AlwaysEmailDirectory;

    #[async_trait::async_trait]
    impl DomainDataSource for AlwaysEmailDirectory {
        async fn recipient_email(&self, _id: i64, _t: RecipientType) -> anyhow::Result<Option<String>> {
            Ok(Some("student@example.com".into()))
        }
        async fn due_soon_loans(&self) -> anyhow::Result<Vec<LoanRecord>> {
            Ok(vec![])
        }
        async fn overdue_loans(&self) -> anyhow::Result<Vec<LoanRecord>> {
            Ok(vec![])
        }
        async fn reservations_for_book(&self, _book_id: i64) -> anyhow::Result<Vec<ReservationRecord>> {
            Ok(vec![])
        }
        async fn unpaid_fines(&self) -> anyhow::Result<Vec<FineRecord>> {
            Ok(vec![])
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            tick_seconds: 1,
            batch_size: 10,
            stuck_threshold_seconds: 300,
            transport_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn starting_same_worker_twice_conflicts() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone(), 60, 3600));
        let deps = WorkerDeps {
            queue,
            ledger: Arc::new(InMemoryDeliveryLedger::new(clock.clone())),
            notifications: Arc::new(InMemoryNotificationStore::new(clock.clone())),
            transport: Arc::new(MockTransport::new()),
            directory: Arc::new(AlwaysEmailDirectory),
            transport_timeout: Duration::from_secs(5),
        };
        let pool = WorkerPool::new(deps, None, config(), clock);
        pool.start_worker("w1").unwrap();
        assert!(matches!(pool.start_worker("w1"), Err(WorkerError::Exists(_))));
    }

    #[tokio::test]
    async fn stopping_unknown_worker_not_found() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone(), 60, 3600));
        let deps = WorkerDeps {
            queue,
            ledger: Arc::new(InMemoryDeliveryLedger::new(clock.clone())),
            notifications: Arc::new(InMemoryNotificationStore::new(clock.clone())),
            transport: Arc::new(MockTransport::new()),
            directory: Arc::new(AlwaysEmailDirectory),
            transport_timeout: Duration::from_secs(5),
        };
        let pool = WorkerPool::new(deps, None, config(), clock);
        assert!(matches!(pool.stop_worker("ghost"), Err(WorkerError::NotFound(_))));
    }
}
