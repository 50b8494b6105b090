//! In-memory `NotificationStore` double for orchestrator/worker tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::SharedClock;
use crate::domain::NewNotification;
use crate::domain::Notification;
use crate::orchestrator::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::store::{NotificationFilter, NotificationStats, NotificationStore};

pub struct InMemoryNotificationStore {
    clock: SharedClock,
    rows: Mutex<Vec<Notification>>,
    next_id: Mutex<i64>,
}

impl InMemoryNotificationStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            rows: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn create(&self, req: NewNotification) -> OrchestratorResult<Notification> {
        if req.recipient_id <= 0 {
            return Err(OrchestratorError::InvalidRequest(
                "recipient_id must be > 0".into(),
            ));
        }
        let mut id_guard = self.next_id.lock().expect("id mutex poisoned");
        let id = *id_guard;
        *id_guard += 1;
        let now = self.clock.now();
        let notification = Notification {
            id,
            recipient_id: req.recipient_id,
            recipient_type: req.recipient_type,
            notification_type: req.notification_type,
            title: req.title.into_string(),
            message: req.message.into_string(),
            is_read: false,
            sent_at: None,
            created_at: now,
        };
        self.rows.lock().expect("store mutex poisoned").push(notification.clone());
        Ok(notification)
    }

    async fn get(&self, id: i64) -> OrchestratorResult<Notification> {
        self.rows
            .lock()
            .expect("store mutex poisoned")
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or(OrchestratorError::NotFound(id))
    }

    async fn mark_read(&self, id: i64) -> OrchestratorResult<Notification> {
        let mut guard = self.rows.lock().expect("store mutex poisoned");
        let notification = guard.iter_mut().find(|n| n.id == id).ok_or(OrchestratorError::NotFound(id))?;
        notification.is_read = true;
        Ok(notification.clone())
    }

    async fn mark_sent(&self, id: i64) -> OrchestratorResult<Notification> {
        let now = self.clock.now();
        let mut guard = self.rows.lock().expect("store mutex poisoned");
        let notification = guard.iter_mut().find(|n| n.id == id).ok_or(OrchestratorError::NotFound(id))?;
        if notification.sent_at.is_none() {
            notification.sent_at = Some(now);
        }
        Ok(notification.clone())
    }

    async fn list(&self, filter: NotificationFilter) -> OrchestratorResult<Vec<Notification>> {
        let guard = self.rows.lock().expect("store mutex poisoned");
        let mut matches: Vec<Notification> = guard
            .iter()
            .filter(|n| filter.recipient_id.map_or(true, |r| r == n.recipient_id))
            .filter(|n| filter.recipient_type.map_or(true, |r| r == n.recipient_type))
            .filter(|n| filter.notification_type.map_or(true, |t| t == n.notification_type))
            .filter(|n| filter.is_read.map_or(true, |r| r == n.is_read))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = if filter.limit > 0 { filter.limit as usize } else { 50 };
        Ok(matches.into_iter().skip(filter.offset.max(0) as usize).take(limit).collect())
    }

    async fn delete(&self, id: i64) -> OrchestratorResult<()> {
        let mut guard = self.rows.lock().expect("store mutex poisoned");
        let before = guard.len();
        guard.retain(|n| n.id != id);
        if guard.len() == before {
            return Err(OrchestratorError::NotFound(id));
        }
        Ok(())
    }

    async fn stats(&self) -> OrchestratorResult<NotificationStats> {
        let guard = self.rows.lock().expect("store mutex poisoned");
        let mut stats = NotificationStats {
            total: guard.len() as i64,
            unread: guard.iter().filter(|n| !n.is_read).count() as i64,
            by_type: Default::default(),
        };
        for notification in guard.iter() {
            *stats.by_type.entry(notification.notification_type.to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> OrchestratorResult<u64> {
        let mut guard = self.rows.lock().expect("store mutex poisoned");
        let before = guard.len();
        guard.retain(|n| n.created_at >= older_than);
        Ok((before - guard.len()) as u64)
    }
}
