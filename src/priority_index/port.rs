//! # Priority-Index Port
//!
//! Consumed by the Queue Store and Worker Pool (spec §4.4/§6): an
//! opportunistic sorted-set dispatch hint. Never the source of truth —
//! every pop is reconciled against the Queue Store.

use async_trait::async_trait;

use crate::domain::PriorityTask;

pub type IndexResult<T> = std::result::Result<T, redis::RedisError>;

#[async_trait]
pub trait PriorityIndex: Send + Sync {
    /// `ZAdd(key, score, member)`.
    async fn push(&self, task: PriorityTask) -> IndexResult<()>;
    /// `ZPopMin(key, n)`.
    async fn pop(&self, n: i64) -> IndexResult<Vec<PriorityTask>>;
    /// `ZCard(key)`.
    async fn len(&self) -> IndexResult<i64>;
    /// `Del(key)`.
    async fn clear(&self) -> IndexResult<()>;
}
