//! Priority Index (C4): the ephemeral, sorted dispatch hint.

pub mod fake;
pub mod port;
pub mod redis_index;

pub use fake::{InMemoryPriorityIndex, UnavailablePriorityIndex};
pub use port::{IndexResult, PriorityIndex};
pub use redis_index::RedisPriorityIndex;
