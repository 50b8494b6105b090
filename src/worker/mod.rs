//! Worker Pool (C5): dynamic worker registry and the per-item claim loop.

pub mod error;
pub mod pool;
pub mod transport;
pub mod worker;

pub use error::{WorkerError, WorkerResult};
pub use pool::{WorkerHandle, WorkerPool, WorkerStatus};
pub use transport::{ProviderStatusUpdate, Transport, TransportError};
#[cfg(test)]
pub use transport::MockTransport;
pub use worker::{process_item, ItemOutcome, WorkerDeps};
