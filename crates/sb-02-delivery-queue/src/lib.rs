//! # Subsystem 2: Delivery Queue
//!
//! Holding area for messages whose immediate delivery failed. Entries are
//! retried on a fixed tick with configurable backoff until they either
//! deliver or exhaust their retry budget and move to the dead-letter store.
//!
//! ## Components
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `backoff` | Linear and exponential retry delay curves |
//! | `queue` | The bounded retry queue, scan loop, and durable snapshots |
//! | `dead_letter` | Store for messages that exhausted their retries |
//!
//! ## Design Principles
//!
//! - **At-least-once**: an entry is retried exactly `max_retries` times
//!   before it is dead-lettered exactly once.
//! - **Skip, don't stack**: a scan still in flight when the timer fires
//!   again causes the new tick to be skipped, never queued behind it.
//! - **Bounded**: the active queue and the dead-letter store both have hard
//!   capacity limits; the oldest entry spills when they overflow.

pub mod backoff;
pub mod dead_letter;
pub mod queue;

pub use backoff::BackoffStrategy;
pub use dead_letter::{DeadLetter, DeadLetterStore};
pub use queue::{
    retry_loop, DeliveryQueue, DeliveryQueueConfig, ProcessOutcome, QueueStats, QueuedMessage,
    RedeliveryHandler,
};

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the delivery queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No queue or dead-letter entry exists for the given message id.
    #[error("No queue entry for message {0}")]
    UnknownEntry(Uuid),

    /// A durable snapshot could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(#[from] shared_types::PersistenceError),

    /// A durable snapshot could not be encoded or decoded.
    #[error("Snapshot serialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}
