//! # Persistence Port
//!
//! A minimal key/value port for the broker's durable state: persistent
//! channel configurations and the delivery-queue backlog. The host supplies
//! the real store (extension storage, disk, whatever outlives a context);
//! the runtime bundles an in-memory adapter.
//!
//! Values are JSON documents. The broker never assumes read-your-writes
//! across contexts; each context persists only state it owns.

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a persistence adapter.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    /// The backing store rejected the operation.
    #[error("Storage operation failed: {0}")]
    Backend(String),
    /// A stored document could not be decoded.
    #[error("Corrupt stored value under key '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Durable key/value port.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Reads the document stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PersistenceError>;

    /// Writes `value` under `key`, replacing any previous document.
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError>;

    /// Removes the document under `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Well-known keys the broker persists under.
pub mod keys {
    /// Persistent channel configurations: `Vec<(String, ChannelOptions)>`.
    pub const CHANNELS: &str = "switchboard.channels";
    /// Durable delivery-queue backlog: `Vec<QueuedMessage>`.
    pub const QUEUE_BACKLOG: &str = "switchboard.queue.backlog";
}
