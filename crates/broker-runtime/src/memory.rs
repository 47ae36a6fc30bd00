//! In-memory transport hub and persistence store.
//!
//! The reference implementations of the two host ports, used by tests and by
//! single-process embeddings: a broadcast hub standing in for the host
//! messaging layer, and a keyed JSON map standing in for host storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use shared_types::{
    PersistenceAdapter, PersistenceError, TransportAdapter, TransportError, TransportFrame,
};

/// Frames buffered per receiver before the oldest are dropped.
const DEFAULT_HUB_CAPACITY: usize = 256;

// =============================================================================
// TRANSPORT HUB
// =============================================================================

/// A process-local frame hub connecting every broker endpoint attached to it.
///
/// Frames sent by one endpoint fan out to all endpoints, the sender included;
/// brokers filter out their own origin on receive. Receivers that fall more
/// than the hub capacity behind lose the oldest frames, which matches the
/// best-effort link the transport port promises.
pub struct MemoryHub {
    frames: broadcast::Sender<TransportFrame>,
}

impl MemoryHub {
    /// A hub buffering up to `capacity` frames per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity.max(1));
        Self { frames }
    }

    /// A new transport endpoint bound to this hub.
    #[must_use]
    pub fn endpoint(&self) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            frames: self.frames.clone(),
        })
    }

    /// Live receivers currently attached.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.frames.receiver_count()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

/// One endpoint on a [`MemoryHub`].
pub struct MemoryTransport {
    frames: broadcast::Sender<TransportFrame>,
}

#[async_trait]
impl TransportAdapter for MemoryTransport {
    async fn send(&self, frame: TransportFrame) -> Result<(), TransportError> {
        // A hub without listeners is a lone context, not a failure.
        let _ = self.frames.send(frame);
        Ok(())
    }

    fn frames(&self) -> broadcast::Receiver<TransportFrame> {
        self.frames.subscribe()
    }
}

// =============================================================================
// PERSISTENCE STORE
// =============================================================================

/// Keyed JSON storage backed by a process-local map.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
