//! Dead-letter store.
//!
//! Messages that exhaust their retry budget land here exactly once, keyed by
//! the dead-letter channel name the queue was configured with. The store is
//! bounded; when a channel's list is full the oldest entry is dropped.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::QueuedMessage;

/// Default per-channel capacity.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1_000;

/// A message that exhausted its retries, together with where and when it
/// was parked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// Dead-letter channel the entry is filed under.
    pub channel: String,
    /// The queue entry as it looked on its final failure.
    pub entry: QueuedMessage,
    /// Millisecond timestamp at which the entry was parked.
    pub dead_lettered_at: u64,
}

/// Bounded store of dead letters, keyed by channel name.
pub struct DeadLetterStore {
    capacity: usize,
    entries: Mutex<HashMap<String, VecDeque<DeadLetter>>>,
}

impl DeadLetterStore {
    /// Creates a store holding at most `capacity` entries per channel.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Files `entry` under `channel`, dropping the channel's oldest entry if
    /// the store is full.
    pub fn push(&self, channel: &str, entry: QueuedMessage, now: u64) {
        let mut entries = self.entries.lock();
        let list = entries.entry(channel.to_string()).or_default();
        if list.len() >= self.capacity {
            if let Some(evicted) = list.pop_front() {
                tracing::warn!(
                    channel = %channel,
                    message_id = %evicted.entry.message.id,
                    "dead-letter store full, dropping oldest entry"
                );
            }
        }
        list.push_back(DeadLetter {
            channel: channel.to_string(),
            entry,
            dead_lettered_at: now,
        });
    }

    /// All dead letters filed under `channel`, oldest first.
    #[must_use]
    pub fn for_channel(&self, channel: &str) -> Vec<DeadLetter> {
        self.entries
            .lock()
            .get(channel)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes and returns the dead letter carrying the given message id.
    pub fn take(&self, message_id: Uuid) -> Option<DeadLetter> {
        let mut entries = self.entries.lock();
        for list in entries.values_mut() {
            if let Some(pos) = list
                .iter()
                .position(|dead| dead.entry.message.id == message_id)
            {
                return list.remove(pos);
            }
        }
        None
    }

    /// Drops every entry filed under `channel`. Returns the count removed.
    pub fn purge(&self, channel: &str) -> usize {
        self.entries
            .lock()
            .remove(channel)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Total entries across all channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(VecDeque::len).sum()
    }

    /// True when no dead letters are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeadLetterStore {
    fn default() -> Self {
        Self::new(DEFAULT_DEAD_LETTER_CAPACITY)
    }
}
