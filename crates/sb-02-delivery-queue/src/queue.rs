//! The delivery queue proper.
//!
//! Flow:
//! 1. The bus fails to deliver a message and calls `enqueue()`
//! 2. A periodic tick calls `process_due()` with the current time
//! 3. Due entries are redelivered through the [`RedeliveryHandler`]
//! 4. Success removes the entry; failure reschedules it with backoff
//! 5. Entries that exhaust `max_retries` move to the dead-letter store

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_types::{keys, now_millis, Message, PersistenceAdapter};
use switchboard_telemetry::metrics::{DEAD_LETTERS, QUEUE_DEPTH, QUEUE_RETRIES};

use crate::backoff::BackoffStrategy;
use crate::dead_letter::{DeadLetter, DeadLetterStore};
use crate::QueueError;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Delivery queue tuning.
#[derive(Debug, Clone)]
pub struct DeliveryQueueConfig {
    /// Redelivery attempts before an entry is dead-lettered.
    pub max_retries: u32,
    /// Base delay fed into the backoff curve.
    pub base_delay_ms: u64,
    /// Shape of the retry delay curve.
    pub strategy: BackoffStrategy,
    /// How often the retry scan runs.
    pub tick_interval: Duration,
    /// Active entries held at once; the oldest spills to dead letters beyond
    /// this.
    pub capacity: usize,
    /// Channel name dead letters are filed under.
    pub dead_letter_channel: String,
    /// Dead letters held per channel.
    pub dead_letter_capacity: usize,
    /// Snapshot the backlog through the persistence port on shutdown.
    pub durable: bool,
}

impl Default for DeliveryQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            strategy: BackoffStrategy::default(),
            tick_interval: Duration::from_secs(1),
            capacity: 1_000,
            dead_letter_channel: "dead-letter".to_string(),
            dead_letter_capacity: 1_000,
            durable: false,
        }
    }
}

impl DeliveryQueueConfig {
    /// Small limits and short delays for exercising retry paths in tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 10,
            strategy: BackoffStrategy::Linear,
            tick_interval: Duration::from_millis(20),
            capacity: 4,
            dead_letter_channel: "dead-letter".to_string(),
            dead_letter_capacity: 16,
            durable: false,
        }
    }
}

// =============================================================================
// QUEUE ENTRY
// =============================================================================

/// A message parked for redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    /// The original message, unchanged.
    pub message: Message,
    /// Failed redelivery attempts made by the queue so far.
    pub attempts: u32,
    /// Millisecond timestamp at which the entry becomes due.
    pub next_retry: u64,
    /// Error text from the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Millisecond timestamp at which the entry entered the queue.
    pub enqueued_at: u64,
}

impl QueuedMessage {
    /// Creates a fresh entry, due immediately.
    #[must_use]
    pub fn new(message: Message, now: u64) -> Self {
        Self {
            message,
            attempts: 0,
            next_retry: now,
            error: None,
            enqueued_at: now,
        }
    }
}

// =============================================================================
// REDELIVERY PORT
// =============================================================================

/// Callback through which the queue hands messages back for delivery.
///
/// The bus supplies the implementation. The error string is kept on the
/// queue entry for diagnostics.
#[async_trait]
pub trait RedeliveryHandler: Send + Sync {
    /// Attempts to deliver `message` again.
    async fn redeliver(&self, message: &Message) -> Result<(), String>;
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Cumulative queue counters.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Entries accepted by `enqueue`.
    pub total_enqueued: AtomicU64,
    /// Redelivery attempts that succeeded.
    pub total_delivered: AtomicU64,
    /// Redelivery attempts made (successful or not).
    pub total_retries: AtomicU64,
    /// Entries moved to the dead-letter store.
    pub total_dead_lettered: AtomicU64,
    /// Dead letters put back into the active queue.
    pub total_redriven: AtomicU64,
}

/// What one retry scan accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Entries removed after successful redelivery.
    pub delivered: usize,
    /// Entries rescheduled with a later `next_retry`.
    pub retried: usize,
    /// Entries moved to the dead-letter store.
    pub dead_lettered: usize,
}

impl ProcessOutcome {
    /// Total entries the scan touched.
    #[must_use]
    pub fn total(&self) -> usize {
        self.delivered + self.retried + self.dead_lettered
    }
}

// =============================================================================
// DELIVERY QUEUE
// =============================================================================

/// Bounded retry queue with backoff and dead-lettering.
pub struct DeliveryQueue {
    config: DeliveryQueueConfig,
    entries: Mutex<VecDeque<QueuedMessage>>,
    dead: DeadLetterStore,
    /// In-flight flag: set while a scan runs so overlapping ticks skip.
    processing: AtomicBool,
    stats: QueueStats,
}

impl DeliveryQueue {
    /// Creates an empty queue with the given configuration.
    #[must_use]
    pub fn new(config: DeliveryQueueConfig) -> Self {
        let dead = DeadLetterStore::new(config.dead_letter_capacity);
        Self {
            config,
            entries: Mutex::new(VecDeque::new()),
            dead,
            processing: AtomicBool::new(false),
            stats: QueueStats::default(),
        }
    }

    /// The configuration the queue was built with.
    #[must_use]
    pub fn config(&self) -> &DeliveryQueueConfig {
        &self.config
    }

    /// Parks a message for redelivery one base delay from `now`.
    ///
    /// `error` is the reason the immediate delivery failed. Returns the
    /// message id for correlation with later dead-letter lookups.
    pub fn enqueue(&self, message: Message, error: Option<String>, now: u64) -> Uuid {
        let mut entry = QueuedMessage::new(message, now);
        entry.error = error;
        entry.next_retry = now.saturating_add(self.config.base_delay_ms);
        let id = entry.message.id;

        self.push_entry(entry, now);
        self.stats.total_enqueued.fetch_add(1, Ordering::Relaxed);
        debug!(message_id = %id, depth = self.len(), "queued message for redelivery");
        id
    }

    /// Inserts an entry, spilling the oldest to dead letters when full.
    fn push_entry(&self, entry: QueuedMessage, now: u64) {
        let spilled = {
            let mut entries = self.entries.lock();
            let spilled = if entries.len() >= self.config.capacity {
                entries.pop_front()
            } else {
                None
            };
            entries.push_back(entry);
            spilled
        };

        if let Some(oldest) = spilled {
            warn!(
                message_id = %oldest.message.id,
                capacity = self.config.capacity,
                "delivery queue full, spilling oldest entry to dead letters"
            );
            self.dead_letter(oldest, now);
        }
        QUEUE_DEPTH.set(self.len() as f64);
    }

    fn dead_letter(&self, entry: QueuedMessage, now: u64) {
        DEAD_LETTERS.inc();
        self.stats.total_dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.dead.push(&self.config.dead_letter_channel, entry, now);
    }

    /// Runs one retry scan at time `now`.
    ///
    /// Returns `None` when a previous scan is still in flight; the tick is
    /// skipped rather than queued behind it.
    pub async fn process_due(
        &self,
        handler: &dyn RedeliveryHandler,
        now: u64,
    ) -> Option<ProcessOutcome> {
        if self.processing.swap(true, Ordering::SeqCst) {
            debug!("previous retry scan still in flight, skipping tick");
            return None;
        }
        let outcome = self.run_scan(handler, now).await;
        self.processing.store(false, Ordering::SeqCst);
        Some(outcome)
    }

    async fn run_scan(&self, handler: &dyn RedeliveryHandler, now: u64) -> ProcessOutcome {
        // Pull due entries out under the lock, then redeliver without it.
        let due: Vec<QueuedMessage> = {
            let mut entries = self.entries.lock();
            let mut due = Vec::new();
            let mut keep = VecDeque::with_capacity(entries.len());
            while let Some(entry) = entries.pop_front() {
                if entry.next_retry <= now {
                    due.push(entry);
                } else {
                    keep.push_back(entry);
                }
            }
            *entries = keep;
            due
        };

        let mut outcome = ProcessOutcome::default();
        for mut entry in due {
            QUEUE_RETRIES.inc();
            self.stats.total_retries.fetch_add(1, Ordering::Relaxed);

            match handler.redeliver(&entry.message).await {
                Ok(()) => {
                    self.stats.total_delivered.fetch_add(1, Ordering::Relaxed);
                    outcome.delivered += 1;
                    debug!(
                        message_id = %entry.message.id,
                        attempts = entry.attempts,
                        "redelivery succeeded"
                    );
                }
                Err(reason) => {
                    entry.attempts += 1;
                    entry.error = Some(reason);

                    if entry.attempts >= self.config.max_retries {
                        warn!(
                            message_id = %entry.message.id,
                            attempts = entry.attempts,
                            channel = %self.config.dead_letter_channel,
                            "retry budget exhausted, dead-lettering"
                        );
                        self.dead_letter(entry, now);
                        outcome.dead_lettered += 1;
                    } else {
                        let delay = self
                            .config
                            .strategy
                            .delay_ms(self.config.base_delay_ms, entry.attempts);
                        entry.next_retry = now.saturating_add(delay);
                        debug!(
                            message_id = %entry.message.id,
                            attempts = entry.attempts,
                            delay_ms = delay,
                            "redelivery failed, rescheduling"
                        );
                        self.entries.lock().push_back(entry);
                        outcome.retried += 1;
                    }
                }
            }
        }

        QUEUE_DEPTH.set(self.len() as f64);
        outcome
    }

    /// Active entries currently parked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no entries are parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Cumulative counters.
    #[must_use]
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    // =========================================================================
    // DEAD LETTERS
    // =========================================================================

    /// Dead letters filed under the configured dead-letter channel.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.for_channel(&self.config.dead_letter_channel)
    }

    /// Puts a dead letter back into the active queue, due immediately, with
    /// its attempt count reset.
    pub fn redrive(&self, message_id: Uuid, now: u64) -> Result<(), QueueError> {
        let dead = self
            .dead
            .take(message_id)
            .ok_or(QueueError::UnknownEntry(message_id))?;

        let mut entry = dead.entry;
        entry.attempts = 0;
        entry.error = None;
        entry.next_retry = now;

        self.push_entry(entry, now);
        self.stats.total_redriven.fetch_add(1, Ordering::Relaxed);
        info!(message_id = %message_id, "redriving dead-lettered message");
        Ok(())
    }

    /// Drops every dead letter under the configured channel. Returns the
    /// count removed.
    pub fn purge_dead_letters(&self) -> usize {
        self.dead.purge(&self.config.dead_letter_channel)
    }

    // =========================================================================
    // DURABLE BACKLOG
    // =========================================================================

    /// Writes the active backlog through the persistence port.
    pub async fn snapshot_backlog(
        &self,
        store: &dyn PersistenceAdapter,
    ) -> Result<(), QueueError> {
        let backlog: Vec<QueuedMessage> = self.entries.lock().iter().cloned().collect();
        let count = backlog.len();
        let document = serde_json::to_value(&backlog)?;
        store.set(keys::QUEUE_BACKLOG, document).await?;
        debug!(entries = count, "persisted delivery queue backlog");
        Ok(())
    }

    /// Reloads a persisted backlog into the active queue. Returns how many
    /// entries were restored.
    pub async fn restore_backlog(
        &self,
        store: &dyn PersistenceAdapter,
    ) -> Result<usize, QueueError> {
        let Some(document) = store.get(keys::QUEUE_BACKLOG).await? else {
            return Ok(0);
        };
        let backlog: Vec<QueuedMessage> = serde_json::from_value(document)?;
        let restored = backlog.len();

        let now = now_millis();
        for entry in backlog {
            self.push_entry(entry, now);
        }
        if restored > 0 {
            info!(restored, "restored delivery queue backlog");
        }
        Ok(restored)
    }
}

// =============================================================================
// RETRY LOOP
// =============================================================================

/// Background task driving the retry scan.
///
/// Ticks at the configured interval with missed ticks skipped, and exits
/// when the shutdown signal flips to `true` or its sender is dropped.
pub async fn retry_loop(
    queue: Arc<DeliveryQueue>,
    handler: Arc<dyn RedeliveryHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(queue.config().tick_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Some(outcome) = queue.process_due(handler.as_ref(), now_millis()).await {
                    if outcome.total() > 0 {
                        debug!(
                            delivered = outcome.delivered,
                            retried = outcome.retried,
                            dead_lettered = outcome.dead_lettered,
                            "retry scan complete"
                        );
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("delivery queue retry loop stopped");
}
