//! The message bus.
//!
//! One `MessageBus` instance lives in each execution context. Local publishes
//! fan out to matching subscriptions and, unless the channel is exclusive,
//! produce a plain transport frame for other contexts. Messages arriving from
//! the transport enter through [`MessageBus::deliver_remote`], which never
//! echoes back to the wire.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sb_02_delivery_queue::{DeliveryQueue, RedeliveryHandler};
use shared_types::{
    now_millis, Message, MessageMetadata, SenderInfo, TransportAdapter, TransportFrame,
};
use switchboard_telemetry::metrics::{
    HistogramTimer, DELIVERY_FAILURES, MESSAGES_PUBLISHED, MESSAGES_RECEIVED, PUBLISH_DURATION,
    REQUEST_TIMEOUTS,
};

use crate::channel::{ChannelEntry, ChannelInfo, ChannelOptions};
use crate::filter::SubscriptionFilter;
use crate::handler::{handler_fn, MessageHandler, Subscription, SubscriptionHandle};
use crate::BusError;

/// Rolling window of processing-time samples behind `avg_processing_ms`.
const PROCESSING_SAMPLE_WINDOW: usize = 100;

// =============================================================================
// STATISTICS
// =============================================================================

#[derive(Debug, Default)]
struct BusCounters {
    /// Publishes accepted from this context.
    sent: AtomicU64,
    /// Handler deliveries attempted (local and remote messages alike).
    received: AtomicU64,
    /// Handler deliveries that returned an error.
    failed: AtomicU64,
    /// Messages handed to the delivery queue for retry.
    queued: AtomicU64,
}

/// Point-in-time view of bus activity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStatsSnapshot {
    /// Publishes accepted from this context.
    pub sent: u64,
    /// Handler deliveries attempted.
    pub received: u64,
    /// Handler deliveries that returned an error.
    pub failed: u64,
    /// Messages handed to the delivery queue for retry.
    pub queued: u64,
    /// Mean processing time over the last 100 dispatches, in milliseconds.
    pub avg_processing_ms: f64,
    /// Per-channel snapshots.
    pub channels: Vec<ChannelInfo>,
}

// =============================================================================
// DISPATCH INTERNALS
// =============================================================================

/// Where a dispatched message came from. Governs transport echo and retry
/// handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchSource {
    /// Published in this context: hand to the transport unless exclusive,
    /// queue for retry on failure.
    Local,
    /// Ingested from the transport: never echoed back, still retryable.
    Remote,
    /// Replayed by the delivery queue: the queue owns the retry budget.
    Redelivery,
}

struct DispatchOutcome {
    id: Uuid,
    handlers: usize,
    failures: usize,
}

// =============================================================================
// MESSAGE BUS
// =============================================================================

/// Channel registry and pub/sub dispatcher for one execution context.
pub struct MessageBus {
    local_sender: SenderInfo,
    channels: RwLock<HashMap<String, ChannelEntry>>,
    counters: BusCounters,
    processing_samples: Mutex<VecDeque<f64>>,
    queue: Option<Arc<DeliveryQueue>>,
    transport: Option<Arc<dyn TransportAdapter>>,
}

impl MessageBus {
    /// Creates a bus identifying itself as `local_sender`.
    #[must_use]
    pub fn new(local_sender: SenderInfo) -> Self {
        Self {
            local_sender,
            channels: RwLock::new(HashMap::new()),
            counters: BusCounters::default(),
            processing_samples: Mutex::new(VecDeque::new()),
            queue: None,
            transport: None,
        }
    }

    /// Attaches the transport adapter outbound messages are handed to.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn TransportAdapter>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attaches the delivery queue failed deliveries are parked in.
    #[must_use]
    pub fn with_queue(mut self, queue: Arc<DeliveryQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// The identity this bus publishes under.
    #[must_use]
    pub fn local_sender(&self) -> &SenderInfo {
        &self.local_sender
    }

    // =========================================================================
    // CHANNEL REGISTRY
    // =========================================================================

    /// Registers a channel.
    pub fn create_channel(&self, name: &str, options: ChannelOptions) -> Result<(), BusError> {
        let mut channels = self.channels.write();
        if channels.contains_key(name) {
            return Err(BusError::ChannelExists(name.to_string()));
        }
        channels.insert(name.to_string(), ChannelEntry::new(options, now_millis()));
        debug!(channel = %name, "channel created");
        Ok(())
    }

    /// Removes a channel and invalidates every subscription bound to it.
    /// Returns false if the channel did not exist.
    pub fn delete_channel(&self, name: &str) -> bool {
        let removed = self.channels.write().remove(name);
        match removed {
            Some(entry) => {
                debug!(
                    channel = %name,
                    dropped_subscriptions = entry.subscriptions.len(),
                    "channel deleted"
                );
                true
            }
            None => false,
        }
    }

    /// Whether a channel is registered.
    #[must_use]
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    /// Names of all registered channels.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    /// Live subscriptions on a channel (zero if unknown).
    #[must_use]
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.channels
            .read()
            .get(name)
            .map_or(0, |entry| entry.subscriptions.len())
    }

    /// Channels marked persistent, with their options, for the runtime to
    /// snapshot through the persistence port.
    #[must_use]
    pub fn persistent_channels(&self) -> Vec<(String, ChannelOptions)> {
        self.channels
            .read()
            .iter()
            .filter(|(_, entry)| entry.options.persistent)
            .map(|(name, entry)| (name.clone(), entry.options.clone()))
            .collect()
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Subscribes a handler to a channel.
    pub fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
        filter: SubscriptionFilter,
    ) -> Result<SubscriptionHandle, BusError> {
        let mut channels = self.channels.write();
        let entry = channels
            .get_mut(channel)
            .ok_or_else(|| BusError::ChannelNotFound(channel.to_string()))?;

        let id = Uuid::new_v4();
        entry.subscriptions.push(Subscription {
            id,
            handler,
            filter,
        });
        debug!(channel = %channel, subscription_id = %id, "subscription added");
        Ok(SubscriptionHandle {
            id,
            channel: channel.to_string(),
        })
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut channels = self.channels.write();
        let Some(entry) = channels.get_mut(&handle.channel) else {
            return false;
        };
        let before = entry.subscriptions.len();
        entry.subscriptions.retain(|sub| sub.id != handle.id);
        before != entry.subscriptions.len()
    }

    // =========================================================================
    // PUBLISH
    // =========================================================================

    /// Publishes with default metadata under this bus's identity.
    pub async fn publish(
        &self,
        channel: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, BusError> {
        let metadata = MessageMetadata::for_sender(self.local_sender.clone());
        self.publish_with(channel, kind, payload, metadata).await
    }

    /// Publishes with explicit metadata.
    pub async fn publish_with(
        &self,
        channel: &str,
        kind: &str,
        payload: serde_json::Value,
        metadata: MessageMetadata,
    ) -> Result<Uuid, BusError> {
        let mut message = Message::new(channel, kind, payload, metadata.sender.clone());
        message.metadata = metadata;
        self.publish_message(message).await
    }

    /// Publishes a fully constructed message.
    pub async fn publish_message(&self, message: Message) -> Result<Uuid, BusError> {
        let outcome = self.dispatch(message, DispatchSource::Local).await?;
        Ok(outcome.id)
    }

    /// Publishes the same payload to every known channel.
    ///
    /// Broadcast is best-effort: per-channel failures are logged and
    /// swallowed. Returns the number of channels that accepted the message.
    pub async fn broadcast(&self, kind: &str, payload: serde_json::Value) -> usize {
        let mut names = self.channel_names();
        names.sort();

        let mut delivered = 0;
        for name in names {
            match self.publish(&name, kind, payload.clone()).await {
                Ok(_) => delivered += 1,
                Err(error) => {
                    warn!(channel = %name, %error, "broadcast delivery failed");
                }
            }
        }
        delivered
    }

    /// Ingests a message that arrived from another context.
    ///
    /// Unknown channels are created implicitly with default options; the
    /// message is never echoed back to the transport.
    pub async fn deliver_remote(&self, message: Message) -> Result<Uuid, BusError> {
        {
            let mut channels = self.channels.write();
            if !channels.contains_key(&message.channel) {
                info!(channel = %message.channel, "creating channel implicitly for remote message");
                channels.insert(
                    message.channel.clone(),
                    ChannelEntry::new(ChannelOptions::default(), now_millis()),
                );
            }
        }
        MESSAGES_RECEIVED.inc();
        let outcome = self.dispatch(message, DispatchSource::Remote).await?;
        Ok(outcome.id)
    }

    // =========================================================================
    // REQUEST / REPLY
    // =========================================================================

    /// Publishes a request and awaits the correlated reply.
    ///
    /// A throwaway exclusive reply channel is created for the exchange and
    /// deleted again on success and on timeout alike.
    pub async fn request(
        &self,
        channel: &str,
        kind: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let correlation_id = Uuid::new_v4();
        let reply_channel = format!("reply.{correlation_id}");
        self.create_channel(&reply_channel, ChannelOptions::reply_channel())?;

        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel::<Message>();
        let slot = Arc::new(Mutex::new(Some(reply_tx)));
        let forwarder = handler_fn(move |message: Message| {
            let slot = Arc::clone(&slot);
            async move {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(message);
                }
                Ok(())
            }
        });

        let subscribed = self.subscribe(
            &reply_channel,
            forwarder,
            SubscriptionFilter::all().with_correlation(correlation_id),
        );

        let published = match subscribed {
            Ok(_) => {
                let mut metadata = MessageMetadata::for_sender(self.local_sender.clone());
                metadata.correlation_id = Some(correlation_id);
                metadata.reply_to = Some(reply_channel.clone());
                self.publish_with(channel, kind, payload, metadata).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            self.delete_channel(&reply_channel);
            return Err(e);
        }

        let reply = tokio::time::timeout(timeout, reply_rx).await;
        self.delete_channel(&reply_channel);

        match reply {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) | Err(_) => {
                REQUEST_TIMEOUTS.inc();
                debug!(
                    channel = %channel,
                    correlation_id = %correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(BusError::RequestTimeout {
                    channel: channel.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Publishes a reply to a request message.
    ///
    /// The reply channel is created implicitly when this context has not
    /// seen it, so replies to requests from other contexts reach the wire.
    pub async fn respond(
        &self,
        original: &Message,
        payload: serde_json::Value,
    ) -> Result<Uuid, BusError> {
        let reply_to = original
            .metadata
            .reply_to
            .clone()
            .ok_or(BusError::NoReplyChannel(original.id))?;

        if !self.has_channel(&reply_to) {
            let _ = self.create_channel(&reply_to, ChannelOptions::default());
        }

        let mut metadata = MessageMetadata::for_sender(self.local_sender.clone());
        metadata.correlation_id = original.metadata.correlation_id;
        self.publish_with(&reply_to, "response", payload, metadata)
            .await
    }

    // =========================================================================
    // HISTORY & STATS
    // =========================================================================

    /// Recent history, oldest first.
    ///
    /// With a channel name, that channel's history (empty if unknown); with
    /// `None`, history across all channels ordered by timestamp. Expired
    /// entries are purged before reading.
    #[must_use]
    pub fn history(&self, channel: Option<&str>, limit: usize) -> Vec<Message> {
        let now = now_millis();
        let mut channels = self.channels.write();

        let mut messages: Vec<Message> = match channel {
            Some(name) => match channels.get_mut(name) {
                Some(entry) => {
                    entry.purge_expired(now);
                    entry.history.iter().cloned().collect()
                }
                None => Vec::new(),
            },
            None => {
                let mut all: Vec<Message> = Vec::new();
                for entry in channels.values_mut() {
                    entry.purge_expired(now);
                    all.extend(entry.history.iter().cloned());
                }
                all.sort_by_key(|m| m.timestamp);
                all
            }
        };

        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        messages
    }

    /// Clears history for one channel or for all. Returns entries dropped.
    pub fn clear_history(&self, channel: Option<&str>) -> usize {
        let mut channels = self.channels.write();
        match channel {
            Some(name) => channels.get_mut(name).map_or(0, |entry| {
                let dropped = entry.history.len();
                entry.history.clear();
                dropped
            }),
            None => {
                let mut dropped = 0;
                for entry in channels.values_mut() {
                    dropped += entry.history.len();
                    entry.history.clear();
                }
                dropped
            }
        }
    }

    /// Point-in-time activity snapshot.
    #[must_use]
    pub fn stats(&self) -> BusStatsSnapshot {
        let channels = self.channels.read();
        BusStatsSnapshot {
            sent: self.counters.sent.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queued: self.counters.queued.load(Ordering::Relaxed),
            avg_processing_ms: self.avg_processing_ms(),
            channels: channels
                .iter()
                .map(|(name, entry)| entry.info(name))
                .collect(),
        }
    }

    fn push_sample(&self, elapsed_ms: f64) {
        let mut samples = self.processing_samples.lock();
        if samples.len() >= PROCESSING_SAMPLE_WINDOW {
            samples.pop_front();
        }
        samples.push_back(elapsed_ms);
    }

    fn avg_processing_ms(&self) -> f64 {
        let samples = self.processing_samples.lock();
        if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        }
    }

    // =========================================================================
    // DELIVERY
    // =========================================================================

    /// Validates, records, and delivers one message.
    async fn dispatch(
        &self,
        mut message: Message,
        source: DispatchSource,
    ) -> Result<DispatchOutcome, BusError> {
        let start = Instant::now();
        let _timer = match source {
            DispatchSource::Local => Some(HistogramTimer::new(&PUBLISH_DURATION)),
            _ => None,
        };
        let now = now_millis();

        // Phase 1: validate and record under the lock, snapshot matching
        // handlers, then release before any handler runs.
        let (matching, exclusive) = {
            let mut channels = self.channels.write();
            let entry = channels
                .get_mut(&message.channel)
                .ok_or_else(|| BusError::ChannelNotFound(message.channel.clone()))?;

            if let Some(allowed) = &entry.options.allowed_senders {
                if !allowed.contains(&message.metadata.sender.kind) {
                    return Err(BusError::SenderNotAllowed {
                        channel: message.channel.clone(),
                        kind: message.metadata.sender.kind,
                    });
                }
            }

            if entry.options.encrypted {
                message.metadata.encrypted = true;
            }

            entry.record(message.clone(), now);

            let matching: Vec<(Uuid, Arc<dyn MessageHandler>)> = entry
                .subscriptions
                .iter()
                .filter(|sub| sub.filter.matches(&message))
                .map(|sub| (sub.id, Arc::clone(&sub.handler)))
                .collect();
            (matching, entry.options.exclusive)
        };

        if source == DispatchSource::Local {
            self.counters.sent.fetch_add(1, Ordering::Relaxed);
            MESSAGES_PUBLISHED.inc();
        }

        // Phase 2: scatter/gather. All matching handlers run concurrently;
        // outcomes are aggregated afterwards and never affect one another.
        self.counters
            .received
            .fetch_add(matching.len() as u64, Ordering::Relaxed);
        let results = join_all(matching.iter().map(|(id, handler)| {
            let msg = message.clone();
            async move { (*id, handler.handle(msg).await) }
        }))
        .await;

        let mut failures = 0usize;
        let mut first_error: Option<String> = None;
        for (subscription_id, result) in results {
            if let Err(error) = result {
                failures += 1;
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                DELIVERY_FAILURES.inc();
                warn!(
                    channel = %message.channel,
                    message_id = %message.id,
                    subscription_id = %subscription_id,
                    %error,
                    "handler failed"
                );
                first_error.get_or_insert(error);
            }
        }

        // Phase 3: retry handoff. Redeliveries are excluded; the queue owns
        // their budget once an entry exists.
        if failures > 0 && source != DispatchSource::Redelivery {
            if message.metadata.retry_count > 0 {
                if let Some(queue) = &self.queue {
                    let mut copy = message.clone();
                    copy.metadata.retry_count -= 1;
                    queue.enqueue(copy, first_error, now);
                    self.counters.queued.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        message_id = %message.id,
                        remaining_retries = message.metadata.retry_count - 1,
                        "queued failed delivery for retry"
                    );
                }
            }
        }

        // Phase 4: transport handoff for local, non-exclusive publishes.
        if source == DispatchSource::Local && !exclusive {
            if let Some(transport) = &self.transport {
                let frame = TransportFrame::plain(self.local_sender.id.clone(), message.clone());
                if let Err(error) = transport.send(frame).await {
                    warn!(channel = %message.channel, %error, "transport handoff failed");
                }
            }
        }

        self.push_sample(start.elapsed().as_secs_f64() * 1_000.0);
        Ok(DispatchOutcome {
            id: message.id,
            handlers: matching.len(),
            failures,
        })
    }
}

/// The delivery queue replays messages through the same dispatch path, with
/// the transport echo and a second queue handoff suppressed.
#[async_trait]
impl RedeliveryHandler for MessageBus {
    async fn redeliver(&self, message: &Message) -> Result<(), String> {
        match self
            .dispatch(message.clone(), DispatchSource::Redelivery)
            .await
        {
            Ok(outcome) if outcome.failures == 0 => Ok(()),
            Ok(outcome) => Err(format!(
                "{} of {} handlers failed",
                outcome.failures, outcome.handlers
            )),
            Err(error) => Err(error.to_string()),
        }
    }
}
