//! # Broker
//!
//! The composition root. One [`Broker`] serves one execution context: it
//! wires the channel bus, delivery queue, pattern router, and wire pipeline
//! to the host's transport and persistence adapters, and owns the background
//! tasks that keep them running.
//!
//! ## Lifecycle
//!
//! | Phase      | What happens                                                |
//! |------------|-------------------------------------------------------------|
//! | `new`      | validates config and builds the subsystems; nothing runs    |
//! | `start`    | restores persisted state, spawns retry loop and inbound pump|
//! | `shutdown` | signals tasks, joins them, persists channels and backlog    |
//!
//! The local facade works before `start`; only cross-context receive and
//! scheduled redelivery need the background tasks. `shutdown` is idempotent
//! and a stopped broker can be started again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sb_01_channel_bus::{
    BusError, BusStatsSnapshot, ChannelOptions, MessageBus, MessageHandler, SubscriptionFilter,
    SubscriptionHandle,
};
use sb_02_delivery_queue::{retry_loop, DeadLetter, DeliveryQueue, RedeliveryHandler};
use sb_03_router::{
    CircuitSnapshot, CircuitState, PatternRouter, RouteConfig, RouteMetrics, RoutingResult,
};
use sb_04_security::{DerivedKeyring, MessageCipher};
use shared_types::{
    keys, now_millis, ContextKind, Message, MessageMetadata, PersistenceAdapter, SenderInfo,
    TransportAdapter,
};
use switchboard_telemetry::metrics::FRAMES_RECEIVED;

use crate::config::BrokerConfig;
use crate::pipeline::{PipelineConfig, WirePipeline};
use crate::BrokerError;

// =============================================================================
// STATISTICS
// =============================================================================

/// Point-in-time view of the whole runtime, serializable for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    /// Identity of this broker's context.
    pub context_id: String,
    /// Bus counters and per-channel state.
    pub bus: BusStatsSnapshot,
    /// Delivery queue counters.
    pub queue: QueueSnapshot,
    /// Per-route activity.
    pub routes: Vec<RouteMetrics>,
    /// Per-route circuit state.
    pub circuits: Vec<CircuitSnapshot>,
}

/// Delivery queue counters, flattened from its atomics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Entries currently awaiting redelivery.
    pub depth: usize,
    /// Entries accepted since startup.
    pub enqueued: u64,
    /// Redelivery attempts that succeeded.
    pub delivered: u64,
    /// Redelivery attempts made.
    pub retries: u64,
    /// Entries moved to the dead-letter store.
    pub dead_lettered: u64,
    /// Dead letters put back into the active queue.
    pub redriven: u64,
    /// Dead letters currently held.
    pub dead_letters_held: usize,
}

// =============================================================================
// BROKER
// =============================================================================

/// The assembled message broker for one execution context.
pub struct Broker {
    config: BrokerConfig,
    bus: Arc<MessageBus>,
    router: PatternRouter,
    queue: Arc<DeliveryQueue>,
    pipeline: Arc<WirePipeline>,
    store: Arc<dyn PersistenceAdapter>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Broker {
    /// Builds a broker over the given host adapters.
    ///
    /// Fails when the configuration cannot be run safely (see
    /// [`BrokerConfig::validate`]). Nothing is spawned until [`start`].
    ///
    /// [`start`]: Broker::start
    pub fn new(
        config: BrokerConfig,
        transport: Arc<dyn TransportAdapter>,
        store: Arc<dyn PersistenceAdapter>,
    ) -> Result<Self, BrokerError> {
        config.validate()?;

        let cipher = if config.encryption_enabled {
            Some(MessageCipher::new(
                Arc::new(DerivedKeyring::new(config.master_secret.clone())),
                config.cipher_algorithm,
            ))
        } else {
            None
        };

        let pipeline = Arc::new(WirePipeline::new(
            transport,
            cipher,
            PipelineConfig {
                compression: config.compression.clone(),
                rate_limit: config.rate_limit.clone(),
                max_message_age_ms: config.max_message_age_ms,
                chunk_max_age_ms: config.chunk_max_age_ms,
            },
        ));

        let queue = Arc::new(DeliveryQueue::new(config.queue.clone()));
        let local_sender = SenderInfo::new(config.context_id.clone(), config.context_kind);
        let bus = Arc::new(
            MessageBus::new(local_sender)
                .with_transport(Arc::clone(&pipeline) as Arc<dyn TransportAdapter>)
                .with_queue(Arc::clone(&queue)),
        );
        let router = PatternRouter::new(Arc::clone(&bus), config.router.clone())
            .with_transport(Arc::clone(&pipeline) as Arc<dyn TransportAdapter>);

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            bus,
            router,
            queue,
            pipeline,
            store,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Restores persisted state and spawns the background tasks: the delivery
    /// queue's retry loop and the inbound frame pump.
    pub async fn start(&self) -> Result<(), BrokerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadyStarted);
        }

        self.restore_channels().await?;
        if self.config.queue.durable {
            self.queue.restore_backlog(self.store.as_ref()).await?;
        }

        {
            let mut tasks = self.tasks.lock();
            tasks.push(tokio::spawn(retry_loop(
                Arc::clone(&self.queue),
                Arc::clone(&self.bus) as Arc<dyn RedeliveryHandler>,
                self.shutdown.subscribe(),
            )));
            tasks.push(tokio::spawn(inbound_pump(
                Arc::clone(&self.bus),
                Arc::clone(&self.pipeline),
                self.config.context_id.clone(),
                self.config.context_kind,
                self.shutdown.subscribe(),
            )));
        }

        info!(
            context = %self.config.context_id,
            kind = %self.config.context_kind,
            "broker started"
        );
        Ok(())
    }

    /// Stops the background tasks and persists state that must survive the
    /// context: persistent channel configurations, and the queue backlog when
    /// the queue is durable. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<(), BrokerError> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.shutdown.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(error) = task.await {
                warn!(error = %error, "broker task ended abnormally");
            }
        }
        // Re-arm the signal so the broker can be started again.
        let _ = self.shutdown.send(false);

        self.persist_channels().await?;
        if self.config.queue.durable {
            self.queue.snapshot_backlog(self.store.as_ref()).await?;
        }

        info!(context = %self.config.context_id, "broker stopped");
        Ok(())
    }

    /// Whether `start` has run without a matching `shutdown`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn restore_channels(&self) -> Result<(), BrokerError> {
        let Some(document) = self.store.get(keys::CHANNELS).await? else {
            return Ok(());
        };
        let channels: Vec<(String, ChannelOptions)> =
            serde_json::from_value(document).map_err(|error| {
                shared_types::PersistenceError::Corrupt {
                    key: keys::CHANNELS.to_string(),
                    reason: error.to_string(),
                }
            })?;

        let restored = channels.len();
        for (name, options) in channels {
            match self.bus.create_channel(&name, options) {
                Ok(()) | Err(BusError::ChannelExists(_)) => {}
                Err(error) => return Err(error.into()),
            }
        }
        if restored > 0 {
            info!(restored, "restored persistent channels");
        }
        Ok(())
    }

    async fn persist_channels(&self) -> Result<(), BrokerError> {
        let channels = self.bus.persistent_channels();
        let document = serde_json::to_value(&channels)?;
        self.store.set(keys::CHANNELS, document).await?;
        debug!(channels = channels.len(), "persisted channel configurations");
        Ok(())
    }

    // =========================================================================
    // CHANNEL FACADE
    // =========================================================================

    /// Creates a channel. Persistent channels are written through to the
    /// store immediately so a crash cannot lose the registration.
    pub async fn create_channel(
        &self,
        name: &str,
        options: ChannelOptions,
    ) -> Result<(), BrokerError> {
        let persistent = options.persistent;
        self.bus.create_channel(name, options)?;
        if persistent {
            if let Err(error) = self.persist_channels().await {
                warn!(channel = %name, error = %error, "failed to persist channel registration");
            }
        }
        Ok(())
    }

    /// Deletes a channel with its history and subscriptions.
    pub async fn delete_channel(&self, name: &str) -> bool {
        let removed = self.bus.delete_channel(name);
        if removed {
            if let Err(error) = self.persist_channels().await {
                warn!(channel = %name, error = %error, "failed to persist channel removal");
            }
        }
        removed
    }

    /// Subscribes a handler to a channel.
    pub fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
        filter: SubscriptionFilter,
    ) -> Result<SubscriptionHandle, BrokerError> {
        Ok(self.bus.subscribe(channel, handler, filter)?)
    }

    /// Removes one subscription.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.bus.unsubscribe(handle)
    }

    /// Publishes a message on a channel.
    pub async fn publish(
        &self,
        channel: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, BrokerError> {
        Ok(self.bus.publish(channel, kind, payload).await?)
    }

    /// Publishes with explicit metadata (priority, TTL, retry budget, ...).
    pub async fn publish_with(
        &self,
        channel: &str,
        kind: &str,
        payload: serde_json::Value,
        metadata: MessageMetadata,
    ) -> Result<Uuid, BrokerError> {
        Ok(self.bus.publish_with(channel, kind, payload, metadata).await?)
    }

    /// Publishes to every known channel; returns how many deliveries worked.
    pub async fn broadcast(&self, kind: &str, payload: serde_json::Value) -> usize {
        self.bus.broadcast(kind, payload).await
    }

    /// Publishes a request and waits for its correlated reply.
    pub async fn request(
        &self,
        channel: &str,
        kind: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<Message, BrokerError> {
        Ok(self.bus.request(channel, kind, payload, timeout).await?)
    }

    /// Publishes a reply to a received request.
    pub async fn respond(
        &self,
        original: &Message,
        payload: serde_json::Value,
    ) -> Result<Uuid, BrokerError> {
        Ok(self.bus.respond(original, payload).await?)
    }

    /// Recent history for one channel, or across all channels.
    pub fn history(&self, channel: Option<&str>, limit: usize) -> Vec<Message> {
        self.bus.history(channel, limit)
    }

    /// Clears history; returns how many entries were dropped.
    pub fn clear_history(&self, channel: Option<&str>) -> usize {
        self.bus.clear_history(channel)
    }

    // =========================================================================
    // ROUTER FACADE
    // =========================================================================

    /// Installs a route, replacing any existing route with the same pattern.
    pub fn add_route(&self, route: RouteConfig) {
        self.router.add_route(route);
    }

    /// Removes a route and its circuit state.
    pub fn remove_route(&self, pattern: &str) -> bool {
        self.router.remove_route(pattern)
    }

    /// Runs a message through every matching route.
    pub async fn route_message(&self, message: &Message) -> Vec<RoutingResult> {
        self.router.route_message(message).await
    }

    /// Circuit state for one route pattern.
    pub fn circuit_state(&self, pattern: &str) -> CircuitState {
        self.router.circuit_state(pattern)
    }

    // =========================================================================
    // QUEUE FACADE
    // =========================================================================

    /// Messages that exhausted their retry budget.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.queue.dead_letters()
    }

    /// Puts a dead letter back into the active queue for another attempt.
    pub fn redrive(&self, message_id: Uuid) -> Result<(), BrokerError> {
        Ok(self.queue.redrive(message_id, now_millis())?)
    }

    /// Drops all dead letters; returns how many were purged.
    pub fn purge_dead_letters(&self) -> usize {
        self.queue.purge_dead_letters()
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// A serializable snapshot of the whole runtime.
    pub fn stats(&self) -> BrokerStats {
        let queue_stats = self.queue.stats();
        BrokerStats {
            context_id: self.config.context_id.clone(),
            bus: self.bus.stats(),
            queue: QueueSnapshot {
                depth: self.queue.len(),
                enqueued: queue_stats.total_enqueued.load(Ordering::Relaxed),
                delivered: queue_stats.total_delivered.load(Ordering::Relaxed),
                retries: queue_stats.total_retries.load(Ordering::Relaxed),
                dead_lettered: queue_stats.total_dead_lettered.load(Ordering::Relaxed),
                redriven: queue_stats.total_redriven.load(Ordering::Relaxed),
                dead_letters_held: self.queue.dead_letters().len(),
            },
            routes: self.router.metrics(),
            circuits: self.router.circuits(),
        }
    }

    /// The underlying bus, for embedders needing the full surface.
    #[must_use]
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// The underlying router.
    #[must_use]
    pub fn router(&self) -> &PatternRouter {
        &self.router
    }

    /// The underlying delivery queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    /// The configuration this broker was built with.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

// =============================================================================
// INBOUND PUMP
// =============================================================================

/// Background task feeding transport frames into the bus.
///
/// Skips this context's own frames and frames addressed elsewhere, runs the
/// rest through the wire pipeline, and hands accepted messages to the bus as
/// remote deliveries. Lagging behind the transport loses frames with a
/// warning; the link is best-effort by contract.
async fn inbound_pump(
    bus: Arc<MessageBus>,
    pipeline: Arc<WirePipeline>,
    context_id: String,
    context_kind: ContextKind,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut frames = pipeline.frames();
    loop {
        tokio::select! {
            received = frames.recv() => match received {
                Ok(frame) => {
                    if frame.origin == context_id
                        || !frame.target.accepts(&context_id, context_kind)
                    {
                        continue;
                    }
                    FRAMES_RECEIVED.inc();
                    let Some(message) = pipeline.ingest(frame, now_millis()) else {
                        continue;
                    };
                    if let Err(error) = bus.deliver_remote(message).await {
                        warn!(error = %error, "remote message could not be delivered");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "inbound pump lagged behind the transport");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(context = %context_id, "inbound pump stopped");
}
