//! Route table and dispatch.
//!
//! `PatternRouter` sits above the bus: `route_message` finds every route
//! whose pattern and conditions match, and per route runs transform →
//! middleware → circuit breaker → delivery, collecting one
//! [`RoutingResult`] per fired route. Channel and pool targets republish
//! through the bus; context targets go straight to the transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use sb_01_channel_bus::MessageBus;
use shared_types::{now_millis, Message, TransportAdapter, TransportFrame};
use switchboard_telemetry::metrics::ROUTES_MATCHED;

use crate::balancer::{BalanceStrategy, LoadBalancer};
use crate::breaker::{CircuitBreakerConfig, CircuitBreakerManager, CircuitSnapshot, CircuitState};
use crate::middleware::Next;
use crate::route::{RouteConfig, RouteTarget};
use crate::RouterError;

/// Router-wide settings.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Thresholds shared by every route's circuit.
    pub breaker: CircuitBreakerConfig,
    /// Selection strategy for pool targets.
    pub strategy: BalanceStrategy,
}

impl RouterConfig {
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            breaker: CircuitBreakerConfig::for_testing(),
            strategy: BalanceStrategy::RoundRobin,
        }
    }
}

/// What happened to one fired route.
#[derive(Debug, Clone)]
pub struct RoutingResult {
    /// Pattern of the route that fired.
    pub pattern: String,
    /// Where the route pointed.
    pub target: RouteTarget,
    /// Id of the routed message.
    pub message_id: Uuid,
    /// Time spent in transform, middleware, and delivery.
    pub latency_ms: f64,
    /// Delivery outcome.
    pub outcome: Result<(), RouterError>,
}

impl RoutingResult {
    #[must_use]
    pub fn delivered(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Cumulative per-route activity.
#[derive(Debug, Default)]
struct RouteActivity {
    total: u64,
    succeeded: u64,
    failed: u64,
    latency_total_ms: f64,
    last_activity: u64,
}

/// Point-in-time per-route metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMetrics {
    pub pattern: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub last_activity: u64,
}

// =============================================================================
// ROUTER
// =============================================================================

/// Pattern router over the local bus and the transport.
pub struct PatternRouter {
    bus: Arc<MessageBus>,
    transport: Option<Arc<dyn TransportAdapter>>,
    routes: RwLock<Vec<RouteConfig>>,
    breakers: CircuitBreakerManager,
    balancer: LoadBalancer,
    activity: RwLock<HashMap<String, RouteActivity>>,
}

impl PatternRouter {
    #[must_use]
    pub fn new(bus: Arc<MessageBus>, config: RouterConfig) -> Self {
        Self {
            bus,
            transport: None,
            routes: RwLock::new(Vec::new()),
            breakers: CircuitBreakerManager::new(config.breaker),
            balancer: LoadBalancer::new(config.strategy),
            activity: RwLock::new(HashMap::new()),
        }
    }

    /// Attaches the transport adapter context targets are sent through.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn TransportAdapter>) -> Self {
        self.transport = Some(transport);
        self
    }

    // =========================================================================
    // ROUTE TABLE
    // =========================================================================

    /// Adds a route, replacing any existing route with the same pattern.
    /// The table stays sorted by descending priority; equal priorities keep
    /// insertion order.
    pub fn add_route(&self, config: RouteConfig) {
        let mut routes = self.routes.write();
        routes.retain(|route| route.pattern.as_str() != config.pattern.as_str());
        debug!(
            pattern = %config.pattern,
            target = %config.target,
            priority = config.priority,
            "route added"
        );
        routes.push(config);
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Removes a route with its circuit and metrics. Returns false if no
    /// route had that pattern.
    pub fn remove_route(&self, pattern: &str) -> bool {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|route| route.pattern.as_str() != pattern);
        let removed = routes.len() != before;
        if removed {
            self.breakers.remove(pattern);
            self.activity.write().remove(pattern);
            debug!(pattern = %pattern, "route removed");
        }
        removed
    }

    /// Route patterns in evaluation order.
    #[must_use]
    pub fn route_patterns(&self) -> Vec<String> {
        self.routes
            .read()
            .iter()
            .map(|route| route.pattern.as_str().to_string())
            .collect()
    }

    /// The balancer pool registry, for wiring target pools.
    #[must_use]
    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Routes one message through every matching route, in priority order.
    ///
    /// Returns one result per fired route; an empty vec means nothing
    /// matched. Failures are isolated per route.
    pub async fn route_message(&self, message: &Message) -> Vec<RoutingResult> {
        let routing_key = message.routing_key();
        let document = serde_json::to_value(message).unwrap_or(serde_json::Value::Null);

        let matching: Vec<RouteConfig> = self
            .routes
            .read()
            .iter()
            .filter(|route| route.fires_for(&routing_key, &document))
            .cloned()
            .collect();

        let mut results = Vec::with_capacity(matching.len());
        for route in matching {
            ROUTES_MATCHED.inc();
            let started = Instant::now();
            let outcome = self.dispatch(&route, message.clone()).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

            self.record_activity(route.pattern.as_str(), outcome.is_ok(), latency_ms);
            results.push(RoutingResult {
                pattern: route.pattern.as_str().to_string(),
                target: route.target.clone(),
                message_id: message.id,
                latency_ms,
                outcome,
            });
        }
        results
    }

    /// Transform → middleware → breaker → target, for one route.
    async fn dispatch(&self, route: &RouteConfig, message: Message) -> Result<(), RouterError> {
        let message = match &route.transform {
            Some(transform) => transform
                .transform(message)
                .map_err(RouterError::Transform)?,
            None => message,
        };

        let message = Next::new(&route.middleware)
            .run(message)
            .await
            .map_err(RouterError::Middleware)?;

        let key = route.pattern.as_str();
        if !self.breakers.should_allow(key) {
            return Err(RouterError::CircuitOpen {
                route: key.to_string(),
            });
        }

        let outcome = self.deliver(&route.target, message).await;
        match &outcome {
            Ok(()) => self.breakers.record_success(key),
            Err(error) => {
                self.breakers.record_failure(key);
                warn!(route = %key, target = %route.target, %error, "route delivery failed");
            }
        }
        outcome
    }

    async fn deliver(&self, target: &RouteTarget, message: Message) -> Result<(), RouterError> {
        match target {
            RouteTarget::Channel(name) => self.republish(name, message).await,
            RouteTarget::Pool(pool) => {
                let Some(selected) = self.balancer.acquire(pool) else {
                    return Err(RouterError::PoolExhausted(pool.clone()));
                };
                let outcome = self.republish(&selected, message).await;
                self.balancer.release(pool, &selected);
                outcome
            }
            RouteTarget::Context(context) => {
                self.transmit(TransportFrame::to_context(
                    self.bus.local_sender().id.clone(),
                    context.clone(),
                    message,
                ))
                .await
            }
            RouteTarget::Background => {
                self.transmit(TransportFrame::to_background(
                    self.bus.local_sender().id.clone(),
                    message,
                ))
                .await
            }
            RouteTarget::AllContexts => {
                self.transmit(TransportFrame::plain(
                    self.bus.local_sender().id.clone(),
                    message,
                ))
                .await
            }
        }
    }

    /// Republishes on a channel as a fresh message, keeping the original's
    /// metadata (sender, priority, correlation, headers).
    async fn republish(&self, channel: &str, message: Message) -> Result<(), RouterError> {
        let mut forwarded = Message::new(
            channel,
            &message.kind,
            message.payload.clone(),
            message.metadata.sender.clone(),
        );
        forwarded.metadata = message.metadata;
        self.bus
            .publish_message(forwarded)
            .await
            .map(|_| ())
            .map_err(|error| RouterError::Delivery(error.to_string()))
    }

    async fn transmit(&self, frame: TransportFrame) -> Result<(), RouterError> {
        let Some(transport) = &self.transport else {
            return Err(RouterError::Delivery(
                "no transport adapter attached".to_string(),
            ));
        };
        transport
            .send(frame)
            .await
            .map_err(|error| RouterError::Delivery(error.to_string()))
    }

    // =========================================================================
    // OBSERVABILITY
    // =========================================================================

    fn record_activity(&self, pattern: &str, succeeded: bool, latency_ms: f64) {
        let mut activity = self.activity.write();
        let entry = activity.entry(pattern.to_string()).or_default();
        entry.total += 1;
        if succeeded {
            entry.succeeded += 1;
        } else {
            entry.failed += 1;
        }
        entry.latency_total_ms += latency_ms;
        entry.last_activity = now_millis();
    }

    /// Cumulative metrics per route, sorted by pattern.
    #[must_use]
    pub fn metrics(&self) -> Vec<RouteMetrics> {
        let activity = self.activity.read();
        let mut out: Vec<RouteMetrics> = activity
            .iter()
            .map(|(pattern, entry)| RouteMetrics {
                pattern: pattern.clone(),
                total_requests: entry.total,
                successful_requests: entry.succeeded,
                failed_requests: entry.failed,
                average_latency_ms: if entry.total == 0 {
                    0.0
                } else {
                    entry.latency_total_ms / entry.total as f64
                },
                last_activity: entry.last_activity,
            })
            .collect();
        out.sort_by(|a, b| a.pattern.cmp(&b.pattern));
        out
    }

    /// Circuit snapshots for every route that has dispatched.
    #[must_use]
    pub fn circuits(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshot()
    }

    /// Circuit state for one route.
    #[must_use]
    pub fn circuit_state(&self, pattern: &str) -> CircuitState {
        self.breakers.state(pattern)
    }

    /// Forces a route's circuit back to closed.
    pub fn reset_circuit(&self, pattern: &str) {
        self.breakers.reset(pattern);
    }
}
