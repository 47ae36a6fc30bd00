//! Per-route circuit breakers.
//!
//! Every route gets its own circuit, keyed by the route's pattern. A run of
//! `failure_threshold` consecutive delivery failures opens the circuit, which
//! rejects dispatches without touching the target until `recovery_timeout`
//! elapses. The next dispatch is then allowed through as a probe (half-open);
//! `success_threshold` consecutive probe successes close the circuit again,
//! and any probe failure reopens it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use switchboard_telemetry::metrics::CIRCUIT_TRANSITIONS;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Dispatches pass through.
    Closed,
    /// Dispatches are rejected without touching the target.
    Open,
    /// Probe dispatches are allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Thresholds governing every route's circuit.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long an open circuit rejects before allowing a probe.
    pub recovery_timeout: Duration,
    /// When false, every dispatch is allowed and nothing is recorded.
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            enabled: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Small thresholds and a short recovery timeout for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout: Duration::from_millis(100),
            enabled: true,
        }
    }
}

#[derive(Debug)]
struct RouteCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    total_requests: u64,
    total_failures: u64,
}

impl RouteCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
            total_requests: 0,
            total_failures: 0,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.half_open_successes = 0;
        CIRCUIT_TRANSITIONS.with_label_values(&["open"]).inc();
    }
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub route: String,
    pub state: String,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
}

/// Owns the circuits for all routes.
pub struct CircuitBreakerManager {
    circuits: RwLock<HashMap<String, RouteCircuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether a dispatch for `route` may proceed.
    ///
    /// An open circuit whose recovery timeout has elapsed flips to half-open
    /// here and lets the call through as a probe.
    pub fn should_allow(&self, route: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut circuits = self.circuits.write();
        let circuit = circuits
            .entry(route.to_string())
            .or_insert_with(RouteCircuit::new);
        circuit.total_requests += 1;

        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = circuit.opened_at.map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed >= self.config.recovery_timeout => {
                        info!(route = %route, "circuit half-open, allowing probe");
                        circuit.state = CircuitState::HalfOpen;
                        circuit.half_open_successes = 0;
                        CIRCUIT_TRANSITIONS.with_label_values(&["half-open"]).inc();
                        true
                    }
                    Some(elapsed) => {
                        debug!(
                            route = %route,
                            remaining_ms = (self.config.recovery_timeout - elapsed).as_millis()
                                as u64,
                            "circuit open, rejecting dispatch"
                        );
                        false
                    }
                    // Open without a timestamp cannot recover on its own;
                    // treat it as closed rather than wedging the route.
                    None => true,
                }
            }
        }
    }

    /// Records a successful delivery for `route`.
    pub fn record_success(&self, route: &str) {
        if !self.config.enabled {
            return;
        }

        let mut circuits = self.circuits.write();
        let Some(circuit) = circuits.get_mut(route) else {
            return;
        };

        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                if circuit.half_open_successes >= self.config.success_threshold {
                    info!(
                        route = %route,
                        probes = circuit.half_open_successes,
                        "circuit closed after successful probes"
                    );
                    circuit.state = CircuitState::Closed;
                    circuit.consecutive_failures = 0;
                    circuit.opened_at = None;
                    CIRCUIT_TRANSITIONS.with_label_values(&["closed"]).inc();
                }
            }
            // No dispatches run while open.
            CircuitState::Open => {}
        }
    }

    /// Records a failed delivery for `route`.
    pub fn record_failure(&self, route: &str) {
        if !self.config.enabled {
            return;
        }

        let mut circuits = self.circuits.write();
        let circuit = circuits
            .entry(route.to_string())
            .or_insert_with(RouteCircuit::new);
        circuit.total_failures += 1;

        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        route = %route,
                        failures = circuit.consecutive_failures,
                        timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                        "circuit opened after consecutive failures"
                    );
                    circuit.open();
                }
            }
            CircuitState::HalfOpen => {
                warn!(route = %route, "circuit reopened after probe failure");
                circuit.open();
            }
            CircuitState::Open => {
                // Extend the rejection window.
                circuit.opened_at = Some(Instant::now());
            }
        }
    }

    /// Current state for a route; unknown routes report closed.
    #[must_use]
    pub fn state(&self, route: &str) -> CircuitState {
        self.circuits
            .read()
            .get(route)
            .map_or(CircuitState::Closed, |circuit| circuit.state)
    }

    /// Snapshots every circuit, sorted by route for stable output.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let circuits = self.circuits.read();
        let mut out: Vec<CircuitSnapshot> = circuits
            .iter()
            .map(|(route, circuit)| CircuitSnapshot {
                route: route.clone(),
                state: circuit.state.to_string(),
                consecutive_failures: circuit.consecutive_failures,
                total_requests: circuit.total_requests,
                total_failures: circuit.total_failures,
            })
            .collect();
        out.sort_by(|a, b| a.route.cmp(&b.route));
        out
    }

    /// Forces a route's circuit back to closed.
    pub fn reset(&self, route: &str) {
        let mut circuits = self.circuits.write();
        if let Some(circuit) = circuits.get_mut(route) {
            info!(route = %route, "circuit manually reset");
            *circuit = RouteCircuit::new();
        }
    }

    /// Drops a route's circuit entirely, so a re-added route starts fresh.
    pub fn remove(&self, route: &str) {
        self.circuits.write().remove(route);
    }
}
