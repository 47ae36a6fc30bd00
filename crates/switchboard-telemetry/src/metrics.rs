//! Prometheus metrics for the broker subsystems.
//!
//! All metrics follow the naming convention: `sb_<subsystem>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_published_total)
//! - **Gauge**: Value that can go up or down (e.g., queue_depth)
//! - **Histogram**: Distribution of values (e.g., publish_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // CHANNEL BUS METRICS
    // =========================================================================

    /// Messages published to local channels
    pub static ref MESSAGES_PUBLISHED: Counter = Counter::new(
        "sb_bus_messages_published_total",
        "Total messages published to local channels"
    ).expect("metric creation failed");

    /// Messages received from other contexts
    pub static ref MESSAGES_RECEIVED: Counter = Counter::new(
        "sb_bus_messages_received_total",
        "Total messages ingested from the transport"
    ).expect("metric creation failed");

    /// Handler delivery failures
    pub static ref DELIVERY_FAILURES: Counter = Counter::new(
        "sb_bus_delivery_failures_total",
        "Total handler invocations that returned an error"
    ).expect("metric creation failed");

    /// Requests that hit their timeout
    pub static ref REQUEST_TIMEOUTS: Counter = Counter::new(
        "sb_bus_request_timeouts_total",
        "Total request/reply exchanges that timed out"
    ).expect("metric creation failed");

    /// End-to-end publish duration (validation + history + local delivery)
    pub static ref PUBLISH_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "sb_bus_publish_duration_seconds",
            "Time spent publishing a message to local subscribers"
        ).buckets(exponential_buckets(0.0001, 2.0, 12).expect("bucket layout"))
    ).expect("metric creation failed");

    // =========================================================================
    // DELIVERY QUEUE METRICS
    // =========================================================================

    /// Current number of messages awaiting redelivery
    pub static ref QUEUE_DEPTH: Gauge = Gauge::new(
        "sb_queue_depth",
        "Messages currently waiting in the delivery queue"
    ).expect("metric creation failed");

    /// Redelivery attempts made by the queue
    pub static ref QUEUE_RETRIES: Counter = Counter::new(
        "sb_queue_retries_total",
        "Total redelivery attempts made by the delivery queue"
    ).expect("metric creation failed");

    /// Messages moved to the dead-letter store
    pub static ref DEAD_LETTERS: Counter = Counter::new(
        "sb_queue_dead_letters_total",
        "Total messages moved to the dead-letter store"
    ).expect("metric creation failed");

    // =========================================================================
    // ROUTER METRICS
    // =========================================================================

    /// Routes matched per dispatched message
    pub static ref ROUTES_MATCHED: Counter = Counter::new(
        "sb_router_routes_matched_total",
        "Total route matches across all dispatched messages"
    ).expect("metric creation failed");

    /// Circuit breaker state transitions
    pub static ref CIRCUIT_TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new(
            "sb_router_circuit_transitions_total",
            "Circuit breaker state transitions"
        ),
        &["state"]  // state: open/half_open/closed
    ).expect("metric creation failed");

    // =========================================================================
    // TRANSPORT / PIPELINE METRICS
    // =========================================================================

    /// Frames handed to the transport adapter
    pub static ref FRAMES_SENT: Counter = Counter::new(
        "sb_transport_frames_sent_total",
        "Frames handed to the transport adapter"
    ).expect("metric creation failed");

    /// Frames accepted from the transport adapter
    pub static ref FRAMES_RECEIVED: Counter = Counter::new(
        "sb_transport_frames_received_total",
        "Frames accepted from the transport adapter"
    ).expect("metric creation failed");

    /// Inbound frames dropped before reaching the bus
    pub static ref FRAMES_DROPPED: CounterVec = CounterVec::new(
        Opts::new(
            "sb_transport_frames_dropped_total",
            "Inbound frames dropped by the wire pipeline"
        ),
        &["reason"]  // reason: signature/decrypt/decompress/rate_limit/timestamp/replay/decode
    ).expect("metric creation failed");

    /// Bytes saved by payload compression
    pub static ref COMPRESSION_BYTES_SAVED: Counter = Counter::new(
        "sb_compression_bytes_saved_total",
        "Cumulative bytes saved by payload compression"
    ).expect("metric creation failed");
}

/// Handle for the metrics registry
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Bus
        Box::new(MESSAGES_PUBLISHED.clone()),
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(DELIVERY_FAILURES.clone()),
        Box::new(REQUEST_TIMEOUTS.clone()),
        Box::new(PUBLISH_DURATION.clone()),
        // Queue
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(QUEUE_RETRIES.clone()),
        Box::new(DEAD_LETTERS.clone()),
        // Router
        Box::new(ROUTES_MATCHED.clone()),
        Box::new(CIRCUIT_TRANSITIONS.clone()),
        // Transport
        Box::new(FRAMES_SENT.clone()),
        Box::new(FRAMES_RECEIVED.clone()),
        Box::new(FRAMES_DROPPED.clone()),
        Box::new(COMPRESSION_BYTES_SAVED.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
