//! # Integration Test Flows
//!
//! Tests that the channel bus, delivery queue, and pattern router work
//! together the way the broker wires them, without standing up a full
//! broker:
//!
//! 1. **Bus → Queue**: failed deliveries are queued and retried until the
//!    subscriber recovers
//! 2. **Queue → Dead Letters**: exhausted budgets park messages until an
//!    operator redrives them
//! 3. **Router → Bus**: routes balance across pools and reshape payloads
//!    in flight
//! 4. **Request/Reply + Filters**: correlated replies flow back while
//!    non-matching subscribers stay silent

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;
    use serde_json::json;
    use tokio::sync::{mpsc, watch};
    use tokio::time::timeout;

    use sb_01_channel_bus::{
        handler_fn, ChannelOptions, MessageBus, MessageHandler, SubscriptionFilter,
    };
    use sb_02_delivery_queue::{retry_loop, DeliveryQueue, DeliveryQueueConfig, RedeliveryHandler};
    use sb_03_router::{
        transform_fn, ConditionOperator, PatternRouter, RouteCondition, RouteConfig, RouteTarget,
        RouterConfig,
    };
    use shared_types::{now_millis, ContextKind, Message, MessageMetadata, Priority, SenderInfo};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn background() -> SenderInfo {
        SenderInfo::new("background", ContextKind::Background)
    }

    /// A handler that forwards every delivery into an mpsc channel.
    fn collector() -> (Arc<dyn MessageHandler>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |message: Message| {
            let tx = tx.clone();
            async move {
                tx.send(message).map_err(|e| e.to_string())?;
                Ok(())
            }
        });
        (handler, rx)
    }

    /// Bus and queue wired together plus a running retry worker, torn down
    /// by flipping the returned watch sender.
    fn bus_with_retry_worker() -> (
        Arc<MessageBus>,
        Arc<DeliveryQueue>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<()>,
    ) {
        let queue = Arc::new(DeliveryQueue::new(DeliveryQueueConfig::for_testing()));
        let bus = Arc::new(MessageBus::new(background()).with_queue(Arc::clone(&queue)));
        let (stop, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(retry_loop(
            Arc::clone(&queue),
            Arc::clone(&bus) as Arc<dyn RedeliveryHandler>,
            stop_rx,
        ));
        (bus, queue, stop, worker)
    }

    async fn drain_deadline(queue: &DeliveryQueue) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while queue.len() > 0 {
            assert!(tokio::time::Instant::now() < deadline, "queue never drained");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    // =============================================================================
    // INTEGRATION TESTS: BUS → DELIVERY QUEUE
    // =============================================================================

    /// Test that a delivery failing once is queued and redelivered as soon as
    /// the subscriber recovers.
    #[tokio::test]
    async fn test_failed_delivery_is_retried_until_the_subscriber_recovers() {
        let (bus, queue, stop, worker) = bus_with_retry_worker();
        bus.create_channel("orders", ChannelOptions::default())
            .unwrap();

        // Fails exactly once, then forwards deliveries.
        let failures_left = Arc::new(AtomicU32::new(1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            "orders",
            handler_fn(move |message: Message| {
                let failures_left = Arc::clone(&failures_left);
                let tx = tx.clone();
                async move {
                    let failed = failures_left
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok();
                    if failed {
                        return Err("subscriber still warming up".to_string());
                    }
                    tx.send(message).map_err(|e| e.to_string())?;
                    Ok(())
                }
            }),
            SubscriptionFilter::all(),
        )
        .unwrap();

        let mut metadata = MessageMetadata::for_sender(background());
        metadata.retry_count = 2;
        bus.publish_with("orders", "created", json!({ "order": 42 }), metadata)
            .await
            .unwrap();
        assert_eq!(queue.len(), 1, "failed delivery should be parked");

        let recovered = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout waiting for redelivery")
            .expect("collector closed");
        assert_eq!(recovered.payload["order"], 42);

        drain_deadline(&queue).await;
        assert_eq!(queue.stats().total_delivered.load(Ordering::Relaxed), 1);
        assert!(queue.dead_letters().is_empty());

        let _ = stop.send(true);
        worker.await.unwrap();
    }

    /// Test that a persistently failing delivery dead-letters after its
    /// budget, and that a redrive after the target recovers completes it.
    #[tokio::test]
    async fn test_dead_lettered_message_is_recoverable_by_redrive() {
        let (bus, queue, stop, worker) = bus_with_retry_worker();
        bus.create_channel("billing", ChannelOptions::default())
            .unwrap();

        let broken = Arc::new(AtomicBool::new(true));
        let gate = Arc::clone(&broken);
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            "billing",
            handler_fn(move |message: Message| {
                let gate = Arc::clone(&gate);
                let tx = tx.clone();
                async move {
                    if gate.load(Ordering::SeqCst) {
                        return Err("downstream offline".to_string());
                    }
                    tx.send(message).map_err(|e| e.to_string())?;
                    Ok(())
                }
            }),
            SubscriptionFilter::all(),
        )
        .unwrap();

        let mut metadata = MessageMetadata::for_sender(background());
        metadata.retry_count = 1;
        let id = bus
            .publish_with("billing", "invoice", json!({ "amount": 1999 }), metadata)
            .await
            .unwrap();

        // for_testing queue: two redelivery attempts, then the dead-letter store.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while queue.dead_letters().is_empty() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "message never dead-lettered"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].entry.message.id, id);
        assert_eq!(dead[0].channel, "billing");

        // Fix the downstream, then put the message back into the queue.
        broken.store(false, Ordering::SeqCst);
        queue.redrive(id, now_millis()).unwrap();
        assert!(queue.dead_letters().is_empty());

        let redelivered = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout waiting for redriven delivery")
            .expect("collector closed");
        assert_eq!(redelivered.payload["amount"], 1999);

        drain_deadline(&queue).await;
        assert_eq!(queue.stats().total_redriven.load(Ordering::Relaxed), 1);

        let _ = stop.send(true);
        worker.await.unwrap();
    }

    // =============================================================================
    // INTEGRATION TESTS: ROUTER → BUS
    // =============================================================================

    /// Test that a pool route spreads messages across its members round-robin.
    #[tokio::test]
    async fn test_pool_routes_balance_across_worker_channels() {
        let bus = Arc::new(MessageBus::new(background()));
        bus.create_channel("jobs", ChannelOptions::default()).unwrap();
        bus.create_channel("worker.a", ChannelOptions::default())
            .unwrap();
        bus.create_channel("worker.b", ChannelOptions::default())
            .unwrap();

        let (handler_a, mut rx_a) = collector();
        let (handler_b, mut rx_b) = collector();
        bus.subscribe("worker.a", handler_a, SubscriptionFilter::all())
            .unwrap();
        bus.subscribe("worker.b", handler_b, SubscriptionFilter::all())
            .unwrap();

        let router = PatternRouter::new(Arc::clone(&bus), RouterConfig::for_testing());
        router
            .balancer()
            .register_pool("workers", vec!["worker.a".to_string(), "worker.b".to_string()]);
        router.add_route(RouteConfig::new(
            "jobs:*",
            RouteTarget::Pool("workers".to_string()),
        ));

        for n in 0..4 {
            let job = Message::new("jobs", "render", json!({ "n": n }), background());
            let results = router.route_message(&job).await;
            assert_eq!(results.len(), 1);
            assert!(results[0].delivered());
        }

        let mut a_count = 0;
        while rx_a.try_recv().is_ok() {
            a_count += 1;
        }
        let mut b_count = 0;
        while rx_b.try_recv().is_ok() {
            b_count += 1;
        }
        assert_eq!(a_count, 2, "round robin should alternate members");
        assert_eq!(b_count, 2);
    }

    /// Test that a conditional route only fires above its threshold and that
    /// its transform reshapes the payload before delivery.
    #[tokio::test]
    async fn test_conditional_route_transforms_matching_messages() {
        let bus = Arc::new(MessageBus::new(background()));
        bus.create_channel("sensor.raw", ChannelOptions::default())
            .unwrap();
        bus.create_channel("alerts", ChannelOptions::default()).unwrap();
        let (handler, mut rx) = collector();
        bus.subscribe("alerts", handler, SubscriptionFilter::all())
            .unwrap();

        let router = PatternRouter::new(Arc::clone(&bus), RouterConfig::for_testing());
        router.add_route(
            RouteConfig::new("sensor.raw:*", RouteTarget::Channel("alerts".to_string()))
                .with_condition(RouteCondition::new(
                    "payload.celsius",
                    ConditionOperator::Gt,
                    json!(30),
                ))
                .with_transform(transform_fn(|mut message: Message| {
                    message.payload = json!({
                        "alert": "overheating",
                        "celsius": message.payload["celsius"],
                    });
                    Ok(message)
                })),
        );

        let calm = Message::new("sensor.raw", "reading", json!({ "celsius": 21 }), background());
        assert!(router.route_message(&calm).await.is_empty());

        let hot = Message::new("sensor.raw", "reading", json!({ "celsius": 48 }), background());
        let results = router.route_message(&hot).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].delivered());

        let alert = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout waiting for alert")
            .expect("collector closed");
        assert_eq!(alert.channel, "alerts");
        assert_eq!(alert.payload["alert"], "overheating");
        assert_eq!(alert.payload["celsius"], 48);
    }

    // =============================================================================
    // INTEGRATION TESTS: REQUEST/REPLY + SUBSCRIPTION FILTERS
    // =============================================================================

    /// Test that a request reaches the matching responder while a subscriber
    /// with a stricter filter never sees it, and the reply correlates back.
    #[tokio::test]
    async fn test_request_reply_round_trip_respects_filters() {
        let bus = Arc::new(MessageBus::new(background()));
        bus.create_channel("search", ChannelOptions::default()).unwrap();

        // Only interested in urgent traffic; must stay silent here.
        let (urgent_handler, mut urgent_rx) = collector();
        bus.subscribe(
            "search",
            urgent_handler,
            SubscriptionFilter::all().with_min_priority(Priority::Urgent),
        )
        .unwrap();

        let responder_bus = Arc::clone(&bus);
        bus.subscribe(
            "search",
            handler_fn(move |message: Message| {
                let responder_bus = Arc::clone(&responder_bus);
                async move {
                    responder_bus
                        .respond(&message, json!({ "hits": 3 }))
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok(())
                }
            }),
            SubscriptionFilter::kind("query"),
        )
        .unwrap();

        let reply = bus
            .request("search", "query", json!({ "q": "rust" }), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.kind, "response");
        assert_eq!(reply.payload["hits"], 3);

        assert!(
            urgent_rx.try_recv().is_err(),
            "filtered subscriber should not have seen the request"
        );
    }

    /// Test that concurrent publishers interleave safely on one channel.
    #[tokio::test]
    async fn test_concurrent_publishers_share_a_channel() {
        let bus = Arc::new(MessageBus::new(background()));
        bus.create_channel("telemetry", ChannelOptions::default())
            .unwrap();
        let (handler, mut rx) = collector();
        bus.subscribe("telemetry", handler, SubscriptionFilter::all())
            .unwrap();

        let publishes = (0..8).map(|n| {
            let bus = Arc::clone(&bus);
            async move {
                bus.publish("telemetry", "sample", json!({ "n": n }))
                    .await
                    .unwrap()
            }
        });
        let ids = join_all(publishes).await;
        assert_eq!(ids.len(), 8);

        for _ in 0..8 {
            timeout(Duration::from_millis(100), rx.recv())
                .await
                .expect("timeout waiting for sample")
                .expect("collector closed");
        }
        assert!(rx.try_recv().is_err(), "no duplicate deliveries expected");
        assert_eq!(bus.stats().sent, 8);
        assert_eq!(bus.history(Some("telemetry"), 16).len(), 8);
    }
}
