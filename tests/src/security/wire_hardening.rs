//! # Wire Hardening Tests
//!
//! An attacker with a transport endpoint can inject arbitrary frames: the
//! hub is a shared medium, so anything a compromised context could send, a
//! test can send. These tests prove the inbound pipeline holds the line:
//!
//! 1. **Replay**: captured frames re-sent verbatim deliver nothing twice
//! 2. **Tampering**: a flipped ciphertext bit kills the frame in transit
//! 3. **Stale frames**: timestamps outside the acceptance window are refused
//! 4. **Forged origins**: payloads claiming untrusted senders arrive scrubbed
//! 5. **Floods**: per-origin rate limits cap injection volume
//! 6. **Oversized chunks**: chunks beyond the assembler's cap are refused,
//!    never buffered

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use uuid::Uuid;

    use broker_runtime::{Broker, BrokerConfig, MemoryHub, MemoryStore};
    use sb_01_channel_bus::{handler_fn, ChannelOptions, MessageHandler, SubscriptionFilter};
    use sb_05_compression::MAX_CHUNK_BYTES;
    use shared_types::{
        now_millis, ChunkEnvelope, ContextKind, FrameTarget, Message, PersistenceAdapter,
        SenderInfo, TransportAdapter, TransportFrame, WirePayload,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const SHARED_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    async fn running_broker(hub: &MemoryHub, config: BrokerConfig) -> Arc<Broker> {
        let store = Arc::new(MemoryStore::new()) as Arc<dyn PersistenceAdapter>;
        let broker = Arc::new(Broker::new(config, hub.endpoint(), store).unwrap());
        broker.start().await.unwrap();
        broker
    }

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

    async fn subscribed_channel(
        broker: &Broker,
        channel: &str,
        options: ChannelOptions,
    ) -> mpsc::UnboundedReceiver<Message> {
        broker.create_channel(channel, options).await.unwrap();
        let (handler, rx) = collector();
        broker
            .subscribe(channel, handler, SubscriptionFilter::all())
            .unwrap();
        rx
    }

    /// A plain frame as a compromised context would forge it.
    fn forged_frame(origin: &str, kind: ContextKind, channel: &str, payload: serde_json::Value) -> TransportFrame {
        let message = Message::new(channel, "forged", payload, SenderInfo::new(origin, kind));
        TransportFrame::plain(origin, message)
    }

    // =============================================================================
    // REPLAY
    // =============================================================================

    /// Test that re-sending captured frames verbatim delivers nothing twice.
    #[tokio::test]
    async fn test_replay_storm_delivers_each_message_once() {
        let hub = MemoryHub::default();
        let mut ear = hub.endpoint().frames();
        let attacker = hub.endpoint();

        let background = running_broker(
            &hub,
            BrokerConfig::for_testing("background", ContextKind::Background),
        )
        .await;
        let popup = running_broker(&hub, BrokerConfig::for_testing("popup-1", ContextKind::Popup)).await;

        let mut popup_rx = subscribed_channel(&popup, "events", ChannelOptions::default()).await;
        background
            .create_channel("events", ChannelOptions::default())
            .await
            .unwrap();

        for n in 0..3 {
            background
                .publish("events", "created", json!({ "n": n }))
                .await
                .unwrap();
        }

        // Capture the three legitimate frames, then replay each twice.
        let mut captured = Vec::new();
        for _ in 0..3 {
            let frame = timeout(Duration::from_secs(1), ear.recv())
                .await
                .expect("timeout capturing frame")
                .expect("hub closed");
            captured.push(frame);
        }
        for frame in &captured {
            attacker.send(frame.clone()).await.unwrap();
            attacker.send(frame.clone()).await.unwrap();
        }

        let mut delivered = 0;
        while let Ok(Some(_)) = timeout(Duration::from_millis(150), popup_rx.recv()).await {
            delivered += 1;
        }
        assert_eq!(delivered, 3, "replays must not produce extra deliveries");

        background.shutdown().await.unwrap();
        popup.shutdown().await.unwrap();
    }

    // =============================================================================
    // TAMPERING
    // =============================================================================

    /// Test that a man-in-the-middle flipping one ciphertext bit kills that
    /// frame while untouched frames still pass.
    #[tokio::test]
    async fn test_tampered_ciphertext_is_dropped_in_transit() {
        // Two hubs with an attacker bridging them: everything the background
        // sends reaches the popup only through the attacker's hands.
        let hub_sender = MemoryHub::default();
        let hub_receiver = MemoryHub::default();
        let mut ear = hub_sender.endpoint().frames();
        let mouth = hub_receiver.endpoint();

        let mut bg_config = BrokerConfig::for_testing("background", ContextKind::Background);
        bg_config.encryption_enabled = true;
        bg_config.master_secret = SHARED_SECRET.to_vec();
        let mut popup_config = BrokerConfig::for_testing("popup-1", ContextKind::Popup);
        popup_config.encryption_enabled = true;
        popup_config.master_secret = SHARED_SECRET.to_vec();

        let background = running_broker(&hub_sender, bg_config).await;
        let popup = running_broker(&hub_receiver, popup_config).await;

        let vault = ChannelOptions {
            encrypted: true,
            ..ChannelOptions::default()
        };
        let mut popup_rx = subscribed_channel(&popup, "vault", vault.clone()).await;
        background.create_channel("vault", vault).await.unwrap();

        for n in 1..=3 {
            background
                .publish("vault", "entry", json!({ "n": n }))
                .await
                .unwrap();
        }

        let mut frames = Vec::new();
        for _ in 0..3 {
            let frame = timeout(Duration::from_secs(1), ear.recv())
                .await
                .expect("timeout capturing frame")
                .expect("hub closed");
            frames.push(frame);
        }

        // Forward the first untouched, corrupt the second, forward the third.
        mouth.send(frames[0].clone()).await.unwrap();
        let mut tampered = frames[1].clone();
        match &mut tampered.payload {
            WirePayload::Encrypted(envelope) => envelope.data[0] ^= 0x01,
            other => panic!("expected ciphertext on the wire, got {other:?}"),
        }
        mouth.send(tampered).await.unwrap();
        mouth.send(frames[2].clone()).await.unwrap();

        let first = timeout(Duration::from_secs(1), popup_rx.recv())
            .await
            .expect("timeout waiting for first delivery")
            .expect("collector closed");
        assert_eq!(first.payload["n"], 1);
        let second = timeout(Duration::from_secs(1), popup_rx.recv())
            .await
            .expect("timeout waiting for second delivery")
            .expect("collector closed");
        assert_eq!(second.payload["n"], 3, "the corrupted frame must be skipped");
        assert!(
            timeout(Duration::from_millis(150), popup_rx.recv()).await.is_err(),
            "nothing else should arrive"
        );

        background.shutdown().await.unwrap();
        popup.shutdown().await.unwrap();
    }

    // =============================================================================
    // STALE FRAMES
    // =============================================================================

    /// Test that frames carrying a timestamp outside the acceptance window
    /// are refused while fresh ones pass.
    #[tokio::test]
    async fn test_stale_frames_are_refused_on_arrival() {
        let hub = MemoryHub::default();
        let attacker = hub.endpoint();

        let popup = running_broker(&hub, BrokerConfig::for_testing("popup-1", ContextKind::Popup)).await;
        let mut popup_rx = subscribed_channel(&popup, "news", ChannelOptions::default()).await;

        let sender = SenderInfo::new("background", ContextKind::Background);
        let mut stale = Message::new("news", "update", json!({ "age": "old" }), sender.clone());
        stale.timestamp = now_millis() - 120_000;
        attacker
            .send(TransportFrame::plain("background", stale))
            .await
            .unwrap();

        let fresh = Message::new("news", "update", json!({ "age": "new" }), sender);
        attacker
            .send(TransportFrame::plain("background", fresh))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(1), popup_rx.recv())
            .await
            .expect("timeout waiting for fresh delivery")
            .expect("collector closed");
        assert_eq!(received.payload["age"], "new");
        assert!(
            timeout(Duration::from_millis(150), popup_rx.recv()).await.is_err(),
            "the stale frame must never be delivered"
        );

        popup.shutdown().await.unwrap();
    }

    // =============================================================================
    // FORGED ORIGINS
    // =============================================================================

    /// Test that an injected frame posing as a content script cannot smuggle
    /// active content into a privileged context.
    #[tokio::test]
    async fn test_forged_content_script_payloads_arrive_scrubbed() {
        let hub = MemoryHub::default();
        let attacker = hub.endpoint();

        let background = running_broker(
            &hub,
            BrokerConfig::for_testing("background", ContextKind::Background),
        )
        .await;
        let mut bg_rx = subscribed_channel(&background, "dom.events", ChannelOptions::default()).await;

        attacker
            .send(forged_frame(
                "content-9",
                ContextKind::Content,
                "dom.events",
                json!({
                    "html": "<script>document.location='https://evil.example'</script>ok",
                    "link": "javascript:void(open())",
                }),
            ))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(1), bg_rx.recv())
            .await
            .expect("timeout waiting for forged delivery")
            .expect("collector closed");
        assert_eq!(received.payload["html"], "ok");
        assert_eq!(received.payload["link"], "void(open())");

        background.shutdown().await.unwrap();
    }

    // =============================================================================
    // FLOODS
    // =============================================================================

    /// Test that one origin cannot exceed the receiver's per-sender window,
    /// however many frames it injects.
    #[tokio::test]
    async fn test_flooding_attacker_is_rate_limited() {
        let hub = MemoryHub::default();
        let attacker = hub.endpoint();

        let mut config = BrokerConfig::for_testing("background", ContextKind::Background);
        config.rate_limit.max_requests = 3;
        config.rate_limit.window_ms = 60_000;
        config.rate_limit.enabled = true;
        let background = running_broker(&hub, config).await;
        let mut bg_rx = subscribed_channel(&background, "spam", ChannelOptions::default()).await;

        for n in 0..10 {
            attacker
                .send(forged_frame(
                    "content-9",
                    ContextKind::Content,
                    "spam",
                    json!({ "n": n }),
                ))
                .await
                .unwrap();
        }

        let mut delivered = 0;
        while let Ok(Some(_)) = timeout(Duration::from_millis(150), bg_rx.recv()).await {
            delivered += 1;
        }
        assert_eq!(delivered, 3, "the window limit caps a flood");

        background.shutdown().await.unwrap();
    }

    // =============================================================================
    // OVERSIZED CHUNKS
    // =============================================================================

    /// Test that a chunk bigger than any legitimate frame is refused at the
    /// door instead of being buffered toward reassembly.
    #[tokio::test]
    async fn test_oversized_chunk_frames_are_refused() {
        let hub = MemoryHub::default();
        let attacker = hub.endpoint();

        let popup = running_broker(&hub, BrokerConfig::for_testing("popup-1", ContextKind::Popup)).await;
        let mut popup_rx = subscribed_channel(&popup, "bulk", ChannelOptions::default()).await;

        attacker
            .send(TransportFrame {
                origin: "background".to_string(),
                target: FrameTarget::All,
                payload: WirePayload::Chunk(ChunkEnvelope {
                    message_id: Uuid::new_v4(),
                    chunk_index: 0,
                    total_chunks: 2,
                    data: vec![0u8; MAX_CHUNK_BYTES + 1],
                }),
            })
            .await
            .unwrap();

        let sender = SenderInfo::new("background", ContextKind::Background);
        let fresh = Message::new("bulk", "update", json!({ "ok": true }), sender);
        attacker
            .send(TransportFrame::plain("background", fresh))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(1), popup_rx.recv())
            .await
            .expect("timeout waiting for delivery")
            .expect("collector closed");
        assert_eq!(received.payload["ok"], true);
        assert!(
            timeout(Duration::from_millis(150), popup_rx.recv()).await.is_err(),
            "the oversized chunk must never complete into a delivery"
        );

        popup.shutdown().await.unwrap();
    }
}
