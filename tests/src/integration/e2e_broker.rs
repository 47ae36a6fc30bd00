//! # End-to-End Broker Choreography Tests
//!
//! Whole brokers talking to each other through an in-memory hub:
//!
//! ```text
//! [background broker]          [popup broker]          [content broker]
//!        │                           │                        │
//!        └────── frames ──→ [MemoryHub fan-out] ←── frames ───┘
//!                                    │
//!              every frame passes the wire pipeline twice:
//!        outbound  compress → encrypt → chunk
//!        inbound   assemble → decrypt → expand → policy checks
//! ```
//!
//! ## Test Categories
//!
//! 1. **Confidentiality**: encrypted channels never leak payloads on the wire
//! 2. **Key Agreement**: only contexts holding the shared secret can read
//! 3. **Large Payloads**: chunked frames reassemble across contexts
//! 4. **Trust Boundaries**: content-script payloads arrive sanitized
//! 5. **Backpressure**: receivers throttle flooding senders

// =============================================================================
// TEST FIXTURES (only compiled during tests)
// =============================================================================

#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
use serde_json::json;

#[cfg(test)]
use tokio::sync::mpsc;

#[cfg(test)]
use tokio::time::timeout;

#[cfg(test)]
use broker_runtime::{Broker, BrokerConfig, MemoryHub, MemoryStore};

#[cfg(test)]
use sb_01_channel_bus::{handler_fn, ChannelOptions, MessageHandler, SubscriptionFilter};

#[cfg(test)]
use sb_05_compression::CompressionConfig;

#[cfg(test)]
use shared_types::{ContextKind, Message, PersistenceAdapter, TransportAdapter, WirePayload};

/// 32 bytes shared by every trusted context in these tests.
#[cfg(test)]
const SHARED_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

#[cfg(test)]
fn secure_config(context_id: &str, kind: ContextKind) -> BrokerConfig {
    let mut config = BrokerConfig::for_testing(context_id, kind);
    config.encryption_enabled = true;
    config.master_secret = SHARED_SECRET.to_vec();
    config
}

#[cfg(test)]
async fn running_broker(hub: &MemoryHub, config: BrokerConfig) -> Arc<Broker> {
    let store = Arc::new(MemoryStore::new()) as Arc<dyn PersistenceAdapter>;
    let broker = Arc::new(Broker::new(config, hub.endpoint(), store).unwrap());
    broker.start().await.unwrap();
    broker
}

#[cfg(test)]
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

#[cfg(test)]
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

// =============================================================================
// CONFIDENTIALITY
// =============================================================================

/// Test that an encrypted channel delivers plaintext to the peer while the
/// hub only ever carries ciphertext.
#[tokio::test]
async fn test_encrypted_channel_hides_payloads_on_the_wire() {
    let hub = MemoryHub::default();
    let mut tap = hub.endpoint().frames();

    let background = running_broker(
        &hub,
        secure_config("background", ContextKind::Background),
    )
    .await;
    let popup = running_broker(&hub, secure_config("popup-1", ContextKind::Popup)).await;

    let vault = ChannelOptions {
        encrypted: true,
        ..ChannelOptions::default()
    };
    let mut popup_rx = subscribed_channel(&popup, "vault", vault.clone()).await;
    background.create_channel("vault", vault).await.unwrap();

    background
        .publish("vault", "card-on-file", json!({ "card": "4111111111111111" }))
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(1), popup_rx.recv())
        .await
        .expect("timeout waiting for encrypted delivery")
        .expect("collector closed");
    assert_eq!(received.payload["card"], "4111111111111111");
    assert!(received.metadata.encrypted);

    let frame = timeout(Duration::from_secs(1), tap.recv())
        .await
        .expect("timeout waiting for wire frame")
        .expect("hub closed");
    assert_eq!(frame.origin, "background");
    assert!(matches!(frame.payload, WirePayload::Encrypted(_)));
    let on_wire = serde_json::to_string(&frame).unwrap();
    assert!(
        !on_wire.contains("4111111111111111"),
        "card number must not appear in the serialized frame"
    );

    background.shutdown().await.unwrap();
    popup.shutdown().await.unwrap();
}

/// Test that a context holding the wrong master secret drops encrypted
/// traffic instead of delivering garbage.
#[tokio::test]
async fn test_wrong_secret_cannot_read_encrypted_traffic() {
    let hub = MemoryHub::default();

    let background = running_broker(
        &hub,
        secure_config("background", ContextKind::Background),
    )
    .await;
    let popup = running_broker(&hub, secure_config("popup-1", ContextKind::Popup)).await;

    let mut rogue_config = BrokerConfig::for_testing("popup-2", ContextKind::Popup);
    rogue_config.encryption_enabled = true;
    rogue_config.master_secret = b"ffffffffffffffffffffffffffffffff".to_vec();
    let rogue = running_broker(&hub, rogue_config).await;

    let vault = ChannelOptions {
        encrypted: true,
        ..ChannelOptions::default()
    };
    let mut popup_rx = subscribed_channel(&popup, "vault", vault.clone()).await;
    let mut rogue_rx = subscribed_channel(&rogue, "vault", vault.clone()).await;
    background.create_channel("vault", vault).await.unwrap();

    background
        .publish("vault", "secret", json!({ "token": "tk-123" }))
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(1), popup_rx.recv())
        .await
        .expect("timeout waiting for trusted delivery")
        .expect("collector closed");
    assert_eq!(received.payload["token"], "tk-123");

    // The trusted popup has already received; the rogue had the same frame
    // and the same amount of time.
    assert!(
        timeout(Duration::from_millis(150), rogue_rx.recv())
            .await
            .is_err(),
        "wrong-secret context must not receive the message"
    );

    background.shutdown().await.unwrap();
    popup.shutdown().await.unwrap();
    rogue.shutdown().await.unwrap();
}

// =============================================================================
// LARGE PAYLOADS
// =============================================================================

/// Test that a payload bigger than the chunk size crosses the hub as multiple
/// chunk frames and arrives whole.
#[tokio::test]
async fn test_large_payloads_chunk_across_the_hub() {
    let hub = MemoryHub::default();
    let mut tap = hub.endpoint().frames();

    // Compression off so the payload actually exceeds the chunk size.
    let chunked = CompressionConfig {
        enabled: false,
        threshold_bytes: 1024,
        level: 3,
        chunk_size: 1024,
    };
    let mut bg_config = BrokerConfig::for_testing("background", ContextKind::Background);
    bg_config.compression = chunked.clone();
    let mut popup_config = BrokerConfig::for_testing("popup-1", ContextKind::Popup);
    popup_config.compression = chunked;

    let background = running_broker(&hub, bg_config).await;
    let popup = running_broker(&hub, popup_config).await;

    let mut popup_rx = subscribed_channel(&popup, "blob", ChannelOptions::default()).await;
    background
        .create_channel("blob", ChannelOptions::default())
        .await
        .unwrap();

    let body = "x".repeat(8_000);
    background
        .publish("blob", "upload", json!({ "body": body }))
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(1), popup_rx.recv())
        .await
        .expect("timeout waiting for reassembled delivery")
        .expect("collector closed");
    assert_eq!(received.payload["body"].as_str().unwrap().len(), 8_000);

    let mut chunk_frames = 0;
    while let Ok(Ok(frame)) = timeout(Duration::from_millis(100), tap.recv()).await {
        if matches!(frame.payload, WirePayload::Chunk(_)) {
            chunk_frames += 1;
        }
    }
    assert!(
        chunk_frames >= 2,
        "an 8000 byte payload should not fit one 1024 byte frame, saw {chunk_frames} chunks"
    );

    background.shutdown().await.unwrap();
    popup.shutdown().await.unwrap();
}

// =============================================================================
// TRUST BOUNDARIES
// =============================================================================

/// Test that payloads published by a content-script context arrive scrubbed
/// in the privileged background context.
#[tokio::test]
async fn test_content_script_payloads_arrive_sanitized() {
    let hub = MemoryHub::default();

    let background = running_broker(
        &hub,
        BrokerConfig::for_testing("background", ContextKind::Background),
    )
    .await;
    let content = running_broker(
        &hub,
        BrokerConfig::for_testing("content-7", ContextKind::Content),
    )
    .await;

    let mut bg_rx = subscribed_channel(&background, "dom.events", ChannelOptions::default()).await;
    content
        .create_channel("dom.events", ChannelOptions::default())
        .await
        .unwrap();

    content
        .publish(
            "dom.events",
            "clicked",
            json!({
                "html": "<script>alert(1)</script><b>hello</b>",
                "href": "javascript:steal()",
            }),
        )
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(1), bg_rx.recv())
        .await
        .expect("timeout waiting for content-script delivery")
        .expect("collector closed");
    assert_eq!(received.payload["html"], "<b>hello</b>");
    assert_eq!(received.payload["href"], "steal()");
    assert_eq!(received.metadata.sender.kind, ContextKind::Content);

    background.shutdown().await.unwrap();
    content.shutdown().await.unwrap();
}

// =============================================================================
// BACKPRESSURE
// =============================================================================

/// Test that a receiver's rate limit caps what a flooding sender can deliver.
#[tokio::test]
async fn test_flooding_sender_is_throttled_at_the_receiver() {
    let hub = MemoryHub::default();

    let background = running_broker(
        &hub,
        BrokerConfig::for_testing("background", ContextKind::Background),
    )
    .await;
    let mut popup_config = BrokerConfig::for_testing("popup-1", ContextKind::Popup);
    popup_config.rate_limit.max_requests = 3;
    popup_config.rate_limit.window_ms = 60_000;
    popup_config.rate_limit.enabled = true;
    let popup = running_broker(&hub, popup_config).await;

    let mut popup_rx = subscribed_channel(&popup, "firehose", ChannelOptions::default()).await;
    background
        .create_channel("firehose", ChannelOptions::default())
        .await
        .unwrap();

    for n in 0..6 {
        background
            .publish("firehose", "sample", json!({ "n": n }))
            .await
            .unwrap();
    }

    let mut delivered = 0;
    while let Ok(Some(_)) = timeout(Duration::from_millis(150), popup_rx.recv()).await {
        delivered += 1;
    }
    assert_eq!(delivered, 3, "everything past the window limit is dropped");

    background.shutdown().await.unwrap();
    popup.shutdown().await.unwrap();
}

// =============================================================================
// MESH TOPOLOGY
// =============================================================================

/// Test that two non-background contexts talk directly over the hub without
/// the background broker relaying.
#[tokio::test]
async fn test_popups_talk_to_each_other_without_the_background() {
    let hub = MemoryHub::default();

    let popup_a = running_broker(&hub, BrokerConfig::for_testing("popup-a", ContextKind::Popup)).await;
    let popup_b = running_broker(&hub, BrokerConfig::for_testing("popup-b", ContextKind::Popup)).await;

    let mut b_rx = subscribed_channel(&popup_b, "notes", ChannelOptions::default()).await;
    popup_a
        .create_channel("notes", ChannelOptions::default())
        .await
        .unwrap();

    popup_a
        .publish("notes", "added", json!({ "text": "remember the milk" }))
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(1), b_rx.recv())
        .await
        .expect("timeout waiting for peer delivery")
        .expect("collector closed");
    assert_eq!(received.payload["text"], "remember the milk");
    assert_eq!(received.metadata.sender.id, "popup-a");

    popup_a.shutdown().await.unwrap();
    popup_b.shutdown().await.unwrap();
}
