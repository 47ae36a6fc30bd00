//! # Switchboard Subsystem Benchmarks
//!
//! Performance validation for the hot paths every message crosses:
//!
//! | Subsystem | Operation | Expectation |
//! |-----------|-----------|-------------|
//! | sb-01 Channel Bus | Filter evaluation | sub-microsecond |
//! | sb-03 Pattern Router | Pattern match over a rule set | linear in rules, cheap per rule |
//! | sb-04 Security | AEAD seal/open round trip | dominated by payload size |
//! | sb-04 Security | HMAC sign/verify | single-digit microseconds |
//! | sb-05 Compression | 64 KiB compress | worthwhile below wire latency |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::RngCore;
use serde_json::json;
use uuid::Uuid;

use sb_01_channel_bus::SubscriptionFilter;
use sb_03_router::{ConditionOperator, RouteCondition, RoutePattern};
use sb_04_security::{
    sanitize_value, sign_bytes, verify_bytes, DerivedKeyring, FixedWindowRateLimiter, Keyring,
    MessageCipher, RateLimitConfig, SecretKey,
};
use sb_05_compression::{reassemble, split_into_chunks, CompressionConfig, ZstdCompressor};
use shared_types::{CipherAlgorithm, ContextKind, Message, Priority, SenderInfo};

// ============================================================================
// Shared fixtures
// ============================================================================

fn sample_message(channel: &str, kind: &str) -> Message {
    Message::new(
        channel,
        kind,
        json!({ "user": { "id": 7, "role": "admin" }, "count": 41 }),
        SenderInfo::new("background", ContextKind::Background),
    )
}

/// JSON-ish repetitive bytes that zstd shrinks well.
fn compressible_payload(len: usize) -> Vec<u8> {
    let unit = br#"{"event":"telemetry","cpu":42,"memory":1024,"tags":["a","b"]},"#;
    unit.iter().copied().cycle().take(len).collect()
}

/// Random bytes that zstd cannot shrink.
fn incompressible_payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

// ============================================================================
// SB-03: Pattern Router Benchmarks
// Every published message is tested against every installed route.
// ============================================================================

fn bench_route_pattern_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("sb-03-pattern-router");

    let literal = RoutePattern::parse("api.users:created");
    let wildcard = RoutePattern::parse("api.*:*");
    group.bench_function("literal_match", |b| {
        b.iter(|| black_box(literal.matches(black_box("api.users:created"))))
    });
    group.bench_function("wildcard_match", |b| {
        b.iter(|| black_box(wildcard.matches(black_box("api.users:created"))))
    });
    group.bench_function("wildcard_miss", |b| {
        b.iter(|| black_box(wildcard.matches(black_box("internal.audit:created"))))
    });

    // A routing table scan: one key against N installed patterns.
    for rules in [10usize, 100, 1_000] {
        let table: Vec<RoutePattern> = (0..rules)
            .map(|n| RoutePattern::parse(&format!("service.{n}.*:*")))
            .collect();
        group.throughput(Throughput::Elements(rules as u64));
        group.bench_with_input(BenchmarkId::new("table_scan", rules), &table, |b, table| {
            b.iter(|| {
                let mut hits = 0u32;
                for pattern in table {
                    if pattern.matches("service.7.jobs:created") {
                        hits += 1;
                    }
                }
                black_box(hits)
            })
        });
    }

    group.finish();
}

fn bench_route_condition_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("sb-03-route-conditions");

    let document = serde_json::to_value(sample_message("api.users", "created")).unwrap();
    let equals = RouteCondition::new("payload.user.role", ConditionOperator::Equals, json!("admin"));
    let ordering = RouteCondition::new("payload.count", ConditionOperator::Gt, json!(40));
    let missing = RouteCondition::new("payload.absent.deep", ConditionOperator::Equals, json!(1));

    group.bench_function("dotted_path_equals", |b| {
        b.iter(|| black_box(equals.holds(black_box(&document))))
    });
    group.bench_function("numeric_ordering", |b| {
        b.iter(|| black_box(ordering.holds(black_box(&document))))
    });
    group.bench_function("missing_field", |b| {
        b.iter(|| black_box(missing.holds(black_box(&document))))
    });

    group.finish();
}

// ============================================================================
// SB-04: Security Benchmarks
// Seal/open runs on every encrypted frame; HMAC on every envelope.
// ============================================================================

fn bench_message_sealing(c: &mut Criterion) {
    let mut group = c.benchmark_group("sb-04-cipher");
    group.measurement_time(Duration::from_secs(10));

    let keyring: Arc<dyn Keyring> =
        Arc::new(DerivedKeyring::new(b"benchmark-master-secret-32-bytes".to_vec()));

    for size in [256usize, 4_096, 65_536] {
        let plaintext = compressible_payload(size);
        group.throughput(Throughput::Bytes(size as u64));

        let chacha = MessageCipher::new(Arc::clone(&keyring), CipherAlgorithm::XChaCha20Poly1305);
        group.bench_with_input(
            BenchmarkId::new("xchacha20_seal", size),
            &plaintext,
            |b, plaintext| b.iter(|| black_box(chacha.seal(plaintext, "popup-1").unwrap())),
        );
        let envelope = chacha.seal(&plaintext, "popup-1").unwrap();
        group.bench_with_input(
            BenchmarkId::new("xchacha20_open", size),
            &envelope,
            |b, envelope| b.iter(|| black_box(chacha.open(envelope, "popup-1").unwrap())),
        );

        let aes = MessageCipher::new(Arc::clone(&keyring), CipherAlgorithm::Aes256Gcm);
        group.bench_with_input(
            BenchmarkId::new("aes256gcm_seal", size),
            &plaintext,
            |b, plaintext| b.iter(|| black_box(aes.seal(plaintext, "popup-1").unwrap())),
        );
    }

    group.finish();
}

fn bench_envelope_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("sb-04-signing");

    let key = SecretKey::generate();
    let body = compressible_payload(1_024);
    let signature = sign_bytes(&body, &key);

    group.throughput(Throughput::Bytes(1_024));
    group.bench_function("hmac_sign_1k", |b| {
        b.iter(|| black_box(sign_bytes(black_box(&body), &key)))
    });
    group.bench_function("hmac_verify_1k", |b| {
        b.iter(|| black_box(verify_bytes(black_box(&body), &signature, &key)))
    });

    group.finish();
}

fn bench_payload_sanitization(c: &mut Criterion) {
    let mut group = c.benchmark_group("sb-04-sanitizer");

    let clean = json!({
        "title": "quarterly report",
        "rows": [{ "region": "emea", "total": 1204 }, { "region": "apac", "total": 998 }],
    });
    let dirty = json!({
        "title": "<script>alert(1)</script>Report",
        "rows": [{ "link": "javascript:steal()", "html": "<img src=x onerror=alert(1)>" }],
    });

    group.bench_function("clean_payload", |b| {
        b.iter(|| black_box(sanitize_value(black_box(&clean))))
    });
    group.bench_function("dirty_payload", |b| {
        b.iter(|| black_box(sanitize_value(black_box(&dirty))))
    });

    group.finish();
}

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("sb-04-rate-limiter");

    let limiter = FixedWindowRateLimiter::new(RateLimitConfig {
        max_requests: u32::MAX,
        window_ms: 60_000,
        enabled: true,
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("check_single_sender", |b| {
        let mut now = 0u64;
        b.iter(|| {
            now += 1;
            black_box(limiter.check("background", now).is_ok())
        })
    });

    group.finish();
}

// ============================================================================
// SB-05: Compression Benchmarks
// Threshold compression and chunking bound the cost of large payloads.
// ============================================================================

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("sb-05-compression");
    group.measurement_time(Duration::from_secs(10));

    let compressor = ZstdCompressor::new(CompressionConfig {
        threshold_bytes: 1_024,
        level: 3,
        enabled: true,
        chunk_size: 512 * 1024,
    });

    for size in [4_096usize, 65_536] {
        let compressible = compressible_payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("compress_worthwhile", size),
            &compressible,
            |b, data| b.iter(|| black_box(compressor.compress_if_worthwhile(data).unwrap())),
        );

        let envelope = compressor
            .compress_if_worthwhile(&compressible)
            .unwrap()
            .expect("repetitive data should compress");
        group.bench_with_input(
            BenchmarkId::new("expand", size),
            &envelope,
            |b, envelope| b.iter(|| black_box(compressor.expand(envelope).unwrap())),
        );

        // Random bytes make the gain check bail out without an envelope.
        let incompressible = incompressible_payload(size);
        group.bench_with_input(
            BenchmarkId::new("compress_not_worthwhile", size),
            &incompressible,
            |b, data| b.iter(|| black_box(compressor.compress_if_worthwhile(data).unwrap())),
        );
    }

    group.finish();
}

fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("sb-05-chunking");

    let data = compressible_payload(256 * 1024);
    let chunk_size = 16 * 1024;

    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("split_256k_into_16k", |b| {
        b.iter(|| black_box(split_into_chunks(Uuid::new_v4(), &data, chunk_size)))
    });

    let chunks = split_into_chunks(Uuid::new_v4(), &data, chunk_size);
    group.bench_function("reassemble_256k", |b| {
        b.iter(|| black_box(reassemble(chunks.clone()).unwrap()))
    });

    group.finish();
}

// ============================================================================
// SB-01: Channel Bus Benchmarks
// Filters run once per subscription on every delivery.
// ============================================================================

fn bench_subscription_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("sb-01-filters");

    let mut message = sample_message("api.users", "created");
    message.metadata.priority = Priority::High;

    let pass_all = SubscriptionFilter::all();
    let composite = SubscriptionFilter::kind("created")
        .with_sender_kind(ContextKind::Background)
        .with_min_priority(Priority::Normal);
    let miss = SubscriptionFilter::kind("deleted");

    group.throughput(Throughput::Elements(1));
    group.bench_function("pass_all", |b| {
        b.iter(|| black_box(pass_all.matches(black_box(&message))))
    });
    group.bench_function("composite_hit", |b| {
        b.iter(|| black_box(composite.matches(black_box(&message))))
    });
    group.bench_function("kind_miss", |b| {
        b.iter(|| black_box(miss.matches(black_box(&message))))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_route_pattern_matching,
    bench_route_condition_evaluation,
    bench_message_sealing,
    bench_envelope_signing,
    bench_payload_sanitization,
    bench_rate_limiter,
    bench_compression,
    bench_chunking,
    bench_subscription_filters
);
criterion_main!(benches);
