//! Broker configuration from defaults, code, or environment variables.

use std::env;
use std::fmt;

use sb_02_delivery_queue::DeliveryQueueConfig;
use sb_03_router::RouterConfig;
use sb_04_security::RateLimitConfig;
use sb_05_compression::CompressionConfig;
use shared_types::{CipherAlgorithm, ContextKind};

use crate::BrokerError;

/// Everything a [`Broker`](crate::Broker) needs to come up in one context.
///
/// One broker instance serves one execution context. The identity fields
/// (`context_id`, `context_kind`) decide which inbound frames this instance
/// accepts and how its outbound traffic is labelled; the subsystem sections
/// are handed to the respective subsystem unchanged.
#[derive(Clone)]
pub struct BrokerConfig {
    /// Identity this broker sends and receives under ("background",
    /// "popup-1", "content-42", ...). Must be unique per transport hub.
    pub context_id: String,
    /// Privilege class of this context.
    pub context_kind: ContextKind,
    /// Encrypt outbound frames for messages that ask for it, and decrypt
    /// inbound encrypted frames. Requires a non-trivial `master_secret`.
    pub encryption_enabled: bool,
    /// Shared secret the per-party key ring derives from.
    pub master_secret: Vec<u8>,
    /// AEAD cipher for outbound encrypted frames.
    pub cipher_algorithm: CipherAlgorithm,
    /// Inbound messages older than this are dropped.
    pub max_message_age_ms: u64,
    /// Partial chunk sets older than this are evicted.
    pub chunk_max_age_ms: u64,
    /// Retry queue tuning.
    pub queue: DeliveryQueueConfig,
    /// Pattern router tuning.
    pub router: RouterConfig,
    /// Per-sender inbound rate limiting.
    pub rate_limit: RateLimitConfig,
    /// Outbound payload compression and chunking.
    pub compression: CompressionConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            context_id: "background".to_string(),
            context_kind: ContextKind::Background,
            encryption_enabled: false,
            master_secret: Vec::new(),
            cipher_algorithm: CipherAlgorithm::default(),
            max_message_age_ms: 60_000,
            chunk_max_age_ms: 30_000,
            queue: DeliveryQueueConfig::default(),
            router: RouterConfig::default(),
            rate_limit: RateLimitConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

// The master secret never goes to logs, not even at debug level.
impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("context_id", &self.context_id)
            .field("context_kind", &self.context_kind)
            .field("encryption_enabled", &self.encryption_enabled)
            .field(
                "master_secret",
                &format_args!("<{} bytes>", self.master_secret.len()),
            )
            .field("cipher_algorithm", &self.cipher_algorithm)
            .field("max_message_age_ms", &self.max_message_age_ms)
            .field("chunk_max_age_ms", &self.chunk_max_age_ms)
            .field("queue", &self.queue)
            .field("router", &self.router)
            .field("rate_limit", &self.rate_limit)
            .field("compression", &self.compression)
            .finish()
    }
}

impl BrokerConfig {
    /// Create configuration from environment variables, with defaults for
    /// anything unset.
    ///
    /// # Environment Variables
    ///
    /// - `SB_CONTEXT_ID`: context identity (default: background)
    /// - `SB_CONTEXT_KIND`: background | content | popup | options |
    ///   devtools | tab (default: background)
    /// - `SB_ENCRYPTION_ENABLED`: encrypt marked messages (default: false)
    /// - `SB_MASTER_SECRET`: shared secret as a UTF-8 string
    /// - `SB_MAX_MESSAGE_AGE_MS`: inbound freshness window (default: 60000)
    /// - `SB_COMPRESSION_THRESHOLD`: compression cutoff in bytes
    /// - `SB_RATE_LIMIT_MAX`: inbound messages per sender per window
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = env::var("SB_CONTEXT_ID") {
            config.context_id = id;
        }
        if let Ok(kind) = env::var("SB_CONTEXT_KIND") {
            if let Some(parsed) = parse_context_kind(&kind) {
                config.context_kind = parsed;
            }
        }
        config.encryption_enabled = env::var("SB_ENCRYPTION_ENABLED")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);
        if let Ok(secret) = env::var("SB_MASTER_SECRET") {
            config.master_secret = secret.into_bytes();
        }
        if let Some(age) = env_u64("SB_MAX_MESSAGE_AGE_MS") {
            config.max_message_age_ms = age;
        }
        if let Some(threshold) = env_u64("SB_COMPRESSION_THRESHOLD") {
            config.compression.threshold_bytes = threshold as usize;
        }
        if let Some(max) = env_u64("SB_RATE_LIMIT_MAX") {
            config.rate_limit.max_requests = max as u32;
        }

        config
    }

    /// Configuration for a named context, otherwise defaults.
    pub fn for_context(context_id: &str, context_kind: ContextKind) -> Self {
        Self {
            context_id: context_id.to_string(),
            context_kind,
            ..Self::default()
        }
    }

    /// Short windows and small limits for exercising runtime paths in tests.
    #[must_use]
    pub fn for_testing(context_id: &str, context_kind: ContextKind) -> Self {
        Self {
            context_id: context_id.to_string(),
            context_kind,
            queue: DeliveryQueueConfig::for_testing(),
            router: RouterConfig::for_testing(),
            chunk_max_age_ms: 500,
            ..Self::default()
        }
    }

    /// Rejects configurations the broker cannot safely run with.
    pub fn validate(&self) -> Result<(), crate::BrokerError> {
        if self.context_id.is_empty() {
            return Err(BrokerError::Config("context_id must not be empty".into()));
        }
        if self.encryption_enabled {
            if self.master_secret.len() < 16 {
                return Err(BrokerError::Config(
                    "encryption requires a master secret of at least 16 bytes".into(),
                ));
            }
            if self.master_secret.iter().all(|&b| b == 0) {
                return Err(BrokerError::Config(
                    "encryption requires a non-zero master secret".into(),
                ));
            }
        }
        if self.max_message_age_ms == 0 {
            return Err(BrokerError::Config(
                "max_message_age_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_context_kind(value: &str) -> Option<ContextKind> {
    match value.to_lowercase().as_str() {
        "background" => Some(ContextKind::Background),
        "content" => Some(ContextKind::Content),
        "popup" => Some(ContextKind::Popup),
        "options" => Some(ContextKind::Options),
        "devtools" => Some(ContextKind::Devtools),
        "tab" => Some(ContextKind::Tab),
        _ => None,
    }
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
