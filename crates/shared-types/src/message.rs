//! # Core Message Model
//!
//! Defines the [`Message`] envelope that every broker subsystem operates on,
//! together with its metadata and sender identity types.
//!
//! ## Design Principles
//!
//! - **Immutability**: A published message is never mutated in place; transforms
//!   and retries always work on copies.
//! - **Envelope Authority**: `metadata.sender` is the sole source of truth for
//!   the sender's identity. Payloads MUST NOT duplicate it.
//! - **Wire Compatibility**: Field names on the wire follow the host
//!   application's JSON conventions (`type`, camelCase metadata keys).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Returns the current unix time in milliseconds.
///
/// All broker timestamps (message creation, retry scheduling, history TTLs)
/// use millisecond precision to match the host application's clock.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The kind of execution context a message originates from.
///
/// Contexts are isolated from one another; the broker's transport adapter is
/// the only path between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    /// The long-lived privileged context.
    Background,
    /// A script injected into a host page.
    Content,
    /// The popup UI context.
    Popup,
    /// The options/settings page context.
    Options,
    /// A devtools panel context.
    Devtools,
    /// A plain tab page owned by the application.
    Tab,
}

impl ContextKind {
    /// Returns true for contexts that execute inside untrusted page content.
    #[must_use]
    pub fn is_untrusted(&self) -> bool {
        matches!(self, ContextKind::Content | ContextKind::Tab)
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContextKind::Background => "background",
            ContextKind::Content => "content",
            ContextKind::Popup => "popup",
            ContextKind::Options => "options",
            ContextKind::Devtools => "devtools",
            ContextKind::Tab => "tab",
        };
        write!(f, "{s}")
    }
}

/// Identity of the execution context that published a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    /// Stable identifier of the sending context (e.g. `"background"`,
    /// `"popup-3f2a"`, `"content-tab41"`).
    pub id: String,
    /// The kind of context this sender runs in.
    #[serde(rename = "type")]
    pub kind: ContextKind,
    /// Host tab id, when the sender is attached to a tab.
    #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<u32>,
    /// Frame id within the tab, for sub-frame content scripts.
    #[serde(rename = "frameId", default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<u32>,
    /// Page URL the sender was loaded into, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SenderInfo {
    /// Convenience constructor for contexts without tab attachment.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ContextKind) -> Self {
        Self {
            id: id.into(),
            kind,
            tab_id: None,
            frame_id: None,
            url: None,
        }
    }
}

/// Message priority, ordered from lowest to highest.
///
/// Priority does not reorder delivery (history keeps publish order); it exists
/// for subscription filtering and routing decisions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background housekeeping traffic.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// User-visible operations.
    High,
    /// Must-not-drop control traffic.
    Urgent,
}

/// Metadata carried alongside every message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Identity of the publishing context.
    pub sender: SenderInfo,
    /// Message priority (filtering/routing hint).
    #[serde(default)]
    pub priority: Priority,
    /// Time-to-live in milliseconds. Expired messages are purged from history
    /// and dropped by the delivery queue.
    #[serde(rename = "ttl", default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// Correlates request/response pairs. Responses echo the request's id.
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<Uuid>,
    /// Channel a response should be published to. Present on requests only.
    #[serde(rename = "replyTo", default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Free-form routing/filtering headers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Remaining redelivery budget. Decremented each time the message is
    /// handed to the delivery queue; zero means failures are terminal.
    #[serde(rename = "retryCount", default)]
    pub retry_count: u32,
    /// Whether the payload must be encrypted before leaving this context.
    #[serde(default)]
    pub encrypted: bool,
}

impl MessageMetadata {
    /// Metadata with defaults for the given sender.
    #[must_use]
    pub fn for_sender(sender: SenderInfo) -> Self {
        Self {
            sender,
            priority: Priority::Normal,
            ttl_ms: None,
            correlation_id: None,
            reply_to: None,
            headers: HashMap::new(),
            retry_count: 0,
            encrypted: false,
        }
    }
}

/// The universal broker message.
///
/// Everything that moves through the bus, the router, the delivery queue, and
/// the wire pipeline is one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier, generated at publish time.
    pub id: Uuid,
    /// The channel this message was published on.
    pub channel: String,
    /// Application-defined message type within the channel.
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary JSON payload.
    pub payload: serde_json::Value,
    /// Unix timestamp in milliseconds at publish time.
    pub timestamp: u64,
    /// Delivery metadata.
    pub metadata: MessageMetadata,
}

impl Message {
    /// Creates a message with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
        sender: SenderInfo,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            kind: kind.into(),
            payload,
            timestamp: now_millis(),
            metadata: MessageMetadata::for_sender(sender),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.priority = priority;
        self
    }

    /// Sets the time-to-live in milliseconds.
    #[must_use]
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.metadata.ttl_ms = Some(ttl_ms);
        self
    }

    /// Sets the correlation id (request/response pairing).
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.metadata.correlation_id = Some(correlation_id);
        self
    }

    /// Sets the reply channel for a request.
    #[must_use]
    pub fn with_reply_to(mut self, channel: impl Into<String>) -> Self {
        self.metadata.reply_to = Some(channel.into());
        self
    }

    /// Sets the redelivery budget.
    #[must_use]
    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.metadata.retry_count = retry_count;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.headers.insert(key.into(), value.into());
        self
    }

    /// Marks the payload for encryption in transit.
    #[must_use]
    pub fn with_encryption(mut self) -> Self {
        self.metadata.encrypted = true;
        self
    }

    /// The routing key used by the pattern router: `"{channel}:{type}"`.
    #[must_use]
    pub fn routing_key(&self) -> String {
        format!("{}:{}", self.channel, self.kind)
    }

    /// Whether the message's TTL has elapsed at `now` (milliseconds).
    ///
    /// Messages without a TTL never expire.
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        match self.metadata.ttl_ms {
            Some(ttl) => now.saturating_sub(self.timestamp) > ttl,
            None => false,
        }
    }
}
