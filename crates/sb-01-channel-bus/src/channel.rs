//! Channel options, bounded history, and per-channel bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use shared_types::{ContextKind, Message};

use crate::handler::Subscription;

/// History entries kept per channel unless overridden.
pub const DEFAULT_MAX_MESSAGES: usize = 1_000;

/// Per-channel delivery options.
///
/// Serializable so that `persistent` channels can have their configuration
/// (never their contents) restored across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOptions {
    /// Persist the channel's configuration across restarts.
    #[serde(default)]
    pub persistent: bool,
    /// History entries kept before the oldest is evicted.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Default time-to-live applied to history entries without their own.
    #[serde(rename = "ttl", default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// Keep messages inside this context; never hand them to the transport.
    #[serde(default)]
    pub exclusive: bool,
    /// Require payload encryption when messages leave this context.
    #[serde(default)]
    pub encrypted: bool,
    /// When set, only these sender kinds may publish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_senders: Option<Vec<ContextKind>>,
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            persistent: false,
            max_messages: DEFAULT_MAX_MESSAGES,
            ttl_ms: None,
            exclusive: false,
            encrypted: false,
            allowed_senders: None,
        }
    }
}

impl ChannelOptions {
    /// Options for a throwaway request/reply channel: context-local and
    /// sized for a handful of replies.
    #[must_use]
    pub(crate) fn reply_channel() -> Self {
        Self {
            exclusive: true,
            max_messages: 8,
            ..Self::default()
        }
    }
}

/// Public snapshot of one channel's state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    /// Channel name.
    pub name: String,
    /// The options the channel was created with.
    pub options: ChannelOptions,
    /// Live subscriptions on the channel.
    pub subscriber_count: usize,
    /// Messages published since creation.
    pub message_count: u64,
    /// Entries currently held in history.
    pub history_len: usize,
    /// Millisecond timestamp of channel creation.
    pub created_at: u64,
    /// Millisecond timestamp of the most recent publish.
    pub last_activity: u64,
}

/// Registry-internal channel state.
pub(crate) struct ChannelEntry {
    pub(crate) options: ChannelOptions,
    pub(crate) history: VecDeque<Message>,
    pub(crate) subscriptions: Vec<Subscription>,
    pub(crate) message_count: u64,
    pub(crate) created_at: u64,
    pub(crate) last_activity: u64,
}

impl ChannelEntry {
    pub(crate) fn new(options: ChannelOptions, now: u64) -> Self {
        Self {
            options,
            history: VecDeque::new(),
            subscriptions: Vec::new(),
            message_count: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// Appends a message to history, evicting past the bound and lazily
    /// purging expired entries.
    pub(crate) fn record(&mut self, message: Message, now: u64) {
        self.message_count += 1;
        self.last_activity = now;

        self.purge_expired(now);
        self.history.push_back(message);
        while self.history.len() > self.options.max_messages {
            self.history.pop_front();
        }
    }

    /// Drops history entries whose effective TTL (their own, falling back to
    /// the channel default) has elapsed.
    pub(crate) fn purge_expired(&mut self, now: u64) {
        let channel_ttl = self.options.ttl_ms;
        self.history.retain(|message| {
            let effective_ttl = message.metadata.ttl_ms.or(channel_ttl);
            match effective_ttl {
                Some(ttl) => now.saturating_sub(message.timestamp) <= ttl,
                None => true,
            }
        });
    }

    pub(crate) fn info(&self, name: &str) -> ChannelInfo {
        ChannelInfo {
            name: name.to_string(),
            options: self.options.clone(),
            subscriber_count: self.subscriptions.len(),
            message_count: self.message_count,
            history_len: self.history.len(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::SenderInfo;

    fn message_at(timestamp: u64, ttl_ms: Option<u64>) -> Message {
        let mut msg = Message::new(
            "updates",
            "tick",
            serde_json::json!({}),
            SenderInfo::new("background", ContextKind::Background),
        );
        msg.timestamp = timestamp;
        msg.metadata.ttl_ms = ttl_ms;
        msg
    }

    #[test]
    fn history_evicts_oldest_past_bound() {
        let mut entry = ChannelEntry::new(
            ChannelOptions {
                max_messages: 3,
                ..ChannelOptions::default()
            },
            0,
        );

        for i in 0..5 {
            entry.record(message_at(i, None), i);
        }

        assert_eq!(entry.history.len(), 3);
        assert_eq!(entry.message_count, 5);
        assert_eq!(entry.history.front().map(|m| m.timestamp), Some(2));
    }

    #[test]
    fn purge_respects_per_message_ttl() {
        let mut entry = ChannelEntry::new(ChannelOptions::default(), 0);
        entry.record(message_at(1_000, Some(100)), 1_000);
        entry.record(message_at(1_000, None), 1_000);

        entry.purge_expired(1_200);
        assert_eq!(entry.history.len(), 1);
        assert!(entry.history[0].metadata.ttl_ms.is_none());
    }

    #[test]
    fn channel_ttl_is_fallback_only() {
        let mut entry = ChannelEntry::new(
            ChannelOptions {
                ttl_ms: Some(100),
                ..ChannelOptions::default()
            },
            0,
        );
        // Has its own longer TTL, outlives the channel default.
        entry.record(message_at(1_000, Some(10_000)), 1_000);
        entry.record(message_at(1_000, None), 1_000);

        entry.purge_expired(1_500);
        assert_eq!(entry.history.len(), 1);
        assert_eq!(entry.history[0].metadata.ttl_ms, Some(10_000));
    }

    #[test]
    fn options_round_trip_with_camel_case_names() {
        let options = ChannelOptions {
            persistent: true,
            max_messages: 50,
            ttl_ms: Some(5_000),
            exclusive: false,
            encrypted: true,
            allowed_senders: Some(vec![ContextKind::Background, ContextKind::Popup]),
        };
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["maxMessages"], 50);
        assert_eq!(value["ttl"], 5_000);
        assert_eq!(value["allowedSenders"][0], "background");

        let parsed: ChannelOptions = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.max_messages, 50);
        assert!(parsed.encrypted);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let parsed: ChannelOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.max_messages, DEFAULT_MAX_MESSAGES);
        assert!(!parsed.persistent);
        assert!(parsed.allowed_senders.is_none());
    }
}
