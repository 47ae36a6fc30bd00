//! Subscription filters.
//!
//! A filter is a conjunction: a message is delivered only when every provided
//! clause matches. Empty clause lists match everything, so the default filter
//! accepts every message on the channel.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use shared_types::{ContextKind, Message, Priority};

/// Arbitrary predicate clause.
type Predicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Conjunctive per-subscription delivery filter.
#[derive(Clone, Default)]
pub struct SubscriptionFilter {
    /// Accept only these message kinds. Empty means all kinds.
    pub kinds: Vec<String>,
    /// Accept only these sender ids. Empty means all senders.
    pub sender_ids: Vec<String>,
    /// Accept only these sender context kinds. Empty means all kinds.
    pub sender_kinds: Vec<ContextKind>,
    /// Accept only messages at or above this priority.
    pub min_priority: Option<Priority>,
    /// Every listed header must be present with exactly this value.
    pub headers: HashMap<String, String>,
    /// Accept only messages carrying this correlation id.
    pub correlation_id: Option<Uuid>,
    /// Arbitrary final clause.
    predicate: Option<Predicate>,
}

impl SubscriptionFilter {
    /// A filter that accepts every message.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts delivery to one message kind.
    #[must_use]
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kinds: vec![kind.into()],
            ..Self::default()
        }
    }

    /// Adds an accepted message kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kinds.push(kind.into());
        self
    }

    /// Adds an accepted sender id.
    #[must_use]
    pub fn with_sender_id(mut self, id: impl Into<String>) -> Self {
        self.sender_ids.push(id.into());
        self
    }

    /// Adds an accepted sender context kind.
    #[must_use]
    pub fn with_sender_kind(mut self, kind: ContextKind) -> Self {
        self.sender_kinds.push(kind);
        self
    }

    /// Requires at least this priority.
    #[must_use]
    pub fn with_min_priority(mut self, priority: Priority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Requires a header to be present with exactly this value.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Requires this correlation id.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Adds an arbitrary predicate clause.
    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Whether every provided clause matches `message`.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        let kind_match = self.kinds.is_empty() || self.kinds.iter().any(|k| *k == message.kind);

        let sender_id_match = self.sender_ids.is_empty()
            || self
                .sender_ids
                .iter()
                .any(|id| *id == message.metadata.sender.id);

        let sender_kind_match = self.sender_kinds.is_empty()
            || self.sender_kinds.contains(&message.metadata.sender.kind);

        let priority_match = self
            .min_priority
            .map_or(true, |min| message.metadata.priority >= min);

        let headers_match = self
            .headers
            .iter()
            .all(|(key, value)| message.metadata.headers.get(key) == Some(value));

        let correlation_match = match self.correlation_id {
            Some(wanted) => message.metadata.correlation_id == Some(wanted),
            None => true,
        };

        let predicate_match = self.predicate.as_ref().map_or(true, |p| p(message));

        kind_match
            && sender_id_match
            && sender_kind_match
            && priority_match
            && headers_match
            && correlation_match
            && predicate_match
    }
}

impl std::fmt::Debug for SubscriptionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionFilter")
            .field("kinds", &self.kinds)
            .field("sender_ids", &self.sender_ids)
            .field("sender_kinds", &self.sender_kinds)
            .field("min_priority", &self.min_priority)
            .field("headers", &self.headers)
            .field("correlation_id", &self.correlation_id)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
