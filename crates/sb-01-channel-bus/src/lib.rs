//! # Subsystem 1: Channel Registry & Message Bus
//!
//! The orchestrating subsystem: owns named channels and their subscriptions,
//! delivers published messages to matching handlers, and implements
//! broadcast and request/reply on top of the same publish primitive.
//!
//! ## Components
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `channel` | Channel options, bounded history, per-channel bookkeeping |
//! | `filter` | Conjunctive subscription filters |
//! | `handler` | The handler port and subscription handles |
//! | `bus` | The [`MessageBus`] itself |
//!
//! ## Design Principles
//!
//! - **Scatter/Gather Delivery**: matching handlers are snapshotted under the
//!   registry lock, then dispatched concurrently with the lock released. One
//!   handler's failure never affects another.
//! - **Best-Effort Broadcast**: per-channel broadcast failures are logged and
//!   swallowed, never aggregated into one error.
//! - **Leak-Free Request/Reply**: the throwaway reply channel is deleted on
//!   success and on timeout alike.

pub mod bus;
pub mod channel;
pub mod filter;
pub mod handler;

pub use bus::{BusStatsSnapshot, MessageBus};
pub use channel::{ChannelInfo, ChannelOptions, DEFAULT_MAX_MESSAGES};
pub use filter::SubscriptionFilter;
pub use handler::{handler_fn, MessageHandler, SubscriptionHandle};

use thiserror::Error;
use uuid::Uuid;

use shared_types::ContextKind;

/// Errors produced by bus operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// The named channel is not registered.
    #[error("Channel '{0}' not found")]
    ChannelNotFound(String),

    /// A channel with this name already exists.
    #[error("Channel '{0}' already exists")]
    ChannelExists(String),

    /// The channel's allow-list excludes the message's sender kind.
    #[error("Sender kind '{kind}' not allowed on channel '{channel}'")]
    SenderNotAllowed {
        channel: String,
        kind: ContextKind,
    },

    /// No reply arrived within the request timeout.
    #[error("Request on channel '{channel}' timed out after {timeout_ms}ms")]
    RequestTimeout { channel: String, timeout_ms: u64 },

    /// `respond` was called on a message that carries no `reply_to`.
    #[error("Message {0} carries no reply channel")]
    NoReplyChannel(Uuid),
}
