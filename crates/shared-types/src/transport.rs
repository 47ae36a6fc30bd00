//! # Transport Port
//!
//! The outbound port the broker uses to reach other execution contexts. The
//! host application supplies the real implementation (runtime messaging,
//! native ports, sockets); the broker runtime bundles an in-memory hub for
//! tests and single-process embedding.
//!
//! ## Link Guarantees
//!
//! Implementations provide at-least-once, unordered, best-effort delivery.
//! Everything stronger (retries, dead-lettering, replay rejection) is built
//! on top by the broker.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::wire::TransportFrame;

/// Errors surfaced by a transport adapter.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The link to the destination context is gone.
    #[error("Context disconnected: {0}")]
    Disconnected(String),
    /// A frame could not be serialized for the link.
    #[error("Frame encoding failed: {0}")]
    Encoding(String),
    /// The underlying channel rejected the frame.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Cross-context delivery port.
///
/// `frames()` hands out an independent receiver per call; a frame published
/// after the receiver was created is observed by every receiver (broadcast
/// semantics, bounded buffer — slow consumers observe a lag, not a block).
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Sends one frame toward its target contexts.
    async fn send(&self, frame: TransportFrame) -> Result<(), TransportError>;

    /// Subscribes to frames arriving at this context.
    fn frames(&self) -> broadcast::Receiver<TransportFrame>;
}
