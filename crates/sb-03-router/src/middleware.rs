//! Route middleware.
//!
//! Middleware run after a route's transform and before target delivery, as a
//! chain of responsibility: each middleware receives the message and an
//! explicit [`Next`] continuation for the rest of the chain. Returning an
//! error aborts the route; skipping `next` skips the remaining middleware but
//! the returned message still proceeds to delivery.

use std::sync::Arc;

use async_trait::async_trait;

use shared_types::Message;

/// One link in a route's middleware chain.
#[async_trait]
pub trait RouteMiddleware: Send + Sync {
    /// Processes the message, calling `next.run(message)` to continue the
    /// chain. The returned message is what delivery will see.
    async fn handle(&self, message: Message, next: Next<'_>) -> Result<Message, String>;
}

/// Continuation over the remaining middleware of a chain.
pub struct Next<'a> {
    chain: &'a [Arc<dyn RouteMiddleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn RouteMiddleware>]) -> Self {
        Self { chain }
    }

    /// Runs the rest of the chain. With no middleware left, the message
    /// passes through unchanged.
    pub async fn run(self, message: Message) -> Result<Message, String> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(message, Next { chain: rest }).await,
            None => Ok(message),
        }
    }
}
