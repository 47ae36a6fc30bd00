//! The handler port and subscription bookkeeping.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use shared_types::Message;

use crate::filter::SubscriptionFilter;

/// Receives messages delivered on a subscribed channel.
///
/// Handlers run concurrently during a publish; an error from one never
/// affects delivery to the others. The error string is retained for
/// diagnostics and retry bookkeeping.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one delivered message.
    async fn handle(&self, message: Message) -> Result<(), String>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), String> {
        (self.f)(message).await
    }
}

/// Wraps an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Registry-internal subscription record.
pub(crate) struct Subscription {
    pub(crate) id: Uuid,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) filter: SubscriptionFilter,
}

/// Opaque handle identifying one subscription.
///
/// Pass it back to `unsubscribe` to stop delivery. Deleting the channel
/// invalidates the handle as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub(crate) id: Uuid,
    pub(crate) channel: String,
}

impl SubscriptionHandle {
    /// The channel this subscription is bound to.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The subscription's unique id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }
}
