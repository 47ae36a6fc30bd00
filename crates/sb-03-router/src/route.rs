//! Route declarations.
//!
//! A [`RouteConfig`] maps a message shape (wildcard pattern plus conditions)
//! to a delivery target, with an optional transform and middleware chain.
//! Configs are built in code with the `with_*` builders; the routing table
//! keeps them sorted by descending priority.

use std::fmt;
use std::sync::Arc;

use shared_types::Message;

use crate::condition::RouteCondition;
use crate::middleware::RouteMiddleware;
use crate::pattern::RoutePattern;

/// Where a matching route delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Republish on a named channel through the local bus.
    Channel(String),
    /// Send to one addressable context over the transport.
    Context(String),
    /// Send to the privileged background context over the transport.
    Background,
    /// Send to every other context over the transport.
    AllContexts,
    /// Republish on one channel of a registered pool, selected by the load
    /// balancer.
    Pool(String),
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Channel(name) => write!(f, "channel:{name}"),
            RouteTarget::Context(id) => write!(f, "context:{id}"),
            RouteTarget::Background => write!(f, "background"),
            RouteTarget::AllContexts => write!(f, "all-contexts"),
            RouteTarget::Pool(name) => write!(f, "pool:{name}"),
        }
    }
}

/// Rewrites a message before it is routed.
pub trait MessageTransform: Send + Sync {
    fn transform(&self, message: Message) -> Result<Message, String>;
}

struct FnTransform<F>(F);

impl<F> MessageTransform for FnTransform<F>
where
    F: Fn(Message) -> Result<Message, String> + Send + Sync,
{
    fn transform(&self, message: Message) -> Result<Message, String> {
        (self.0)(message)
    }
}

/// Wraps a closure as a [`MessageTransform`].
pub fn transform_fn<F>(f: F) -> Arc<dyn MessageTransform>
where
    F: Fn(Message) -> Result<Message, String> + Send + Sync + 'static,
{
    Arc::new(FnTransform(f))
}

/// One routing rule.
#[derive(Clone)]
pub struct RouteConfig {
    /// Pattern over the routing key `"{channel}:{type}"`. Also the route's
    /// identity: adding a route with an existing pattern replaces it.
    pub pattern: RoutePattern,
    /// Delivery target.
    pub target: RouteTarget,
    /// Evaluation order; higher fires first.
    pub priority: u32,
    /// All conditions must hold for the route to fire.
    pub conditions: Vec<RouteCondition>,
    /// Optional rewrite applied before the middleware chain.
    pub transform: Option<Arc<dyn MessageTransform>>,
    /// Chain run between transform and delivery.
    pub middleware: Vec<Arc<dyn RouteMiddleware>>,
}

impl RouteConfig {
    #[must_use]
    pub fn new(pattern: &str, target: RouteTarget) -> Self {
        Self {
            pattern: RoutePattern::parse(pattern),
            target,
            priority: 0,
            conditions: Vec::new(),
            transform: None,
            middleware: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: RouteCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Arc<dyn MessageTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn RouteMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Whether this route fires for a message, given its routing key and
    /// serialized form.
    #[must_use]
    pub(crate) fn fires_for(&self, routing_key: &str, document: &serde_json::Value) -> bool {
        self.pattern.matches(routing_key)
            && self
                .conditions
                .iter()
                .all(|condition| condition.holds(document))
    }
}

impl fmt::Debug for RouteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteConfig")
            .field("pattern", &self.pattern.as_str())
            .field("target", &self.target)
            .field("priority", &self.priority)
            .field("conditions", &self.conditions.len())
            .field("transform", &self.transform.is_some())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}
