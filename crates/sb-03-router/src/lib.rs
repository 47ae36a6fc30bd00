//! # Subsystem 3: Pattern Router
//!
//! Routes messages to channels, contexts, or balanced pools by wildcard
//! pattern and payload conditions.
//!
//! ## Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `pattern` | Parsed wildcard patterns over routing keys |
//! | `condition` | Field/operator/value predicates over serialized messages |
//! | `route` | Route declarations: pattern, target, transform, middleware |
//! | `middleware` | Chain-of-responsibility hooks with an explicit `Next` |
//! | `balancer` | Round-robin / random / least-connections pool selection |
//! | `breaker` | Per-route circuit breakers guarding failing targets |
//! | `router` | The route table and `route_message` dispatch |
//!
//! ## Rules
//!
//! - Routes are evaluated in descending priority order and **all** matching
//!   routes fire; result order follows evaluation order.
//! - Per fired route: transform, then middleware, then the circuit breaker,
//!   then delivery. An open circuit rejects before the target is touched.
//! - Route failures are isolated: one route's failure never stops another
//!   route of the same message.

pub mod balancer;
pub mod breaker;
pub mod condition;
pub mod middleware;
pub mod pattern;
pub mod route;
pub mod router;

pub use balancer::{BalanceStrategy, LoadBalancer};
pub use breaker::{CircuitBreakerConfig, CircuitBreakerManager, CircuitSnapshot, CircuitState};
pub use condition::{ConditionOperator, RouteCondition};
pub use middleware::{Next, RouteMiddleware};
pub use pattern::RoutePattern;
pub use route::{transform_fn, MessageTransform, RouteConfig, RouteTarget};
pub use router::{PatternRouter, RouteMetrics, RouterConfig, RoutingResult};

use thiserror::Error;

/// Errors from routing one message through one route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The route's circuit is open; the target was not touched.
    #[error("Circuit open for route '{route}'")]
    CircuitOpen { route: String },

    /// The route's transform rejected the message.
    #[error("Transform failed: {0}")]
    Transform(String),

    /// A middleware in the route's chain rejected the message.
    #[error("Middleware failed: {0}")]
    Middleware(String),

    /// The target could not be delivered to.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The route points at a pool with no usable members.
    #[error("No targets available in pool '{0}'")]
    PoolExhausted(String),
}
