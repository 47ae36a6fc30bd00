//! Route conditions.
//!
//! A condition is a field/operator/value triple evaluated against the
//! serialized message, so `payload.user.role`, `channel`, `type` and
//! `metadata.priority` are all addressable with dotted paths. A route fires
//! only when every one of its conditions holds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pattern::RoutePattern;

/// Comparison applied by a [`RouteCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    /// Field equals the value exactly.
    Equals,
    /// String field contains the value as a substring, or array field
    /// contains the value as an element.
    Contains,
    /// String field matches the value as a wildcard pattern.
    Matches,
    /// Numeric field is strictly greater than the value.
    Gt,
    /// Numeric field is strictly less than the value.
    Lt,
    /// Field equals one element of the value, which must be an array.
    In,
}

/// One predicate over a dotted path into the serialized message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteCondition {
    /// Dotted path, e.g. `payload.user.role` or `metadata.priority`.
    pub field: String,
    /// Comparison to apply.
    pub operator: ConditionOperator,
    /// Right-hand side of the comparison.
    pub value: Value,
}

impl RouteCondition {
    #[must_use]
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluates this condition against a serialized message.
    ///
    /// A missing field, or a field of the wrong shape for the operator,
    /// fails the condition rather than erroring.
    #[must_use]
    pub fn holds(&self, document: &Value) -> bool {
        let Some(field) = lookup(document, &self.field) else {
            return false;
        };

        match self.operator {
            ConditionOperator::Equals => field == &self.value,
            ConditionOperator::Contains => match (field, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
            ConditionOperator::Matches => match (field, &self.value) {
                (Value::String(input), Value::String(pattern)) => {
                    RoutePattern::parse(pattern).matches(input)
                }
                _ => false,
            },
            ConditionOperator::Gt => match (field.as_f64(), self.value.as_f64()) {
                (Some(left), Some(right)) => left > right,
                _ => false,
            },
            ConditionOperator::Lt => match (field.as_f64(), self.value.as_f64()) {
                (Some(left), Some(right)) => left < right,
                _ => false,
            },
            ConditionOperator::In => match &self.value {
                Value::Array(allowed) => allowed.contains(field),
                _ => false,
            },
        }
    }
}

/// Resolves a dotted path, descending through objects by key and arrays by
/// numeric index.
fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
