//! Base value union
//!
//! Everything an expression can evaluate to. Primitive variants render
//! into query urls during embedded substitution; the structured
//! variants (resources, item references) drive fan-out and answer
//! extraction in the resolver.

use serde::{Deserialize, Serialize};

use crate::form::FormItem;
use crate::resource::Resource;
use crate::response::ResponseItem;

/// A single evaluated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Date(String),
    Resource(Resource),
    FormItem(FormItem),
    ResponseItem(ResponseItem),
}

impl Value {
    /// Primitive values are stored directly on resolution; a multi-
    /// element result of non-primitive values triggers fan-out instead.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Bool(_)
                | Value::Integer(_)
                | Value::Decimal(_)
                | Value::Text(_)
                | Value::Date(_)
        )
    }

    /// Textual rendering used when splicing an embedded expression
    /// result into surrounding query text. Structured values render to
    /// their id where one exists.
    pub fn render(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) | Value::Date(s) => s.clone(),
            Value::Resource(r) => r.id().unwrap_or_default().to_string(),
            Value::FormItem(item) => item.link_id.clone(),
            Value::ResponseItem(item) => item.link_id.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Resource> for Value {
    fn from(r: Resource) -> Self {
        Value::Resource(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitive_partition() {
        assert!(Value::Integer(3).is_primitive());
        assert!(Value::Text("x".into()).is_primitive());
        assert!(!Value::Resource(Resource::new("Patient")).is_primitive());
        assert!(!Value::ResponseItem(ResponseItem::empty("q1")).is_primitive());
    }

    #[test]
    fn test_render_primitives() {
        assert_eq!(Value::Integer(42).render(), "42");
        assert_eq!(Value::Bool(true).render(), "true");
        assert_eq!(Value::Text("P1".into()).render(), "P1");
    }

    #[test]
    fn test_render_resource_uses_id() {
        let r = Resource::from_json(json!({"resourceType": "Patient", "id": "P7"}));
        assert_eq!(Value::Resource(r).render(), "P7");
        assert_eq!(Value::Resource(Resource::new("Patient")).render(), "");
    }
}
