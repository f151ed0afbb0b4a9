//! JSON-backed resources
//!
//! External data arrives as resources: JSON objects with a type tag and
//! an optional id. The resolver never interprets resource contents
//! beyond these two fields; path evaluation over resource bodies is
//! delegated.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

/// A single external resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource {
    body: Json,
}

impl Resource {
    /// An empty instance of the given type, used when extraction
    /// rehydration finds no stored counterpart.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            body: json!({ "resourceType": resource_type.into() }),
        }
    }

    /// Wrap an existing JSON body. Non-object bodies are accepted; they
    /// simply have no type or id.
    pub fn from_json(body: Json) -> Self {
        Self { body }
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.body.get("resourceType").and_then(Json::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.body.get("id").and_then(Json::as_str)
    }

    /// Direct field access on the resource body.
    pub fn field(&self, name: &str) -> Option<&Json> {
        self.body.get(name)
    }

    pub fn body(&self) -> &Json {
        &self.body
    }
}
