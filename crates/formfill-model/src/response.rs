//! Response tree
//!
//! Responses mirror form items by link-id. Each response item carries
//! zero or more answers; an answer holds a value and may nest further
//! response items.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A (possibly partial) response to a form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub items: Vec<ResponseItem>,
}

impl Response {
    /// Top-level response items matching a link-id, in order. A repeated
    /// item yields multiple entries.
    pub fn matching(&self, link_id: &str) -> Vec<&ResponseItem> {
        self.items.iter().filter(|i| i.link_id == link_id).collect()
    }
}

/// One node of the response tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseItem {
    pub link_id: String,
    #[serde(default)]
    pub answers: Vec<Answer>,
    #[serde(default)]
    pub items: Vec<ResponseItem>,
}

impl ResponseItem {
    /// An answerless response item for a form item the response did not
    /// cover.
    pub fn empty(link_id: impl Into<String>) -> Self {
        Self {
            link_id: link_id.into(),
            answers: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Child response items matching a link-id, in order.
    pub fn matching(&self, link_id: &str) -> Vec<&ResponseItem> {
        self.items.iter().filter(|i| i.link_id == link_id).collect()
    }

    /// The answer values of this item, in order.
    pub fn answer_values(&self) -> Vec<Value> {
        self.answers.iter().map(|a| a.value.clone()).collect()
    }
}

/// A single answer to a response item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub value: Value,
    #[serde(default)]
    pub items: Vec<ResponseItem>,
}

impl Answer {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            items: Vec::new(),
        }
    }
}
