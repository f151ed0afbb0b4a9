//! Form definition tree
//!
//! A form is a tree of items with stable string link-ids. Items carry
//! url-tagged extensions; the ones the resolver recognizes hold an
//! expression definition in one of two small languages.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Extension url marking a population context expression.
pub const POPULATION_CONTEXT: &str = "https://formfill.dev/ext/population-context";
/// Extension url marking an extraction context expression.
pub const EXTRACTION_CONTEXT: &str = "https://formfill.dev/ext/extraction-context";
/// Extension url marking an initial-value expression.
pub const INITIAL_EXPRESSION: &str = "https://formfill.dev/ext/initial-expression";
/// Extension url marking a named variable expression.
pub const VARIABLE_EXPRESSION: &str = "https://formfill.dev/ext/variable";
/// Extension url marking a calculated-value expression.
pub const CALCULATED_EXPRESSION: &str = "https://formfill.dev/ext/calculated-expression";
/// Extension url marking an extraction-context id expression.
pub const EXTRACTION_CONTEXT_ID: &str = "https://formfill.dev/ext/extraction-context-id";

/// Language tag for path expressions.
pub const LANGUAGE_PATH: &str = "text/formpath";
/// Language tag for query expressions.
pub const LANGUAGE_QUERY: &str = "application/x-form-query";

/// A complete form definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Form {
    /// Form-level extensions, parsed into the root scope.
    #[serde(default)]
    pub extensions: Vec<Extension>,
    /// Top-level items in lexical order.
    #[serde(default)]
    pub items: Vec<FormItem>,
}

impl Form {
    /// Find an item anywhere in the tree by link-id.
    pub fn find(&self, link_id: &str) -> Option<&FormItem> {
        self.items.iter().find_map(|item| item.find(link_id))
    }
}

/// One node of the form tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormItem {
    /// Stable identifier, unique within the form.
    pub link_id: String,
    /// What kind of item this is.
    pub item_type: ItemType,
    /// Whether the item may repeat in a response.
    #[serde(default)]
    pub repeats: bool,
    /// Default answer values, in order.
    #[serde(default)]
    pub initial: Vec<Value>,
    /// Child items in lexical order.
    #[serde(default)]
    pub items: Vec<FormItem>,
    /// Attached extensions.
    #[serde(default)]
    pub extensions: Vec<Extension>,
}

impl FormItem {
    /// A bare item with no children, extensions, or initial values.
    pub fn new(link_id: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            link_id: link_id.into(),
            item_type,
            repeats: false,
            initial: Vec::new(),
            items: Vec::new(),
            extensions: Vec::new(),
        }
    }

    /// Find this item or a descendant by link-id.
    pub fn find(&self, link_id: &str) -> Option<&FormItem> {
        if self.link_id == link_id {
            return Some(self);
        }
        self.items.iter().find_map(|item| item.find(link_id))
    }
}

/// Item kind. `Group` and `Display` carry no answers; the rest are
/// answerable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemType {
    Group,
    Display,
    Boolean,
    Integer,
    Decimal,
    Text,
    Date,
    Choice,
    Reference,
}

impl ItemType {
    /// Whether responses to this item carry answers.
    pub fn is_answerable(self) -> bool {
        !matches!(self, ItemType::Group | ItemType::Display)
    }
}

/// A url-tagged value attached to a form or an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    pub url: String,
    pub value: ExtensionValue,
}

impl Extension {
    /// An extension carrying an expression definition.
    pub fn expression(url: impl Into<String>, def: ExpressionDef) -> Self {
        Self {
            url: url.into(),
            value: ExtensionValue::Expression(def),
        }
    }
}

/// The value shapes an extension can carry. Only `Expression` is
/// meaningful to the resolver; the others exist so a wrong-typed
/// extension is representable and reportable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionValue {
    Expression(ExpressionDef),
    Code(String),
    Text(String),
}

/// An expression occurrence as written in the form: a language tag, the
/// source text, and an optional symbol name other expressions can
/// reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionDef {
    #[serde(default)]
    pub name: Option<String>,
    pub language: String,
    pub expression: String,
}

impl ExpressionDef {
    pub fn path(expression: impl Into<String>) -> Self {
        Self {
            name: None,
            language: LANGUAGE_PATH.to_string(),
            expression: expression.into(),
        }
    }

    pub fn query(expression: impl Into<String>) -> Self {
        Self {
            name: None,
            language: LANGUAGE_QUERY.to_string(),
            expression: expression.into(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
