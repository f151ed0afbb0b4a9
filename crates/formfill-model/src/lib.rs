//! Formfill data model
//!
//! The hierarchical structures the resolver operates over: a form (a
//! tree of items, each carrying url-tagged extensions), a response that
//! mirrors the form by link-id and carries answers, JSON-backed
//! resources, and the base value union expressions evaluate to.
//!
//! The resolver core lives in `formfill-resolve`; this crate has no
//! resolution logic of its own.

pub mod form;
pub mod resource;
pub mod response;
pub mod value;

pub use form::{
    ExpressionDef, Extension, ExtensionValue, Form, FormItem, ItemType, CALCULATED_EXPRESSION,
    EXTRACTION_CONTEXT, EXTRACTION_CONTEXT_ID, INITIAL_EXPRESSION, LANGUAGE_PATH, LANGUAGE_QUERY,
    POPULATION_CONTEXT, VARIABLE_EXPRESSION,
};
pub use resource::Resource;
pub use response::{Answer, Response, ResponseItem};
pub use value::Value;
