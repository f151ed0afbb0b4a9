//! Path evaluator contract
//!
//! The resolver does not evaluate path expressions itself; it delegates
//! to a [`PathEvaluator`], a pure function from expression text and a
//! variable-binding environment to a list of base values. A `None`
//! return (null) is distinguishable from `Some` with an empty list.

use std::sync::Arc;

use indexmap::IndexMap;

use formfill_model::{Form, FormItem, Resource, Response, ResponseItem, Value};

use crate::scope::{ScopeId, ScopeTree};

/// The outcome of one evaluation: the values plus, optionally, the
/// resource they were drawn from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalResult {
    pub values: Vec<Value>,
    pub source: Option<Resource>,
}

impl EvalResult {
    pub fn of(values: Vec<Value>) -> Self {
        Self {
            values,
            source: None,
        }
    }
}

/// The variable-binding environment for one evaluation, gathered from
/// the expression's scope chain plus the ambient pass inputs.
#[derive(Debug, Clone)]
pub struct EvalEnv {
    /// Named bindings visible from the scope, nearest definition first.
    /// Launch contexts bind their resource; resolved expressions bind
    /// their value lists.
    pub bindings: IndexMap<String, Vec<Value>>,
    /// The whole form, bound as `%questionnaire`.
    pub form: Arc<Form>,
    /// The form item at the evaluation site, bound as `%qitem`.
    pub item: Option<Arc<FormItem>>,
    /// The whole response, bound as `%resource`.
    pub response: Option<Arc<Response>>,
    /// The response item at the evaluation site, bound as `%context`.
    pub response_item: Option<Arc<ResponseItem>>,
}

/// Pure delegated evaluation of path expressions.
pub trait PathEvaluator: Send + Sync {
    /// Evaluates `expression` under `env`. `None` means null; it is not
    /// the same as an empty value list.
    fn evaluate(&self, expression: &str, env: &EvalEnv) -> Option<EvalResult>;
}

/// Builds the binding map for a scope: every named resolved context on
/// the chain from `scope` to the root, nearest definition winning.
pub fn bindings_for(tree: &ScopeTree, scope: ScopeId) -> IndexMap<String, Vec<Value>> {
    let mut bindings = IndexMap::new();
    let mut cursor = Some(scope);
    while let Some(id) = cursor {
        let s = tree.scope(id);
        for ctx_id in s.contexts.iter().rev() {
            let ctx = tree.context(*ctx_id);
            let Some(name) = ctx.name() else { continue };
            if bindings.contains_key(name) {
                continue;
            }
            if let Some(values) = ctx.resolved_values() {
                bindings.insert(name.to_string(), values);
            }
        }
        cursor = s.parent;
    }
    bindings
}

/// Assembles the full environment for an expression living in `scope`.
pub fn env_for(tree: &ScopeTree, scope: ScopeId) -> EvalEnv {
    let s = tree.scope(scope);
    EvalEnv {
        bindings: bindings_for(tree, scope),
        form: Arc::clone(tree.form()),
        item: s.item.clone(),
        response: tree.response().cloned(),
        response_item: s.response_item.clone(),
    }
}
