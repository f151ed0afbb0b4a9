//! Dependency graph construction
//!
//! Light scanning of expression text to wire dependency edges. Query
//! text is scanned for `{{…}}` markers, each spawning a fresh embedded
//! path node the query depends on. Path text is tokenized into
//! `.`-separated parts (parenthesized groups preserved) and tokens
//! beginning with `%` become edges via scope lookup.

use std::collections::VecDeque;

use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use formfill_model::Value;

use crate::context::{Context, ExpressionKind, ExpressionLanguage, ExpressionNode};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::eval::{env_for, PathEvaluator};
use crate::id::NodeId;
use crate::scope::{ScopeId, ScopeTree};

static EMBEDDED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(.*?)\}\}").unwrap());
static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// Symbols resolved against the response rather than the scope chain.
const RESPONSE_VARS: [&str; 2] = ["resource", "context"];
/// Symbols bound by the evaluation environment itself.
const RESERVED_VARS: [&str; 2] = ["questionnaire", "qitem"];

/// Wires dependency edges for every expression node in the tree.
/// Embedded nodes created along the way are processed too.
pub fn build_graph(tree: &mut ScopeTree, evaluator: &dyn PathEvaluator) {
    let mut queue: VecDeque<NodeId> = tree.expression_ids().into();
    while let Some(id) = queue.pop_front() {
        let Some(node) = tree.expression(id) else {
            continue;
        };
        let language = node.language;
        let text = node.text.clone();
        let scope = node.scope;

        match language {
            ExpressionLanguage::Query => {
                for embedded_id in extract_embedded(tree, id, &text) {
                    queue.push_back(embedded_id);
                }
            }
            ExpressionLanguage::Path => {
                wire_path_references(tree, id, &text, evaluator);
            }
        }
    }
}

/// Creates one embedded path node per `{{…}}` occurrence in a query's
/// text, appended to the query's own scope.
fn extract_embedded(tree: &mut ScopeTree, query: NodeId, text: &str) -> Vec<NodeId> {
    let mut created = Vec::new();
    for capture in EMBEDDED_RE.captures_iter(text) {
        let inner = capture[1].to_string();
        let node = tree.expression(query).expect("query node exists");
        let (scope, item, response_item) =
            (node.scope, node.item.clone(), node.response_item.clone());

        let embedded = ExpressionNode {
            id: tree.next_id(),
            name: None,
            text: inner,
            language: ExpressionLanguage::Path,
            kind: ExpressionKind::Embedded,
            scope,
            item,
            response_item,
            dependencies: IndexSet::new(),
            dependants: IndexSet::new(),
            value: None,
            response_dependant: false,
            unknown_reference: false,
            cloned_from: None,
        };
        let embedded_id = tree.insert_context(Context::Expression(embedded));
        tree.add_dependency(query, embedded_id);
        created.push(embedded_id);
    }
    created
}

/// Resolves every `%variable` token of a path expression to an edge, a
/// response-dependence mark, or a diagnostic.
fn wire_path_references(
    tree: &mut ScopeTree,
    id: NodeId,
    text: &str,
    evaluator: &dyn PathEvaluator,
) {
    let scope = tree.expression(id).expect("path node exists").scope;
    let mut response_dependant = false;

    for var in variable_refs(text) {
        if RESPONSE_VARS.contains(&var.as_str()) {
            response_dependant = true;
            continue;
        }
        if RESERVED_VARS.contains(&var.as_str()) {
            continue;
        }
        match tree.lookup(scope, &var) {
            Some(target) => tree.add_dependency(id, target),
            None => {
                let link_id = tree
                    .expression(id)
                    .and_then(|n| n.item.as_ref())
                    .map(|i| i.link_id.clone());
                let mut diagnostic = Diagnostic::warning(
                    DiagnosticKind::UnknownVariable,
                    format!("undefined variable '%{var}'"),
                )
                .with_expression(text);
                if let Some(link_id) = link_id {
                    diagnostic = diagnostic.with_link_id(link_id);
                }
                tree.push_diagnostic(diagnostic);
                if let Some(node) = tree.expression_mut(id) {
                    node.unknown_reference = true;
                }
            }
        }
    }

    if response_dependant {
        if let Some(node) = tree.expression_mut(id) {
            node.response_dependant = true;
        }
        synthesize_response_dependency(tree, id, text, scope, evaluator);
    }
}

/// A response-dependent expression may mirror a form item that carries
/// its own initial expression; evaluating the form-relative rewrite of
/// the text locates that item so the dependency can be recorded.
fn synthesize_response_dependency(
    tree: &mut ScopeTree,
    id: NodeId,
    text: &str,
    scope: ScopeId,
    evaluator: &dyn PathEvaluator,
) {
    let rewritten = text
        .replace("%resource", "%questionnaire")
        .replace("%context", "%qitem");
    let env = env_for(tree, scope);
    let Some(result) = evaluator.evaluate(&rewritten, &env) else {
        debug!(expression = text, "form-relative rewrite evaluated to null");
        return;
    };
    let Some(Value::FormItem(target)) = result.values.first() else {
        return;
    };
    let link_id = target.link_id.clone();

    let target_scope = tree
        .live_scopes()
        .into_iter()
        .find(|s| tree.scope(*s).link_id() == Some(link_id.as_str()));
    let Some(target_scope) = target_scope else {
        debug!(%link_id, "no scope mirrors the referenced item");
        return;
    };
    if let Some(initial) =
        tree.find_kind_in_scope(target_scope, ExpressionKind::InitialExpression)
    {
        tree.add_dependency(id, initial);
    }
}

/// Splits path text into `.`-separated parts, leaving parenthesized
/// groups intact, and keeps the tokens that begin with `%`.
fn variable_refs(text: &str) -> Vec<String> {
    split_segments(text)
        .into_iter()
        .filter_map(|segment| {
            VARIABLE_RE
                .captures(segment.trim())
                .map(|c| c[1].to_string())
        })
        .collect()
}

/// `.`-splitter that does not split inside parentheses.
fn split_segments(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                segments.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    segments.push(&text[start..]);
    segments
}
