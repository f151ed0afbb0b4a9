//! Form parser
//!
//! Walks the form tree in lexical order, pairing items with their
//! response items by link-id, pushing one scope per response instance
//! and turning recognized extensions into expression nodes. Malformed
//! extensions are reported and skipped; parsing itself never fails.

use std::sync::Arc;

use indexmap::IndexSet;
use tracing::debug;

use formfill_model::{
    Answer, Extension, ExtensionValue, Form, FormItem, Resource, Response, ResponseItem,
    CALCULATED_EXPRESSION, EXTRACTION_CONTEXT, EXTRACTION_CONTEXT_ID, INITIAL_EXPRESSION,
    POPULATION_CONTEXT, VARIABLE_EXPRESSION,
};

use crate::context::{
    Context, ExpressionKind, ExpressionLanguage, ExpressionNode, LaunchContext, ResolvingContext,
};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::scope::{ScopeId, ScopeTree};

/// Parses a form, its response, and the launch contexts into a scope
/// tree. Non-fatal findings are accumulated on the tree.
pub fn parse_tree(
    form: Arc<Form>,
    response: Option<Arc<Response>>,
    launch_contexts: Vec<(String, Resource)>,
    mode: ResolvingContext,
) -> ScopeTree {
    let mut tree = ScopeTree::new(Arc::clone(&form), response.clone());
    let root = tree.root();

    for (name, resource) in launch_contexts {
        let id = tree.next_id();
        tree.insert_context(Context::Launch(LaunchContext {
            id,
            name,
            resource,
            scope: root,
            dependants: IndexSet::new(),
        }));
    }

    for extension in &form.extensions {
        parse_extension(&mut tree, mode, root, None, None, extension);
    }

    for item in &form.items {
        let matches: Vec<ResponseItem> = response
            .as_deref()
            .map(|r| r.matching(&item.link_id).into_iter().cloned().collect())
            .unwrap_or_default();
        parse_item(&mut tree, mode, root, item, matches);
    }

    tree
}

/// Parses one form item. An item with no response instance gets a
/// synthesized empty one; a response repeated N times drives N scope
/// pushes.
fn parse_item(
    tree: &mut ScopeTree,
    mode: ResolvingContext,
    parent: ScopeId,
    item: &FormItem,
    matches: Vec<ResponseItem>,
) {
    let item_arc = Arc::new(item.clone());
    let instances = if matches.is_empty() {
        vec![ResponseItem::empty(&item.link_id)]
    } else {
        matches
    };

    for mut response_item in instances {
        materialize_default_answers(item, &mut response_item);
        let ri_arc = Arc::new(response_item);
        let scope = tree.new_scope(parent, Some(Arc::clone(&item_arc)), Some(Arc::clone(&ri_arc)));

        for extension in &item.extensions {
            parse_extension(tree, mode, scope, Some(&item_arc), Some(&ri_arc), extension);
        }

        for child in &item.items {
            let child_matches = ri_arc
                .matching(&child.link_id)
                .into_iter()
                .cloned()
                .collect();
            parse_item(tree, mode, scope, child, child_matches);
        }
    }
}

/// Default answers: an answerable item with `initial` values fills an
/// answerless response item. A side effect for downstream consumers;
/// the resolver itself never reads these answers.
fn materialize_default_answers(item: &FormItem, response_item: &mut ResponseItem) {
    if item.item_type.is_answerable() && response_item.answers.is_empty() && !item.initial.is_empty()
    {
        response_item.answers = item.initial.iter().cloned().map(Answer::new).collect();
    }
}

/// The fixed extension switch, gated by resolving context.
fn parse_extension(
    tree: &mut ScopeTree,
    mode: ResolvingContext,
    scope: ScopeId,
    item: Option<&Arc<FormItem>>,
    response_item: Option<&Arc<ResponseItem>>,
    extension: &Extension,
) {
    let kind = match extension.url.as_str() {
        POPULATION_CONTEXT => ExpressionKind::PopulationContext,
        EXTRACTION_CONTEXT => ExpressionKind::ExtractionContext,
        INITIAL_EXPRESSION => ExpressionKind::InitialExpression,
        VARIABLE_EXPRESSION => ExpressionKind::VariableExpression,
        CALCULATED_EXPRESSION => ExpressionKind::CalculatedExpression,
        EXTRACTION_CONTEXT_ID => ExpressionKind::ExtractionContextId,
        url => {
            debug!(%url, "skipping unrecognized extension");
            return;
        }
    };

    if !kind.is_permitted(mode) {
        debug!(url = %extension.url, ?mode, "extension not active in this resolving context");
        return;
    }

    let link_id = item.map(|i| i.link_id.clone());
    let diag_site = |d: Diagnostic| match &link_id {
        Some(id) => d.with_link_id(id),
        None => d,
    };

    let def = match &extension.value {
        ExtensionValue::Expression(def) => def,
        _ => {
            tree.push_diagnostic(diag_site(Diagnostic::warning(
                DiagnosticKind::WrongValueType,
                format!("extension '{}' does not carry an expression", extension.url),
            )));
            return;
        }
    };

    let Some(language) = ExpressionLanguage::from_tag(&def.language) else {
        tree.push_diagnostic(diag_site(
            Diagnostic::warning(
                DiagnosticKind::UnsupportedLanguage,
                format!("unsupported expression language '{}'", def.language),
            )
            .with_expression(&def.expression),
        ));
        return;
    };

    let query_allowed = matches!(
        kind,
        ExpressionKind::PopulationContext | ExpressionKind::ExtractionContext
    );
    if language == ExpressionLanguage::Query && !query_allowed {
        tree.push_diagnostic(diag_site(
            Diagnostic::warning(
                DiagnosticKind::UnsupportedLanguage,
                format!(
                    "query language not accepted for extension '{}'",
                    extension.url
                ),
            )
            .with_expression(&def.expression),
        ));
        return;
    }

    if def.expression.trim().is_empty() {
        tree.push_diagnostic(diag_site(Diagnostic::warning(
            DiagnosticKind::EmptyExpression,
            format!("extension '{}' carries an empty expression", extension.url),
        )));
        return;
    }

    let node = ExpressionNode {
        id: tree.next_id(),
        name: def.name.clone(),
        text: def.expression.clone(),
        language,
        kind,
        scope,
        item: item.cloned(),
        response_item: response_item.cloned(),
        dependencies: IndexSet::new(),
        dependants: IndexSet::new(),
        value: None,
        response_dependant: false,
        unknown_reference: false,
        cloned_from: None,
    };
    tree.insert_context(Context::Expression(node));
}
