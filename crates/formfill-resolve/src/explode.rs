//! Fan-out
//!
//! When an expression produces N results that each need their own
//! surrounding scope, the scope is replaced in its parent's child list
//! by N deep clones, one per result. Cloning mints fresh ids, records
//! `cloned_from` lineage, rewrites dependency edges that stay inside
//! the subtree through the old → new id map, and keeps edges to outside
//! contexts pointing at the unchanged originals.
//!
//! Extraction passes use the second mode instead: a fetched resource
//! collection is matched back onto existing sibling scopes by the key
//! each scope's id expression yields.

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use formfill_model::{Resource, Value};

use crate::context::{Context, ExpressionKind, ResolvedValue};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::eval::{env_for, PathEvaluator};
use crate::id::NodeId;
use crate::scope::{ScopeId, ScopeTree};

/// Population-mode fan-out: replace `scope` with one clone per value,
/// setting each clone's copy of the `resolved` expressions to the
/// singleton of its value.
///
/// Returns false (and reports) when `scope` is the root; the
/// expressions then stay unresolved and the pass ends unresolvable.
pub(crate) fn explode_population(
    tree: &mut ScopeTree,
    scope: ScopeId,
    resolved: &[NodeId],
    values: &[Value],
) -> bool {
    let Some(parent) = tree.scope(scope).parent else {
        warn!(%scope, "fan-out requested at the root scope");
        tree.push_diagnostic(Diagnostic::warning(
            DiagnosticKind::FanOutAtRoot,
            "fan-out is not allowed at the root scope",
        ));
        return false;
    };

    debug!(%scope, count = values.len(), "exploding scope");
    let mut clones = Vec::with_capacity(values.len());
    let mut first_mapping: Option<IndexMap<NodeId, NodeId>> = None;

    for value in values {
        let (clone, mapping) = clone_subtree(tree, scope, parent);
        rewire_clone_edges(tree, &mapping);
        for original in resolved {
            if let Some(new_id) = mapping.get(original) {
                if let Some(node) = tree.expression_mut(*new_id) {
                    node.value = Some(ResolvedValue::singleton(value.clone()));
                }
            }
        }
        if first_mapping.is_none() {
            first_mapping = Some(mapping);
        }
        clones.push(clone);
    }

    if let Some(mapping) = &first_mapping {
        repoint_external_dependants(tree, mapping);
    }
    tree.replace_child(parent, scope, clones);
    true
}

/// Deep-clones a scope subtree under `parent` without attaching it,
/// returning the clone root and the old → new context id map. Edge sets
/// are copied verbatim; [`rewire_clone_edges`] fixes them afterwards.
fn clone_subtree(
    tree: &mut ScopeTree,
    scope: ScopeId,
    parent: ScopeId,
) -> (ScopeId, IndexMap<NodeId, NodeId>) {
    let mut mapping = IndexMap::new();
    let root = clone_scope_rec(tree, scope, parent, &mut mapping);
    (root, mapping)
}

fn clone_scope_rec(
    tree: &mut ScopeTree,
    old_id: ScopeId,
    new_parent: ScopeId,
    mapping: &mut IndexMap<NodeId, NodeId>,
) -> ScopeId {
    let old = tree.scope(old_id).clone();
    let new_id = tree.new_detached_scope(new_parent, old.item.clone(), old.response_item.clone());

    for ctx_id in &old.contexts {
        match tree.context(*ctx_id).clone() {
            Context::Expression(original) => {
                let mut clone = original.clone();
                clone.id = tree.next_id();
                clone.scope = new_id;
                clone.cloned_from = Some(original.id);
                mapping.insert(original.id, clone.id);
                tree.insert_context(Context::Expression(clone));
            }
            // Launch contexts live only at the root, which never
            // explodes.
            Context::Launch(_) => {}
        }
    }

    for child in &old.children {
        let new_child = clone_scope_rec(tree, *child, new_id, mapping);
        tree.scope_mut(new_id).children.push(new_child);
    }
    new_id
}

/// Rebuilds the edge sets of every cloned node: edges inside the
/// subtree go through the mapping, edges to outside contexts keep their
/// originals (which gain the clone as a dependant).
fn rewire_clone_edges(tree: &mut ScopeTree, mapping: &IndexMap<NodeId, NodeId>) {
    for (old, new) in mapping {
        let original = tree.expression(*old).expect("mapped context is an expression");
        let old_deps: Vec<NodeId> = original.dependencies.iter().copied().collect();
        let old_dependants: Vec<NodeId> = original.dependants.iter().copied().collect();

        let mut dependencies = IndexSet::new();
        let mut external_targets = Vec::new();
        for dep in old_deps {
            match mapping.get(&dep) {
                Some(internal) => {
                    dependencies.insert(*internal);
                }
                None => {
                    dependencies.insert(dep);
                    external_targets.push(dep);
                }
            }
        }
        let dependants: IndexSet<NodeId> = old_dependants
            .iter()
            .filter_map(|d| mapping.get(d).copied())
            .collect();

        let node = tree.expression_mut(*new).expect("clone exists");
        node.dependencies = dependencies;
        node.dependants = dependants;

        for target in external_targets {
            tree.context_mut(target).dependants_mut().insert(*new);
        }
    }
}

/// Dependants of cloned originals that live outside the subtree (only
/// reachable through the response-dependent synthesis) are re-pointed
/// at the corresponding node of the first clone.
fn repoint_external_dependants(tree: &mut ScopeTree, mapping: &IndexMap<NodeId, NodeId>) {
    for (old, new) in mapping {
        let externals: Vec<NodeId> = tree
            .context(*old)
            .dependants()
            .iter()
            .copied()
            .filter(|d| !mapping.contains_key(d) && mapping.values().all(|v| v != d))
            .collect();
        for external in externals {
            if let Some(node) = tree.expression_mut(external) {
                node.dependencies.shift_remove(old);
                node.dependencies.insert(*new);
            }
            tree.context_mut(*old).dependants_mut().shift_remove(&external);
            tree.context_mut(*new).dependants_mut().insert(external);
        }
    }
}

/// Extraction-mode fan-out: match a fetched resource collection back
/// onto the sibling scopes mirroring `item_link` under `parent`. Each
/// scope's id expression yields the key; a missing match manufactures
/// an empty instance of the type named by the extraction url's prefix.
pub(crate) fn rehydrate_extraction(
    tree: &mut ScopeTree,
    parent: ScopeId,
    item_link: &str,
    resources: &[Resource],
    evaluator: &dyn PathEvaluator,
) {
    let children: Vec<ScopeId> = tree
        .scope(parent)
        .children
        .iter()
        .copied()
        .filter(|c| tree.scope(*c).link_id() == Some(item_link))
        .collect();

    for child in children {
        let Some(key_id) = tree.find_kind_in_scope(child, ExpressionKind::ExtractionContextId)
        else {
            debug!(%child, "no extraction-context id expression in scope");
            continue;
        };
        let Some(context_id) = tree.find_kind_in_scope(child, ExpressionKind::ExtractionContext)
        else {
            continue;
        };

        let key = extraction_key(tree, key_id, evaluator);
        let url = tree.expression(context_id).expect("context exists").text.clone();
        let expected_type = url.split('?').next().unwrap_or_default().to_string();

        let resource = key
            .as_deref()
            .and_then(|k| resources.iter().find(|r| r.id() == Some(k)))
            .cloned();
        let resource = match resource {
            Some(found) => {
                debug!(key = key.as_deref().unwrap_or(""), "matched stored resource");
                found
            }
            None => {
                debug!(%expected_type, "no stored resource, manufacturing empty instance");
                Resource::new(expected_type)
            }
        };

        if let Some(node) = tree.expression_mut(context_id) {
            node.value = Some(ResolvedValue::singleton(Value::Resource(resource)));
        }
    }
}

/// The key a scope's id expression yields: its resolved value, or an
/// immediate evaluation (which also records the value on the node).
fn extraction_key(
    tree: &mut ScopeTree,
    key_id: NodeId,
    evaluator: &dyn PathEvaluator,
) -> Option<String> {
    let node = tree.expression(key_id).expect("key node exists");
    if let Some(value) = &node.value {
        return value.values.first().map(Value::render);
    }

    let (text, scope) = (node.text.clone(), node.scope);
    let env = env_for(tree, scope);
    let resolved = match evaluator.evaluate(&text, &env) {
        Some(result) => ResolvedValue {
            values: result.values,
            source: result.source,
        },
        None => ResolvedValue::empty(),
    };
    let key = resolved.values.first().map(Value::render);
    if let Some(node) = tree.expression_mut(key_id) {
        node.value = Some(resolved);
    }
    key
}
