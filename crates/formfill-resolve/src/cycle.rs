//! Cycle detection and ordering
//!
//! After graph construction the dependency graph restricted to
//! expression nodes must be a DAG. [`detect_cycles`] proves it with a
//! depth-first walk from every expression node; [`topo_order`] produces
//! a dependency-respecting order the resolver uses within a round.

use std::collections::{HashMap, HashSet};

use crate::error::{Diagnostic, DiagnosticKind};
use crate::id::NodeId;
use crate::scope::ScopeTree;

/// Depth-first search over expression dependencies; every cycle is
/// reported once, with the participating expressions named in order.
pub fn detect_cycles(tree: &ScopeTree) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut rec_stack: HashSet<NodeId> = HashSet::new();

    for id in tree.expression_ids() {
        if !visited.contains(&id) {
            if let Some(cycle) =
                detect_cycle_dfs(tree, id, &mut visited, &mut rec_stack, Vec::new())
            {
                diagnostics.push(Diagnostic::error(
                    DiagnosticKind::CycleDetected,
                    format_cycle(tree, &cycle),
                ));
            }
        }
    }

    diagnostics
}

fn detect_cycle_dfs(
    tree: &ScopeTree,
    current: NodeId,
    visited: &mut HashSet<NodeId>,
    rec_stack: &mut HashSet<NodeId>,
    mut path: Vec<NodeId>,
) -> Option<Vec<NodeId>> {
    visited.insert(current);
    rec_stack.insert(current);
    path.push(current);

    let mut found = None;
    if let Some(node) = tree.expression(current) {
        for dep in &node.dependencies {
            // Launch contexts cannot participate in cycles.
            if tree.expression(*dep).is_none() {
                continue;
            }
            if !visited.contains(dep) {
                if let Some(cycle) = detect_cycle_dfs(tree, *dep, visited, rec_stack, path.clone())
                {
                    found = Some(cycle);
                    break;
                }
            } else if rec_stack.contains(dep) {
                let start = path.iter().position(|p| p == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(*dep);
                found = Some(cycle);
                break;
            }
        }
    }

    rec_stack.remove(&current);
    found
}

fn format_cycle(tree: &ScopeTree, cycle: &[NodeId]) -> String {
    let labels: Vec<&str> = cycle
        .iter()
        .filter_map(|id| tree.expression(*id))
        .map(|node| node.label())
        .collect();
    format!("circular dependency: {}", labels.join(" -> "))
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Dependency-respecting order over the given nodes (dependencies
/// before dependants), via tri-color depth-first search. Fails on a
/// grey revisit, which means a cycle survived into resolution.
pub fn topo_order(tree: &ScopeTree, nodes: &[NodeId]) -> Result<Vec<NodeId>, Diagnostic> {
    let mut colors: HashMap<NodeId, Color> = nodes.iter().map(|id| (*id, Color::White)).collect();
    let mut order = Vec::with_capacity(nodes.len());

    for id in nodes {
        visit(tree, *id, &mut colors, &mut order)?;
    }
    Ok(order)
}

fn visit(
    tree: &ScopeTree,
    id: NodeId,
    colors: &mut HashMap<NodeId, Color>,
    order: &mut Vec<NodeId>,
) -> Result<(), Diagnostic> {
    // Nodes outside the requested set (already-resolved dependencies,
    // launch contexts) are not ordered.
    let Some(color) = colors.get(&id).copied() else {
        return Ok(());
    };
    match color {
        Color::Black => return Ok(()),
        Color::Grey => {
            let label = tree
                .expression(id)
                .map(|n| n.label().to_string())
                .unwrap_or_else(|| id.to_string());
            return Err(Diagnostic::error(
                DiagnosticKind::CycleDetected,
                format!("cycle reached during ordering at '{label}'"),
            ));
        }
        Color::White => {}
    }

    colors.insert(id, Color::Grey);
    if let Some(node) = tree.expression(id) {
        for dep in node.dependencies.clone() {
            visit(tree, dep, colors, order)?;
        }
    }
    colors.insert(id, Color::Black);
    order.push(id);
    Ok(())
}
