//! Resolver loop
//!
//! The bounded fixpoint at the center of the pass. Each round resolves
//! every ready path expression, then batch-fetches every ready query
//! url; a fan-out replaces a scope with clones and restarts the round.
//! A round that does neither fails the pass, and after the round limit
//! any unresolved permitted expression does too.

use std::collections::HashMap;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use formfill_model::Value;

use crate::context::{ExpressionKind, ExpressionLanguage, ResolvedValue, ResolvingContext};
use crate::cycle::topo_order;
use crate::error::{Diagnostic, DiagnosticKind, Error, Result};
use crate::eval::{env_for, EvalResult, PathEvaluator};
use crate::explode::{explode_population, rehydrate_extraction};
use crate::id::NodeId;
use crate::loader::{QueryCache, ResourceLoader};
use crate::scope::{ScopeId, ScopeTree};

/// Knobs for one resolution pass.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Round ceiling. Every completed round resolves something, exits
    /// through a fan-out restart, or fails, so this is a safety net
    /// rather than a tuning knob.
    pub max_rounds: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self { max_rounds: 5 }
    }
}

/// Outcome of one phase of a round.
enum Phase {
    /// A fan-out rewrote the tree; the round restarts.
    FanOut,
    /// Whether anything resolved.
    Progress(bool),
}

/// Outcome of resolving one path expression.
enum PathStep {
    Resolved,
    FanOut,
    /// Fan-out was refused (root scope); the node stays unresolved.
    Stuck,
}

pub(crate) struct Resolver<'a> {
    tree: &'a mut ScopeTree,
    loader: &'a dyn ResourceLoader,
    evaluator: &'a dyn PathEvaluator,
    mode: ResolvingContext,
    options: ResolveOptions,
    cancel: CancellationToken,
    cache: QueryCache,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        tree: &'a mut ScopeTree,
        loader: &'a dyn ResourceLoader,
        evaluator: &'a dyn PathEvaluator,
        mode: ResolvingContext,
        options: ResolveOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tree,
            loader,
            evaluator,
            mode,
            options,
            cancel,
            cache: QueryCache::new(),
        }
    }

    /// Runs rounds until every permitted expression is resolved, the
    /// round limit is reached, or a round makes no progress.
    pub(crate) async fn run(&mut self) -> Result<()> {
        for round in 1..=self.options.max_rounds {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            debug!(round, "resolution round");

            let paths = self.resolve_paths()?;
            if matches!(paths, Phase::FanOut) {
                continue;
            }

            let queries = self.resolve_queries().await?;
            if matches!(queries, Phase::FanOut) {
                continue;
            }

            let pending = self.pending();
            if pending.is_empty() {
                debug!(rounds = round, "all permitted expressions resolved");
                return Ok(());
            }
            let progress = matches!(paths, Phase::Progress(true))
                || matches!(queries, Phase::Progress(true));
            if !progress {
                error!(round, pending = pending.len(), "round made no progress");
                return Err(Error::NoProgress { round });
            }
        }

        let pending = self.pending();
        if pending.is_empty() {
            Ok(())
        } else {
            error!(
                pending = pending.len(),
                "expressions left unresolved after the round limit"
            );
            Err(Error::Unresolvable {
                pending: pending.len(),
            })
        }
    }

    /// Unresolved expressions this pass is expected to resolve:
    /// reachable from the root, of a kind permitted in this mode, and
    /// with no forbidden kind among their transitive dependencies.
    fn pending(&self) -> Vec<NodeId> {
        let mut memo = HashMap::new();
        self.tree
            .expression_ids()
            .into_iter()
            .filter(|id| {
                let node = self.tree.expression(*id).expect("listed id exists");
                !node.is_resolved()
                    && node.kind.is_permitted(self.mode)
                    && !self.has_forbidden_dependency(*id, &mut memo)
            })
            .collect()
    }

    fn has_forbidden_dependency(&self, id: NodeId, memo: &mut HashMap<NodeId, bool>) -> bool {
        if let Some(known) = memo.get(&id) {
            return *known;
        }
        // The graph is acyclic by the time the resolver runs; seeding
        // the memo keeps an unexpected cycle from recursing forever.
        memo.insert(id, false);

        let mut forbidden = false;
        if let Some(node) = self.tree.expression(id) {
            for dep in &node.dependencies {
                if let Some(target) = self.tree.expression(*dep) {
                    if !target.kind.is_permitted(self.mode)
                        || self.has_forbidden_dependency(*dep, memo)
                    {
                        forbidden = true;
                        break;
                    }
                }
            }
        }
        memo.insert(id, forbidden);
        forbidden
    }

    /// Ready means unresolved, no unknown references, and every
    /// dependency resolved.
    fn is_ready(&self, id: NodeId) -> bool {
        let Some(node) = self.tree.expression(id) else {
            return false;
        };
        !node.is_resolved()
            && !node.unknown_reference
            && node
                .dependencies
                .iter()
                .all(|dep| self.tree.context(*dep).is_resolved())
    }

    /// Path phase: resolve ready path expressions in dependency order,
    /// so a chain can complete within one round.
    fn resolve_paths(&mut self) -> Result<Phase> {
        let paths: Vec<NodeId> = self
            .pending()
            .into_iter()
            .filter(|id| {
                self.tree.expression(*id).expect("pending id exists").language
                    == ExpressionLanguage::Path
            })
            .collect();
        let ordered = topo_order(self.tree, &paths)
            .map_err(|diagnostic| Error::CycleDetected(vec![diagnostic]))?;

        let mut progress = false;
        for id in ordered {
            if !self.is_ready(id) {
                continue;
            }
            match self.resolve_path(id)? {
                PathStep::Resolved => progress = true,
                PathStep::FanOut => return Ok(Phase::FanOut),
                PathStep::Stuck => {}
            }
        }
        Ok(Phase::Progress(progress))
    }

    fn resolve_path(&mut self, id: NodeId) -> Result<PathStep> {
        let node = self.tree.expression(id).expect("ready id exists");
        let (text, scope, kind) = (node.text.clone(), node.scope, node.kind);
        let env = env_for(self.tree, scope);

        let Some(result) = self.evaluator.evaluate(&text, &env) else {
            trace!(expression = %text, "path evaluated to null");
            self.set_value(id, ResolvedValue::empty());
            return Ok(PathStep::Resolved);
        };
        if result.values.is_empty() {
            self.set_value(id, ResolvedValue::empty());
            return Ok(PathStep::Resolved);
        }

        if kind == ExpressionKind::Embedded {
            self.finish_embedded(id, &text, result);
            return Ok(PathStep::Resolved);
        }

        if result.values.len() == 1 {
            // A response-item result stores the item's answers, not the
            // item.
            if let Value::ResponseItem(item) = &result.values[0] {
                let values = item.answer_values();
                self.set_value(
                    id,
                    ResolvedValue {
                        values,
                        source: result.source,
                    },
                );
                return Ok(PathStep::Resolved);
            }
        }

        if result.values.len() > 1 && result.values.iter().all(|v| !v.is_primitive()) {
            return Ok(if self.dispatch_explode(scope, &[id], &result.values) {
                PathStep::FanOut
            } else {
                PathStep::Stuck
            });
        }

        self.set_value(
            id,
            ResolvedValue {
                values: result.values,
                source: result.source,
            },
        );
        Ok(PathStep::Resolved)
    }

    /// An embedded result with exactly one element is spliced into the
    /// text of every query dependant; anything else is recorded without
    /// substitution.
    fn finish_embedded(&mut self, id: NodeId, text: &str, result: EvalResult) {
        if result.values.len() > 1 {
            self.tree.push_diagnostic(
                Diagnostic::warning(
                    DiagnosticKind::AmbiguousEmbedded,
                    format!("embedded expression produced {} results", result.values.len()),
                )
                .with_expression(text),
            );
            self.set_value(
                id,
                ResolvedValue {
                    values: result.values,
                    source: result.source,
                },
            );
            return;
        }

        let rendering = result.values[0].render();
        let marker = format!("{{{{{text}}}}}");
        let dependants: Vec<NodeId> = self
            .tree
            .expression(id)
            .expect("embedded id exists")
            .dependants
            .iter()
            .copied()
            .collect();
        for dependant in dependants {
            if let Some(node) = self.tree.expression_mut(dependant) {
                if node.language == ExpressionLanguage::Query {
                    node.text = node.text.replace(&marker, &rendering);
                    trace!(query = %node.text, "spliced embedded result");
                }
            }
        }
        self.set_value(
            id,
            ResolvedValue {
                values: result.values,
                source: result.source,
            },
        );
    }

    /// Query phase: group ready queries by url, fetch the uncached urls
    /// in one batched call, then either fan out or assign directly.
    async fn resolve_queries(&mut self) -> Result<Phase> {
        let ready: Vec<NodeId> = self
            .pending()
            .into_iter()
            .filter(|id| {
                let node = self.tree.expression(*id).expect("pending id exists");
                node.language == ExpressionLanguage::Query
                    && !node.text.contains("{{")
                    && self.is_ready(*id)
            })
            .collect();
        if ready.is_empty() {
            return Ok(Phase::Progress(false));
        }

        let mut groups: IndexMap<String, Vec<NodeId>> = IndexMap::new();
        for id in ready {
            let url = self.tree.expression(id).expect("ready id exists").text.clone();
            groups.entry(url).or_default().push(id);
        }

        let urls: Vec<String> = groups.keys().cloned().collect();
        self.cache
            .fetch_missing(self.loader, &urls, &self.cancel)
            .await?;

        let mut progress = false;
        for (url, group) in groups {
            let resources = self.cache.get(&url).to_vec();
            if resources.len() > 1 && group.len() > 1 {
                debug!(%url, expressions = group.len(), resources = resources.len(), "query fan-out");
                let scope = self
                    .tree
                    .expression(group[0])
                    .expect("grouped id exists")
                    .scope;
                let values: Vec<Value> =
                    resources.iter().cloned().map(Value::Resource).collect();
                if self.dispatch_explode(scope, &group, &values) {
                    return Ok(Phase::FanOut);
                }
                continue;
            }
            for id in group {
                let values: Vec<Value> = resources.iter().cloned().map(Value::Resource).collect();
                self.set_value(id, ResolvedValue::of(values));
                progress = true;
            }
        }
        Ok(Phase::Progress(progress))
    }

    /// Fan-out dispatch: a scope that carries an extraction-context id
    /// expression rehydrates its sibling group from the resource
    /// collection; any other scope is cloned per result.
    fn dispatch_explode(&mut self, scope: ScopeId, resolved: &[NodeId], values: &[Value]) -> bool {
        let has_id_context = self
            .tree
            .find_kind_in_scope(scope, ExpressionKind::ExtractionContextId)
            .is_some();
        if !has_id_context {
            return explode_population(self.tree, scope, resolved, values);
        }

        let Some(parent) = self.tree.scope(scope).parent else {
            self.tree.push_diagnostic(Diagnostic::warning(
                DiagnosticKind::FanOutAtRoot,
                "fan-out is not allowed at the root scope",
            ));
            return false;
        };
        let Some(link_id) = self.tree.scope(scope).link_id().map(str::to_string) else {
            return false;
        };
        let resources: Vec<_> = values
            .iter()
            .filter_map(|v| match v {
                Value::Resource(r) => Some(r.clone()),
                _ => None,
            })
            .collect();
        rehydrate_extraction(self.tree, parent, &link_id, &resources, self.evaluator);
        true
    }

    fn set_value(&mut self, id: NodeId, value: ResolvedValue) {
        if let Some(node) = self.tree.expression_mut(id) {
            trace!(node = %node.label(), count = value.values.len(), "resolved");
            node.value = Some(value);
        }
    }
}
