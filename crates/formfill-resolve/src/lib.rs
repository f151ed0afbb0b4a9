//! Formfill resolver
//!
//! Resolves every expression a form carries against launch contexts, a
//! prior response, and an asynchronous resource loader, producing a
//! fully populated scope tree.
//!
//! The pass runs in fixed order: parse the form and response into a
//! scope tree, wire the dependency graph between expressions, prove it
//! acyclic, then iterate a bounded fixpoint that evaluates ready path
//! expressions, batch-fetches ready query urls, and clones scope
//! subtrees when an expression fans out into multiple results.
//!
//! Expression evaluation itself is delegated through
//! [`eval::PathEvaluator`], and external data arrives through
//! [`loader::ResourceLoader`]; the resolver owns everything in between.

pub mod context;
pub mod cycle;
pub mod error;
pub mod eval;
mod explode;
pub mod graph;
pub mod id;
pub mod loader;
pub mod parse;
pub mod resolver;
pub mod scope;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;

use formfill_model::{Form, Resource, Response};

pub use context::{
    Context, ExpressionKind, ExpressionLanguage, ExpressionNode, LaunchContext, ResolvedValue,
    ResolvingContext,
};
pub use error::{Diagnostic, DiagnosticKind, Error, LoadError, Result, Severity};
pub use eval::{EvalEnv, EvalResult, PathEvaluator};
pub use id::NodeId;
pub use loader::{QueryCache, ResourceLoader, StaticLoader};
pub use resolver::ResolveOptions;
pub use scope::{Scope, ScopeId, ScopeTree};

use resolver::Resolver;

/// Runs one full resolution pass and returns the populated scope tree.
///
/// Fatal conditions (a dependency cycle, a round without progress,
/// unresolved permitted expressions after the round limit,
/// cancellation) are returned as [`Error`]; non-fatal findings are
/// carried on the tree via [`ScopeTree::diagnostics`].
#[allow(clippy::too_many_arguments)]
pub async fn parse_async(
    form: Form,
    response: Option<Response>,
    launch_contexts: Vec<(String, Resource)>,
    loader: &dyn ResourceLoader,
    evaluator: &dyn PathEvaluator,
    resolving_context: ResolvingContext,
    options: ResolveOptions,
    cancel: CancellationToken,
) -> Result<ScopeTree> {
    let mut tree = parse::parse_tree(
        Arc::new(form),
        response.map(Arc::new),
        launch_contexts,
        resolving_context,
    );
    graph::build_graph(&mut tree, evaluator);

    let cycles = cycle::detect_cycles(&tree);
    if !cycles.is_empty() {
        for diagnostic in &cycles {
            error!("{diagnostic}");
        }
        return Err(Error::CycleDetected(cycles));
    }

    let mut resolver = Resolver::new(
        &mut tree,
        loader,
        evaluator,
        resolving_context,
        options,
        cancel,
    );
    resolver.run().await?;
    Ok(tree)
}
