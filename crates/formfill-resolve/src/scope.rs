//! Scope tree
//!
//! A mutable tree of scopes mirroring the item tree. The tree is an
//! arena: scopes live in a flat vector addressed by [`ScopeId`],
//! contexts in an id-keyed map, and both parent links and dependency
//! edges are plain indices disjoint from ownership. Fan-out replaces a
//! child entry in its parent's list with clones; the replaced subtree
//! stays in the arena but drops out of root reachability, so nothing is
//! ever deleted individually.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::warn;

use formfill_model::{Form, FormItem, Response, ResponseItem};

use crate::context::{Context, ExpressionKind, ExpressionNode};
use crate::error::Diagnostic;
use crate::id::{IdProvider, NodeId};

/// Index of a scope in the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope{}", self.0)
    }
}

/// One node of the scope tree.
#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    /// Back index into the arena; `None` only at the root.
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    /// The form item this scope mirrors; absent at the root.
    pub item: Option<Arc<FormItem>>,
    /// The matching response item; absent at the root.
    pub response_item: Option<Arc<ResponseItem>>,
    /// In-scope contexts in definition order.
    pub contexts: Vec<NodeId>,
}

impl Scope {
    pub fn link_id(&self) -> Option<&str> {
        self.item.as_ref().map(|i| i.link_id.as_str())
    }
}

/// The fully parsed (and, after the pass, fully resolved) scope tree.
#[derive(Debug)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    contexts: IndexMap<NodeId, Context>,
    root: ScopeId,
    ids: IdProvider,
    form: Arc<Form>,
    response: Option<Arc<Response>>,
    diagnostics: Vec<Diagnostic>,
}

impl ScopeTree {
    /// A tree with just the root scope. The root exists even for the
    /// empty form; launch contexts live there.
    pub fn new(form: Arc<Form>, response: Option<Arc<Response>>) -> Self {
        let root = Scope {
            id: ScopeId(0),
            parent: None,
            children: Vec::new(),
            item: None,
            response_item: None,
            contexts: Vec::new(),
        };
        Self {
            scopes: vec![root],
            contexts: IndexMap::new(),
            root: ScopeId(0),
            ids: IdProvider::new(),
            form,
            response,
            diagnostics: Vec::new(),
        }
    }

    pub fn root(&self) -> ScopeId {
        self.root
    }

    pub fn form(&self) -> &Arc<Form> {
        &self.form
    }

    pub fn response(&self) -> Option<&Arc<Response>> {
        self.response.as_ref()
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    /// Allocates a child scope under `parent`.
    pub fn new_scope(
        &mut self,
        parent: ScopeId,
        item: Option<Arc<FormItem>>,
        response_item: Option<Arc<ResponseItem>>,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            id,
            parent: Some(parent),
            children: Vec::new(),
            item,
            response_item,
            contexts: Vec::new(),
        });
        self.scopes[parent.0].children.push(id);
        id
    }

    /// Allocates a scope without attaching it to any parent's child
    /// list. Fan-out uses this to assemble clones before splicing them
    /// in.
    pub(crate) fn new_detached_scope(
        &mut self,
        parent: ScopeId,
        item: Option<Arc<FormItem>>,
        response_item: Option<Arc<ResponseItem>>,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            id,
            parent: Some(parent),
            children: Vec::new(),
            item,
            response_item,
            contexts: Vec::new(),
        });
        id
    }

    pub fn next_id(&self) -> NodeId {
        self.ids.next_id()
    }

    pub fn context(&self, id: NodeId) -> &Context {
        &self.contexts[&id]
    }

    pub(crate) fn context_mut(&mut self, id: NodeId) -> &mut Context {
        &mut self.contexts[&id]
    }

    pub fn expression(&self, id: NodeId) -> Option<&ExpressionNode> {
        self.contexts.get(&id).and_then(Context::as_expression)
    }

    pub(crate) fn expression_mut(&mut self, id: NodeId) -> Option<&mut ExpressionNode> {
        self.contexts
            .get_mut(&id)
            .and_then(Context::as_expression_mut)
    }

    /// Registers a context and appends it to its owning scope's list.
    pub(crate) fn insert_context(&mut self, context: Context) -> NodeId {
        let id = context.id();
        let scope = context.scope();
        self.contexts.insert(id, context);
        self.scopes[scope.0].contexts.push(id);
        id
    }

    /// Name lookup: the nearest ancestor context (including `scope`
    /// itself) with the given name. Within one scope the latest
    /// definition wins.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<NodeId> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let scope = self.scope(id);
            for ctx_id in scope.contexts.iter().rev() {
                if self.context(*ctx_id).name() == Some(name) {
                    return Some(*ctx_id);
                }
            }
            cursor = scope.parent;
        }
        None
    }

    /// Live scopes in preorder.
    pub fn live_scopes(&self) -> Vec<ScopeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for child in self.scope(id).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Live expression nodes in preorder, scope by scope, contexts in
    /// definition order. This is the deterministic candidate order.
    pub fn expression_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for scope in self.live_scopes() {
            for ctx_id in &self.scope(scope).contexts {
                if self.expression(*ctx_id).is_some() {
                    out.push(*ctx_id);
                }
            }
        }
        out
    }

    /// The first context of the given kind in a scope.
    pub fn find_kind_in_scope(&self, scope: ScopeId, kind: ExpressionKind) -> Option<NodeId> {
        self.scope(scope)
            .contexts
            .iter()
            .copied()
            .find(|id| self.expression(*id).is_some_and(|e| e.kind == kind))
    }

    /// Records a dependency edge `from → to` together with its reverse
    /// dependant edge.
    pub(crate) fn add_dependency(&mut self, from: NodeId, to: NodeId) {
        if let Some(expr) = self.expression_mut(from) {
            expr.dependencies.insert(to);
        }
        self.context_mut(to).dependants_mut().insert(from);
    }

    /// Replaces one entry in a parent's child list with a run of new
    /// children, in order.
    pub(crate) fn replace_child(&mut self, parent: ScopeId, old: ScopeId, new: Vec<ScopeId>) {
        let children = &mut self.scopes[parent.0].children;
        match children.iter().position(|c| *c == old) {
            Some(pos) => {
                children.splice(pos..=pos, new);
            }
            None => {
                warn!(%parent, %old, "replace_child: scope not found in parent");
                children.extend(new);
            }
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub(crate) fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        warn!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }
}
