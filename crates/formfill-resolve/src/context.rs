//! Contexts: launch contexts and expression nodes
//!
//! A context is one resolvable unit living in a scope. Launch contexts
//! arrive resolved from outside; expression nodes carry text in one of
//! two languages plus a value slot the resolver fills. Behavior is
//! selected centrally on the `kind` discriminator, not through a type
//! hierarchy.

use std::sync::Arc;

use indexmap::IndexSet;

use formfill_model::{FormItem, Resource, ResponseItem, Value, LANGUAGE_PATH, LANGUAGE_QUERY};

use crate::id::NodeId;
use crate::scope::ScopeId;

/// Pass-level mode selecting which expression kinds are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolvingContext {
    Population,
    Extraction,
}

/// The two expression languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionLanguage {
    /// Navigation expressions over resources and bound variables.
    Path,
    /// Url templates resolved against the resource loader.
    Query,
}

impl ExpressionLanguage {
    /// Maps a language tag from an expression definition. Unknown tags
    /// are an unsupported-language condition.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            LANGUAGE_PATH => Some(ExpressionLanguage::Path),
            LANGUAGE_QUERY => Some(ExpressionLanguage::Query),
            _ => None,
        }
    }
}

/// What role an expression occurrence plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    PopulationContext,
    ExtractionContext,
    InitialExpression,
    VariableExpression,
    CalculatedExpression,
    ExtractionContextId,
    /// A path expression extracted from `{{…}}` markers inside query
    /// text.
    Embedded,
}

impl ExpressionKind {
    /// Whether this kind participates in the given pass mode.
    pub fn is_permitted(self, mode: ResolvingContext) -> bool {
        match mode {
            ResolvingContext::Population => !matches!(
                self,
                ExpressionKind::ExtractionContext | ExpressionKind::ExtractionContextId
            ),
            ResolvingContext::Extraction => !matches!(
                self,
                ExpressionKind::PopulationContext | ExpressionKind::InitialExpression
            ),
        }
    }
}

/// A resolved value list, possibly empty, with the resource it was
/// drawn from when the evaluator reports one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedValue {
    pub values: Vec<Value>,
    pub source: Option<Resource>,
}

impl ResolvedValue {
    /// The resolved-to-nothing value. Assigning it still counts as
    /// resolved.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(values: Vec<Value>) -> Self {
        Self {
            values,
            source: None,
        }
    }

    /// A singleton value whose source is the value itself when it is a
    /// resource.
    pub fn singleton(value: Value) -> Self {
        let source = match &value {
            Value::Resource(r) => Some(r.clone()),
            _ => None,
        };
        Self {
            values: vec![value],
            source,
        }
    }
}

/// One expression occurrence in a scope.
#[derive(Debug, Clone)]
pub struct ExpressionNode {
    pub id: NodeId,
    /// Symbol under which variable references can find this node.
    pub name: Option<String>,
    /// Expression source text. Rewritten in place when an embedded
    /// result is spliced into query text.
    pub text: String,
    pub language: ExpressionLanguage,
    pub kind: ExpressionKind,
    /// Owning scope.
    pub scope: ScopeId,
    /// Form item and matching response item at the creation site.
    /// Absent for form-level contexts in the root scope.
    pub item: Option<Arc<FormItem>>,
    pub response_item: Option<Arc<ResponseItem>>,
    /// Contexts this node reads.
    pub dependencies: IndexSet<NodeId>,
    /// Reverse edges, maintained symmetrically with `dependencies`.
    pub dependants: IndexSet<NodeId>,
    /// Value slot; `Some` (even of the empty list) means resolved.
    pub value: Option<ResolvedValue>,
    /// Set when the text references response-relative symbols.
    pub response_dependant: bool,
    /// Set when the text references a symbol no scope defines. Such a
    /// node is never ready; it is reported at graph build and fails the
    /// pass as unresolvable.
    pub unknown_reference: bool,
    /// The original this node was cloned from during fan-out.
    pub cloned_from: Option<NodeId>,
}

impl ExpressionNode {
    pub fn is_resolved(&self) -> bool {
        self.value.is_some()
    }

    /// Display handle for logs and diagnostics: the symbol name when
    /// there is one, the text otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.text)
    }
}

/// An externally supplied named resource, injected at the root scope.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub id: NodeId,
    pub name: String,
    pub resource: Resource,
    pub scope: ScopeId,
    pub dependants: IndexSet<NodeId>,
}

/// A context is either an externally supplied launch context or an
/// expression node created during parsing or fan-out.
#[derive(Debug, Clone)]
pub enum Context {
    Launch(LaunchContext),
    Expression(ExpressionNode),
}

impl Context {
    pub fn id(&self) -> NodeId {
        match self {
            Context::Launch(l) => l.id,
            Context::Expression(e) => e.id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Context::Launch(l) => Some(&l.name),
            Context::Expression(e) => e.name.as_deref(),
        }
    }

    pub fn scope(&self) -> ScopeId {
        match self {
            Context::Launch(l) => l.scope,
            Context::Expression(e) => e.scope,
        }
    }

    /// Launch contexts are always resolved; expression nodes once their
    /// value slot is assigned.
    pub fn is_resolved(&self) -> bool {
        match self {
            Context::Launch(_) => true,
            Context::Expression(e) => e.is_resolved(),
        }
    }

    /// The values this context contributes to variable bindings, when
    /// resolved.
    pub fn resolved_values(&self) -> Option<Vec<Value>> {
        match self {
            Context::Launch(l) => Some(vec![Value::Resource(l.resource.clone())]),
            Context::Expression(e) => e.value.as_ref().map(|v| v.values.clone()),
        }
    }

    pub fn as_expression(&self) -> Option<&ExpressionNode> {
        match self {
            Context::Expression(e) => Some(e),
            Context::Launch(_) => None,
        }
    }

    pub fn as_expression_mut(&mut self) -> Option<&mut ExpressionNode> {
        match self {
            Context::Expression(e) => Some(e),
            Context::Launch(_) => None,
        }
    }

    pub fn dependants(&self) -> &IndexSet<NodeId> {
        match self {
            Context::Launch(l) => &l.dependants,
            Context::Expression(e) => &e.dependants,
        }
    }

    pub fn dependants_mut(&mut self) -> &mut IndexSet<NodeId> {
        match self {
            Context::Launch(l) => &mut l.dependants,
            Context::Expression(e) => &mut e.dependants,
        }
    }
}
