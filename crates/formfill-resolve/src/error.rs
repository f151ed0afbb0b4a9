//! Resolution errors and diagnostics
//!
//! Fatal pass outcomes are [`Error`] values returned from the entry
//! point. Non-fatal findings accumulate as [`Diagnostic`]s on the scope
//! tree; the location data a diagnostic carries is what this domain has
//! instead of source spans, a link-id and the expression text.

use std::fmt;

use thiserror::Error;

/// Resolution result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal pass outcomes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("dependency cycle detected ({} cycle(s))", .0.len())]
    CycleDetected(Vec<Diagnostic>),

    #[error("{pending} expression(s) left unresolved after the round limit")]
    Unresolvable { pending: usize },

    #[error("round {round} made no progress")]
    NoProgress { round: usize },

    #[error("resolution cancelled")]
    Cancelled,
}

/// Errors raised by a resource loader backend.
///
/// A backend failure is downgraded to empty results by the loader
/// façade; cancellation propagates out of the pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("load cancelled")]
    Cancelled,

    #[error("loader backend failure: {0}")]
    Backend(String),
}

/// Category of a non-fatal finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Extension expression in a language the resolver does not accept
    /// for that extension.
    UnsupportedLanguage,
    /// Extension expression with empty text.
    EmptyExpression,
    /// Recognized extension url carrying a non-expression value.
    WrongValueType,
    /// A `%variable` reference that no in-scope context defines.
    UnknownVariable,
    /// A dependency cycle; carried inside [`Error::CycleDetected`].
    CycleDetected,
    /// Fan-out requested on the root scope.
    FanOutAtRoot,
    /// An embedded expression produced more than one result; its value
    /// is recorded but no substitution is applied.
    AmbiguousEmbedded,
}

impl DiagnosticKind {
    pub fn name(self) -> &'static str {
        match self {
            DiagnosticKind::UnsupportedLanguage => "unsupported language",
            DiagnosticKind::EmptyExpression => "empty expression",
            DiagnosticKind::WrongValueType => "wrong value type",
            DiagnosticKind::UnknownVariable => "unknown variable",
            DiagnosticKind::CycleDetected => "cyclic dependency",
            DiagnosticKind::FanOutAtRoot => "fan-out at root",
            DiagnosticKind::AmbiguousEmbedded => "ambiguous embedded result",
        }
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single non-fatal finding.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    /// Link-id of the item the finding belongs to, when there is one.
    pub link_id: Option<String>,
    /// The expression text involved, when there is one.
    pub expression: Option<String>,
}

impl Diagnostic {
    /// Creates a warning diagnostic.
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::with_severity(kind, Severity::Warning, message)
    }

    /// Creates an error diagnostic.
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::with_severity(kind, Severity::Error, message)
    }

    fn with_severity(kind: DiagnosticKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            link_id: None,
            expression: None,
        }
    }

    /// Attaches the owning item's link-id.
    pub fn with_link_id(mut self, link_id: impl Into<String>) -> Self {
        self.link_id = Some(link_id.into());
        self
    }

    /// Attaches the expression text involved.
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.kind.name(), self.message)?;
        if let Some(link_id) = &self.link_id {
            write!(f, " (item '{}')", link_id)?;
        }
        Ok(())
    }
}
