//! Leveled, kinded validation diagnostics.
//!
//! Diagnostics are the document-semantic failure channel: they are attached
//! to the entity that raised them, aggregated upward through the tree reads
//! (`entity_issues`/`entity_errors`/`entity_warnings`), and never thrown
//! during normal read or generate calls. Only `validate(true)` promotes the
//! first aggregated error to a [`crate::error::ModelError`].

use std::fmt;

use serde::Serialize;

use crate::tree::EntityId;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Warning,
    Error,
}

/// The closed set of diagnostic kinds this model reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// A call has an empty target name.
    ExecutableRequired,
    /// A call's target name does not resolve to a task or workflow.
    UnknownExecutable,
    /// A call input has no matching formal parameter on the callee.
    UnknownInput,
    /// A call output has no matching formal parameter on the callee.
    UnknownOutput,
    /// A required callee input is neither bound nor given a value.
    MissingRequiredInput,
    /// A connection joins parameters with incompatible declared types.
    TypeMismatch,
    /// Two siblings share a reference within one container.
    DuplicateName,
    /// A feature is used below its minimum WDL version.
    UnsupportedFeature,
    /// A declared struct type does not resolve to a definition.
    UnknownStruct,
    /// A scatter has no iterator, or the iterator has no source.
    IteratorRequired,
    /// A conditional has no guard expression.
    ExpressionRequired,
    /// A name is not a legal WDL identifier.
    InvalidName,
    /// An options record carried an action kind this model does not know.
    UnknownActionKind,
    /// A call's `after` entry names no sibling call.
    UnknownAfter,
}

impl DiagnosticKind {
    /// Kebab-case slug used in display output and editor payloads.
    pub fn slug(&self) -> &'static str {
        match self {
            DiagnosticKind::ExecutableRequired => "executable-required",
            DiagnosticKind::UnknownExecutable => "unknown-executable",
            DiagnosticKind::UnknownInput => "unknown-input",
            DiagnosticKind::UnknownOutput => "unknown-output",
            DiagnosticKind::MissingRequiredInput => "missing-required-input",
            DiagnosticKind::TypeMismatch => "type-mismatch",
            DiagnosticKind::DuplicateName => "duplicate-name",
            DiagnosticKind::UnsupportedFeature => "unsupported-feature",
            DiagnosticKind::UnknownStruct => "unknown-struct",
            DiagnosticKind::IteratorRequired => "iterator-required",
            DiagnosticKind::ExpressionRequired => "expression-required",
            DiagnosticKind::InvalidName => "invalid-name",
            DiagnosticKind::UnknownActionKind => "unknown-action-kind",
            DiagnosticKind::UnknownAfter => "unknown-after",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// A single validation finding attached to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub kind: DiagnosticKind,
    /// The entity that raised the finding.
    pub entity: EntityId,
    pub message: String,
}

impl Diagnostic {
    /// Create an error-level diagnostic.
    pub fn error(kind: DiagnosticKind, entity: EntityId, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            kind,
            entity,
            message: message.into(),
        }
    }

    /// Create a warning-level diagnostic.
    pub fn warning(kind: DiagnosticKind, entity: EntityId, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            kind,
            entity,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagnosticLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Error => "error",
        };
        write!(f, "{}[{}]: {}", level, self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::EntityId;

    #[test]
    fn test_display_uses_slug() {
        let d = Diagnostic::warning(
            DiagnosticKind::UnknownExecutable,
            EntityId::test_id(0),
            "no such task or workflow: frobnicate",
        );
        assert_eq!(
            d.to_string(),
            "warning[unknown-executable]: no such task or workflow: frobnicate"
        );
        assert!(!d.is_error());
    }

    #[test]
    fn test_levels_order() {
        assert!(DiagnosticLevel::Warning < DiagnosticLevel::Error);
    }
}
