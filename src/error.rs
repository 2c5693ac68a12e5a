//! Structural error types for model mutation.
//!
//! Errors in this module indicate caller misuse of the mutable API: stale
//! entity handles, duplicate names inside one collection, operations applied
//! to a kind that does not support them. Document-semantic findings (an
//! unresolved call target, a missing required input) are *not* errors; they
//! travel through [`crate::diagnostics`] instead and never abort a mutation.

use thiserror::Error;

use crate::diagnostics::Diagnostic;
use crate::tree::{ContextKind, EntityId};

/// Main error type for structural misuse of the document model.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A required field was missing from an options record.
    #[error("missing required field `{field}` for {kind}")]
    MissingField {
        kind: ContextKind,
        field: &'static str,
    },

    /// An entity id did not resolve: the entity was removed, or the id
    /// belongs to a different document.
    #[error("entity {id} is detached or does not belong to this document")]
    Detached { id: EntityId },

    /// An operation was applied to an entity of the wrong kind.
    #[error("expected {expected} but {id} is a {found}")]
    KindMismatch {
        id: EntityId,
        expected: &'static str,
        found: ContextKind,
    },

    /// A name already exists within the target collection.
    #[error("duplicate name `{name}` in {owner} `{owner_name}`")]
    DuplicateName {
        name: String,
        owner: ContextKind,
        owner_name: String,
    },

    /// The entity kind does not own a collection with the requested role.
    #[error("{kind} does not own a `{role}` collection")]
    UnsupportedRole {
        kind: ContextKind,
        role: &'static str,
    },

    /// Attaching the member would make an entity its own ancestor.
    #[error("entity {member} is an ancestor of {owner} and cannot become its member")]
    OwnershipCycle { owner: EntityId, member: EntityId },

    /// A named member was looked up in a collection that has no such entry.
    #[error("no member named `{name}` under entity {owner}")]
    UnknownMember { owner: EntityId, name: String },

    /// A parameter was bound to itself.
    #[error("cannot bind parameter `{name}` to itself")]
    SelfBinding { name: String },

    /// An options record carried type text that does not parse.
    #[error(transparent)]
    InvalidType(#[from] crate::types::TypeParseError),

    /// An options record carried an unrecognized version string.
    #[error(transparent)]
    UnknownVersion(#[from] crate::version::UnknownVersion),

    /// Validation was asked to fail fast and found an error-level diagnostic.
    #[error("validation failed: {diagnostic}")]
    Invalid { diagnostic: Diagnostic },
}

impl ModelError {
    /// Create a missing-field error for an options record.
    pub fn missing_field(kind: ContextKind, field: &'static str) -> Self {
        ModelError::MissingField { kind, field }
    }

    /// Create an error for a stale or foreign entity id.
    pub fn detached(id: EntityId) -> Self {
        ModelError::Detached { id }
    }

    /// Create a kind-mismatch error.
    pub fn kind_mismatch(id: EntityId, expected: &'static str, found: ContextKind) -> Self {
        ModelError::KindMismatch {
            id,
            expected,
            found,
        }
    }

    /// Create a duplicate-name error scoped to an owning entity.
    pub fn duplicate_name(
        name: impl Into<String>,
        owner: ContextKind,
        owner_name: impl Into<String>,
    ) -> Self {
        ModelError::DuplicateName {
            name: name.into(),
            owner,
            owner_name: owner_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ModelError::missing_field(ContextKind::Call, "target");
        assert_eq!(err.to_string(), "missing required field `target` for call");

        let err = ModelError::duplicate_name("x", ContextKind::Task, "sum");
        assert_eq!(err.to_string(), "duplicate name `x` in task `sum`");
    }
}
