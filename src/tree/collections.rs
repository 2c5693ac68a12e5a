//! Role-tagged observable child collections.
//!
//! Every owned child of an entity sits in exactly one collection, addressed
//! by the pair (owner, [`Role`]). Collections preserve insertion order, keep
//! each member's parent link in sync, and announce every change with a
//! `MembersAdded`/`MembersRemoved` event plus a coarse `MembersChanged`
//! marker, all bubbling from the owner.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::events::Event;

use super::{ContextKind, Document, EntityId};

/// Which collection of an owner a member sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Imports,
    Structs,
    Actions,
    Inputs,
    Outputs,
    Declarations,
    Runtime,
    Meta,
    Properties,
    Documents,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Imports => "imports",
            Role::Structs => "structs",
            Role::Actions => "actions",
            Role::Inputs => "inputs",
            Role::Outputs => "outputs",
            Role::Declarations => "declarations",
            Role::Runtime => "runtime",
            Role::Meta => "meta",
            Role::Properties => "properties",
            Role::Documents => "documents",
        }
    }

    /// Collections where two members must not share a name. Actions are
    /// policed by alias generation and `duplicate-name` findings instead,
    /// so they are not listed here.
    fn names_are_exclusive(self) -> bool {
        matches!(
            self,
            Role::Inputs
                | Role::Outputs
                | Role::Declarations
                | Role::Runtime
                | Role::Meta
                | Role::Properties
                | Role::Structs
        )
    }

    fn expected_member(self) -> &'static str {
        match self {
            Role::Imports => "an import",
            Role::Structs => "a struct",
            Role::Actions => "an action",
            Role::Inputs => "an input parameter",
            Role::Outputs => "an output parameter",
            Role::Declarations => "a declaration",
            Role::Runtime => "a runtime property",
            Role::Meta => "a meta entry",
            Role::Properties => "a struct property",
            Role::Documents => "a document",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a member of `member` kind may live under `owner` in `role`.
/// Document-level actions are tasks and workflows; container bodies hold
/// calls, scatters, and conditionals.
fn member_kind_allowed(owner: ContextKind, role: Role, member: ContextKind) -> bool {
    match role {
        Role::Imports => member == ContextKind::Import,
        Role::Structs => member == ContextKind::Struct,
        Role::Documents => member == ContextKind::Document,
        Role::Inputs => member == ContextKind::Input,
        Role::Outputs => member == ContextKind::Output,
        Role::Declarations => member == ContextKind::Declaration,
        Role::Runtime => member == ContextKind::RuntimeProperty,
        Role::Meta => member == ContextKind::MetaEntry,
        Role::Properties => member == ContextKind::StructProperty,
        Role::Actions => match owner {
            ContextKind::Document => member.is_executable(),
            _ => matches!(
                member,
                ContextKind::Call | ContextKind::Scatter | ContextKind::Conditional
            ),
        },
    }
}

impl Document {
    /// Members of one collection, in insertion order.
    pub fn members(&self, owner: EntityId, role: Role) -> Vec<EntityId> {
        self.get(owner)
            .map(|entity| entity.members(role).to_vec())
            .unwrap_or_default()
    }

    /// Moves an existing entity into a collection, detaching it from its
    /// current owner first. `index` clamps to the collection length; `None`
    /// appends.
    pub fn move_member(
        &mut self,
        owner: EntityId,
        role: Role,
        member: EntityId,
        index: Option<usize>,
    ) -> Result<(), ModelError> {
        self.attach_member(owner, role, member, index)
    }

    /// Removes every member of a collection, subtree and all.
    pub fn clear_members(&mut self, owner: EntityId, role: Role) -> Result<(), ModelError> {
        let members = self.members(owner, role);
        self.batch(|doc| {
            for member in members {
                doc.remove(member)?;
            }
            Ok(())
        })
    }

    pub(crate) fn attach_member(
        &mut self,
        owner: EntityId,
        role: Role,
        member: EntityId,
        index: Option<usize>,
    ) -> Result<(), ModelError> {
        let owner_entity = self.entity(owner)?;
        let owner_kind = owner_entity.kind();
        if !owner_entity.owns_role(role) {
            return Err(ModelError::UnsupportedRole {
                kind: owner_kind,
                role: role.as_str(),
            });
        }
        let member_entity = self.entity(member)?;
        let member_kind = member_entity.kind();
        let member_name = member_entity.name.clone();
        let old_parent = member_entity.parent();
        if member == owner || self.is_parent_for(member, owner) {
            return Err(ModelError::OwnershipCycle { owner, member });
        }
        if !member_kind_allowed(owner_kind, role, member_kind) {
            return Err(ModelError::kind_mismatch(
                member,
                role.expected_member(),
                member_kind,
            ));
        }
        if role.names_are_exclusive() && !member_name.is_empty() {
            let taken = self
                .entity(owner)?
                .members(role)
                .iter()
                .filter(|existing| **existing != member)
                .any(|existing| {
                    self.get(*existing)
                        .is_some_and(|entity| entity.name == member_name)
                });
            if taken {
                let owner_name = self.entity(owner)?.reference();
                return Err(ModelError::duplicate_name(
                    member_name, owner_kind, owner_name,
                ));
            }
        }
        self.batch(|doc| {
            if let Some(old) = old_parent {
                doc.detach_member(old, member)?;
            }
            doc.entity_mut(member)?.parent = Some(owner);
            let slot = doc
                .entity_mut(owner)?
                .members_mut(role)
                .ok_or(ModelError::UnsupportedRole {
                    kind: owner_kind,
                    role: role.as_str(),
                })?;
            let at = index.map(|i| i.min(slot.len())).unwrap_or(slot.len());
            slot.insert(at, member);
            doc.emit(
                owner,
                Event::MembersAdded {
                    role,
                    members: vec![member],
                },
            );
            doc.emit(owner, Event::MembersChanged { role });
            doc.touch();
            Ok(())
        })
    }

    /// Takes a member out of its owner's collection without deleting it.
    /// A no-op when the pair is not currently related.
    pub(crate) fn detach_member(
        &mut self,
        owner: EntityId,
        member: EntityId,
    ) -> Result<(), ModelError> {
        let Some(owner_entity) = self.get(owner) else {
            return Ok(());
        };
        let Some(role) = owner_entity.role_of(member) else {
            return Ok(());
        };
        if let Some(slot) = self.entity_mut(owner)?.members_mut(role) {
            slot.retain(|existing| *existing != member);
        }
        if let Ok(entity) = self.entity_mut(member) {
            if entity.parent == Some(owner) {
                entity.parent = None;
            }
        }
        self.emit(
            owner,
            Event::MembersRemoved {
                role,
                members: vec![member],
            },
        );
        self.emit(owner, Event::MembersChanged { role });
        self.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_text() {
        assert_eq!(Role::Inputs.as_str(), "inputs");
        assert_eq!(Role::Declarations.to_string(), "declarations");
    }

    #[test]
    fn test_member_kind_matrix() {
        // document-level actions are executables only
        assert!(member_kind_allowed(
            ContextKind::Document,
            Role::Actions,
            ContextKind::Task
        ));
        assert!(!member_kind_allowed(
            ContextKind::Document,
            Role::Actions,
            ContextKind::Call
        ));
        // container bodies hold calls and blocks, not tasks
        assert!(member_kind_allowed(
            ContextKind::Workflow,
            Role::Actions,
            ContextKind::Scatter
        ));
        assert!(!member_kind_allowed(
            ContextKind::Workflow,
            Role::Actions,
            ContextKind::Task
        ));
        assert!(member_kind_allowed(
            ContextKind::Task,
            Role::Inputs,
            ContextKind::Input
        ));
        assert!(!member_kind_allowed(
            ContextKind::Task,
            Role::Inputs,
            ContextKind::Output
        ));
    }
}
