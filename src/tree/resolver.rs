//! The identifier resolver: call targets and struct type names.
//!
//! A call stores its target as text. On every tree-change pass the resolver
//! re-resolves each call from its owning document's root: dotted names
//! descend segment by segment, with intermediate segments restricted to
//! container kinds, and the final segment must land on a task or workflow.
//! Resolution failure never aborts anything — the executable stays unset
//! and validation reports it — because an editor routinely holds calls to
//! imports that have not loaded yet.
//!
//! Struct type names resolve separately: local definitions first, then
//! import aliases, then the structs of imported documents.

use tracing::debug;

use crate::events::{Event, EventKind};

use super::{ContextKind, Document, EntityId, Role};

/// Kinds a dotted path may traverse before its final segment.
fn is_path_container(kind: ContextKind) -> bool {
    matches!(
        kind,
        ContextKind::Import
            | ContextKind::Workflow
            | ContextKind::Task
            | ContextKind::Call
            | ContextKind::Struct
    )
}

impl Document {
    /// The nearest enclosing document entity: the root, or an imported
    /// sub-document for entities living inside one.
    pub fn owning_document(&self, id: EntityId) -> EntityId {
        if self.kind(id) == Some(ContextKind::Document) {
            return id;
        }
        self.ancestors(id)
            .into_iter()
            .find(|ancestor| self.kind(*ancestor) == Some(ContextKind::Document))
            .unwrap_or_else(|| self.root())
    }

    /// Resolves a possibly dotted name to a task or workflow, searching the
    /// scope's subtree depth-first. Returns `None` for names that do not
    /// resolve; the caller decides whether that is a problem.
    pub fn resolve_executable(&self, scope: EntityId, name: &str) -> Option<EntityId> {
        if name.is_empty() {
            return None;
        }
        let segments: Vec<&str> = name.split('.').collect();
        self.resolve_path(scope, &segments)
    }

    fn resolve_path(&self, scope: EntityId, segments: &[&str]) -> Option<EntityId> {
        let (head, rest) = segments.split_first()?;
        for id in self.subtree(scope).into_iter().skip(1) {
            let Some(entity) = self.get(id) else { continue };
            if entity.reference() != *head {
                continue;
            }
            if rest.is_empty() {
                if entity.kind().is_executable() {
                    return Some(id);
                }
            } else if is_path_container(entity.kind()) {
                if let Some(found) = self.resolve_path(id, rest) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Resolves a struct type name within a document scope: the document's
    /// own definitions, then import aliases, then the imported documents'
    /// structs under their original names.
    pub fn resolve_struct(&self, scope: EntityId, name: &str) -> Option<EntityId> {
        let scope = self.owning_document(scope);
        for candidate in self.members(scope, Role::Structs) {
            if self.name(candidate).as_deref() == Some(name) {
                return Some(candidate);
            }
        }
        for import in self.members(scope, Role::Imports) {
            let Some(data) = self.get(import).and_then(|entity| entity.as_import()) else {
                continue;
            };
            let source = data
                .aliases
                .iter()
                .find(|alias| alias.alias == name)
                .map(|alias| alias.source.clone());
            let Some(imported) = self.import_document(import) else {
                continue;
            };
            let wanted = source.as_deref().unwrap_or(name);
            for candidate in self.members(imported, Role::Structs) {
                if self.name(candidate).as_deref() == Some(wanted) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// One resolver pass over every call in the tree. Re-resolves each
    /// target from scratch, so renames, removals, and freshly loaded imports
    /// all converge in the same place. Returns whether anything changed;
    /// a second pass over an unchanged tree is a no-op.
    pub(crate) fn run_resolver_pass(&mut self) -> bool {
        let calls: Vec<EntityId> = self
            .subtree(self.root())
            .into_iter()
            .filter(|id| self.kind(*id) == Some(ContextKind::Call))
            .collect();
        let mut changed = false;
        for call in calls {
            changed |= self.resolve_call(call);
        }
        changed
    }

    fn resolve_call(&mut self, call: EntityId) -> bool {
        let Some(data) = self.get(call).and_then(|entity| entity.as_call()) else {
            return false;
        };
        let target = data.target.clone();
        let current = data.executable;
        let scope = self.owning_document(call);
        let resolved = self.resolve_executable(scope, &target);

        let mut changed = false;
        if resolved != current {
            if let Ok(entity) = self.entity_mut(call) {
                if let Some(call_data) = entity.as_call_mut() {
                    call_data.executable = resolved;
                }
            }
            self.remove_forwards_to(call);
            if let Some(executable) = resolved {
                self.install_forward(
                    executable,
                    call,
                    vec![EventKind::NameChanged, EventKind::CommandChanged],
                );
            }
            match resolved {
                Some(executable) => debug!(%call, %target, %executable, "resolved call"),
                None => debug!(%call, %target, "call target unresolved"),
            }
            self.emit(call, Event::ExecutableChanged { previous: current });
            changed = true;
        }
        changed |= self.update_call_parameters(call).unwrap_or(false);
        changed
    }
}
