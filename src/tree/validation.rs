//! The validation engine: per-entity diagnostics and subtree aggregation.
//!
//! Nothing here caches. An entity's own findings are computed on every read
//! from the current tree state, and the aggregate getters walk the subtree,
//! so fixing a problem clears its diagnostic on the very next read. Child
//! findings are never copied into a parent's own list; parents only reflect
//! them through the aggregates.
//!
//! Levels follow what an interactive editor can tolerate: transient states
//! (a target that has not resolved, an input the callee dropped, a missing
//! required value) are warnings, while states no finished document may have
//! (an empty call target, colliding sibling references, features used below
//! their version) are errors.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLevel};
use crate::error::ModelError;
use crate::version::Feature;

use super::{ContextKind, Document, EntityId, Role};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("identifier pattern"));

impl Document {
    /// Findings raised by this entity itself, excluding its descendants.
    pub fn self_diagnostics(&self, id: EntityId) -> Vec<Diagnostic> {
        let Some(entity) = self.get(id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        match entity.kind() {
            ContextKind::Document => {
                if let Some(data) = entity.as_document() {
                    out.extend(data.issues.iter().cloned());
                }
            }
            ContextKind::Import => self.check_import(id, &mut out),
            ContextKind::Struct => {
                self.check_name(id, &mut out);
                self.check_kind_version(id, &mut out);
            }
            ContextKind::Task | ContextKind::Workflow => {
                self.check_name(id, &mut out);
                self.check_sibling_collision(id, &mut out);
            }
            ContextKind::Call => self.check_call(id, &mut out),
            ContextKind::Scatter => {
                self.check_sibling_collision(id, &mut out);
                self.check_scatter(id, &mut out);
            }
            ContextKind::Conditional => self.check_conditional(id, &mut out),
            kind if kind.is_parameter() => self.check_parameter(id, &mut out),
            ContextKind::RuntimeProperty | ContextKind::MetaEntry => {
                self.check_name(id, &mut out);
            }
            _ => {}
        }
        out
    }

    /// Every finding in the entity's subtree, pre-order, self first.
    pub fn entity_issues(&self, id: EntityId) -> Vec<Diagnostic> {
        self.subtree(id)
            .into_iter()
            .flat_map(|member| self.self_diagnostics(member))
            .collect()
    }

    /// Error-level findings in the entity's subtree.
    pub fn entity_errors(&self, id: EntityId) -> Vec<Diagnostic> {
        self.entity_issues(id)
            .into_iter()
            .filter(Diagnostic::is_error)
            .collect()
    }

    /// Warning-level findings in the entity's subtree.
    pub fn entity_warnings(&self, id: EntityId) -> Vec<Diagnostic> {
        self.entity_issues(id)
            .into_iter()
            .filter(|diagnostic| diagnostic.level == DiagnosticLevel::Warning)
            .collect()
    }

    /// Whether the entity's subtree is free of findings of any level.
    pub fn entity_valid(&self, id: EntityId) -> bool {
        !self.entity_contains_issues(id)
    }

    /// Whether any finding exists anywhere in the entity's subtree.
    pub fn entity_contains_issues(&self, id: EntityId) -> bool {
        self.subtree(id)
            .into_iter()
            .any(|member| !self.self_diagnostics(member).is_empty())
    }

    /// Collects the entity's aggregated findings. With `throw_error`, the
    /// first error-level finding aborts with [`ModelError::Invalid`]
    /// instead; warnings alone never fail.
    pub fn validate(&self, id: EntityId, throw_error: bool) -> Result<Vec<Diagnostic>, ModelError> {
        let issues = self.entity_issues(id);
        if throw_error {
            if let Some(diagnostic) = issues.iter().find(|diagnostic| diagnostic.is_error()) {
                return Err(ModelError::Invalid {
                    diagnostic: diagnostic.clone(),
                });
            }
        }
        Ok(issues)
    }

    fn check_name(&self, id: EntityId, out: &mut Vec<Diagnostic>) {
        let Some(name) = self.name(id) else { return };
        if !name.is_empty() && !IDENTIFIER.is_match(&name) {
            out.push(Diagnostic::error(
                DiagnosticKind::InvalidName,
                id,
                format!("`{}` is not a legal identifier", name),
            ));
        }
    }

    fn check_kind_version(&self, id: EntityId, out: &mut Vec<Diagnostic>) {
        if !self.supports(id) {
            let kind = self.kind(id).map(|kind| kind.to_string()).unwrap_or_default();
            out.push(Diagnostic::error(
                DiagnosticKind::UnsupportedFeature,
                id,
                format!(
                    "{} requires WDL {} but the document is {}",
                    kind,
                    self.get(id)
                        .map(|entity| entity.kind().minimum_version())
                        .unwrap_or_default(),
                    self.effective_version(id)
                ),
            ));
        }
    }

    fn check_import(&self, id: EntityId, out: &mut Vec<Diagnostic>) {
        self.check_name(id, out);
        let Some(data) = self.get(id).and_then(|entity| entity.as_import()) else {
            return;
        };
        if !data.aliases.is_empty()
            && !self.effective_version(id).supports(Feature::ImportAliases)
        {
            out.push(Diagnostic::error(
                DiagnosticKind::UnsupportedFeature,
                id,
                format!(
                    "import struct aliases require WDL {} but the document is {}",
                    Feature::ImportAliases.minimum_version(),
                    self.effective_version(id)
                ),
            ));
        }
    }

    fn check_call(&self, id: EntityId, out: &mut Vec<Diagnostic>) {
        self.check_sibling_collision(id, out);
        let Some(data) = self.get(id).and_then(|entity| entity.as_call()) else {
            return;
        };
        if data.target.is_empty() {
            out.push(Diagnostic::error(
                DiagnosticKind::ExecutableRequired,
                id,
                "call has no target",
            ));
        } else if data
            .executable
            .filter(|executable| self.get(*executable).is_some())
            .is_none()
        {
            out.push(Diagnostic::warning(
                DiagnosticKind::UnknownExecutable,
                id,
                format!("no such task or workflow: {}", data.target),
            ));
        }
        if !data.after.is_empty() && !self.effective_version(id).supports(Feature::CallAfter) {
            out.push(Diagnostic::error(
                DiagnosticKind::UnsupportedFeature,
                id,
                format!(
                    "`after` requires WDL {} but the document is {}",
                    Feature::CallAfter.minimum_version(),
                    self.effective_version(id)
                ),
            ));
        }
        if let Some(owner) = self.parent(id) {
            let siblings = self.members(owner, Role::Actions);
            for name in &data.after {
                let known = siblings.iter().any(|sibling| {
                    *sibling != id && self.reference(*sibling).as_deref() == Some(name.as_str())
                });
                if !known {
                    out.push(Diagnostic::warning(
                        DiagnosticKind::UnknownAfter,
                        id,
                        format!("`after {}` names no sibling action", name),
                    ));
                }
            }
        }
    }

    fn check_scatter(&self, id: EntityId, out: &mut Vec<Diagnostic>) {
        let iterator = self.scatter_iterator(id);
        let sourced = iterator.is_some_and(|iterator| {
            !self.inbound(iterator).is_empty() || self.parameter_value(iterator).is_some()
        });
        if !sourced {
            out.push(Diagnostic::error(
                DiagnosticKind::IteratorRequired,
                id,
                "scatter has no iterator with a source",
            ));
        }
    }

    fn check_conditional(&self, id: EntityId, out: &mut Vec<Diagnostic>) {
        self.check_sibling_collision(id, out);
        let empty = self
            .get(id)
            .and_then(|entity| entity.as_conditional())
            .is_none_or(|data| data.expression.is_empty());
        if empty {
            out.push(Diagnostic::error(
                DiagnosticKind::ExpressionRequired,
                id,
                "conditional has no guard expression",
            ));
        }
    }

    fn check_parameter(&self, id: EntityId, out: &mut Vec<Diagnostic>) {
        self.check_name(id, out);
        let Some(entity) = self.get(id) else { return };
        let Some(data) = entity.as_parameter() else {
            return;
        };

        // call parameters must still exist on the callee
        let under_call = entity
            .parent()
            .is_some_and(|parent| self.kind(parent) == Some(ContextKind::Call));
        if under_call {
            let delegated = data
                .delegate
                .filter(|delegate| self.get(*delegate).is_some())
                .is_some();
            if !delegated {
                let (kind, noun) = match entity.kind() {
                    ContextKind::Output => (DiagnosticKind::UnknownOutput, "output"),
                    _ => (DiagnosticKind::UnknownInput, "input"),
                };
                out.push(Diagnostic::warning(
                    kind,
                    id,
                    format!("callee has no {} named `{}`", noun, entity.name()),
                ));
            } else if entity.kind() == ContextKind::Input
                && data.inbound.is_empty()
                && data.value.is_none()
                && data
                    .delegate
                    .is_some_and(|delegate| self.parameter_required(delegate))
            {
                out.push(Diagnostic::warning(
                    DiagnosticKind::MissingRequiredInput,
                    id,
                    format!("required input `{}` has no value", entity.name()),
                ));
            }
        }

        if let Some(declared) = self.parameter_type(id) {
            for name in declared.referenced_structs() {
                if self.resolve_struct(id, name).is_none() {
                    out.push(Diagnostic::warning(
                        DiagnosticKind::UnknownStruct,
                        id,
                        format!("no struct definition named `{}`", name),
                    ));
                }
            }
            for source in &data.inbound {
                let Some(source_type) = self.parameter_type(*source) else {
                    continue;
                };
                if !source_type.is_sub_type_of(&declared) {
                    out.push(Diagnostic::warning(
                        DiagnosticKind::TypeMismatch,
                        id,
                        format!(
                            "`{}` cannot accept a connection of type `{}` (declared `{}`)",
                            entity.name(),
                            source_type,
                            declared
                        ),
                    ));
                }
            }
        }
    }

    /// An action colliding, case-insensitively, with an earlier sibling
    /// gets the finding; the first occupant keeps the name cleanly.
    fn check_sibling_collision(&self, id: EntityId, out: &mut Vec<Diagnostic>) {
        let Some(owner) = self.parent(id) else { return };
        let Some(key) = self.collision_key(id) else {
            return;
        };
        if key.is_empty() {
            return;
        }
        let lowered = key.to_lowercase();
        for sibling in self.members(owner, Role::Actions) {
            if sibling == id {
                break;
            }
            if self
                .collision_key(sibling)
                .is_some_and(|other| other.to_lowercase() == lowered)
            {
                out.push(Diagnostic::error(
                    DiagnosticKind::DuplicateName,
                    id,
                    format!("`{}` is already used by a sibling", key),
                ));
                break;
            }
        }
    }

    /// Tasks and workflows collide on the name they emit under; an alias
    /// does not change their header. Calls and blocks collide on their
    /// in-scope reference.
    fn collision_key(&self, id: EntityId) -> Option<String> {
        let entity = self.get(id)?;
        if entity.kind().is_executable() {
            return Some(entity.name().to_string());
        }
        Some(entity.reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ActionOptions, ParameterOptions};
    use crate::version::WdlVersion;

    #[test]
    fn test_unresolved_call_is_single_warning() {
        let mut doc = Document::new(WdlVersion::V1_0);
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let call = doc
            .add_action(workflow, ActionOptions::call("missing"))
            .unwrap()
            .unwrap();

        assert!(!doc.entity_valid(call));
        let issues = doc.entity_issues(call);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, DiagnosticKind::UnknownExecutable);
        assert!(!issues[0].is_error());

        // fixing the reference clears the finding on the next read
        doc.add_action(root, ActionOptions::task("missing")).unwrap();
        assert!(doc.entity_valid(call));
        assert!(doc.entity_issues(call).is_empty());
    }

    #[test]
    fn test_empty_call_target_is_error() {
        let mut doc = Document::new(WdlVersion::V1_0);
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let call = doc
            .add_action(workflow, ActionOptions::call(""))
            .unwrap()
            .unwrap();
        let issues = doc.entity_issues(call);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, DiagnosticKind::ExecutableRequired);
        assert!(issues[0].is_error());
        assert!(doc.validate(call, true).is_err());
        assert!(doc.validate(call, false).is_ok());
    }

    #[test]
    fn test_after_below_minimum_version() {
        let mut doc = Document::new(WdlVersion::V1_0);
        let root = doc.root();
        doc.add_action(root, ActionOptions::task("sum")).unwrap();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        doc.add_after(call, "other").unwrap();

        let kinds: Vec<DiagnosticKind> = doc
            .entity_issues(call)
            .into_iter()
            .map(|diagnostic| diagnostic.kind)
            .collect();
        assert!(kinds.contains(&DiagnosticKind::UnsupportedFeature));
        assert!(kinds.contains(&DiagnosticKind::UnknownAfter));

        doc.set_version(WdlVersion::V1_1).unwrap();
        let kinds: Vec<DiagnosticKind> = doc
            .entity_issues(call)
            .into_iter()
            .map(|diagnostic| diagnostic.kind)
            .collect();
        assert!(!kinds.contains(&DiagnosticKind::UnsupportedFeature));
    }

    #[test]
    fn test_struct_gated_by_version() {
        let mut doc = Document::new(WdlVersion::Draft2);
        doc.add_struct(crate::tree::StructOptions {
            name: Some("Person".to_string()),
            ..Default::default()
        })
        .unwrap();
        let issues = doc.entity_issues(doc.root());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, DiagnosticKind::UnsupportedFeature);
    }

    #[test]
    fn test_loaded_import_keeps_declared_version() {
        struct Lib;
        impl crate::tree::ImportResolver for Lib {
            fn resolve(&self, _uri: &str) -> Option<crate::tree::DocumentOptions> {
                Some(crate::tree::DocumentOptions {
                    version: Some("1.0".to_string()),
                    structs: vec![crate::tree::StructOptions {
                        name: Some("Person".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                })
            }
        }

        let mut doc = Document::new(WdlVersion::Draft2);
        doc.add_import(crate::tree::ImportOptions {
            uri: Some("lib.wdl".to_string()),
            ..Default::default()
        })
        .unwrap();
        doc.load_imports(&Lib).unwrap();

        // the struct is legal under the import's own 1.0, not the draft root
        let person = doc.resolve_struct(doc.root(), "Person").unwrap();
        assert_eq!(doc.effective_version(person), WdlVersion::V1_0);
        assert!(doc.supports(person));
        assert!(doc.entity_issues(doc.root()).is_empty());
        assert!(doc.generate_wdl().contains("import \"lib.wdl\" as lib"));
    }

    #[test]
    fn test_duplicate_task_name_is_error() {
        let mut doc = Document::new(WdlVersion::V1_0);
        let root = doc.root();
        let first = doc
            .add_action(root, ActionOptions::task("sum"))
            .unwrap()
            .unwrap();
        let second = doc
            .add_action(root, ActionOptions::task("sum"))
            .unwrap()
            .unwrap();

        // no alias is invented; the emitted name is the task's identity
        assert_eq!(doc.alias(second), None);
        assert!(doc.entity_issues(first).is_empty());
        let issues = doc.entity_issues(second);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, DiagnosticKind::DuplicateName);
        assert!(issues[0].is_error());
        assert!(!doc.entity_valid(root));
        assert_eq!(doc.generate_wdl().matches("task sum {").count(), 1);
    }

    #[test]
    fn test_aliased_task_still_collides_on_name() {
        let mut doc = Document::new(WdlVersion::V1_0);
        let root = doc.root();
        doc.add_action(root, ActionOptions::task("sum")).unwrap();
        let second = doc
            .add_action(root, ActionOptions::task("sum"))
            .unwrap()
            .unwrap();
        doc.set_alias(second, Some("other".to_string())).unwrap();

        let issues = doc.entity_issues(second);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, DiagnosticKind::DuplicateName);
    }

    #[test]
    fn test_missing_required_input_is_warning() {
        let mut doc = Document::new(WdlVersion::V1_0);
        let root = doc.root();
        let mut task = ActionOptions::task("sum");
        task.inputs = vec![
            ParameterOptions::typed("x", "Int"),
            ParameterOptions::typed("y", "Int?"),
        ];
        doc.add_action(root, task).unwrap();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let call = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();

        let kinds: Vec<DiagnosticKind> = doc
            .entity_issues(call)
            .into_iter()
            .map(|diagnostic| diagnostic.kind)
            .collect();
        // x is required and unbound; optional y is fine
        assert_eq!(kinds, vec![DiagnosticKind::MissingRequiredInput]);

        doc.set_call_input(call, "x", Some("1".to_string())).unwrap();
        assert!(doc.entity_valid(call));
    }

    #[test]
    fn test_type_mismatch_on_connection() {
        let mut doc = Document::new(WdlVersion::V1_0);
        let root = doc.root();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let params = doc
            .add_parameters(
                workflow,
                Role::Declarations,
                vec![
                    ParameterOptions::typed("flag", "Boolean").with_value("true"),
                    ParameterOptions::typed("count", "Int"),
                ],
            )
            .unwrap();
        doc.bind(params[0], params[1]).unwrap();

        let issues = doc.entity_issues(params[1]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, DiagnosticKind::TypeMismatch);
        assert!(!issues[0].is_error());
    }

    #[test]
    fn test_invalid_identifier() {
        let mut doc = Document::new(WdlVersion::V1_0);
        let root = doc.root();
        let task = doc
            .add_action(root, ActionOptions::task("fine"))
            .unwrap()
            .unwrap();
        doc.set_name(task, "not fine").unwrap();
        let issues = doc.entity_issues(task);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, DiagnosticKind::InvalidName);
    }

    #[test]
    fn test_duplicate_reference_after_rename() {
        let mut doc = Document::new(WdlVersion::V1_0);
        let root = doc.root();
        doc.add_action(root, ActionOptions::task("sum")).unwrap();
        let workflow = doc
            .add_action(root, ActionOptions::workflow("main"))
            .unwrap()
            .unwrap();
        let first = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        let second = doc
            .add_action(workflow, ActionOptions::call("sum"))
            .unwrap()
            .unwrap();
        // auto-aliased apart on add; force the collision back
        doc.set_alias(second, Some("sum".to_string())).unwrap();

        assert!(doc.entity_issues(first).is_empty());
        let issues = doc.entity_issues(second);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, DiagnosticKind::DuplicateName);
        assert!(issues[0].is_error());
    }
}
