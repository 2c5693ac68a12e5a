//! The action layer: tasks, workflows, calls, scatter and conditional
//! blocks.
//!
//! Actions are built from option records with a string `kind` tag. Unknown
//! kinds are recorded on the document and skipped rather than rejected, so
//! a newer producer does not break an older model. When a call or block
//! joins a container its reference is checked against everything visible in
//! scope and a numeric suffix is aliased on when it collides; tasks and
//! workflows keep their given name and collide through validation.
//!
//! A call never declares parameters of its own: they are materialized from
//! the callee's formal parameters by [`Document::update_call_parameters`],
//! which diffs by name inside one batch so observers see a single coalesced
//! change per role.

use std::collections::HashSet;

use tracing::debug;

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::ModelError;
use crate::events::Event;

use super::document::ActionOptions;
use super::{
    CallData, ConditionalData, ContextKind, Document, EntityId, ParameterData, Payload,
    PropertyData, Role, TaskData,
};

impl Document {
    /// Creates an action from an options record and appends it to the
    /// owner's action collection. Returns `None` when the record carries
    /// an unknown kind; the finding is recorded on the document instead of
    /// failing the call.
    pub fn add_action(
        &mut self,
        owner: EntityId,
        options: ActionOptions,
    ) -> Result<Option<EntityId>, ModelError> {
        self.batch(|doc| doc.instantiate_action(owner, options))
    }

    /// Creates several actions in one batch, skipping unknown kinds.
    pub fn add_actions(
        &mut self,
        owner: EntityId,
        options: Vec<ActionOptions>,
    ) -> Result<Vec<EntityId>, ModelError> {
        self.batch(|doc| {
            let mut out = Vec::new();
            for record in options {
                if let Some(id) = doc.instantiate_action(owner, record)? {
                    out.push(id);
                }
            }
            Ok(out)
        })
    }

    /// Removes an action and everything it owns.
    pub fn remove_action(&mut self, id: EntityId) -> Result<(), ModelError> {
        let kind = self.entity(id)?.kind();
        if !kind.is_action() {
            return Err(ModelError::kind_mismatch(id, "an action", kind));
        }
        self.remove(id)
    }

    pub(crate) fn instantiate_action(
        &mut self,
        owner: EntityId,
        options: ActionOptions,
    ) -> Result<Option<EntityId>, ModelError> {
        self.entity(owner)?;
        let kind = match options.kind.as_str() {
            "task" => ContextKind::Task,
            "workflow" => ContextKind::Workflow,
            "call" => ContextKind::Call,
            "scatter" => ContextKind::Scatter,
            "conditional" | "if" => ContextKind::Conditional,
            unknown => {
                let root = self.root();
                let issue = Diagnostic::warning(
                    DiagnosticKind::UnknownActionKind,
                    root,
                    format!("unknown action kind `{}`", unknown),
                );
                debug!(kind = unknown, "skipped unknown action kind");
                if let Some(data) = self.entity_mut(root)?.as_document_mut() {
                    data.issues.push(issue);
                }
                self.touch();
                return Ok(None);
            }
        };

        let name = options.name.clone().unwrap_or_default();
        if kind.is_executable() && name.is_empty() {
            return Err(ModelError::missing_field(kind, "name"));
        }
        let payload = match kind {
            ContextKind::Task => Payload::Task(TaskData {
                command: options.command.clone().unwrap_or_default(),
            }),
            ContextKind::Workflow => Payload::Workflow,
            ContextKind::Call => Payload::Call(CallData {
                target: options.target.clone().unwrap_or_default(),
                executable: None,
                after: options.after.clone(),
                pending_values: options.values.clone(),
            }),
            ContextKind::Scatter => Payload::Scatter,
            ContextKind::Conditional => Payload::Conditional(ConditionalData {
                expression: options.expression.clone().unwrap_or_default(),
            }),
            _ => unreachable!("kind narrowed above"),
        };

        let id = self.create_entity(kind, name, payload);
        if let Some(alias) = options.alias.clone() {
            if !alias.is_empty() {
                self.entity_mut(id)?.alias = Some(alias);
            }
        }
        if let Err(err) = self.attach_member(owner, Role::Actions, id, None) {
            self.discard_entity(id);
            return Err(err);
        }
        self.ensure_unique_reference(id)?;

        match kind {
            ContextKind::Task => {
                self.add_parameters(id, Role::Inputs, options.inputs)?;
                self.add_parameters(id, Role::Declarations, options.declarations)?;
                self.add_parameters(id, Role::Outputs, options.outputs)?;
                for (key, value) in options.runtime {
                    self.set_runtime_property(id, &key, &value)?;
                }
                for (key, value) in options.meta {
                    self.set_meta_entry(id, &key, &value)?;
                }
            }
            ContextKind::Workflow => {
                self.add_parameters(id, Role::Inputs, options.inputs)?;
                self.add_parameters(id, Role::Declarations, options.declarations)?;
                for nested in options.actions {
                    self.instantiate_action(id, nested)?;
                }
                self.add_parameters(id, Role::Outputs, options.outputs)?;
                for (key, value) in options.meta {
                    self.set_meta_entry(id, &key, &value)?;
                }
            }
            ContextKind::Scatter => {
                if let Some(iterator) = options.iterator {
                    self.add_parameter(id, Role::Inputs, iterator)?;
                }
                self.add_parameters(id, Role::Declarations, options.declarations)?;
                for nested in options.actions {
                    self.instantiate_action(id, nested)?;
                }
            }
            ContextKind::Conditional => {
                self.add_parameters(id, Role::Declarations, options.declarations)?;
                for nested in options.actions {
                    self.instantiate_action(id, nested)?;
                }
            }
            ContextKind::Call => {}
            _ => {}
        }
        Ok(Some(id))
    }

    /// Aliases a numeric suffix onto a newly added call or block when its
    /// natural reference collides, case-insensitively, with a sibling or a
    /// global name. The callee's own name never counts as a collision, so
    /// the first call to a task keeps the task's name. Tasks and workflows
    /// emit under their name, which an alias cannot change, so collisions
    /// between them surface as `duplicate-name` findings instead.
    fn ensure_unique_reference(&mut self, id: EntityId) -> Result<(), ModelError> {
        let entity = self.entity(id)?;
        if entity.kind().is_executable() {
            return Ok(());
        }
        let natural = entity.reference();
        if natural.is_empty() {
            return Ok(());
        }
        let Some(owner) = entity.parent() else {
            return Ok(());
        };
        let exempt = entity
            .as_call()
            .map(|call| call.target.rsplit('.').next().unwrap_or_default().to_lowercase());

        let mut taken: HashSet<String> = HashSet::new();
        for sibling in self.members(owner, Role::Actions) {
            if sibling != id {
                if let Some(reference) = self.reference(sibling) {
                    taken.insert(reference.to_lowercase());
                }
            }
        }
        // the callee's own name is exempt among the globals, so the first
        // call to a task keeps the task's name; a sibling already holding
        // that reference still collides
        for global in self.members(self.root(), Role::Actions) {
            if global != id {
                if let Some(reference) = self.reference(global) {
                    let lowered = reference.to_lowercase();
                    if exempt.as_deref() != Some(lowered.as_str()) {
                        taken.insert(lowered);
                    }
                }
            }
        }
        for defined in self.members(self.root(), Role::Structs) {
            if let Some(name) = self.name(defined) {
                taken.insert(name.to_lowercase());
            }
        }

        if !taken.contains(&natural.to_lowercase()) {
            return Ok(());
        }
        let mut suffix = 1;
        let candidate = loop {
            let candidate = format!("{}_{}", natural, suffix);
            if !taken.contains(&candidate.to_lowercase()) {
                break candidate;
            }
            suffix += 1;
        };
        debug!(%id, alias = %candidate, "aliased colliding reference");
        self.set_alias(id, Some(candidate))
    }

    /// A call's textual target.
    pub fn call_target(&self, id: EntityId) -> Option<String> {
        self.get(id)?.as_call().map(|call| call.target.clone())
    }

    /// The executable a call resolved to, if any.
    pub fn call_executable(&self, id: EntityId) -> Option<EntityId> {
        self.get(id)?.as_call()?.executable
    }

    /// A call's `after` list.
    pub fn call_after(&self, id: EntityId) -> Vec<EntityId> {
        let Some(call) = self.get(id).and_then(|entity| entity.as_call()) else {
            return Vec::new();
        };
        let Some(owner) = self.parent(id) else {
            return Vec::new();
        };
        call.after
            .iter()
            .filter_map(|name| {
                self.members(owner, Role::Actions)
                    .into_iter()
                    .find(|sibling| {
                        *sibling != id
                            && self.reference(*sibling).as_deref() == Some(name.as_str())
                    })
            })
            .collect()
    }

    /// A call's `after` list as written.
    pub fn call_after_names(&self, id: EntityId) -> Vec<String> {
        self.get(id)
            .and_then(|entity| entity.as_call())
            .map(|call| call.after.clone())
            .unwrap_or_default()
    }

    /// Retargets a call. The resolved executable is dropped and the
    /// resolver picks the new target up on the next pass.
    pub fn set_call_target(
        &mut self,
        id: EntityId,
        target: impl Into<String>,
    ) -> Result<(), ModelError> {
        let target = target.into();
        let kind = self.entity(id)?.kind();
        let Some(call) = self.entity_mut(id)?.as_call_mut() else {
            return Err(ModelError::kind_mismatch(id, "a call", kind));
        };
        if call.target == target {
            return Ok(());
        }
        call.target = target;
        let previous = call.executable.take();
        if previous.is_some() {
            self.remove_forwards_to(id);
            self.emit(id, Event::ExecutableChanged { previous });
        }
        self.touch();
        Ok(())
    }

    /// Appends a sibling reference to a call's `after` list.
    pub fn add_after(&mut self, id: EntityId, name: impl Into<String>) -> Result<(), ModelError> {
        let name = name.into();
        let kind = self.entity(id)?.kind();
        let Some(call) = self.entity_mut(id)?.as_call_mut() else {
            return Err(ModelError::kind_mismatch(id, "a call", kind));
        };
        if call.after.contains(&name) {
            return Ok(());
        }
        call.after.push(name);
        self.touch();
        Ok(())
    }

    /// Drops a sibling reference from a call's `after` list.
    pub fn remove_after(
        &mut self,
        id: EntityId,
        name: &str,
    ) -> Result<(), ModelError> {
        let kind = self.entity(id)?.kind();
        let Some(call) = self.entity_mut(id)?.as_call_mut() else {
            return Err(ModelError::kind_mismatch(id, "a call", kind));
        };
        let before = call.after.len();
        call.after.retain(|existing| existing != name);
        if call.after.len() != before {
            self.touch();
        }
        Ok(())
    }

    /// A task's command text.
    pub fn task_command(&self, id: EntityId) -> Option<String> {
        self.get(id)?.as_task().map(|task| task.command.clone())
    }

    /// Replaces a task's command text.
    pub fn set_command(
        &mut self,
        id: EntityId,
        command: impl Into<String>,
    ) -> Result<(), ModelError> {
        let command = command.into();
        let kind = self.entity(id)?.kind();
        let Some(task) = self.entity_mut(id)?.as_task_mut() else {
            return Err(ModelError::kind_mismatch(id, "a task", kind));
        };
        if task.command == command {
            return Ok(());
        }
        task.command = command;
        self.emit(id, Event::CommandChanged);
        self.touch();
        Ok(())
    }

    /// A conditional's guard expression text.
    pub fn conditional_expression(&self, id: EntityId) -> Option<String> {
        self.get(id)?
            .as_conditional()
            .map(|data| data.expression.clone())
    }

    /// Replaces a conditional's guard expression. Reported as a value
    /// change, the same as a parameter's text.
    pub fn set_expression(
        &mut self,
        id: EntityId,
        expression: impl Into<String>,
    ) -> Result<(), ModelError> {
        let expression = expression.into();
        let kind = self.entity(id)?.kind();
        let Some(data) = self.entity_mut(id)?.as_conditional_mut() else {
            return Err(ModelError::kind_mismatch(id, "a conditional", kind));
        };
        if data.expression == expression {
            return Ok(());
        }
        data.expression = expression;
        self.emit(id, Event::ValueChanged);
        self.touch();
        Ok(())
    }

    /// A scatter's iterator: the sole member of its inputs collection.
    pub fn scatter_iterator(&self, id: EntityId) -> Option<EntityId> {
        self.get(id)
            .filter(|entity| entity.kind() == ContextKind::Scatter)
            .and_then(|entity| entity.members(Role::Inputs).first().copied())
    }

    /// A property entity's value text.
    pub fn property_value(&self, id: EntityId) -> Option<String> {
        self.get(id)?.as_property().map(|data| data.value.clone())
    }

    /// Sets one key of a task's runtime section, creating the property
    /// entity on first use.
    pub fn set_runtime_property(
        &mut self,
        task: EntityId,
        key: &str,
        value: &str,
    ) -> Result<EntityId, ModelError> {
        self.set_property(task, Role::Runtime, ContextKind::RuntimeProperty, key, value)
    }

    /// Removes one key of a task's runtime section, if present.
    pub fn remove_runtime_property(&mut self, task: EntityId, key: &str) -> Result<(), ModelError> {
        self.remove_property(task, Role::Runtime, key)
    }

    /// Sets one entry of an executable's meta section.
    pub fn set_meta_entry(
        &mut self,
        owner: EntityId,
        key: &str,
        value: &str,
    ) -> Result<EntityId, ModelError> {
        self.set_property(owner, Role::Meta, ContextKind::MetaEntry, key, value)
    }

    /// Removes one entry of an executable's meta section, if present.
    pub fn remove_meta_entry(&mut self, owner: EntityId, key: &str) -> Result<(), ModelError> {
        self.remove_property(owner, Role::Meta, key)
    }

    fn set_property(
        &mut self,
        owner: EntityId,
        role: Role,
        kind: ContextKind,
        key: &str,
        value: &str,
    ) -> Result<EntityId, ModelError> {
        if key.is_empty() {
            return Err(ModelError::missing_field(kind, "name"));
        }
        let existing = self
            .members(owner, role)
            .into_iter()
            .find(|id| self.name(*id).as_deref() == Some(key));
        if let Some(id) = existing {
            let data = self
                .entity_mut(id)?
                .as_property_mut()
                .ok_or(ModelError::Detached { id })?;
            if data.value != value {
                data.value = value.to_string();
                self.emit(id, Event::ValueChanged);
                self.touch();
            }
            return Ok(id);
        }
        let id = self.create_entity(
            kind,
            key.to_string(),
            Payload::Property(PropertyData {
                value: value.to_string(),
            }),
        );
        if let Err(err) = self.attach_member(owner, role, id, None) {
            self.discard_entity(id);
            return Err(err);
        }
        Ok(id)
    }

    fn remove_property(
        &mut self,
        owner: EntityId,
        role: Role,
        key: &str,
    ) -> Result<(), ModelError> {
        let existing = self
            .members(owner, role)
            .into_iter()
            .find(|id| self.name(*id).as_deref() == Some(key));
        match existing {
            Some(id) => self.remove(id),
            None => Ok(()),
        }
    }

    /// Reconciles a call's parameters with its executable's formal
    /// parameters, by name: missing ones are added with their delegate set,
    /// stale ones are removed with their connections unbound, continuing
    /// ones re-delegate. Runs inside one batch so each role yields at most
    /// one coalesced added/removed/changed set. Idempotent; returns whether
    /// anything changed.
    pub fn update_call_parameters(&mut self, call: EntityId) -> Result<bool, ModelError> {
        let entity = self.entity(call)?;
        let Some(data) = entity.as_call() else {
            return Err(ModelError::kind_mismatch(call, "a call", entity.kind()));
        };
        let Some(executable) = data.executable else {
            return Ok(false);
        };
        if !self
            .get(executable)
            .is_some_and(|entity| entity.kind().is_executable())
        {
            return Ok(false);
        }
        let formal_inputs = self.members(executable, Role::Inputs);
        let formal_outputs = self.members(executable, Role::Outputs);
        self.batch(|doc| {
            let mut changed = false;
            changed |= doc.sync_call_side(call, Role::Inputs, &formal_inputs)?;
            changed |= doc.sync_call_side(call, Role::Outputs, &formal_outputs)?;
            changed |= doc.apply_pending_call_values(call)?;
            if changed {
                debug!(%call, "synced call parameters");
            }
            Ok(changed)
        })
    }

    fn sync_call_side(
        &mut self,
        call: EntityId,
        role: Role,
        formals: &[EntityId],
    ) -> Result<bool, ModelError> {
        let kind = match role {
            Role::Inputs => ContextKind::Input,
            _ => ContextKind::Output,
        };
        let formal_names: Vec<(String, EntityId)> = formals
            .iter()
            .filter_map(|formal| self.name(*formal).map(|name| (name, *formal)))
            .collect();
        let mut changed = false;
        for member in self.members(call, role) {
            let Some(name) = self.name(member) else {
                continue;
            };
            match formal_names.iter().find(|(formal, _)| *formal == name) {
                None => {
                    self.remove(member)?;
                    changed = true;
                }
                Some((_, formal)) => {
                    let current = self.parameter_delegate(member);
                    if current != Some(*formal) {
                        if let Some(data) = self.entity_mut(member)?.as_parameter_mut() {
                            data.delegate = Some(*formal);
                        }
                        changed = true;
                    }
                }
            }
        }
        let existing: Vec<String> = self
            .members(call, role)
            .into_iter()
            .filter_map(|member| self.name(member))
            .collect();
        for (name, formal) in formal_names {
            if existing.contains(&name) {
                continue;
            }
            let id = self.create_entity(
                kind,
                name,
                Payload::Parameter(ParameterData {
                    delegate: Some(formal),
                    ..ParameterData::default()
                }),
            );
            if let Err(err) = self.attach_member(call, role, id, None) {
                self.discard_entity(id);
                return Err(err);
            }
            changed = true;
        }
        Ok(changed)
    }

    /// Drains stored input values into call inputs that now exist. Values
    /// naming inputs the callee does not have stay pending.
    fn apply_pending_call_values(&mut self, call: EntityId) -> Result<bool, ModelError> {
        let Some(data) = self.get(call).and_then(|entity| entity.as_call()) else {
            return Ok(false);
        };
        if data.pending_values.is_empty() {
            return Ok(false);
        }
        let inputs: Vec<(String, EntityId)> = self
            .members(call, Role::Inputs)
            .into_iter()
            .filter_map(|member| self.name(member).map(|name| (name, member)))
            .collect();
        let mut matched: Vec<(String, EntityId, String)> = Vec::new();
        for (name, value) in &data.pending_values {
            if let Some((_, member)) = inputs.iter().find(|(input, _)| input == name) {
                matched.push((name.clone(), *member, value.clone()));
            }
        }
        if matched.is_empty() {
            return Ok(false);
        }
        for (name, _, _) in &matched {
            if let Some(call_data) = self.entity_mut(call)?.as_call_mut() {
                call_data.pending_values.shift_remove(name);
            }
        }
        for (_, member, value) in matched {
            self.set_value(member, Some(value))?;
        }
        Ok(true)
    }

    /// Assigns a value to a call input by name.
    pub fn set_call_input(
        &mut self,
        call: EntityId,
        name: &str,
        value: Option<String>,
    ) -> Result<EntityId, ModelError> {
        let kind = self.entity(call)?.kind();
        if kind != ContextKind::Call {
            return Err(ModelError::kind_mismatch(call, "a call", kind));
        }
        let input = self
            .members(call, Role::Inputs)
            .into_iter()
            .find(|member| self.name(*member).as_deref() == Some(name))
            .ok_or_else(|| ModelError::UnknownMember {
                owner: call,
                name: name.to_string(),
            })?;
        self.set_value(input, value)?;
        Ok(input)
    }
}
