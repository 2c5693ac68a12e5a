//! The parameter layer: values, connections, and call-parameter delegation.
//!
//! Parameters are the typed slots of the model (inputs, outputs,
//! declarations, struct properties). A parameter holds a raw value string
//! and sits in a directed binding graph: an edge `source -> target` means
//! the target's value is the source's output. When a parameter is rendered,
//! its connections win over its raw value.
//!
//! Call parameters additionally delegate to the callee's formal parameter:
//! the declared type and the default read through the delegate id, while
//! the bound value belongs to the call site.

use tracing::debug;

use crate::error::ModelError;
use crate::events::Event;
use crate::types::ParameterType;

use super::document::ParameterOptions;
use super::{ContextKind, Document, EntityId, Payload, ParameterData, Role};

fn parameter_kind(role: Role) -> Option<ContextKind> {
    match role {
        Role::Inputs => Some(ContextKind::Input),
        Role::Outputs => Some(ContextKind::Output),
        Role::Declarations => Some(ContextKind::Declaration),
        Role::Properties => Some(ContextKind::StructProperty),
        _ => None,
    }
}

impl Document {
    /// Creates a parameter from an options record and appends it to the
    /// owner's collection. The `name` field is required; `type` text is
    /// parsed as WDL type syntax.
    pub fn add_parameter(
        &mut self,
        owner: EntityId,
        role: Role,
        options: ParameterOptions,
    ) -> Result<EntityId, ModelError> {
        let kind = parameter_kind(role).ok_or(ModelError::UnsupportedRole {
            kind: self.entity(owner)?.kind(),
            role: role.as_str(),
        })?;
        let name = match options.name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ModelError::missing_field(kind, "name")),
        };
        let declared_type = options
            .declared_type
            .as_deref()
            .map(str::parse::<ParameterType>)
            .transpose()?;
        self.entity(owner)?;
        let id = self.create_entity(
            kind,
            name,
            Payload::Parameter(ParameterData {
                declared_type,
                value: options.value,
                ..ParameterData::default()
            }),
        );
        if let Err(err) = self.attach_member(owner, role, id, None) {
            self.discard_entity(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Creates several parameters in one batch.
    pub fn add_parameters(
        &mut self,
        owner: EntityId,
        role: Role,
        options: Vec<ParameterOptions>,
    ) -> Result<Vec<EntityId>, ModelError> {
        self.batch(|doc| {
            options
                .into_iter()
                .map(|record| doc.add_parameter(owner, role, record))
                .collect()
        })
    }

    /// Removes a parameter, unbinding its connections first.
    pub fn remove_parameter(&mut self, id: EntityId) -> Result<(), ModelError> {
        let kind = self.entity(id)?.kind();
        if !kind.is_parameter() {
            return Err(ModelError::kind_mismatch(id, "a parameter", kind));
        }
        self.remove(id)
    }

    /// Removes several parameters in one batch.
    pub fn remove_parameters(&mut self, ids: Vec<EntityId>) -> Result<(), ModelError> {
        self.batch(|doc| {
            for id in ids {
                doc.remove_parameter(id)?;
            }
            Ok(())
        })
    }

    /// Sets or clears a parameter's raw value text.
    pub fn set_value(&mut self, id: EntityId, value: Option<String>) -> Result<(), ModelError> {
        let kind = self.entity(id)?.kind();
        if !kind.is_parameter() {
            return Err(ModelError::kind_mismatch(id, "a parameter", kind));
        }
        let data = self
            .entity_mut(id)?
            .as_parameter_mut()
            .ok_or(ModelError::Detached { id })?;
        if data.value == value {
            return Ok(());
        }
        data.value = value;
        self.emit(id, Event::ValueChanged);
        self.touch();
        Ok(())
    }

    /// Sets or clears a parameter's declared type.
    pub fn set_declared_type(
        &mut self,
        id: EntityId,
        declared_type: Option<ParameterType>,
    ) -> Result<(), ModelError> {
        let kind = self.entity(id)?.kind();
        if !kind.is_parameter() {
            return Err(ModelError::kind_mismatch(id, "a parameter", kind));
        }
        let data = self
            .entity_mut(id)?
            .as_parameter_mut()
            .ok_or(ModelError::Detached { id })?;
        if data.declared_type == declared_type {
            return Ok(());
        }
        data.declared_type = declared_type;
        self.emit(id, Event::TypeChanged);
        self.touch();
        Ok(())
    }

    /// The parameter's effective type: the delegate's declared type for
    /// call parameters, its own otherwise.
    pub fn parameter_type(&self, id: EntityId) -> Option<ParameterType> {
        let data = self.get(id)?.as_parameter()?;
        if let Some(delegate) = data.delegate {
            if let Some(formal) = self.get(delegate).and_then(|entity| entity.as_parameter()) {
                if formal.declared_type.is_some() {
                    return formal.declared_type.clone();
                }
            }
        }
        data.declared_type.clone()
    }

    /// The parameter's own raw value text.
    pub fn parameter_value(&self, id: EntityId) -> Option<String> {
        self.get(id)?.as_parameter()?.value.clone()
    }

    /// The default a call parameter inherits from its delegate.
    pub fn parameter_default(&self, id: EntityId) -> Option<String> {
        let delegate = self.get(id)?.as_parameter()?.delegate?;
        self.get(delegate)?.as_parameter()?.value.clone()
    }

    /// The formal parameter a call parameter mirrors.
    pub fn parameter_delegate(&self, id: EntityId) -> Option<EntityId> {
        self.get(id)?.as_parameter()?.delegate
    }

    /// Whether a formal input must be supplied by callers: non-optional
    /// declared type and no default value.
    pub fn parameter_required(&self, id: EntityId) -> bool {
        let Some(data) = self.get(id).and_then(|entity| entity.as_parameter()) else {
            return false;
        };
        match &data.declared_type {
            Some(declared) => !declared.is_optional() && data.value.is_none(),
            None => false,
        }
    }

    /// Sources feeding this parameter, in binding order.
    pub fn inbound(&self, id: EntityId) -> Vec<EntityId> {
        self.get(id)
            .and_then(|entity| entity.as_parameter())
            .map(|data| data.inbound.clone())
            .unwrap_or_default()
    }

    /// Targets this parameter feeds, in binding order.
    pub fn outbound(&self, id: EntityId) -> Vec<EntityId> {
        self.get(id)
            .and_then(|entity| entity.as_parameter())
            .map(|data| data.outbound.clone())
            .unwrap_or_default()
    }

    /// Connects `source -> target`. A target normally accepts one inbound
    /// connection, so an existing one is replaced; scatter iterators accept
    /// several. Binding an already-connected pair again is a no-op.
    pub fn bind(&mut self, source: EntityId, target: EntityId) -> Result<(), ModelError> {
        self.check_bindable(source)?;
        self.check_bindable(target)?;
        if source == target {
            return Err(ModelError::SelfBinding {
                name: self.entity(source)?.reference(),
            });
        }
        let already = self
            .entity(target)?
            .as_parameter()
            .map(|data| data.inbound.contains(&source))
            .unwrap_or(false);
        if already {
            return Ok(());
        }
        self.batch(|doc| {
            if !doc.allows_multiple_inbound(target) {
                for existing in doc.inbound(target) {
                    doc.unbind(existing, target)?;
                }
            }
            if let Some(data) = doc.entity_mut(target)?.as_parameter_mut() {
                data.inbound.push(source);
            }
            if let Some(data) = doc.entity_mut(source)?.as_parameter_mut() {
                data.outbound.push(target);
            }
            debug!(%source, %target, "bound parameters");
            doc.emit(target, Event::ParameterBind { source, target });
            doc.touch();
            Ok(())
        })
    }

    /// Removes one connection in both directions. A no-op when the edge
    /// does not exist.
    pub fn unbind(&mut self, source: EntityId, target: EntityId) -> Result<(), ModelError> {
        let existed = self
            .get(target)
            .and_then(|entity| entity.as_parameter())
            .map(|data| data.inbound.contains(&source))
            .unwrap_or(false);
        if let Ok(entity) = self.entity_mut(target) {
            if let Some(data) = entity.as_parameter_mut() {
                data.inbound.retain(|existing| *existing != source);
            }
        }
        if let Ok(entity) = self.entity_mut(source) {
            if let Some(data) = entity.as_parameter_mut() {
                data.outbound.retain(|existing| *existing != target);
            }
        }
        if existed {
            debug!(%source, %target, "unbound parameters");
            self.emit(target, Event::ParameterUnbind { source, target });
            self.touch();
        }
        Ok(())
    }

    /// Clears every connection touching a parameter, both directions.
    pub fn unbind_all(&mut self, id: EntityId) -> Result<(), ModelError> {
        self.batch(|doc| {
            for source in doc.inbound(id) {
                doc.unbind(source, id)?;
            }
            for target in doc.outbound(id) {
                doc.unbind(id, target)?;
            }
            Ok(())
        })
    }

    /// The text a parameter renders as: the first inbound connection's
    /// qualified reference when bound, the raw value otherwise.
    pub fn rendered_value(&self, id: EntityId) -> Option<String> {
        let data = self.get(id)?.as_parameter()?;
        if let Some(source) = data.inbound.first() {
            if let Some(text) = self.qualified_reference(*source) {
                return Some(text);
            }
        }
        data.value.clone()
    }

    /// How a parameter is referred to from elsewhere in the workflow:
    /// `call_ref.name` for call outputs, the bare reference otherwise.
    pub fn qualified_reference(&self, id: EntityId) -> Option<String> {
        let entity = self.get(id)?;
        if let Some(parent) = entity.parent() {
            if self.kind(parent) == Some(ContextKind::Call) {
                let call_ref = self.reference(parent)?;
                return Some(format!("{}.{}", call_ref, entity.name()));
            }
        }
        Some(entity.reference())
    }

    /// Scatter iterators gather any number of sources; every other
    /// parameter holds at most one inbound connection.
    pub(crate) fn allows_multiple_inbound(&self, id: EntityId) -> bool {
        let Some(parent) = self.parent(id) else {
            return false;
        };
        self.kind(parent) == Some(ContextKind::Scatter)
            && self
                .get(parent)
                .is_some_and(|entity| entity.members(Role::Inputs).contains(&id))
    }

    fn check_bindable(&self, id: EntityId) -> Result<(), ModelError> {
        let kind = self.entity(id)?.kind();
        if !kind.is_parameter() || kind == ContextKind::StructProperty {
            return Err(ModelError::kind_mismatch(id, "a bindable parameter", kind));
        }
        Ok(())
    }

    /// Deletes a freshly created entity that never made it into a
    /// collection, so failed construction does not leak arena slots.
    pub(crate) fn discard_entity(&mut self, id: EntityId) {
        self.store.remove(id);
    }
}
