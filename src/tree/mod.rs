//! The document tree: entities, ownership, and change propagation.
//!
//! Every node of a WDL document — the document itself, imports, structs,
//! tasks, workflows, calls, scatter/conditional blocks, parameters, and
//! runtime/meta properties — is an [`Entity`] stored in a generational
//! arena owned by the [`Document`]. All cross-references (parent links,
//! collection membership, connections, a call's resolved executable) are
//! [`EntityId`] handles resolved through the document; removing an entity
//! invalidates its id, and stale handles are rejected rather than left
//! dangling.
//!
//! Mutations go through `Document` methods, which queue typed events and
//! flush them at the outermost non-batched boundary. The flush also runs
//! the identifier resolver, so call targets and call parameters are in sync
//! with the tree by the time subscribers observe `TreeChanged`.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostics::Diagnostic;
use crate::error::ModelError;
use crate::events::{
    coalesce, Delivery, Event, EventFilter, Forward, Propagation, SubscriberId,
    SubscriberRegistry,
};
use crate::types::ParameterType;
use crate::version::{Feature, WdlVersion};

pub mod actions;
pub mod collections;
pub mod document;
pub mod order;
pub mod params;
pub mod resolver;
pub mod validation;

#[cfg(test)]
mod doc_tests;

#[cfg(test)]
mod call_tests;

pub use collections::Role;
pub use document::{
    ActionOptions, DocumentOptions, ImportOptions, ImportResolver, ParameterOptions,
    StructOptions,
};

/// Opaque handle to an entity in a document's arena.
///
/// Ids are stable for the entity's lifetime and never reused: removal bumps
/// the slot generation, so a handle kept past `remove` stops resolving
/// instead of pointing at whatever occupies the slot next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    #[cfg(test)]
    pub(crate) fn test_id(index: u32) -> Self {
        EntityId {
            index,
            generation: 0,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// The closed set of entity kinds. The kind is fixed at construction and
/// drives every capability check: which collections an entity owns, whether
/// it can be called, whether it accepts sub-actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextKind {
    Document,
    Import,
    Struct,
    StructProperty,
    Workflow,
    Task,
    Call,
    Scatter,
    Conditional,
    Input,
    Output,
    Declaration,
    RuntimeProperty,
    MetaEntry,
}

impl ContextKind {
    /// Task, workflow, call, scatter, conditional.
    pub fn is_action(self) -> bool {
        matches!(
            self,
            ContextKind::Task
                | ContextKind::Workflow
                | ContextKind::Call
                | ContextKind::Scatter
                | ContextKind::Conditional
        )
    }

    /// Kinds a call can target.
    pub fn is_executable(self) -> bool {
        matches!(self, ContextKind::Task | ContextKind::Workflow)
    }

    /// Kinds that participate in the binding graph.
    pub fn is_parameter(self) -> bool {
        matches!(
            self,
            ContextKind::Input
                | ContextKind::Output
                | ContextKind::Declaration
                | ContextKind::StructProperty
        )
    }

    /// Kinds whose body accepts nested actions.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            ContextKind::Workflow | ContextKind::Scatter | ContextKind::Conditional
        )
    }

    pub fn has_outputs(self) -> bool {
        matches!(
            self,
            ContextKind::Task | ContextKind::Workflow | ContextKind::Call
        )
    }

    pub fn is_property(self) -> bool {
        matches!(self, ContextKind::RuntimeProperty | ContextKind::MetaEntry)
    }

    /// The collections an entity of this kind owns, in child order.
    pub fn roles(self) -> &'static [Role] {
        match self {
            ContextKind::Document => &[Role::Imports, Role::Structs, Role::Actions],
            ContextKind::Import => &[Role::Documents],
            ContextKind::Struct => &[Role::Properties],
            ContextKind::Task => &[
                Role::Inputs,
                Role::Declarations,
                Role::Outputs,
                Role::Runtime,
                Role::Meta,
            ],
            ContextKind::Workflow => &[
                Role::Inputs,
                Role::Declarations,
                Role::Actions,
                Role::Outputs,
                Role::Meta,
            ],
            ContextKind::Call => &[Role::Inputs, Role::Outputs],
            ContextKind::Scatter => &[Role::Inputs, Role::Declarations, Role::Actions],
            ContextKind::Conditional => &[Role::Declarations, Role::Actions],
            _ => &[],
        }
    }

    /// The first WDL version the kind is available in.
    pub fn minimum_version(self) -> WdlVersion {
        match self {
            ContextKind::Struct | ContextKind::StructProperty => WdlVersion::V1_0,
            _ => WdlVersion::Draft1,
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ContextKind::Document => "document",
            ContextKind::Import => "import",
            ContextKind::Struct => "struct",
            ContextKind::StructProperty => "struct property",
            ContextKind::Workflow => "workflow",
            ContextKind::Task => "task",
            ContextKind::Call => "call",
            ContextKind::Scatter => "scatter",
            ContextKind::Conditional => "conditional",
            ContextKind::Input => "input",
            ContextKind::Output => "output",
            ContextKind::Declaration => "declaration",
            ContextKind::RuntimeProperty => "runtime property",
            ContextKind::MetaEntry => "meta entry",
        };
        f.write_str(text)
    }
}

/// One struct alias carried by an import: `alias` is the local name,
/// `source` the struct's name inside the imported document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructAlias {
    pub alias: String,
    pub source: String,
}

/// Kind-specific state of an entity.
#[derive(Debug)]
pub enum Payload {
    Document(DocumentData),
    Import(ImportData),
    Struct,
    Workflow,
    Task(TaskData),
    Call(CallData),
    Scatter,
    Conditional(ConditionalData),
    Parameter(ParameterData),
    Property(PropertyData),
}

#[derive(Debug)]
pub struct DocumentData {
    pub version: WdlVersion,
    /// Findings recorded while ingesting option records, such as unknown
    /// action kinds. Reported through validation, never thrown.
    pub issues: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct ImportData {
    pub uri: String,
    pub aliases: Vec<StructAlias>,
}

#[derive(Debug, Default)]
pub struct TaskData {
    pub command: String,
}

#[derive(Debug)]
pub struct CallData {
    /// Textual target, possibly dotted (`ns.task`).
    pub target: String,
    /// Resolved executable, once the resolver finds one.
    pub executable: Option<EntityId>,
    /// Sibling references this call is ordered after (1.1 feature).
    pub after: Vec<String>,
    /// Input values supplied before the callee resolved; drained into the
    /// call's inputs as the parameter sync materializes them.
    pub pending_values: IndexMap<String, String>,
}

#[derive(Debug, Default)]
pub struct ConditionalData {
    pub expression: String,
}

#[derive(Debug, Default)]
pub struct ParameterData {
    pub declared_type: Option<ParameterType>,
    /// Literal or expression text; connections take precedence when the
    /// parameter is rendered.
    pub value: Option<String>,
    pub inbound: Vec<EntityId>,
    pub outbound: Vec<EntityId>,
    /// For call parameters, the callee's formal parameter this one mirrors.
    pub delegate: Option<EntityId>,
}

#[derive(Debug, Default)]
pub struct PropertyData {
    pub value: String,
}

/// A node of the document tree.
#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    kind: ContextKind,
    pub(crate) name: String,
    pub(crate) alias: Option<String>,
    pub(crate) parent: Option<EntityId>,
    pub(crate) payload: Payload,
    collections: Vec<(Role, Vec<EntityId>)>,
}

impl Entity {
    fn new(id: EntityId, kind: ContextKind, name: String, payload: Payload) -> Self {
        Entity {
            id,
            kind,
            name,
            alias: None,
            parent: None,
            payload,
            collections: kind.roles().iter().map(|role| (*role, Vec::new())).collect(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    /// The name the entity goes by in scope: alias when set, otherwise the
    /// name, otherwise (for calls) the last segment of the target.
    pub fn reference(&self) -> String {
        if let Some(alias) = &self.alias {
            if !alias.is_empty() {
                return alias.clone();
            }
        }
        if !self.name.is_empty() {
            return self.name.clone();
        }
        if let Payload::Call(call) = &self.payload {
            return call
                .target
                .rsplit('.')
                .next()
                .unwrap_or_default()
                .to_string();
        }
        String::new()
    }

    pub fn owns_role(&self, role: Role) -> bool {
        self.collections.iter().any(|(r, _)| *r == role)
    }

    /// Members of one collection, in insertion order. Empty for roles the
    /// kind does not own.
    pub fn members(&self, role: Role) -> &[EntityId] {
        self.collections
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, members)| members.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn members_mut(&mut self, role: Role) -> Option<&mut Vec<EntityId>> {
        self.collections
            .iter_mut()
            .find(|(r, _)| *r == role)
            .map(|(_, members)| members)
    }

    /// All children, in role order then insertion order.
    pub fn children(&self) -> Vec<EntityId> {
        self.collections
            .iter()
            .flat_map(|(_, members)| members.iter().copied())
            .collect()
    }

    /// The role this child sits under, if it is a member here.
    pub fn role_of(&self, child: EntityId) -> Option<Role> {
        self.collections
            .iter()
            .find(|(_, members)| members.contains(&child))
            .map(|(role, _)| *role)
    }

    pub fn as_parameter(&self) -> Option<&ParameterData> {
        match &self.payload {
            Payload::Parameter(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn as_parameter_mut(&mut self) -> Option<&mut ParameterData> {
        match &mut self.payload {
            Payload::Parameter(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&CallData> {
        match &self.payload {
            Payload::Call(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn as_call_mut(&mut self) -> Option<&mut CallData> {
        match &mut self.payload {
            Payload::Call(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&TaskData> {
        match &self.payload {
            Payload::Task(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn as_task_mut(&mut self) -> Option<&mut TaskData> {
        match &mut self.payload {
            Payload::Task(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_import(&self) -> Option<&ImportData> {
        match &self.payload {
            Payload::Import(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn as_import_mut(&mut self) -> Option<&mut ImportData> {
        match &mut self.payload {
            Payload::Import(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&DocumentData> {
        match &self.payload {
            Payload::Document(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn as_document_mut(&mut self) -> Option<&mut DocumentData> {
        match &mut self.payload {
            Payload::Document(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_conditional(&self) -> Option<&ConditionalData> {
        match &self.payload {
            Payload::Conditional(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn as_conditional_mut(&mut self) -> Option<&mut ConditionalData> {
        match &mut self.payload {
            Payload::Conditional(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertyData> {
        match &self.payload {
            Payload::Property(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn as_property_mut(&mut self) -> Option<&mut PropertyData> {
        match &mut self.payload {
            Payload::Property(data) => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

/// Generational arena of entities.
#[derive(Debug, Default)]
pub(crate) struct EntityStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl EntityStore {
    fn insert_with(&mut self, build: impl FnOnce(EntityId) -> Entity) -> EntityId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entity: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let generation = self.slots[index as usize].generation;
        let id = EntityId { index, generation };
        self.slots[index as usize].entity = Some(build(id));
        self.live += 1;
        id
    }

    fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entity.as_ref())
    }

    fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entity.as_mut())
    }

    fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entity = slot.entity.take()?;
        slot.generation += 1;
        self.free.push(id.index);
        self.live -= 1;
        Some(entity)
    }

    fn len(&self) -> usize {
        self.live
    }
}

/// A WDL document and everything it owns.
///
/// The document is the single entry point for reads and mutations: entity
/// state is addressed by [`EntityId`], changes are observed through
/// [`Document::on`], and groups of mutations are coalesced with
/// [`Document::batch`].
pub struct Document {
    store: EntityStore,
    root: EntityId,
    subscribers: SubscriberRegistry,
    pub(crate) forwards: Vec<Forward>,
    pending: Vec<(EntityId, Event)>,
    mute_depth: usize,
    settling: bool,
    tree_dirty: bool,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("root", &self.root)
            .field("entities", &self.store.len())
            .field("version", &self.version())
            .finish()
    }
}

impl Document {
    /// Creates an empty document at the given language version.
    pub fn new(version: WdlVersion) -> Self {
        let mut store = EntityStore::default();
        let root = store.insert_with(|id| {
            Entity::new(
                id,
                ContextKind::Document,
                String::new(),
                Payload::Document(DocumentData {
                    version,
                    issues: Vec::new(),
                }),
            )
        });
        debug!(%version, "created document");
        Document {
            store,
            root,
            subscribers: SubscriberRegistry::new(),
            forwards: Vec::new(),
            pending: Vec::new(),
            mute_depth: 0,
            settling: false,
            tree_dirty: false,
        }
    }

    /// The root document entity.
    pub fn root(&self) -> EntityId {
        self.root
    }

    /// The document's language version.
    pub fn version(&self) -> WdlVersion {
        self.store
            .get(self.root)
            .and_then(|entity| entity.as_document())
            .map(|data| data.version)
            .unwrap_or_default()
    }

    /// The language version governing an entity: its owning document's, so
    /// entities inside a loaded import follow the import's declared version
    /// rather than the root's.
    pub fn effective_version(&self, id: EntityId) -> WdlVersion {
        let document = self.owning_document(id);
        self.get(document)
            .and_then(|entity| entity.as_document())
            .map(|data| data.version)
            .unwrap_or_default()
    }

    /// Number of live entities, the root included.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() <= 1
    }

    /// Lenient lookup; `None` for stale or foreign ids.
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.store.get(id)
    }

    /// Strict lookup for mutation paths.
    pub fn entity(&self, id: EntityId) -> Result<&Entity, ModelError> {
        self.store.get(id).ok_or(ModelError::Detached { id })
    }

    pub(crate) fn entity_mut(&mut self, id: EntityId) -> Result<&mut Entity, ModelError> {
        self.store.get_mut(id).ok_or(ModelError::Detached { id })
    }

    pub(crate) fn create_entity(
        &mut self,
        kind: ContextKind,
        name: String,
        payload: Payload,
    ) -> EntityId {
        let id = self
            .store
            .insert_with(|id| Entity::new(id, kind, name, payload));
        debug!(%id, %kind, "created entity");
        id
    }

    pub fn kind(&self, id: EntityId) -> Option<ContextKind> {
        self.get(id).map(Entity::kind)
    }

    pub fn name(&self, id: EntityId) -> Option<String> {
        self.get(id).map(|entity| entity.name.clone())
    }

    pub fn alias(&self, id: EntityId) -> Option<String> {
        self.get(id).and_then(|entity| entity.alias.clone())
    }

    /// Alias when set, otherwise name, otherwise a call's target tail.
    pub fn reference(&self, id: EntityId) -> Option<String> {
        self.get(id).map(Entity::reference)
    }

    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.get(id).and_then(Entity::parent)
    }

    /// Children in role order then insertion order; empty for stale ids.
    pub fn children(&self, id: EntityId) -> Vec<EntityId> {
        self.get(id).map(Entity::children).unwrap_or_default()
    }

    /// Ancestors from the immediate parent up to the root.
    pub fn ancestors(&self, id: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(Entity::parent);
        while let Some(parent) = current {
            out.push(parent);
            current = self.get(parent).and_then(Entity::parent);
        }
        out
    }

    /// The entity and all its descendants, pre-order.
    pub fn subtree(&self, id: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(entity) = self.get(next) else { continue };
            out.push(next);
            for child in entity.children().iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Whether `parent` is an ancestor of `child`, any number of levels up.
    pub fn is_parent_for(&self, parent: EntityId, child: EntityId) -> bool {
        self.ancestors(child).contains(&parent)
    }

    /// Pre-order search below `root` for entities whose reference equals
    /// `pattern`. An empty kind list matches every kind.
    pub fn find(&self, root: EntityId, pattern: &str, kinds: &[ContextKind]) -> Vec<EntityId> {
        self.subtree(root)
            .into_iter()
            .skip(1)
            .filter(|id| {
                self.get(*id).is_some_and(|entity| {
                    (kinds.is_empty() || kinds.contains(&entity.kind()))
                        && entity.reference() == pattern
                })
            })
            .collect()
    }

    /// Whether the governing version covers the entity's kind.
    pub fn supports(&self, id: EntityId) -> bool {
        match self.get(id) {
            Some(entity) => self.effective_version(id) >= entity.kind().minimum_version(),
            None => false,
        }
    }

    /// Whether the root document's version covers a language feature.
    pub fn supports_feature(&self, feature: Feature) -> bool {
        self.version().supports(feature)
    }

    /// Renames an entity. Duplicate sibling names are not rejected here;
    /// they surface as `duplicate-name` diagnostics.
    pub fn set_name(&mut self, id: EntityId, name: impl Into<String>) -> Result<(), ModelError> {
        let name = name.into();
        let entity = self.entity_mut(id)?;
        if entity.name == name {
            return Ok(());
        }
        let previous = std::mem::replace(&mut entity.name, name);
        self.emit(id, Event::NameChanged { previous });
        self.touch();
        Ok(())
    }

    /// Sets or clears an alias. Only actions and imports carry one.
    pub fn set_alias(&mut self, id: EntityId, alias: Option<String>) -> Result<(), ModelError> {
        let kind = self.entity(id)?.kind();
        if !kind.is_action() && kind != ContextKind::Import {
            return Err(ModelError::kind_mismatch(id, "an action or import", kind));
        }
        let entity = self.entity_mut(id)?;
        if entity.alias == alias {
            return Ok(());
        }
        let previous = std::mem::replace(&mut entity.alias, alias);
        self.emit(id, Event::AliasChanged { previous });
        self.touch();
        Ok(())
    }

    /// Subscribes to deliveries matching `filter`. The callback may read
    /// and mutate the document, including subscribing and unsubscribing.
    pub fn on(
        &mut self,
        filter: EventFilter,
        callback: impl FnMut(&mut Document, &Delivery) + 'static,
    ) -> SubscriberId {
        self.subscribers.subscribe(filter, Box::new(callback))
    }

    /// Drops a subscription; unsubscribing twice is a no-op.
    pub fn off(&mut self, id: SubscriberId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Groups mutations into one notification pass: events queued inside
    /// the closure are coalesced and flushed, and the resolver runs once,
    /// when the outermost batch exits. Errors pass through; notification is
    /// restored on the error path as well.
    pub fn batch<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ModelError>,
    ) -> Result<T, ModelError> {
        self.mute_depth += 1;
        let result = f(self);
        self.mute_depth -= 1;
        if self.mute_depth == 0 {
            self.settle();
        }
        result
    }

    /// Removes an entity and its whole subtree: connections into and out
    /// of the subtree are unbound, event forwards touching it are torn
    /// down, the entity leaves its owner's collection, and every id in the
    /// subtree stops resolving. Subscriptions targeting removed entities
    /// simply never match again.
    pub fn remove(&mut self, id: EntityId) -> Result<(), ModelError> {
        let entity = self.entity(id)?;
        if id == self.root {
            return Err(ModelError::kind_mismatch(
                id,
                "a non-root entity",
                entity.kind(),
            ));
        }
        let parent = entity.parent();
        self.batch(|doc| {
            let subtree = doc.subtree(id);
            for &member in &subtree {
                let is_parameter = doc
                    .get(member)
                    .is_some_and(|entity| entity.kind().is_parameter());
                if is_parameter {
                    doc.unbind_all(member)?;
                }
            }
            doc.forwards
                .retain(|f| !subtree.contains(&f.source) && !subtree.contains(&f.listener));
            if let Some(parent) = parent {
                doc.detach_member(parent, id)?;
            }
            for member in &subtree {
                if doc.store.remove(*member).is_some() {
                    debug!(id = %member, "removed entity");
                }
            }
            doc.touch();
            Ok(())
        })
    }

    pub(crate) fn install_forward(
        &mut self,
        source: EntityId,
        listener: EntityId,
        kinds: Vec<crate::events::EventKind>,
    ) {
        let forward = Forward {
            source,
            listener,
            kinds,
        };
        if !self.forwards.contains(&forward) {
            self.forwards.push(forward);
        }
    }

    pub(crate) fn remove_forwards_to(&mut self, listener: EntityId) {
        self.forwards.retain(|f| f.listener != listener);
    }

    /// Queues an event at its origin and flushes when not batched.
    pub(crate) fn emit(&mut self, origin: EntityId, event: Event) {
        self.pending.push((origin, event));
        if self.mute_depth == 0 && !self.settling {
            self.settle();
        }
    }

    /// Marks the tree as needing a resolver pass before the next flush
    /// completes.
    pub(crate) fn touch(&mut self) {
        self.tree_dirty = true;
        if self.mute_depth == 0 && !self.settling {
            self.settle();
        }
    }

    /// Drains the pending queue: runs the resolver while the tree is
    /// dirty, coalesces the queue, and delivers each event along its
    /// propagation path. Reentrant calls return immediately; mutations
    /// made by subscribers extend the same drain.
    fn settle(&mut self) {
        if self.settling || self.mute_depth > 0 {
            return;
        }
        self.settling = true;
        loop {
            if self.tree_dirty {
                self.tree_dirty = false;
                let changed = self.run_resolver_pass();
                if changed {
                    self.pending.push((self.root, Event::ValidationChanged));
                }
                self.pending.push((self.root, Event::TreeChanged));
            }
            if self.pending.is_empty() {
                break;
            }
            let batch = coalesce(std::mem::take(&mut self.pending));
            for (origin, event) in batch {
                self.deliver(origin, event);
            }
        }
        self.settling = false;
    }

    fn deliver(&mut self, origin: EntityId, event: Event) {
        // origin removed before the queue flushed
        if self.get(origin).is_none() {
            return;
        }
        let kind = event.kind();
        let listeners: Vec<EntityId> = self
            .forwards
            .iter()
            .filter(|f| f.matches(origin, kind))
            .map(|f| f.listener)
            .collect();
        for listener in listeners {
            self.pending.push((listener, event.clone()));
        }
        let path: Vec<EntityId> = match event.propagation() {
            Propagation::Bubble => {
                let mut path = vec![origin];
                path.extend(self.ancestors(origin));
                path
            }
            Propagation::Spread => self.subtree(origin),
        };
        for at in path {
            if self.get(at).is_none() {
                continue;
            }
            let delivery = Delivery {
                origin,
                at,
                event: event.clone(),
            };
            for subscriber in self.subscribers.matching(&delivery) {
                let Some(mut callback) = self.subscribers.take(subscriber) else {
                    continue;
                };
                callback(self, &delivery);
                self.subscribers.restore(subscriber, callback);
            }
        }
    }
}
