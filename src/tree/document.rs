//! Document-level operations: option-record ingestion, imports, struct
//! definitions, and version changes.
//!
//! Option records are the serialized construction surface of the model.
//! A text parser front-end or an editor produces them (typically as JSON),
//! and the document ingests them recursively: nested parameter, action,
//! struct, and import records become entities in one batch. Imports carry
//! a uri and never load themselves; the host supplies resolved documents
//! through [`ImportResolver`] and [`Document::load_imports`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostics::Diagnostic;
use crate::error::ModelError;
use crate::events::Event;
use crate::version::WdlVersion;

use super::{
    ContextKind, Document, DocumentData, EntityId, ImportData, Payload, Role, StructAlias,
};

/// Serialized form of a whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DocumentOptions {
    /// Version text such as `"1.0"` or `"draft-2"`.
    pub version: Option<String>,
    pub name: Option<String>,
    pub imports: Vec<ImportOptions>,
    pub structs: Vec<StructOptions>,
    pub actions: Vec<ActionOptions>,
}

/// Serialized form of one parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParameterOptions {
    pub name: Option<String>,
    /// Declared type in WDL syntax, such as `"Array[File]+"`.
    #[serde(rename = "type")]
    pub declared_type: Option<String>,
    pub value: Option<String>,
}

impl ParameterOptions {
    pub fn new(name: impl Into<String>) -> Self {
        ParameterOptions {
            name: Some(name.into()),
            ..ParameterOptions::default()
        }
    }

    pub fn typed(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        ParameterOptions {
            name: Some(name.into()),
            declared_type: Some(declared_type.into()),
            ..ParameterOptions::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Serialized form of one action. The `kind` tag selects the entity kind;
/// records with a kind this model does not know are recorded and skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionOptions {
    pub kind: String,
    pub name: Option<String>,
    pub alias: Option<String>,
    /// Call target, possibly dotted.
    pub target: Option<String>,
    /// Call ordering references.
    pub after: Vec<String>,
    /// Task command text.
    pub command: Option<String>,
    /// Conditional guard expression.
    pub expression: Option<String>,
    /// Scatter iterator.
    pub iterator: Option<ParameterOptions>,
    pub inputs: Vec<ParameterOptions>,
    pub outputs: Vec<ParameterOptions>,
    pub declarations: Vec<ParameterOptions>,
    /// Nested body actions for workflows, scatters, and conditionals.
    pub actions: Vec<ActionOptions>,
    pub runtime: IndexMap<String, String>,
    pub meta: IndexMap<String, String>,
    /// Call input values by input name, applied as the callee resolves.
    pub values: IndexMap<String, String>,
}

impl ActionOptions {
    pub fn task(name: impl Into<String>) -> Self {
        ActionOptions {
            kind: "task".to_string(),
            name: Some(name.into()),
            ..ActionOptions::default()
        }
    }

    pub fn workflow(name: impl Into<String>) -> Self {
        ActionOptions {
            kind: "workflow".to_string(),
            name: Some(name.into()),
            ..ActionOptions::default()
        }
    }

    pub fn call(target: impl Into<String>) -> Self {
        ActionOptions {
            kind: "call".to_string(),
            target: Some(target.into()),
            ..ActionOptions::default()
        }
    }

    pub fn scatter(iterator: ParameterOptions) -> Self {
        ActionOptions {
            kind: "scatter".to_string(),
            iterator: Some(iterator),
            ..ActionOptions::default()
        }
    }

    pub fn conditional(expression: impl Into<String>) -> Self {
        ActionOptions {
            kind: "conditional".to_string(),
            expression: Some(expression.into()),
            ..ActionOptions::default()
        }
    }
}

/// Serialized form of one struct definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StructOptions {
    pub name: Option<String>,
    pub properties: Vec<ParameterOptions>,
}

/// Serialized form of one import statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportOptions {
    pub uri: Option<String>,
    /// Local namespace; derived from the uri's file stem when absent.
    pub namespace: Option<String>,
    pub aliases: Vec<StructAlias>,
}

/// Host-side source of imported documents. The model never touches the
/// network or filesystem; the host maps uris to option records and may
/// return `None` for documents it cannot supply yet.
pub trait ImportResolver {
    fn resolve(&self, uri: &str) -> Option<DocumentOptions>;
}

fn namespace_from_uri(uri: &str) -> String {
    let tail = uri.rsplit('/').next().unwrap_or(uri);
    tail.strip_suffix(".wdl").unwrap_or(tail).to_string()
}

impl Document {
    /// Builds a document from option records in one batch.
    pub fn from_options(options: DocumentOptions) -> Result<Self, ModelError> {
        let version = match options.version.as_deref() {
            Some(text) => text.parse::<WdlVersion>()?,
            None => WdlVersion::default(),
        };
        let mut doc = Document::new(version);
        let root = doc.root();
        let remainder = DocumentOptions {
            version: None,
            ..options
        };
        doc.ingest_document_content(root, remainder)?;
        Ok(doc)
    }

    pub(crate) fn ingest_document_content(
        &mut self,
        document: EntityId,
        options: DocumentOptions,
    ) -> Result<(), ModelError> {
        self.batch(|doc| {
            if let Some(name) = options.name {
                doc.set_name(document, name)?;
            }
            for record in options.imports {
                doc.add_import_in(document, record)?;
            }
            for record in options.structs {
                doc.add_struct_in(document, record)?;
            }
            for record in options.actions {
                doc.instantiate_action(document, record)?;
            }
            Ok(())
        })
    }

    /// Root-level imports, in declaration order.
    pub fn imports(&self) -> Vec<EntityId> {
        self.members(self.root(), Role::Imports)
    }

    /// Root-level struct definitions, in declaration order.
    pub fn structs(&self) -> Vec<EntityId> {
        self.members(self.root(), Role::Structs)
    }

    /// Root-level tasks and workflows, in declaration order.
    pub fn actions(&self) -> Vec<EntityId> {
        self.members(self.root(), Role::Actions)
    }

    /// Findings recorded while ingesting option records.
    pub fn ingest_issues(&self) -> Vec<Diagnostic> {
        self.get(self.root())
            .and_then(|entity| entity.as_document())
            .map(|data| data.issues.clone())
            .unwrap_or_default()
    }

    /// Adds a struct definition to this document.
    pub fn add_struct(&mut self, options: StructOptions) -> Result<EntityId, ModelError> {
        let root = self.root();
        self.add_struct_in(root, options)
    }

    pub(crate) fn add_struct_in(
        &mut self,
        document: EntityId,
        options: StructOptions,
    ) -> Result<EntityId, ModelError> {
        let name = match options.name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ModelError::missing_field(ContextKind::Struct, "name")),
        };
        let id = self.create_entity(ContextKind::Struct, name, Payload::Struct);
        if let Err(err) = self.attach_member(document, Role::Structs, id, None) {
            self.discard_entity(id);
            return Err(err);
        }
        self.add_parameters(id, Role::Properties, options.properties)?;
        Ok(id)
    }

    /// Adds an import statement to this document. The imported document
    /// stays pending until [`Document::load_imports`] supplies it.
    pub fn add_import(&mut self, options: ImportOptions) -> Result<EntityId, ModelError> {
        let root = self.root();
        self.add_import_in(root, options)
    }

    pub(crate) fn add_import_in(
        &mut self,
        document: EntityId,
        options: ImportOptions,
    ) -> Result<EntityId, ModelError> {
        let uri = match options.uri {
            Some(uri) if !uri.is_empty() => uri,
            _ => return Err(ModelError::missing_field(ContextKind::Import, "uri")),
        };
        let namespace = options
            .namespace
            .filter(|namespace| !namespace.is_empty())
            .unwrap_or_else(|| namespace_from_uri(&uri));
        let id = self.create_entity(
            ContextKind::Import,
            namespace,
            Payload::Import(ImportData {
                uri,
                aliases: options.aliases,
            }),
        );
        if let Err(err) = self.attach_member(document, Role::Imports, id, None) {
            self.discard_entity(id);
            return Err(err);
        }
        self.touch();
        Ok(id)
    }

    /// The loaded document of an import, if the host supplied one.
    pub fn import_document(&self, import: EntityId) -> Option<EntityId> {
        self.get(import)?.members(Role::Documents).first().copied()
    }

    /// Imports anywhere in the tree whose document has not been supplied.
    pub fn pending_imports(&self) -> Vec<EntityId> {
        self.subtree(self.root())
            .into_iter()
            .filter(|id| {
                self.kind(*id) == Some(ContextKind::Import) && self.import_document(*id).is_none()
            })
            .collect()
    }

    /// Asks the resolver for every pending import, ingesting whatever it
    /// supplies. Nested imports of freshly loaded documents are attempted
    /// in the same call; anything the resolver cannot supply stays pending
    /// for a later attempt. Returns how many documents were loaded.
    pub fn load_imports(&mut self, resolver: &dyn ImportResolver) -> Result<usize, ModelError> {
        let mut loaded = 0;
        loop {
            let mut progressed = false;
            for import in self.pending_imports() {
                let Some(uri) = self
                    .get(import)
                    .and_then(|entity| entity.as_import())
                    .map(|data| data.uri.clone())
                else {
                    continue;
                };
                let Some(options) = resolver.resolve(&uri) else {
                    continue;
                };
                self.ingest_import_document(import, options)?;
                debug!(%import, %uri, "loaded import");
                loaded += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        if loaded > 0 {
            self.touch();
        }
        Ok(loaded)
    }

    fn ingest_import_document(
        &mut self,
        import: EntityId,
        options: DocumentOptions,
    ) -> Result<EntityId, ModelError> {
        let version = match options.version.as_deref() {
            Some(text) => text.parse::<WdlVersion>()?,
            None => self.version(),
        };
        self.batch(|doc| {
            let name = doc.name(import).unwrap_or_default();
            let sub = doc.create_entity(
                ContextKind::Document,
                name,
                Payload::Document(DocumentData {
                    version,
                    issues: Vec::new(),
                }),
            );
            if let Err(err) = doc.attach_member(import, Role::Documents, sub, None) {
                doc.discard_entity(sub);
                return Err(err);
            }
            let remainder = DocumentOptions {
                version: None,
                ..options
            };
            doc.ingest_document_content(sub, remainder)?;
            Ok(sub)
        })
    }

    /// Changes the document's language version. Imported documents keep
    /// their own declared versions.
    pub fn set_version(&mut self, version: WdlVersion) -> Result<(), ModelError> {
        let root = self.root();
        let data = self
            .entity_mut(root)?
            .as_document_mut()
            .ok_or(ModelError::Detached { id: root })?;
        if data.version == version {
            return Ok(());
        }
        data.version = version;
        debug!(%version, "changed document version");
        self.emit(root, Event::VersionChanged { version });
        self.touch();
        Ok(())
    }
}
