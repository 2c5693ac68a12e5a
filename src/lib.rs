//! # wdl-model
//!
//! A mutable, observable document object model for Workflow Description
//! Language (WDL) documents: tasks, workflows, calls, scatter and
//! conditional blocks, typed parameters, and struct definitions.
//!
//! The model is built for interactive editing. Every node is an entity in a
//! generational arena owned by a [`Document`]; mutations go through document
//! methods, produce typed [`events::Event`]s that bubble or spread through
//! the ownership tree, and are coalesced by [`Document::batch`]. Call
//! targets re-resolve on every tree change, call parameters mirror their
//! callee's formal parameters, and validation findings aggregate upward on
//! every read. [`Document::generate_wdl`] turns the model back into
//! deterministic WDL source text.
//!
//! The model neither parses nor executes WDL: a text front-end feeds it
//! option records ([`DocumentOptions`] and friends), and imports are
//! supplied by a host-side [`ImportResolver`].

pub mod diagnostics;
pub mod error;
pub mod events;
pub mod generate;
pub mod tree;
pub mod types;
pub mod version;

pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLevel};
pub use error::ModelError;
pub use events::{Delivery, Event, EventFilter, EventKind, Propagation, SubscriberId};
pub use tree::{
    ActionOptions, ContextKind, Document, DocumentOptions, EntityId, ImportOptions,
    ImportResolver, ParameterOptions, Role, StructAlias, StructOptions,
};
pub use types::ParameterType;
pub use version::{Feature, WdlVersion};
