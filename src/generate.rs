//! WDL source generation.
//!
//! Text is composed bottom-up with two-space indentation and `name { ... }`
//! scopes. Section order is fixed (a task emits inputs, declarations,
//! command, runtime, outputs, meta; a workflow emits inputs, body, outputs,
//! meta) and body elements are ordered by dependency depth, so a given
//! model state and version always produce byte-identical text.
//!
//! Two modes share the same emitter. The lenient [`Document::generate_wdl`]
//! omits any block whose subtree carries an error-level finding — a broken
//! task shows up as a missing block, never as corrupted text around it.
//! [`Document::generate_wdl_strict`] refuses to emit at all, returning the
//! first aggregated error instead.

use tracing::debug;

use crate::error::ModelError;
use crate::tree::{ContextKind, Document, EntityId, Role};
use crate::version::Feature;

impl Document {
    /// Generates WDL source for the whole document, omitting subtrees that
    /// carry error-level findings. Warnings do not suppress anything.
    pub fn generate_wdl(&self) -> String {
        debug!(version = %self.version(), "generating document");
        Generator {
            doc: self,
            lenient: true,
        }
        .document()
    }

    /// Generates WDL source, failing on the first error-level finding
    /// anywhere in the document.
    pub fn generate_wdl_strict(&self) -> Result<String, ModelError> {
        self.validate(self.root(), true)?;
        Ok(Generator {
            doc: self,
            lenient: false,
        }
        .document())
    }
}

struct Generator<'a> {
    doc: &'a Document,
    lenient: bool,
}

impl Generator<'_> {
    /// Whether a block should be skipped in lenient mode.
    fn omitted(&self, id: EntityId) -> bool {
        self.lenient && !self.doc.entity_errors(id).is_empty()
    }

    fn document(&self) -> String {
        let root = self.doc.root();
        let mut chunks: Vec<String> = Vec::new();
        if self.doc.version().has_version_statement() {
            chunks.push(format!("version {}\n", self.doc.version()));
        }

        let imports: Vec<String> = self
            .doc
            .members(root, Role::Imports)
            .into_iter()
            .filter(|import| !self.omitted(*import))
            .filter_map(|import| self.import_line(import))
            .collect();
        if !imports.is_empty() {
            chunks.push(format!("{}\n", imports.join("\n")));
        }

        for defined in self.doc.members(root, Role::Structs) {
            if self.omitted(defined) {
                continue;
            }
            let mut writer = Writer::default();
            self.struct_block(&mut writer, defined);
            chunks.push(writer.out);
        }
        for action in self.doc.members(root, Role::Actions) {
            if self.omitted(action) {
                continue;
            }
            let mut writer = Writer::default();
            match self.doc.kind(action) {
                Some(ContextKind::Task) => self.task_block(&mut writer, action),
                Some(ContextKind::Workflow) => self.workflow_block(&mut writer, action),
                _ => continue,
            }
            chunks.push(writer.out);
        }
        chunks.join("\n")
    }

    fn import_line(&self, import: EntityId) -> Option<String> {
        let entity = self.doc.get(import)?;
        let data = entity.as_import()?;
        let mut line = format!("import \"{}\" as {}", data.uri, entity.reference());
        for alias in &data.aliases {
            line.push_str(&format!(" alias {} as {}", alias.source, alias.alias));
        }
        Some(line)
    }

    fn struct_block(&self, writer: &mut Writer, defined: EntityId) {
        let Some(name) = self.doc.name(defined) else { return };
        writer.open(&format!("struct {}", name));
        for property in self.doc.members(defined, Role::Properties) {
            if let Some(line) = self.parameter_line(property) {
                writer.line(&line);
            }
        }
        writer.close();
    }

    fn task_block(&self, writer: &mut Writer, task: EntityId) {
        let Some(name) = self.doc.name(task) else { return };
        writer.open(&format!("task {}", name));
        self.inputs_section(writer, task);
        self.parameter_lines(writer, task, Role::Declarations);
        self.command_section(writer, task);
        self.property_section(writer, task, Role::Runtime, "runtime");
        self.outputs_section(writer, task);
        self.property_section(writer, task, Role::Meta, "meta");
        writer.close();
    }

    fn workflow_block(&self, writer: &mut Writer, workflow: EntityId) {
        let Some(name) = self.doc.name(workflow) else { return };
        writer.open(&format!("workflow {}", name));
        self.inputs_section(writer, workflow);
        self.body(writer, workflow);
        self.outputs_section(writer, workflow);
        self.property_section(writer, workflow, Role::Meta, "meta");
        writer.close();
    }

    /// Declarations and sub-actions of a container, interleaved by
    /// dependency depth.
    fn body(&self, writer: &mut Writer, container: EntityId) {
        let mut elements = self.doc.members(container, Role::Declarations);
        elements.extend(self.doc.members(container, Role::Actions));
        for element in self.doc.execution_order(&elements) {
            if self.omitted(element) {
                continue;
            }
            match self.doc.kind(element) {
                Some(ContextKind::Declaration) => {
                    if let Some(line) = self.parameter_line(element) {
                        writer.line(&line);
                    }
                }
                Some(ContextKind::Call) => self.call_block(writer, element),
                Some(ContextKind::Scatter) => self.scatter_block(writer, element),
                Some(ContextKind::Conditional) => self.conditional_block(writer, element),
                _ => {}
            }
        }
    }

    fn call_block(&self, writer: &mut Writer, call: EntityId) {
        let Some(data) = self.doc.get(call).and_then(|entity| entity.as_call()) else {
            return;
        };
        let mut header = format!("call {}", data.target);
        if let Some(alias) = self.doc.alias(call).filter(|alias| !alias.is_empty()) {
            header.push_str(&format!(" as {}", alias));
        }
        for after in &data.after {
            header.push_str(&format!(" after {}", after));
        }

        let bound: Vec<(String, String)> = self
            .doc
            .members(call, Role::Inputs)
            .into_iter()
            .filter_map(|input| {
                let name = self.doc.name(input)?;
                let value = self.doc.rendered_value(input)?;
                Some((name, value))
            })
            .collect();
        if bound.is_empty() {
            writer.line(&header);
            return;
        }
        writer.open(&header);
        writer.line("input:");
        writer.indent += 1;
        let last = bound.len() - 1;
        for (index, (name, value)) in bound.into_iter().enumerate() {
            let comma = if index == last { "" } else { "," };
            writer.line(&format!("{} = {}{}", name, value, comma));
        }
        writer.indent -= 1;
        writer.close();
    }

    fn scatter_block(&self, writer: &mut Writer, scatter: EntityId) {
        let Some(iterator) = self.doc.scatter_iterator(scatter) else {
            return;
        };
        let Some(name) = self.doc.name(iterator) else { return };
        let Some(source) = self.doc.rendered_value(iterator) else {
            return;
        };
        writer.open(&format!("scatter ({} in {})", name, source));
        self.body(writer, scatter);
        writer.close();
    }

    fn conditional_block(&self, writer: &mut Writer, conditional: EntityId) {
        let Some(data) = self
            .doc
            .get(conditional)
            .and_then(|entity| entity.as_conditional())
        else {
            return;
        };
        writer.open(&format!("if ({})", data.expression));
        self.body(writer, conditional);
        writer.close();
    }

    /// Inputs emit as a typed `input { ... }` section from 1.0 on; draft
    /// versions predate the section and write them as bare declarations.
    fn inputs_section(&self, writer: &mut Writer, owner: EntityId) {
        let inputs = self.doc.members(owner, Role::Inputs);
        if inputs.is_empty() {
            return;
        }
        let sectioned = self.doc.supports_feature(Feature::InputsSection);
        if sectioned {
            writer.open("input");
        }
        for input in inputs {
            if let Some(line) = self.parameter_line(input) {
                writer.line(&line);
            }
        }
        if sectioned {
            writer.close();
        }
    }

    fn outputs_section(&self, writer: &mut Writer, owner: EntityId) {
        let outputs = self.doc.members(owner, Role::Outputs);
        if outputs.is_empty() {
            return;
        }
        writer.open("output");
        for output in outputs {
            if let Some(line) = self.parameter_line(output) {
                writer.line(&line);
            }
        }
        writer.close();
    }

    fn command_section(&self, writer: &mut Writer, task: EntityId) {
        let Some(command) = self.doc.task_command(task).filter(|text| !text.is_empty()) else {
            return;
        };
        writer.open("command");
        for line in command.lines() {
            writer.line(line);
        }
        writer.close();
    }

    fn property_section(&self, writer: &mut Writer, owner: EntityId, role: Role, header: &str) {
        let properties = self.doc.members(owner, role);
        if properties.is_empty() {
            return;
        }
        writer.open(header);
        for property in properties {
            let Some(name) = self.doc.name(property) else {
                continue;
            };
            let value = self.doc.property_value(property).unwrap_or_default();
            writer.line(&format!("{}: {}", name, value));
        }
        writer.close();
    }

    /// `Type name = value`, with the type and the value each optional.
    /// Ordered parameter sets keep declarations before their readers, so a
    /// bare `name` line is legal for unbound inputs.
    fn parameter_line(&self, parameter: EntityId) -> Option<String> {
        let name = self.doc.name(parameter)?;
        let mut line = String::new();
        if let Some(declared) = self.doc.parameter_type(parameter) {
            line.push_str(&format!("{} ", declared));
        }
        line.push_str(&name);
        if let Some(value) = self.doc.rendered_value(parameter) {
            line.push_str(&format!(" = {}", value));
        }
        Some(line)
    }

    fn parameter_lines(&self, writer: &mut Writer, owner: EntityId, role: Role) {
        for parameter in self.doc.members(owner, role) {
            if let Some(line) = self.parameter_line(parameter) {
                writer.line(&line);
            }
        }
    }
}

/// Line-oriented emitter with two-space indentation.
#[derive(Default)]
struct Writer {
    out: String,
    indent: usize,
}

impl Writer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn open(&mut self, header: &str) {
        self.line(&format!("{} {{", header));
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent -= 1;
        self.line("}");
    }
}
