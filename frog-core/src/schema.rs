//! # Schema Emission
//!
//! Turns the methods of a service into schema text.
//!
//! ## How it works
//!
//! 1. [`SchemaEmitter::collect_closure`] gathers every record reachable from the request and
//!    response types of the service's methods.
//! 2. [`SchemaEmitter::topo_sort`] orders those records so that each one appears after the
//!    records it references. A record referencing itself is fine; two records referencing each
//!    other are rejected with [`SchemaError::Cyclic`].
//! 3. [`SchemaEmitter::render`] writes the message blocks followed by the service block.
//!
//! The text is compiled into wire descriptors by a [`SchemaCompiler`] (see [`compiler`]).
pub mod compiler;

pub use compiler::{CompiledSchema, ProtoCompiler, SchemaCompileError, SchemaCompiler};

use crate::catalog::{FieldDescriptor, RecordId, TIMESTAMP_IMPORT, TypeCatalog};
use crate::method::{Bound, MethodBinding};
use std::collections::HashSet;
use std::fmt::Write;

/// Version line of the emitted schema.
pub const SYNTAX: &str = "proto3";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Cyclic dependency between records: {}", .0.join(", "))]
    Cyclic(Vec<String>),
    #[error("Service '{0}' has no methods")]
    EmptyService(String),
}

/// Renders schema text from catalog records and method bindings.
pub struct SchemaEmitter<'a> {
    catalog: &'a TypeCatalog,
}

impl<'a> SchemaEmitter<'a> {
    pub fn new(catalog: &'a TypeCatalog) -> Self {
        Self { catalog }
    }

    /// Every record reachable from the methods' requests and responses.
    pub fn collect_closure<'m>(
        &self,
        methods: impl IntoIterator<Item = &'m MethodBinding<Bound>>,
    ) -> Vec<RecordId> {
        let roots: Vec<RecordId> = methods
            .into_iter()
            .flat_map(|m| [m.request(), m.response()])
            .collect();
        self.catalog.closure(&roots)
    }

    /// Orders records so that every record comes after the records its fields reference.
    ///
    /// Each pass emits, in input order, the records whose dependencies are already emitted.
    /// Self references and references to records outside `records` never block.
    pub fn topo_sort(&self, records: &[RecordId]) -> Result<Vec<RecordId>, SchemaError> {
        let members: HashSet<RecordId> = records.iter().copied().collect();
        let mut emitted: HashSet<RecordId> = HashSet::with_capacity(records.len());
        let mut ordered = Vec::with_capacity(records.len());
        let mut seen = HashSet::with_capacity(records.len());
        let mut pending: Vec<RecordId> = records
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        while !pending.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = pending.into_iter().partition(|id| {
                self.catalog
                    .record(*id)
                    .dependencies()
                    .into_iter()
                    .all(|dep| dep == *id || !members.contains(&dep) || emitted.contains(&dep))
            });

            if ready.is_empty() {
                let names = blocked
                    .iter()
                    .map(|id| self.catalog.record(*id).name().to_string())
                    .collect();
                return Err(SchemaError::Cyclic(names));
            }

            emitted.extend(ready.iter().copied());
            ordered.extend(ready);
            pending = blocked;
        }

        Ok(ordered)
    }

    /// Renders the schema text of a service.
    pub fn render(
        &self,
        ordered: &[RecordId],
        methods: &[&MethodBinding<Bound>],
        service: &str,
    ) -> String {
        let messages: Vec<String> = ordered.iter().map(|id| self.render_message(*id)).collect();

        let mut text = String::new();
        let _ = writeln!(text, "syntax = \"{SYNTAX}\";");
        text.push('\n');
        let _ = writeln!(text, "package {service};");
        text.push('\n');
        let _ = writeln!(text, "import \"{TIMESTAMP_IMPORT}\";");
        text.push('\n');
        text.push_str(&messages.join("\n\n"));
        text.push_str("\n\n");
        text.push_str(&self.render_service(methods, service));
        text.push('\n');
        text
    }

    /// Collects, orders and renders a service in one go.
    pub fn emit(
        &self,
        methods: &[&MethodBinding<Bound>],
        service: &str,
    ) -> Result<String, SchemaError> {
        if methods.is_empty() {
            return Err(SchemaError::EmptyService(service.to_string()));
        }

        let closure = self.collect_closure(methods.iter().copied());
        let ordered = self.topo_sort(&closure)?;
        Ok(self.render(&ordered, methods, service))
    }

    fn render_message(&self, id: RecordId) -> String {
        let record = self.catalog.record(id);
        let mut block = format!("message {} {{", record.name());
        for field in record.fields() {
            let _ = write!(
                block,
                "\n  {} {} = {};",
                self.shape(field.descriptor()),
                field.name(),
                field.number()
            );
        }
        block.push_str("\n}");
        block
    }

    fn render_service(&self, methods: &[&MethodBinding<Bound>], service: &str) -> String {
        let rpcs: Vec<String> = methods
            .iter()
            .map(|m| {
                format!(
                    "rpc {}({}) returns ({}) {{}};",
                    m.name(),
                    self.catalog.record(m.request()).name(),
                    self.catalog.record(m.response()).name()
                )
            })
            .collect();

        format!("service {service} {{\n  {}\n}}", rpcs.join("\n  "))
    }

    fn shape(&self, descriptor: &FieldDescriptor) -> String {
        match descriptor {
            FieldDescriptor::Scalar(kind) => kind.wire_type().to_string(),
            FieldDescriptor::Record(id) => self.catalog.record(*id).name().to_string(),
            FieldDescriptor::List(element) => format!("repeated {}", self.shape(element)),
            FieldDescriptor::Map(key, value) => {
                format!("map<{}, {}>", key.wire_type(), self.shape(value))
            }
        }
    }
}
