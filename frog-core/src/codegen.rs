//! # Code Generation
//!
//! Renders Rust source for a compiled service, so a program can call (or implement) a service
//! whose native types it does not share.
//!
//! ## How it works
//!
//! 1. Every top-level message of the service's schema file becomes a struct implementing
//!    [`crate::Model`], except the request records synthesized for methods (`<method>_request`),
//!    whose fields become method parameters instead.
//! 2. A `service_registry` function declares every method with its [`crate::Signature`]. For
//!    [`Target::Client`] the methods are remote bindings. For [`Target::Server`] each method
//!    gets a handler answering `UNIMPLEMENTED`, ready to be filled in.
//!
//! The generated code uses fully qualified `frog_core` paths, so it needs no imports and cannot
//! clash with the names of the generated structs.
use crate::catalog::TIMESTAMP_TYPE;
use crate::schema::CompiledSchema;
use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor, MethodDescriptor};
use std::collections::HashSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const TIMESTAMP_RUST: &str = "frog_core::chrono::DateTime<frog_core::chrono::Utc>";

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "do",
    "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "static", "struct", "trait", "true", "try", "type", "typeof", "unsafe", "unsized",
    "use", "virtual", "where", "while", "yield",
];

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("Service '{0}' is not in the compiled schema")]
    UnknownService(String),
    #[error("Field '{field}' of '{message}' has no native type (found '{kind}')")]
    UnsupportedField {
        message: String,
        field: String,
        kind: String,
    },
    #[error("Method '{method}' uses '{message}', which is not declared in the service's schema")]
    ForeignMessage { method: String, message: String },
    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which side of the service the generated code is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    Client,
    Server,
}

/// Renders Rust source from a [`CompiledSchema`].
pub struct CodeGenerator<'a> {
    schema: &'a CompiledSchema,
    target: Target,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(schema: &'a CompiledSchema) -> Self {
        Self {
            schema,
            target: Target::Client,
        }
    }

    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Renders the source of one service.
    pub fn generate(&self, service: &str) -> Result<String, CodegenError> {
        let descriptor = self
            .schema
            .service(service)
            .ok_or_else(|| CodegenError::UnknownService(service.to_string()))?;
        let file = descriptor.parent_file();

        let methods: Vec<MethodDescriptor> = descriptor.methods().collect();
        let requests: HashSet<String> = methods
            .iter()
            .filter(|m| is_synthetic_request(m))
            .map(|m| m.input().full_name().to_string())
            .collect();
        let models: Vec<MessageDescriptor> = file
            .messages()
            .filter(|m| !requests.contains(m.full_name()))
            .collect();

        let mut out = String::new();
        let _ = writeln!(
            out,
            "// Generated by frog-codegen from `{}`. Do not edit.",
            file.name()
        );
        out.push('\n');
        out.push_str("/// Name of the service in the compiled schema.\n");
        let _ = writeln!(out, "pub const SERVICE_NAME: &str = \"{service}\";");

        for model in &models {
            out.push('\n');
            out.push_str(&self.render_model(model)?);
        }

        if !models.is_empty() {
            let names: Vec<&str> = models.iter().map(|m| m.name()).collect();
            out.push('\n');
            let _ = writeln!(out, "frog_core::native_model!({});", names.join(", "));
        }

        out.push('\n');
        out.push_str(&self.render_registry(service, &methods)?);

        Ok(out)
    }

    /// Writes the source of one service to `<output_dir>/<service>.rs`.
    pub fn write(&self, service: &str, output_dir: &Path) -> Result<PathBuf, CodegenError> {
        let source = self.generate(service)?;
        let path = output_dir.join(format!("{service}.rs"));

        std::fs::create_dir_all(output_dir).map_err(|source| CodegenError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;
        std::fs::write(&path, source).map_err(|source| CodegenError::Io {
            path: path.clone(),
            source,
        })?;

        info!(service, path = %path.display(), target = ?self.target, "Generated service code");
        Ok(path)
    }

    fn render_model(&self, message: &MessageDescriptor) -> Result<String, CodegenError> {
        let mut fields = Vec::new();
        for field in message.fields() {
            let ty = self.field_type(message, &field, true)?;
            fields.push((field.name().to_string(), ty));
        }

        let mut out = String::new();
        out.push_str("#[derive(Debug, Clone, PartialEq)]\n");
        let _ = write!(out, "pub struct {} {{", message.name());
        if fields.is_empty() {
            out.push_str("}\n");
        } else {
            out.push('\n');
            for (name, ty) in &fields {
                let _ = writeln!(out, "    pub {}: {ty},", ident(name));
            }
            out.push_str("}\n");
        }
        out.push('\n');

        let _ = writeln!(out, "impl frog_core::Model for {} {{", message.name());

        out.push_str("    fn fields() -> Vec<frog_core::FieldDef> {\n");
        if fields.is_empty() {
            out.push_str("        Vec::new()\n");
        } else {
            out.push_str("        vec![\n");
            for (name, ty) in &fields {
                let _ = writeln!(out, "            frog_core::FieldDef::of::<{ty}>(\"{name}\"),");
            }
            out.push_str("        ]\n");
        }
        out.push_str("    }\n\n");

        out.push_str("    fn into_record(self) -> frog_core::Record {\n");
        out.push_str("        frog_core::Record::new()");
        for (name, _) in &fields {
            let _ = write!(out, "\n            .with(\"{name}\", self.{})", ident(name));
        }
        out.push_str("\n    }\n\n");

        if fields.is_empty() {
            out.push_str(
                "    fn from_record(_record: frog_core::Record) -> Result<Self, frog_core::ConversionError> {\n",
            );
            out.push_str("        Ok(Self {})\n");
        } else {
            out.push_str(
                "    fn from_record(mut record: frog_core::Record) -> Result<Self, frog_core::ConversionError> {\n",
            );
            out.push_str("        Ok(Self {\n");
            for (name, _) in &fields {
                let _ = writeln!(out, "            {}: record.take(\"{name}\")?,", ident(name));
            }
            out.push_str("        })\n");
        }
        out.push_str("    }\n}\n");

        Ok(out)
    }

    fn render_registry(
        &self,
        service: &str,
        methods: &[MethodDescriptor],
    ) -> Result<String, CodegenError> {
        let mut out = String::new();
        let side = match self.target {
            Target::Client => "for remote calls",
            Target::Server => "with unimplemented handlers",
        };
        let _ = writeln!(out, "/// Declares the methods of `{service}` {side}.");
        out.push_str("pub fn service_registry(\n");
        out.push_str("    catalog: &mut frog_core::TypeCatalog,\n");
        out.push_str(") -> Result<frog_core::ServiceRegistry, frog_core::BindError> {\n");
        out.push_str("    let mut registry = frog_core::ServiceRegistry::new(SERVICE_NAME);\n");

        for method in methods {
            out.push('\n');
            out.push_str(&self.render_method(method)?);
        }

        out.push_str("\n    Ok(registry)\n}\n");
        Ok(out)
    }

    fn render_method(&self, method: &MethodDescriptor) -> Result<String, CodegenError> {
        let input = method.input();
        let output = method.output();
        let response = self.local_message(method, &output)?;

        let explicit_request = if is_synthetic_request(method) {
            None
        } else {
            Some(self.local_message(method, &input)?)
        };

        let mut signature = String::from("frog_core::Signature::new()");
        for field in input.fields() {
            let ty = self.field_type(&input, &field, false)?;
            let _ = write!(
                signature,
                "\n                .param::<{ty}>(\"{}\")",
                field.name()
            );
        }
        let _ = write!(signature, "\n                .returns::<{response}>()");

        let mut out = String::new();
        out.push_str("    registry.add_method(\n");
        out.push_str("        catalog,\n");
        match self.target {
            Target::Client => {
                out.push_str("        frog_core::MethodBinding::remote(\n");
                let _ = writeln!(out, "            \"{}\",", method.name());
                let _ = writeln!(out, "            {signature},");
                out.push_str("        )");
            }
            Target::Server => {
                out.push_str("        frog_core::MethodBinding::new(\n");
                let _ = writeln!(out, "            \"{}\",", method.name());
                let _ = writeln!(out, "            {signature},");
                out.push_str(
                    "            |_args: frog_core::Record, _ctx: &frog_core::RpcContext| {\n",
                );
                let _ = writeln!(
                    out,
                    "                Err::<{response}, _>(frog_core::tonic::Status::unimplemented(\"{}\"))",
                    method.name()
                );
                out.push_str("            },\n");
                out.push_str("        )");
            }
        }
        if let Some(request) = explicit_request {
            let _ = write!(out, "\n        .request_type::<{request}>()");
        }
        out.push_str(",\n    )?;\n");

        Ok(out)
    }

    /// Name of a message declared in the same file as the method's service.
    fn local_message(
        &self,
        method: &MethodDescriptor,
        message: &MessageDescriptor,
    ) -> Result<String, CodegenError> {
        if message.parent_file() != method.parent_service().parent_file()
            || message.parent_message().is_some()
        {
            return Err(CodegenError::ForeignMessage {
                method: method.name().to_string(),
                message: message.full_name().to_string(),
            });
        }
        Ok(message.name().to_string())
    }

    /// Rust type of a field. Singular record fields of a model are optional, and boxed when
    /// they lead back to the owning message.
    fn field_type(
        &self,
        owner: &MessageDescriptor,
        field: &FieldDescriptor,
        in_model: bool,
    ) -> Result<String, CodegenError> {
        let unsupported = || CodegenError::UnsupportedField {
            message: owner.full_name().to_string(),
            field: field.name().to_string(),
            kind: format!("{:?}", field.kind()),
        };

        if field.is_map() {
            let Kind::Message(entry) = field.kind() else {
                return Err(unsupported());
            };
            let key = scalar_type(&entry.map_entry_key_field().kind()).ok_or_else(unsupported)?;
            let value = element_type(&entry.map_entry_value_field().kind()).ok_or_else(unsupported)?;
            return Ok(format!("std::collections::BTreeMap<{key}, {value}>"));
        }

        let element = element_type(&field.kind()).ok_or_else(unsupported)?;
        if field.is_list() {
            return Ok(format!("Vec<{element}>"));
        }

        match field.kind() {
            Kind::Message(target) if in_model => {
                if reaches(&target, owner, &mut HashSet::new()) {
                    Ok(format!("Option<Box<{element}>>"))
                } else {
                    Ok(format!("Option<{element}>"))
                }
            }
            _ => Ok(element),
        }
    }
}

fn is_synthetic_request(method: &MethodDescriptor) -> bool {
    method.input().name() == format!("{}_request", method.name())
}

fn scalar_type(kind: &Kind) -> Option<String> {
    let ty = match kind {
        Kind::Int64 => "i64",
        Kind::String => "String",
        Kind::Bool => "bool",
        Kind::Double => "f64",
        _ => return None,
    };
    Some(ty.to_string())
}

fn element_type(kind: &Kind) -> Option<String> {
    match kind {
        Kind::Message(message) if message.full_name() == TIMESTAMP_TYPE => {
            Some(TIMESTAMP_RUST.to_string())
        }
        Kind::Message(message) => Some(message.name().to_string()),
        other => scalar_type(other),
    }
}

/// Whether `from` leads to `to` through singular record fields.
fn reaches(from: &MessageDescriptor, to: &MessageDescriptor, seen: &mut HashSet<String>) -> bool {
    if from == to {
        return true;
    }
    if !seen.insert(from.full_name().to_string()) {
        return false;
    }

    from.fields()
        .filter(|f| !f.is_list() && !f.is_map())
        .filter_map(|f| match f.kind() {
            Kind::Message(next) if next.full_name() != TIMESTAMP_TYPE => Some(next),
            _ => None,
        })
        .any(|next| reaches(&next, to, seen))
}

fn ident(name: &str) -> String {
    if KEYWORDS.contains(&name) {
        format!("r#{name}")
    } else {
        name.to_string()
    }
}
