//! # Schema Compiler
//!
//! Compiles emitted schema text into wire descriptors.
//!
//! [`ProtoCompiler`] runs the schema through [`protox`], a pure Rust protobuf compiler, so no
//! `protoc` binary is needed at run time. Imports of the well-known types
//! (`google/protobuf/timestamp.proto`) are served by protox itself. The result is an encoded
//! `FileDescriptorSet` that is loaded into a [`prost_reflect::DescriptorPool`] and persisted as
//! `<service>.bin` next to the schema file.
use crate::transcoder::MessageFactory;
use parking_lot::RwLock;
use prost_reflect::{
    DescriptorError, DescriptorPool, MessageDescriptor, MethodDescriptor, ServiceDescriptor,
};
use protox::Compiler;
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lines of schema text attached to compile errors.
const EXCERPT_LINES: usize = 40;

#[derive(Debug, thiserror::Error)]
pub enum SchemaCompileError {
    #[error("Failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to compile '{file}': {message}\n{excerpt}")]
    Compile {
        file: String,
        message: String,
        excerpt: String,
    },
    #[error("Invalid descriptor set: {0}")]
    Descriptor(#[source] DescriptorError),
    #[error("The compiled schema declares no service")]
    NoService,
}

/// The external schema compiler collaborator.
pub trait SchemaCompiler {
    /// Compiles the schema file, writing any artifacts into `output_dir`.
    fn compile(
        &self,
        schema_file: &Path,
        output_dir: &Path,
    ) -> Result<CompiledSchema, SchemaCompileError>;
}

/// The built-in compiler for emitted schema text.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtoCompiler;

impl ProtoCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Compiles schema text held in memory. `file_name` is the name recorded in the descriptor.
    pub fn compile_source(
        &self,
        file_name: &str,
        source: &str,
    ) -> Result<CompiledSchema, SchemaCompileError> {
        let mut resolver = ChainFileResolver::new();
        resolver.add(SourceResolver {
            name: file_name.to_string(),
            source: source.to_string(),
        });
        resolver.add(GoogleFileResolver::new());

        let mut compiler = Compiler::with_file_resolver(resolver);
        compiler.include_imports(true);
        compiler
            .open_file(file_name)
            .map_err(|err| compile_error(file_name, source, &err))?;

        CompiledSchema::from_file_descriptor_set(&compiler.encode_file_descriptor_set())
    }
}

impl SchemaCompiler for ProtoCompiler {
    fn compile(
        &self,
        schema_file: &Path,
        output_dir: &Path,
    ) -> Result<CompiledSchema, SchemaCompileError> {
        let source = std::fs::read_to_string(schema_file)
            .map_err(|source| io_error(schema_file, source))?;
        let include = schema_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let file_name = schema_file.display().to_string();

        let mut compiler = Compiler::new([include])
            .map_err(|err| compile_error(&file_name, &source, &err))?;
        compiler.include_imports(true);
        compiler
            .open_file(schema_file)
            .map_err(|err| compile_error(&file_name, &source, &err))?;

        let bytes = compiler.encode_file_descriptor_set();
        let compiled = CompiledSchema::from_file_descriptor_set(&bytes)?;

        let stem = schema_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| compiled.package().to_string());
        let artifact = output_dir.join(format!("{stem}.bin"));

        std::fs::create_dir_all(output_dir).map_err(|source| io_error(output_dir, source))?;
        std::fs::write(&artifact, &bytes).map_err(|source| io_error(&artifact, source))?;

        info!(
            schema = %schema_file.display(),
            artifact = %artifact.display(),
            "Compiled schema"
        );

        Ok(compiled)
    }
}

/// Serves one in-memory schema file to protox.
struct SourceResolver {
    name: String,
    source: String,
}

impl FileResolver for SourceResolver {
    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        if name == self.name {
            File::from_source(name, &self.source)
        } else {
            Err(protox::Error::file_not_found(name))
        }
    }
}

fn compile_error(file: &str, source: &str, err: &protox::Error) -> SchemaCompileError {
    SchemaCompileError::Compile {
        file: file.to_string(),
        message: err.to_string(),
        excerpt: excerpt(source),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SchemaCompileError {
    SchemaCompileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Wire descriptors produced by a [`SchemaCompiler`].
///
/// Message lookups by wire name are memoized: each name is resolved against the descriptor pool
/// at most once.
#[derive(Debug)]
pub struct CompiledSchema {
    pool: DescriptorPool,
    package: String,
    bytes: Vec<u8>,
    messages: RwLock<HashMap<String, MessageDescriptor>>,
}

impl CompiledSchema {
    fn new(pool: DescriptorPool, bytes: Vec<u8>) -> Result<Self, SchemaCompileError> {
        let package = pool
            .services()
            .next()
            .map(|s| s.parent_file().package_name().to_string())
            .ok_or(SchemaCompileError::NoService)?;

        Ok(Self {
            pool,
            package,
            bytes,
            messages: RwLock::new(HashMap::new()),
        })
    }

    /// Loads previously compiled artifacts (an encoded `FileDescriptorSet`).
    pub fn from_file_descriptor_set(bytes: &[u8]) -> Result<Self, SchemaCompileError> {
        let pool = DescriptorPool::decode(bytes).map_err(SchemaCompileError::Descriptor)?;
        Self::new(pool, bytes.to_vec())
    }

    /// Reads a `<service>.bin` artifact from disk.
    pub fn load(path: &Path) -> Result<Self, SchemaCompileError> {
        let bytes = std::fs::read(path).map_err(|source| io_error(path, source))?;
        Self::from_file_descriptor_set(&bytes)
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// The encoded `FileDescriptorSet`.
    pub fn to_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn qualify(&self, name: &str) -> String {
        if self.package.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.package, name)
        }
    }

    pub fn message(&self, wire_name: &str) -> Option<MessageDescriptor> {
        if let Some(desc) = self.messages.read().get(wire_name) {
            return Some(desc.clone());
        }

        let mut cache = self.messages.write();
        if let Some(desc) = cache.get(wire_name) {
            return Some(desc.clone());
        }

        let desc = self.pool.get_message_by_name(&self.qualify(wire_name))?;
        debug!(message = %desc.full_name(), "Resolved wire message");
        cache.insert(wire_name.to_string(), desc.clone());
        Some(desc)
    }

    pub fn service(&self, name: &str) -> Option<ServiceDescriptor> {
        self.pool.get_service_by_name(&self.qualify(name))
    }

    pub fn method(&self, service: &str, method: &str) -> Option<MethodDescriptor> {
        self.service(service)?.methods().find(|m| m.name() == method)
    }
}

impl MessageFactory for CompiledSchema {
    fn message_descriptor(&self, wire_name: &str) -> Option<MessageDescriptor> {
        self.message(wire_name)
    }
}

fn excerpt(source: &str) -> String {
    source
        .lines()
        .take(EXCERPT_LINES)
        .enumerate()
        .map(|(i, line)| format!("{:>4} | {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}
