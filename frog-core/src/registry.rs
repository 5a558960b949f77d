//! # Service Registry
//!
//! Groups [`MethodBinding`]s under a service name, holds the service-wide extra request fields
//! and knows where the schema artifacts of the service live.
//!
//! Methods are kept in registration order, which is also the order of the `rpc` lines in the
//! emitted schema.
use crate::catalog::{TypeCatalog, TypeExpr};
use crate::config::FrogConfig;
use crate::method::{BindError, Bound, ExtraFields, MethodBinding, RpcContext, Unbound};
use crate::BoxError;
use crate::schema::{
    CompiledSchema, SchemaCompileError, SchemaCompiler, SchemaEmitter, SchemaError,
};
use crate::value::Value;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("Failed to write schema '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Compile(#[from] SchemaCompileError),
}

/// The methods of one service.
#[derive(Debug)]
pub struct ServiceRegistry {
    name: String,
    methods: IndexMap<String, MethodBinding<Bound>>,
    extra_fields: ExtraFields,
    output_dir: PathBuf,
}

impl ServiceRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &FrogConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: &FrogConfig) -> Self {
        Self {
            name: name.into(),
            methods: IndexMap::new(),
            extra_fields: ExtraFields::new(),
            output_dir: config.proto_dir.clone(),
        }
    }

    /// Directory receiving the schema artifacts.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn extra_fields(&self) -> &ExtraFields {
        &self.extra_fields
    }

    /// Adds a server-injected field to the request of every method.
    ///
    /// Extra fields are merged into request records when methods are bound, so they must be
    /// declared first.
    pub fn add_request_extra_field(
        &mut self,
        name: impl Into<String>,
        ty: TypeExpr,
    ) -> Result<(), BindError> {
        let name = name.into();
        if !self.methods.is_empty() {
            return Err(BindError::LateExtraField(name));
        }

        debug!(service = %self.name, field = %name, "Added extra request field");
        self.extra_fields.add(name, ty);
        Ok(())
    }

    /// Registers the callback receiving the value of an extra field on every call.
    pub fn on_extra_field<F, E>(&mut self, name: &str, handler: F) -> Result<(), BindError>
    where
        F: Fn(Value, &mut RpcContext) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let handler = Arc::new(move |value: Value, ctx: &mut RpcContext| {
            handler(value, ctx).map_err(Into::into)
        });

        if self.extra_fields.set_handler(name, handler) {
            Ok(())
        } else {
            Err(BindError::UnknownExtraField(name.to_string()))
        }
    }

    /// Binds a method and adds it to the service.
    pub fn add_method(
        &mut self,
        catalog: &mut TypeCatalog,
        method: MethodBinding<Unbound>,
    ) -> Result<&MethodBinding<Bound>, BindError> {
        if self.methods.contains_key(method.name()) {
            return Err(BindError::DuplicateMethod(method.name().to_string()));
        }

        let bound = method.bind(catalog, &self.extra_fields)?;
        let entry = self.methods.entry(bound.name().to_string());
        Ok(&*entry.or_insert(bound))
    }

    pub fn method(&self, name: &str) -> Option<&MethodBinding<Bound>> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodBinding<Bound>> {
        self.methods.values()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Location of the emitted schema text.
    pub fn schema_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.proto", self.name))
    }

    /// Renders the schema text of the service.
    pub fn emit_schema(&self, catalog: &TypeCatalog) -> Result<String, SchemaError> {
        let methods: Vec<_> = self.methods.values().collect();
        SchemaEmitter::new(catalog).emit(&methods, &self.name)
    }

    /// Writes the schema text into the output directory, overwriting any previous version, and
    /// compiles it.
    pub fn generate(
        &self,
        catalog: &TypeCatalog,
        compiler: &dyn SchemaCompiler,
    ) -> Result<CompiledSchema, GenerateError> {
        let text = self.emit_schema(catalog)?;
        let path = self.schema_path();

        std::fs::create_dir_all(&self.output_dir).map_err(|source| GenerateError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        std::fs::write(&path, text).map_err(|source| GenerateError::Io {
            path: path.clone(),
            source,
        })?;

        info!(
            service = %self.name,
            methods = self.methods.len(),
            path = %path.display(),
            "Generated schema"
        );

        Ok(compiler.compile(&path, &self.output_dir)?)
    }
}
