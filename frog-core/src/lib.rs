//! # Frog Core
//!
//! `frog-core` turns plain Rust types and functions into a gRPC service without hand-written
//! `.proto` files. The schema is inferred from the native types, emitted as proto3 text,
//! compiled at run time, and native values are transcoded to and from wire messages on every
//! call.
//!
//! ## Key Components
//!
//! * **[`TypeCatalog`]:** Registry of record types. Registering a [`Model`] classifies its fields
//!   and pulls in every record it references.
//! * **[`MessageTranscoder`]:** Converts native [`Value`]s into `prost_reflect::DynamicMessage`s
//!   and back, driven by the catalog.
//! * **[`SchemaEmitter`] & [`ProtoCompiler`]:** Render the proto3 text of a service in dependency
//!   order and compile it into a descriptor pool.
//! * **[`MethodBinding`] & [`ServiceRegistry`]:** Bind business callables to request/response
//!   records and group them under a service name.
//! * **[`ServiceRuntime`]:** The frozen catalog, registry and compiled schema shared by the
//!   server and the client.
//!
//! * **[`CodeGenerator`]:** Renders Rust models and method declarations back from a compiled
//!   schema, for clients that do not share the service's types.
//!
//! ## Transport
//!
//! * **[`FrogServer`]:** A `tower` service dispatching gRPC calls to a runtime.
//! * **[`RemoteService`]:** Calls a remote service with native arguments, connecting directly or
//!   through a [`Discovery`] backend.
//!
//! ## Re-exports
//!
//! This crate re-exports `chrono`, `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod catalog;
pub mod client;
pub mod codegen;
pub mod config;
pub mod grpc;
pub mod method;
pub mod registry;
pub mod runtime;
pub mod schema;
pub mod transcoder;
pub mod value;

pub use catalog::{
    CatalogError, FieldDef, Model, ModelRef, RecordId, ScalarKind, TypeCatalog, TypeExpr, TypeKey,
};
pub use client::{
    ClientConnectError, ConnectionDescriptor, Directory, Discovery, DiscoveryError, Driver,
    RemoteCallError, RemoteService, ServiceEndpoint,
};
pub use codegen::{CodeGenerator, CodegenError};
pub use config::{ConfigError, FrogConfig};
pub use grpc::server::{FrogServer, ServiceName};
pub use method::{BindError, CallError, MethodBinding, RpcContext, Signature};
pub use registry::{GenerateError, ServiceRegistry};
pub use runtime::{RuntimeError, ServiceRuntime};
pub use schema::{
    CompiledSchema, ProtoCompiler, SchemaCompileError, SchemaCompiler, SchemaEmitter, SchemaError,
};
pub use transcoder::{ConversionError, MessageTranscoder};
pub use value::{MapKey, NativeKey, NativeType, Record, Value};

// Re-exports
pub use chrono;
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in handlers and generic bounds.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
