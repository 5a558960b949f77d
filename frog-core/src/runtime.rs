//! # Service Runtime
//!
//! The frozen state a service is served or called with: the type catalog, the registry of bound
//! methods and the compiled schema. Once built, a runtime is only ever read, so it is shared
//! across calls behind an `Arc`.
//!
//! Building a runtime checks that the compiled schema matches the registry: every method has
//! an `rpc` with the expected request and response messages, and every record the methods
//! reach has a wire message.
use crate::catalog::{RecordId, TypeCatalog};
use crate::method::{Bound, CallError, MethodBinding, RpcContext};
use crate::registry::ServiceRegistry;
use crate::schema::CompiledSchema;
use crate::transcoder::MessageTranscoder;
use indexmap::IndexMap;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Service '{0}' is missing from the compiled schema")]
    MissingService(String),
    #[error("Method '{0}' is missing from the compiled schema")]
    MissingMethod(String),
    #[error("Record '{0}' is missing from the compiled schema")]
    MissingMessage(String),
    #[error("Method '{method}' expects '{expected}' but the compiled schema has '{found}'")]
    MessageMismatch {
        method: String,
        expected: String,
        found: String,
    },
}

/// One entry of the dispatch table.
#[derive(Debug, Clone)]
pub struct Route {
    path: String,
    descriptor: MethodDescriptor,
}

impl Route {
    /// HTTP/2 path of the method, `/<package>.<service>/<method>`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }
}

/// A catalog, a registry and the compiled schema of that registry.
#[derive(Debug)]
pub struct ServiceRuntime {
    catalog: Arc<TypeCatalog>,
    registry: ServiceRegistry,
    schema: CompiledSchema,
    routes: IndexMap<String, Route>,
}

impl ServiceRuntime {
    pub fn new(
        catalog: impl Into<Arc<TypeCatalog>>,
        registry: ServiceRegistry,
        schema: CompiledSchema,
    ) -> Result<Self, RuntimeError> {
        let catalog = catalog.into();
        let service = schema
            .service(registry.name())
            .ok_or_else(|| RuntimeError::MissingService(registry.name().to_string()))?;

        let mut routes = IndexMap::with_capacity(registry.len());
        for method in registry.methods() {
            let descriptor = service
                .methods()
                .find(|m| m.name() == method.name())
                .ok_or_else(|| RuntimeError::MissingMethod(method.name().to_string()))?;

            check_message(&catalog, method, method.request(), &descriptor.input())?;
            check_message(&catalog, method, method.response(), &descriptor.output())?;

            for id in method.closure() {
                let name = catalog.record(*id).name();
                if schema.message(name).is_none() {
                    return Err(RuntimeError::MissingMessage(name.to_string()));
                }
            }

            let path = format!("/{}/{}", service.full_name(), descriptor.name());
            debug!(path = %path, "Registered route");
            routes.insert(path.clone(), Route { path, descriptor });
        }

        Ok(Self {
            catalog,
            registry,
            schema,
            routes,
        })
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }

    pub fn service_name(&self) -> &str {
        self.registry.name()
    }

    pub fn transcoder(&self) -> MessageTranscoder<'_> {
        MessageTranscoder::new(&self.catalog, &self.schema)
    }

    /// The dispatch table, in method registration order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub fn route(&self, method: &str) -> Option<&Route> {
        self.routes.values().find(|r| r.method() == method)
    }

    pub fn route_by_path(&self, path: &str) -> Option<&Route> {
        self.routes.get(path)
    }

    pub fn method(&self, name: &str) -> Result<&MethodBinding<Bound>, CallError> {
        self.registry
            .method(name)
            .ok_or_else(|| CallError::MethodNotFound(name.to_string()))
    }

    /// Serves one call of `method`.
    pub fn invoke(
        &self,
        method: &str,
        request: &DynamicMessage,
        ctx: &mut RpcContext,
    ) -> Result<DynamicMessage, CallError> {
        let binding = self.method(method)?;
        debug!(service = %self.service_name(), method = %method, "Dispatching call");

        binding
            .invoke_server_side(
                &self.transcoder(),
                self.registry.extra_fields(),
                request,
                ctx,
            )
            .inspect_err(|err| {
                warn!(
                    service = %self.service_name(),
                    method = %method,
                    error = %err,
                    "Call rejected"
                );
            })
    }
}

fn check_message(
    catalog: &TypeCatalog,
    method: &MethodBinding<Bound>,
    record: RecordId,
    found: &MessageDescriptor,
) -> Result<(), RuntimeError> {
    let expected = catalog.record(record).name();
    if found.name() == expected {
        Ok(())
    } else {
        Err(RuntimeError::MessageMismatch {
            method: method.name().to_string(),
            expected: expected.to_string(),
            found: found.full_name().to_string(),
        })
    }
}
