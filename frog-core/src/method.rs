//! # Method Binding
//!
//! A [`MethodBinding`] wraps one business callable together with the record types of its request
//! and response, and knows the encode/decode sequence of a call in both directions.
//!
//! It uses a **Typestate Pattern** with two states:
//!
//! 1. **[`Unbound`]**: the method as declared: a name, a [`Signature`], an optional handler and
//!    optional explicit request/response types.
//! 2. **[`Bound`]**: request and response types are resolved and registered in the
//!    [`TypeCatalog`]. A bound method is immutable.
//!
//! The transition happens once, in [`MethodBinding::bind`].
//!
//! ## Example
//!
//! ```rust,ignore
//! let method = MethodBinding::new(
//!     "describe",
//!     Signature::new().param::<Shape>("shape").returns::<Point>(),
//!     |mut args: Record, _ctx: &RpcContext| args.take::<Shape>("shape").map(|s| s.center()),
//! );
//! let method = method.bind(&mut catalog, &ExtraFields::default())?;
//! ```
use crate::BoxError;
use crate::catalog::{CatalogError, FieldDef, Model, ModelRef, RecordId, TypeCatalog, TypeExpr};
use crate::transcoder::{ConversionError, MessageTranscoder};
use crate::value::{NativeType, Record, Value};
use indexmap::IndexMap;
use prost_reflect::DynamicMessage;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tracing::debug;

/// A business callable. Receives the request arguments (extra fields removed) and the call
/// context, returns the response value.
pub type Handler = Arc<dyn Fn(Record, &RpcContext) -> Result<Value, BoxError> + Send + Sync>;

/// Callback receiving the value of one extra request field.
pub type ExtraFieldHandler =
    Arc<dyn Fn(Value, &mut RpcContext) -> Result<(), BoxError> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("Method '{method}' must return a record, found '{annotation}'")]
    UnsupportedReturn { method: String, annotation: String },
    #[error(
        "Request type of method '{method}' declares {declared:?} but the method takes {expected:?}"
    )]
    RequestMismatch {
        method: String,
        expected: Vec<String>,
        declared: Vec<String>,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("Method '{0}' is already registered")]
    DuplicateMethod(String),
    #[error("Extra field '{0}' must be added before any method is registered")]
    LateExtraField(String),
    #[error("Extra field '{0}' is not declared")]
    UnknownExtraField(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("Method '{0}' has no server-side handler")]
    NotServable(String),
    #[error("No handler registered for extra field '{0}'")]
    UnhandledExtraField(String),
    #[error("Extra field '{field}' was rejected: {source}")]
    ExtraField {
        field: String,
        #[source]
        source: BoxError,
    },
    #[error("Method failed: {0}")]
    Handler(#[source] BoxError),
    #[error("Transport failed: {0}")]
    Transport(#[source] BoxError),
    #[error("Method '{0}' not found")]
    MethodNotFound(String),
}

/// Per-call context handed to handlers.
#[derive(Debug, Clone, Default)]
pub struct RpcContext {
    method: String,
    metadata: MetadataMap,
    values: IndexMap<String, Value>,
}

impl RpcContext {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request headers.
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Records a value for the handler, typically from an extra-field callback.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Declared parameters and return annotation of a callable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    params: Vec<FieldDef>,
    returns: Option<TypeExpr>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param<T: NativeType>(self, name: impl Into<String>) -> Self {
        self.param_expr(name, T::type_expr())
    }

    pub fn param_expr(mut self, name: impl Into<String>, ty: TypeExpr) -> Self {
        self.params.push(FieldDef::new(name, ty));
        self
    }

    pub fn returns<T: NativeType>(self) -> Self {
        self.returns_expr(T::type_expr())
    }

    pub fn returns_expr(mut self, ty: TypeExpr) -> Self {
        self.returns = Some(ty);
        self
    }

    pub fn params(&self) -> &[FieldDef] {
        &self.params
    }

    pub fn return_type(&self) -> Option<&TypeExpr> {
        self.returns.as_ref()
    }
}

#[derive(Clone)]
struct ExtraField {
    ty: TypeExpr,
    handler: Option<ExtraFieldHandler>,
}

/// Server-injected request fields, shared by every method of a service.
#[derive(Clone, Default)]
pub struct ExtraFields {
    fields: IndexMap<String, ExtraField>,
}

impl ExtraFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an extra field. Declaring it again replaces its type and keeps its handler.
    pub fn add(&mut self, name: impl Into<String>, ty: TypeExpr) {
        let name = name.into();
        match self.fields.get_mut(&name) {
            Some(field) => field.ty = ty,
            None => {
                self.fields.insert(name, ExtraField { ty, handler: None });
            }
        }
    }

    /// Sets the callback of a declared extra field. Returns `false` if the field is unknown.
    pub fn set_handler(&mut self, name: &str, handler: ExtraFieldHandler) -> bool {
        match self.fields.get_mut(name) {
            Some(field) => {
                field.handler = Some(handler);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn field_defs(&self) -> impl Iterator<Item = FieldDef> + '_ {
        self.fields
            .iter()
            .map(|(name, field)| FieldDef::new(name.clone(), field.ty.clone()))
    }

    /// Removes every extra field from the decoded arguments and routes its value to the
    /// field's callback.
    pub fn dispatch(&self, args: &mut Record, ctx: &mut RpcContext) -> Result<(), CallError> {
        for (name, field) in &self.fields {
            let value = args.remove(name).unwrap_or_default();
            let handler = field
                .handler
                .as_ref()
                .ok_or_else(|| CallError::UnhandledExtraField(name.clone()))?;

            handler(value, ctx).map_err(|source| CallError::ExtraField {
                field: name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for ExtraFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.fields
                    .iter()
                    .map(|(name, field)| (name, field.handler.is_some())),
            )
            .finish()
    }
}

/// State: declared, types not resolved yet.
#[derive(Debug, Clone, Default)]
pub struct Unbound {
    request: Option<ModelRef>,
    response: Option<TypeExpr>,
}

/// State: types resolved and registered.
#[derive(Debug, Clone)]
pub struct Bound {
    request: RecordId,
    response: RecordId,
    closure: Vec<RecordId>,
}

/// One method of a service.
#[derive(Clone)]
pub struct MethodBinding<S = Bound> {
    name: String,
    signature: Signature,
    handler: Option<Handler>,
    state: S,
}

impl<S: fmt::Debug> fmt::Debug for MethodBinding<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodBinding")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("servable", &self.handler.is_some())
            .field("state", &self.state)
            .finish()
    }
}

impl<S> MethodBinding<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Whether the method can be invoked on the server side.
    pub fn is_servable(&self) -> bool {
        self.handler.is_some()
    }
}

impl MethodBinding<Unbound> {
    /// Declares a servable method.
    pub fn new<F, R, E>(name: impl Into<String>, signature: Signature, handler: F) -> Self
    where
        F: Fn(Record, &RpcContext) -> Result<R, E> + Send + Sync + 'static,
        R: NativeType,
        E: Into<BoxError>,
    {
        let handler: Handler = Arc::new(move |args: Record, ctx: &RpcContext| {
            handler(args, ctx)
                .map(NativeType::into_value)
                .map_err(Into::into)
        });

        Self {
            name: name.into(),
            signature,
            handler: Some(handler),
            state: Unbound::default(),
        }
    }

    /// Declares a method that is only ever called remotely.
    pub fn remote(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            signature,
            handler: None,
            state: Unbound::default(),
        }
    }

    /// Uses `T` as the request record instead of synthesizing one from the parameters.
    pub fn request_type<T: Model>(mut self) -> Self {
        self.state.request = Some(ModelRef::of::<T>());
        self
    }

    /// Uses `T` as the response record instead of the signature's return annotation.
    pub fn response_type<T: Model>(mut self) -> Self {
        self.state.response = Some(TypeExpr::model::<T>());
        self
    }

    /// Resolves and registers the request and response records.
    pub fn bind(
        self,
        catalog: &mut TypeCatalog,
        extras: &ExtraFields,
    ) -> Result<MethodBinding<Bound>, BindError> {
        let (request, response) = catalog.register_atomically(|catalog| {
            let response = self.resolve_response(catalog)?;
            let request = self.resolve_request(catalog, extras)?;
            Ok::<_, BindError>((request, response))
        })?;
        let closure = catalog.closure(&[request, response]);

        debug!(
            method = %self.name,
            request = %catalog.record(request).name(),
            response = %catalog.record(response).name(),
            records = closure.len(),
            "Bound method"
        );

        Ok(MethodBinding {
            name: self.name,
            signature: self.signature,
            handler: self.handler,
            state: Bound {
                request,
                response,
                closure,
            },
        })
    }

    fn resolve_response(&self, catalog: &mut TypeCatalog) -> Result<RecordId, BindError> {
        let annotation = self
            .state
            .response
            .as_ref()
            .or(self.signature.returns.as_ref());

        match annotation {
            Some(TypeExpr::Model(model)) => Ok(catalog.register_model(*model, None)?),
            Some(TypeExpr::Named(name)) => catalog.lookup_wire_name(name).ok_or_else(|| {
                BindError::Catalog(CatalogError::NotRegistered(name.clone()))
            }),
            other => Err(BindError::UnsupportedReturn {
                method: self.name.clone(),
                annotation: other.map_or_else(|| "nothing".to_string(), TypeExpr::describe),
            }),
        }
    }

    fn resolve_request(
        &self,
        catalog: &mut TypeCatalog,
        extras: &ExtraFields,
    ) -> Result<RecordId, BindError> {
        let fields: Vec<FieldDef> = self
            .signature
            .params
            .iter()
            .cloned()
            .chain(extras.field_defs())
            .collect();

        match &self.state.request {
            None => Ok(catalog.register_synthetic(&format!("{}_request", self.name), fields)?),
            Some(model) => {
                let expected: BTreeSet<String> = fields.into_iter().map(|f| f.name).collect();
                let declared: BTreeSet<String> =
                    model.fields().into_iter().map(|f| f.name).collect();

                if expected != declared {
                    return Err(BindError::RequestMismatch {
                        method: self.name.clone(),
                        expected: expected.into_iter().collect(),
                        declared: declared.into_iter().collect(),
                    });
                }

                Ok(catalog.register_model(*model, None)?)
            }
        }
    }
}

impl MethodBinding<Bound> {
    pub fn request(&self) -> RecordId {
        self.state.request
    }

    pub fn response(&self) -> RecordId {
        self.state.response
    }

    /// Every record reachable from the request and response.
    pub fn closure(&self) -> &[RecordId] {
        &self.state.closure
    }

    /// Serves one call: decodes the request, routes extra fields to their callbacks, runs the
    /// handler with the remaining arguments and encodes its return value.
    pub fn invoke_server_side(
        &self,
        transcoder: &MessageTranscoder<'_>,
        extras: &ExtraFields,
        request: &DynamicMessage,
        ctx: &mut RpcContext,
    ) -> Result<DynamicMessage, CallError> {
        let handler = self
            .handler
            .as_ref()
            .ok_or_else(|| CallError::NotServable(self.name.clone()))?;

        let mut args = transcoder.to_native(request, self.state.request)?;
        extras.dispatch(&mut args, ctx)?;

        let result = handler(args, ctx).map_err(CallError::Handler)?;
        Ok(transcoder.to_wire(&result, self.state.response)?)
    }

    /// Encodes call arguments into a request message.
    pub fn encode_request(
        &self,
        transcoder: &MessageTranscoder<'_>,
        args: &Record,
    ) -> Result<DynamicMessage, CallError> {
        Ok(transcoder.to_wire(&Value::Record(args.clone()), self.state.request)?)
    }

    /// Decodes a response message.
    pub fn decode_response(
        &self,
        transcoder: &MessageTranscoder<'_>,
        response: &DynamicMessage,
    ) -> Result<Record, CallError> {
        Ok(transcoder.to_native(response, self.state.response)?)
    }

    /// Performs one call through a synchronous transport.
    pub fn invoke_client_side<F>(
        &self,
        transcoder: &MessageTranscoder<'_>,
        args: &Record,
        send: F,
    ) -> Result<Record, CallError>
    where
        F: FnOnce(DynamicMessage) -> Result<DynamicMessage, BoxError>,
    {
        let request = self.encode_request(transcoder, args)?;
        let response = send(request).map_err(CallError::Transport)?;
        self.decode_response(transcoder, &response)
    }
}
