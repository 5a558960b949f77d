//! # Dynamic gRPC Server
//!
//! [`FrogServer`] exposes a [`ServiceRuntime`] as a `tower` service, the same shape `tonic`
//! generates for a compiled service, except that the dispatch table is built at run time from
//! the runtime's routes.
//!
//! ## How it works
//!
//! 1. The request path selects a route. Unknown paths answer `UNIMPLEMENTED`.
//! 2. The body is decoded with [`DynamicCodec`] using the method's request descriptor.
//! 3. The method binding runs on tokio's blocking pool, since business handlers are synchronous.
//! 4. The response message is encoded back, or the [`CallError`] is mapped to a [`Status`].
use super::codec::DynamicCodec;
use crate::config::FrogConfig;
use crate::method::{CallError, RpcContext};
use crate::runtime::ServiceRuntime;
use prost_reflect::DynamicMessage;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;
use tonic::Status;
use tonic::codegen::{Body, BoxFuture, Context, Poll, Service, StdError, http};
use tonic::server::{NamedService, UnaryService};

impl From<CallError> for Status {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Conversion(err) => Status::invalid_argument(err.to_string()),
            CallError::NotServable(_) | CallError::MethodNotFound(_) => {
                Status::unimplemented(err.to_string())
            }
            CallError::Handler(source) | CallError::ExtraField { source, .. } => {
                match source.downcast_ref::<Status>() {
                    Some(status) => status.clone(),
                    None => Status::internal(source.to_string()),
                }
            }
            CallError::UnhandledExtraField(_) => Status::internal(err.to_string()),
            CallError::Transport(_) => Status::unavailable(err.to_string()),
        }
    }
}

/// Serves every method of a [`ServiceRuntime`].
#[derive(Debug, Clone)]
pub struct FrogServer {
    runtime: Arc<ServiceRuntime>,
    max_decoding_message_size: Option<usize>,
    max_encoding_message_size: Option<usize>,
}

impl FrogServer {
    pub fn new(runtime: Arc<ServiceRuntime>) -> Self {
        Self::with_config(runtime, &FrogConfig::default())
    }

    pub fn with_config(runtime: Arc<ServiceRuntime>, config: &FrogConfig) -> Self {
        Self {
            runtime,
            max_decoding_message_size: Some(config.max_message_length),
            max_encoding_message_size: Some(config.max_message_length),
        }
    }

    /// Limits the size of a decoded request.
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.max_decoding_message_size = Some(limit);
        self
    }

    /// Limits the size of an encoded response.
    pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
        self.max_encoding_message_size = Some(limit);
        self
    }

    pub fn runtime(&self) -> &Arc<ServiceRuntime> {
        &self.runtime
    }

    /// Gives the server the compile-time name `tonic`'s router needs.
    pub fn named<N: ServiceName>(self) -> Named<N> {
        Named {
            server: self,
            _name: PhantomData,
        }
    }
}

struct MethodSvc {
    runtime: Arc<ServiceRuntime>,
    method: String,
}

impl UnaryService<DynamicMessage> for MethodSvc {
    type Response = DynamicMessage;
    type Future = BoxFuture<tonic::Response<Self::Response>, Status>;

    fn call(&mut self, request: tonic::Request<DynamicMessage>) -> Self::Future {
        let runtime = Arc::clone(&self.runtime);
        let method = self.method.clone();

        let fut = async move {
            let (metadata, _, message) = request.into_parts();
            let result = tokio::task::spawn_blocking(move || {
                let mut ctx = RpcContext::new(method.as_str()).with_metadata(metadata);
                runtime.invoke(&method, &message, &mut ctx)
            })
            .await
            .map_err(|e| Status::internal(format!("Method handler panicked: {e}")))?;

            result.map(tonic::Response::new).map_err(Status::from)
        };
        Box::pin(fut)
    }
}

impl<B> Service<http::Request<B>> for FrogServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let Some(route) = self.runtime.route_by_path(req.uri().path()) else {
            let status = Status::unimplemented(format!("Unknown method '{}'", req.uri().path()));
            return Box::pin(async move { Ok(status.into_http()) });
        };

        let svc = MethodSvc {
            runtime: Arc::clone(&self.runtime),
            method: route.method().to_string(),
        };
        let codec = DynamicCodec::new(route.descriptor().input());
        let max_decoding_message_size = self.max_decoding_message_size;
        let max_encoding_message_size = self.max_encoding_message_size;

        let fut = async move {
            let mut grpc = tonic::server::Grpc::new(codec)
                .apply_max_message_size_config(max_decoding_message_size, max_encoding_message_size);
            let res = grpc.unary(svc, req).await;
            Ok(res)
        };
        Box::pin(fut)
    }
}

/// Compile-time identity of a served service.
pub trait ServiceName: Send + Sync + 'static {
    /// `<package>.<service>`, as in the compiled schema.
    const NAME: &'static str;
}

/// A [`FrogServer`] with a static service name, accepted by `tonic::transport::Server`.
pub struct Named<N> {
    server: FrogServer,
    _name: PhantomData<fn() -> N>,
}

impl<N> Clone for Named<N> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
            _name: PhantomData,
        }
    }
}

impl<N: ServiceName> NamedService for Named<N> {
    const NAME: &'static str = N::NAME;
}

impl<N, B> Service<http::Request<B>> for Named<N>
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Service::<http::Request<B>>::poll_ready(&mut self.server, cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        self.server.call(req)
    }
}
