//! # Remote Service Client
//!
//! Calls the methods of a remote service through the same [`ServiceRuntime`] the service itself
//! is built from: arguments are encoded with the method's request record, sent with
//! [`GrpcClient`], and the response message is decoded back into a native [`Record`].
//!
//! ## Connecting
//!
//! A [`ConnectionDescriptor`] says where the service lives:
//!
//! * `grpc://host:port/service` connects straight to `host:port`.
//! * `discovery://host:port/service` asks a [`Discovery`] (the directory at `host:port`) for one
//!   live endpoint of `service` and connects to it.
//!
//! ## Example
//!
//! ```rust,ignore
//! let descriptor: ConnectionDescriptor = "grpc://localhost:50051/hello_d".parse()?;
//! let mut remote = RemoteService::connect(runtime, &descriptor, None).await?;
//! let response = remote.call("echo_with_increment_one", args, vec![]).await?;
//! ```
pub mod discovery;

pub use discovery::{Directory, Discovery, DiscoveryError, ServiceEndpoint};

use crate::BoxError;
use crate::config::FrogConfig;
use crate::grpc::client::{GrpcClient, GrpcRequestError};
use crate::method::CallError;
use crate::runtime::ServiceRuntime;
use crate::value::{NativeType, Record, Value};
use http_body::Body as HttpBody;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Errors that can occur when connecting to a remote service.
#[derive(Debug, thiserror::Error)]
pub enum ClientConnectError {
    #[error("Invalid connection descriptor '{0}'")]
    InvalidDescriptor(String),
    #[error("A discovery backend is required to connect to '{0}'")]
    MissingDiscovery(String),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Failed to connect to '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
}

/// Errors that can occur during a remote call.
#[derive(Debug, thiserror::Error)]
pub enum RemoteCallError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Request(#[from] GrpcRequestError),
    #[error("Server returned an error: {0}")]
    Status(#[from] tonic::Status),
    #[error("Method '{0}' has no route in the compiled schema")]
    MissingRoute(String),
}

/// How a [`ConnectionDescriptor`] reaches its service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Direct,
    Discovery,
}

impl Driver {
    fn scheme(self) -> &'static str {
        match self {
            Driver::Direct => "grpc",
            Driver::Discovery => "discovery",
        }
    }
}

/// Where a remote service lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub driver: Driver,
    pub host: String,
    pub port: u16,
    pub service: String,
}

impl ConnectionDescriptor {
    pub fn direct(host: impl Into<String>, port: u16, service: impl Into<String>) -> Self {
        Self {
            driver: Driver::Direct,
            host: host.into(),
            port,
            service: service.into(),
        }
    }

    pub fn discovery(host: impl Into<String>, port: u16, service: impl Into<String>) -> Self {
        Self {
            driver: Driver::Discovery,
            ..Self::direct(host, port, service)
        }
    }

    /// The endpoint to open a channel to, resolving it through `discovery` when needed.
    pub fn resolve(
        &self,
        discovery: Option<&dyn Discovery>,
    ) -> Result<ServiceEndpoint, ClientConnectError> {
        match self.driver {
            Driver::Direct => Ok(ServiceEndpoint::new(self.host.clone(), self.port)),
            Driver::Discovery => {
                let discovery =
                    discovery.ok_or_else(|| ClientConnectError::MissingDiscovery(self.to_string()))?;
                Ok(discovery.resolve(&self.service)?)
            }
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.driver.scheme(),
            self.host,
            self.port,
            self.service
        )
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = ClientConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientConnectError::InvalidDescriptor(s.to_string());

        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        let driver = match scheme {
            "grpc" => Driver::Direct,
            "discovery" => Driver::Discovery,
            _ => return Err(invalid()),
        };

        let (authority, service) = rest.split_once('/').ok_or_else(invalid)?;
        let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse().map_err(|_| invalid())?;

        if host.is_empty() || service.is_empty() || service.contains('/') {
            return Err(invalid());
        }

        Ok(Self {
            driver,
            host: host.to_string(),
            port,
            service: service.to_string(),
        })
    }
}

/// Calls the methods of a remote service.
#[derive(Debug, Clone)]
pub struct RemoteService<S = Channel> {
    runtime: Arc<ServiceRuntime>,
    client: GrpcClient<S>,
}

impl RemoteService<Channel> {
    /// Opens a channel to the service described by `descriptor`.
    pub async fn connect(
        runtime: Arc<ServiceRuntime>,
        descriptor: &ConnectionDescriptor,
        discovery: Option<&dyn Discovery>,
    ) -> Result<Self, ClientConnectError> {
        let addr = descriptor.resolve(discovery)?.uri();
        debug!(descriptor = %descriptor, addr = %addr, "Connecting to remote service");

        let endpoint =
            Endpoint::new(addr.clone()).map_err(|e| ClientConnectError::InvalidUrl(addr.clone(), e))?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ClientConnectError::ConnectionFailed(addr, e))?;

        Ok(Self::from_service(runtime, channel))
    }
}

impl<S> RemoteService<S>
where
    S: tonic::client::GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a client from an existing Tonic service/channel.
    pub fn from_service(runtime: Arc<ServiceRuntime>, service: S) -> Self {
        Self {
            client: GrpcClient::new(service),
            runtime,
        }
    }

    /// Like [`RemoteService::from_service`], with the message size limit of `config`.
    pub fn with_config(runtime: Arc<ServiceRuntime>, service: S, config: &FrogConfig) -> Self {
        Self {
            client: GrpcClient::with_max_message_length(service, config.max_message_length),
            runtime,
        }
    }

    pub fn runtime(&self) -> &Arc<ServiceRuntime> {
        &self.runtime
    }

    /// Calls `method` with native arguments and decodes the response record.
    pub async fn call(
        &mut self,
        method: &str,
        args: Record,
        headers: Vec<(String, String)>,
    ) -> Result<Record, RemoteCallError> {
        let binding = self.runtime.method(method)?;
        let route = self
            .runtime
            .route(method)
            .ok_or_else(|| RemoteCallError::MissingRoute(method.to_string()))?;
        let transcoder = self.runtime.transcoder();

        let request = binding.encode_request(&transcoder, &args)?;
        let response = self
            .client
            .unary(route.descriptor(), request, headers)
            .await??;

        Ok(binding.decode_response(&transcoder, &response)?)
    }

    /// Like [`RemoteService::call`], converting the response into `T`.
    pub async fn call_as<T: NativeType>(
        &mut self,
        method: &str,
        args: Record,
        headers: Vec<(String, String)>,
    ) -> Result<T, RemoteCallError> {
        let record = self.call(method, args, headers).await?;
        T::from_value(Value::Record(record)).map_err(|err| CallError::from(err).into())
    }
}
