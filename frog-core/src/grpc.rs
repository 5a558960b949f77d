//! # Dynamic gRPC Transport
//!
//! The low-level building blocks that carry wire messages over gRPC.
//!
//! Unlike standard `tonic` services, which are strongly typed by generated code, the
//! components here work with [`prost_reflect::DynamicMessage`] and resolve message layouts
//! from the compiled schema at run time.
//!
//! * [`codec::DynamicCodec`]: a `tonic` codec for dynamic messages.
//! * [`client::GrpcClient`]: performs unary calls against any service.
//! * [`server::FrogServer`]: serves a [`crate::runtime::ServiceRuntime`] as a `tower` service.
pub mod client;
pub mod codec;
pub mod server;
