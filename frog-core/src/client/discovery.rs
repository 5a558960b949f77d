//! # Service Discovery
//!
//! A [`Discovery`] resolves a service name to one live endpoint. [`Directory`] is an in-memory
//! implementation: services publish their endpoints into it and clients pick one at random among
//! the endpoints currently registered for the service they call.
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("No endpoint registered for service '{0}'")]
    NoEndpoint(String),
}

/// A `host:port` pair serving one service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// URI of the endpoint for a plaintext HTTP/2 channel.
    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolves service names to endpoints.
pub trait Discovery: Send + Sync {
    fn resolve(&self, service: &str) -> Result<ServiceEndpoint, DiscoveryError>;
}

/// In-memory service directory.
#[derive(Debug, Default)]
pub struct Directory {
    services: RwLock<HashMap<String, Vec<ServiceEndpoint>>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an endpoint. Registering the same endpoint twice has no effect.
    pub fn register(&self, service: impl Into<String>, endpoint: ServiceEndpoint) {
        let service = service.into();
        let mut services = self.services.write();
        let endpoints = services.entry(service.clone()).or_default();

        if !endpoints.contains(&endpoint) {
            debug!(service = %service, endpoint = %endpoint, "Registered endpoint");
            endpoints.push(endpoint);
        }
    }

    /// Withdraws an endpoint. Returns whether it was registered.
    pub fn deregister(&self, service: &str, endpoint: &ServiceEndpoint) -> bool {
        let mut services = self.services.write();
        let Some(endpoints) = services.get_mut(service) else {
            return false;
        };

        let before = endpoints.len();
        endpoints.retain(|e| e != endpoint);
        let removed = endpoints.len() != before;

        if endpoints.is_empty() {
            services.remove(service);
        }
        if removed {
            debug!(service = %service, endpoint = %endpoint, "Deregistered endpoint");
        }
        removed
    }

    pub fn endpoints(&self, service: &str) -> Vec<ServiceEndpoint> {
        self.services
            .read()
            .get(service)
            .cloned()
            .unwrap_or_default()
    }
}

impl Discovery for Directory {
    fn resolve(&self, service: &str) -> Result<ServiceEndpoint, DiscoveryError> {
        let services = self.services.read();
        services
            .get(service)
            .and_then(|endpoints| endpoints.choose(&mut rand::thread_rng()))
            .cloned()
            .ok_or_else(|| DiscoveryError::NoEndpoint(service.to_string()))
    }
}
