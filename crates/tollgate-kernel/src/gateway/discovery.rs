//! Service discovery: kernel contract.
//!
//! A [`ServiceDiscovery`] collaborator may supply a backend's base URL at
//! request time in place of the static `target` from the route table.
//! Registry-backed implementations (Consul, etcd, …) live outside this
//! workspace; [`StaticServiceDiscovery`] covers single-node deployments and
//! tests.

use async_trait::async_trait;
use std::collections::HashMap;

/// Kernel contract for dynamic backend address resolution.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Return the current base URL for `backend`, or `None` to fall back to
    /// the route's static target.
    async fn resolve(&self, backend: &str) -> Option<String>;
}

/// [`ServiceDiscovery`] backed by a fixed `HashMap`.
#[derive(Debug, Default, Clone)]
pub struct StaticServiceDiscovery {
    store: HashMap<String, String>,
}

impl StaticServiceDiscovery {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: map `backend` to `base_url`.
    pub fn with_backend(mut self, backend: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.store.insert(backend.into(), base_url.into());
        self
    }
}

#[async_trait]
impl ServiceDiscovery for StaticServiceDiscovery {
    async fn resolve(&self, backend: &str) -> Option<String> {
        self.store.get(backend).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_known_backends_only() {
        let discovery = StaticServiceDiscovery::new().with_backend("users", "http://10.0.0.7:8080");
        assert_eq!(
            discovery.resolve("users").await.as_deref(),
            Some("http://10.0.0.7:8080")
        );
        assert!(discovery.resolve("orders").await.is_none());
    }
}
