//! Reverse-proxy route registration.
//!
//! Shipyard does not talk to a proxy itself; it hands a [`ProxyRoute`] to a
//! [`RouteRegistrar`] after each successful publish.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// A `{project}.{host}` route pointing at a published directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRoute {
    pub project_name: String,
    pub host_pattern: String,
    /// Absolute filesystem path of the published project.
    pub root: PathBuf,
}

impl ProxyRoute {
    pub fn new(project_name: &str, proxy_host: &str, root: PathBuf) -> Self {
        Self {
            project_name: project_name.to_string(),
            host_pattern: format!("{}.{}", project_name, proxy_host),
            root,
        }
    }
}

#[async_trait]
pub trait RouteRegistrar: Send + Sync {
    async fn register(&self, route: &ProxyRoute) -> anyhow::Result<()>;
}

/// Registrar that only records the route in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRegistrar;

#[async_trait]
impl RouteRegistrar for LoggingRegistrar {
    async fn register(&self, route: &ProxyRoute) -> anyhow::Result<()> {
        info!(
            project = %route.project_name,
            host = %route.host_pattern,
            root = %route.root.display(),
            "proxy route ready"
        );
        Ok(())
    }
}
