use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::models::{DeploymentId, ProjectType};

/// A long-lived process launched for a Go or Python deployment.
pub struct LaunchedProcess {
    pub child: tokio::process::Child,
    pub kind: ProjectType,
    pub port: u16,
    pub started_at: DateTime<Utc>,
}

/// Serializable view of a registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub deployment_id: DeploymentId,
    pub kind: ProjectType,
    pub pid: Option<u32>,
    pub port: u16,
    pub started_at: DateTime<Utc>,
}

/// Owns the handles of every launched process so they can be listed and
/// terminated. Processes are never supervised or restarted.
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    processes: Arc<Mutex<HashMap<DeploymentId, LaunchedProcess>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a launched process. Returns the deployment already holding
    /// `process.port`, if any; the collision is logged but not prevented.
    pub async fn register(&self, id: DeploymentId, process: LaunchedProcess) -> Option<DeploymentId> {
        let mut processes = self.processes.lock().await;
        let clash = processes
            .iter()
            .find(|(_, p)| p.port == process.port)
            .map(|(other, _)| other.clone());
        if let Some(ref other) = clash {
            warn!(
                deployment_id = %id,
                other = %other,
                port = process.port,
                "port already assigned to another launched process"
            );
        }
        info!(
            deployment_id = %id,
            pid = ?process.child.id(),
            port = process.port,
            kind = %process.kind,
            "registered launched process"
        );
        processes.insert(id, process);
        clash
    }

    pub async fn list(&self) -> Vec<ProcessInfo> {
        let processes = self.processes.lock().await;
        let mut infos: Vec<ProcessInfo> = processes
            .iter()
            .map(|(id, p)| ProcessInfo {
                deployment_id: id.clone(),
                kind: p.kind,
                pid: p.child.id(),
                port: p.port,
                started_at: p.started_at,
            })
            .collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }

    pub async fn len(&self) -> usize {
        self.processes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Kill and forget one process. Returns false if it was not registered.
    pub async fn terminate(&self, id: &DeploymentId) -> bool {
        let removed = self.processes.lock().await.remove(id);
        match removed {
            Some(mut process) => {
                if let Err(e) = process.child.kill().await {
                    warn!(deployment_id = %id, error = %e, "failed to kill launched process");
                }
                true
            }
            None => false,
        }
    }

    /// Kill every registered process.
    pub async fn shutdown(&self) {
        let mut processes = self.processes.lock().await;
        for (id, mut process) in processes.drain() {
            info!(deployment_id = %id, "stopping launched process");
            if let Err(e) = process.child.kill().await {
                warn!(deployment_id = %id, error = %e, "failed to kill launched process");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sleeper() -> tokio::process::Child {
        tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    fn launched(port: u16) -> LaunchedProcess {
        LaunchedProcess {
            child: sleeper(),
            kind: ProjectType::Go,
            port,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = ProcessRegistry::new();
        assert!(registry.is_empty().await);
        let clash = registry.register("api-1".into(), launched(8123)).await;
        assert!(clash.is_none());

        let list = registry.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].deployment_id.as_str(), "api-1");
        assert_eq!(list[0].port, 8123);
        assert!(list[0].pid.is_some());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_port_clash_is_reported() {
        let registry = ProcessRegistry::new();
        registry.register("a-1".into(), launched(8500)).await;
        let clash = registry.register("b-1".into(), launched(8500)).await;
        assert_eq!(clash.map(|c| c.as_str().to_string()), Some("a-1".to_string()));
        assert_eq!(registry.len().await, 2);
        registry.shutdown().await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_terminate() {
        let registry = ProcessRegistry::new();
        registry.register("a-1".into(), launched(8600)).await;
        assert!(registry.terminate(&"a-1".into()).await);
        assert!(!registry.terminate(&"a-1".into()).await);
        assert!(registry.is_empty().await);
    }
}
