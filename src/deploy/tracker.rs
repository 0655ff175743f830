use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::models::{Deployment, DeploymentId, DeploymentStage, ProjectType};

/// In-memory lifecycle records for deployments started by this process.
#[derive(Clone, Default)]
pub struct DeploymentTracker {
    deployments: Arc<RwLock<HashMap<DeploymentId, Deployment>>>,
}

impl DeploymentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(&self, deployment: Deployment) {
        info!(
            deployment_id = %deployment.id,
            repo = %deployment.repo_name,
            stage = %deployment.stage,
            "deployment started"
        );
        self.deployments
            .write()
            .await
            .insert(deployment.id.clone(), deployment);
    }

    /// Move to `next`. Invalid transitions are logged and ignored; returns
    /// whether the stage changed.
    pub async fn advance(&self, id: &DeploymentId, next: DeploymentStage) -> bool {
        self.transition(id, next, |_| {}).await
    }

    pub async fn set_project_type(&self, id: &DeploymentId, project_type: ProjectType) {
        if let Some(d) = self.deployments.write().await.get_mut(id) {
            d.project_type = Some(project_type);
            d.updated_at = Utc::now();
        }
    }

    pub async fn go_live(&self, id: &DeploymentId, deploy_url: &str) -> bool {
        self.transition(id, DeploymentStage::Live, |d| {
            d.deploy_url = Some(deploy_url.to_string())
        })
        .await
    }

    pub async fn fail(&self, id: &DeploymentId, reason: &str) -> bool {
        self.transition(id, DeploymentStage::Failed, |d| d.error = Some(reason.to_string()))
            .await
    }

    async fn transition(
        &self,
        id: &DeploymentId,
        next: DeploymentStage,
        apply: impl FnOnce(&mut Deployment),
    ) -> bool {
        let mut deployments = self.deployments.write().await;
        let Some(deployment) = deployments.get_mut(id) else {
            return false;
        };
        if !deployment.stage.can_transition_to(next) {
            warn!(
                deployment_id = %id,
                from = %deployment.stage,
                to = %next,
                "ignoring invalid stage transition"
            );
            return false;
        }
        info!(deployment_id = %id, from = %deployment.stage, stage = %next, "stage changed");
        deployment.stage = next;
        deployment.updated_at = Utc::now();
        apply(deployment);
        true
    }

    pub async fn get(&self, id: &DeploymentId) -> Option<Deployment> {
        self.deployments.read().await.get(id).cloned()
    }

    /// All deployments, newest first.
    pub async fn list(&self) -> Vec<Deployment> {
        let mut all: Vec<Deployment> = self.deployments.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn deployment(repo: &str, secs: i64) -> Deployment {
        let at = Utc.timestamp_opt(secs, 0).unwrap();
        Deployment::new(DeploymentId::new(repo, at), "octo", repo, at)
    }

    #[tokio::test]
    async fn test_happy_path_to_live() {
        let tracker = DeploymentTracker::new();
        let d = deployment("demo", 1_700_000_000);
        let id = d.id.clone();
        tracker.start(d).await;

        assert!(tracker.advance(&id, DeploymentStage::Classifying).await);
        tracker.set_project_type(&id, ProjectType::Node).await;
        assert!(tracker.advance(&id, DeploymentStage::Building).await);
        assert!(tracker.advance(&id, DeploymentStage::Publishing).await);
        tracker.go_live(&id, "http://localhost:8000/projects/demo").await;

        let d = tracker.get(&id).await.unwrap();
        assert_eq!(d.stage, DeploymentStage::Live);
        assert_eq!(d.project_type, Some(ProjectType::Node));
        assert_eq!(d.deploy_url.as_deref(), Some("http://localhost:8000/projects/demo"));
        assert!(d.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_is_absorbing() {
        let tracker = DeploymentTracker::new();
        let d = deployment("demo", 1_700_000_000);
        let id = d.id.clone();
        tracker.start(d).await;

        tracker.fail(&id, "failed to clone repository demo: not found").await;
        assert!(!tracker.advance(&id, DeploymentStage::Classifying).await);
        tracker.fail(&id, "second failure").await;

        let d = tracker.get(&id).await.unwrap();
        assert_eq!(d.stage, DeploymentStage::Failed);
        assert_eq!(d.error.as_deref(), Some("failed to clone repository demo: not found"));
    }

    #[tokio::test]
    async fn test_skipping_stages_is_rejected() {
        let tracker = DeploymentTracker::new();
        let d = deployment("demo", 1_700_000_000);
        let id = d.id.clone();
        tracker.start(d).await;
        assert!(!tracker.advance(&id, DeploymentStage::Live).await);
        assert_eq!(tracker.get(&id).await.unwrap().stage, DeploymentStage::Cloning);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let tracker = DeploymentTracker::new();
        tracker.start(deployment("old", 1_700_000_000)).await;
        tracker.start(deployment("new", 1_700_000_100)).await;
        let list = tracker.list().await;
        assert_eq!(list[0].repo_name, "new");
        assert_eq!(list[1].repo_name, "old");
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let tracker = DeploymentTracker::new();
        assert!(tracker.get(&"nope-1".into()).await.is_none());
        assert!(!tracker.advance(&"nope-1".into(), DeploymentStage::Classifying).await);
    }
}
