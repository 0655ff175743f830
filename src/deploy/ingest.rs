//! Repository ingestion and the deploy pipeline driver.
//!
//! ```text
//! clone ─→ classify ─→ build ─→ (publish) ─→ live
//!   └──────────┴──────────┴─────────┴──────→ failed
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::build::{Artifact, BuildOrchestrator};
use super::classify::classify;
use super::command::{Step, run_step};
use super::models::{Deployment, DeploymentId, DeploymentStage, ProjectType, is_valid_project_name};
use super::proxy::{ProxyRoute, RouteRegistrar};
use super::store::ProjectStore;
use super::tracker::DeploymentTracker;
use crate::config::ShipyardConfig;
use crate::errors::{DeployError, DeployResult};

/// Parameters of a single clone. The credential is opaque and only used to
/// authorize the clone URL.
#[derive(Clone)]
pub struct CloneRequest {
    pub owner: String,
    pub repo_name: String,
    pub credential: String,
}

impl std::fmt::Debug for CloneRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneRequest")
            .field("owner", &self.owner)
            .field("repo_name", &self.repo_name)
            .field("credential", &"***")
            .finish()
    }
}

/// Populates an empty directory with a repository's contents.
#[async_trait]
pub trait RepositoryCloner: Send + Sync {
    async fn fetch_into(&self, request: &CloneRequest, dest: &Path) -> DeployResult<()>;
}

/// Clones over HTTPS with the `git` command line client.
pub struct GitCliCloner {
    git_cmd: String,
    git_host: String,
    timeout: std::time::Duration,
}

impl GitCliCloner {
    pub fn new(config: &ShipyardConfig) -> Self {
        Self {
            git_cmd: config.build.git_cmd.clone(),
            git_host: config.source.git_host.clone(),
            timeout: config.step_timeout(),
        }
    }

    fn clone_url(&self, request: &CloneRequest) -> String {
        format!(
            "https://{}@{}/{}/{}.git",
            request.credential, self.git_host, request.owner, request.repo_name
        )
    }
}

#[async_trait]
impl RepositoryCloner for GitCliCloner {
    async fn fetch_into(&self, request: &CloneRequest, dest: &Path) -> DeployResult<()> {
        let url = self.clone_url(request);
        let dest_arg = dest.to_string_lossy();
        let step = Step::new(&self.git_cmd, &["clone", &url, &dest_arg]).labelled(format!(
            "git clone {}/{}",
            request.owner, request.repo_name
        ));

        let parent = dest.parent().unwrap_or(Path::new("."));
        let out = run_step(&step, parent, self.timeout).await?;
        if !out.success {
            let detail = out.failure_detail().replace(&request.credential, "***");
            return Err(DeployError::CloneFailed {
                repo: request.repo_name.clone(),
                message: detail,
            });
        }
        Ok(())
    }
}

/// Result of a successful deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub deployment_id: DeploymentId,
    pub project_type: ProjectType,
    pub deploy_url: String,
}

/// Drives one deployment through clone, classify, build and publish,
/// recording each stage in the tracker.
pub struct DeployPipeline {
    config: Arc<ShipyardConfig>,
    cloner: Arc<dyn RepositoryCloner>,
    orchestrator: Arc<BuildOrchestrator>,
    store: Arc<ProjectStore>,
    tracker: DeploymentTracker,
    registrar: Arc<dyn RouteRegistrar>,
}

impl DeployPipeline {
    pub fn new(
        config: Arc<ShipyardConfig>,
        cloner: Arc<dyn RepositoryCloner>,
        orchestrator: Arc<BuildOrchestrator>,
        store: Arc<ProjectStore>,
        tracker: DeploymentTracker,
        registrar: Arc<dyn RouteRegistrar>,
    ) -> Self {
        Self {
            config,
            cloner,
            orchestrator,
            store,
            tracker,
            registrar,
        }
    }

    pub fn tracker(&self) -> &DeploymentTracker {
        &self.tracker
    }

    /// Run a full deployment. Any error moves the deployment to `Failed`,
    /// removes its working directory and is returned to the caller.
    #[instrument(skip_all, fields(repo = %request.repo_name, owner = %request.owner))]
    pub async fn deploy(&self, request: CloneRequest) -> DeployResult<DeployOutcome> {
        if !is_valid_project_name(&request.repo_name) {
            return Err(DeployError::InvalidName(request.repo_name.clone()));
        }

        let created_at = Utc::now();
        let id = DeploymentId::new(&request.repo_name, created_at);
        self.tracker
            .start(Deployment::new(id.clone(), &request.owner, &request.repo_name, created_at))
            .await;

        let working_dir = match self.create_working_dir(&id) {
            Ok(dir) => dir,
            Err(e) => {
                self.tracker.fail(&id, &e.to_string()).await;
                return Err(e);
            }
        };

        match self.run(&request, &id, &working_dir).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(deployment_id = %id, error = %e, "deployment failed");
                self.tracker.fail(&id, &e.to_string()).await;
                let dir = working_dir.clone();
                match tokio::task::spawn_blocking(move || std::fs::remove_dir_all(dir)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(io)) if io.kind() == std::io::ErrorKind::NotFound => {}
                    Ok(Err(io)) => warn!(
                        deployment_id = %id,
                        path = %working_dir.display(),
                        error = %io,
                        "failed to remove working directory"
                    ),
                    Err(join) => warn!(
                        deployment_id = %id,
                        error = %join,
                        "working directory removal task failed"
                    ),
                }
                Err(e)
            }
        }
    }

    fn create_working_dir(&self, id: &DeploymentId) -> DeployResult<PathBuf> {
        let root = &self.config.paths.deployments_dir;
        std::fs::create_dir_all(root).map_err(|e| DeployError::io(root, e))?;
        let root = std::path::absolute(root).map_err(|e| DeployError::io(root, e))?;
        let dir = root.join(id.as_str());
        // Fails if the same repository was deployed within the same second.
        std::fs::create_dir(&dir).map_err(|e| DeployError::io(&dir, e))?;
        Ok(dir)
    }

    async fn run(
        &self,
        request: &CloneRequest,
        id: &DeploymentId,
        working_dir: &Path,
    ) -> DeployResult<DeployOutcome> {
        info!(deployment_id = %id, dir = %working_dir.display(), "cloning repository");
        self.cloner.fetch_into(request, working_dir).await?;

        self.tracker.advance(id, DeploymentStage::Classifying).await;
        let root = working_dir.to_path_buf();
        let (project_dir, project_type) = tokio::task::spawn_blocking(move || classify(&root))
            .await
            .unwrap_or_else(|_| (working_dir.to_path_buf(), ProjectType::Unknown));
        self.tracker.set_project_type(id, project_type).await;
        info!(
            deployment_id = %id,
            project_type = %project_type,
            project_dir = %project_dir.display(),
            "classified"
        );

        self.tracker.advance(id, DeploymentStage::Building).await;
        let artifact = self
            .orchestrator
            .prepare(&project_dir, project_type, id)
            .await?;

        let published = matches!(artifact, Artifact::Publish(_));
        if published {
            self.tracker.advance(id, DeploymentStage::Publishing).await;
        }
        let deploy_url = self.orchestrator.finish(artifact, id, working_dir).await?;
        if published {
            self.register_route(&id.clean_name()).await;
        }

        self.tracker.go_live(id, &deploy_url).await;
        info!(deployment_id = %id, url = %deploy_url, "deployment live");
        Ok(DeployOutcome {
            deployment_id: id.clone(),
            project_type,
            deploy_url,
        })
    }

    async fn register_route(&self, project_name: &str) {
        let Some(host) = self.config.proxy.host.as_deref() else {
            return;
        };
        let public = self.store.public_path(project_name);
        let root = std::path::absolute(&public).unwrap_or(public);
        let route = ProxyRoute::new(project_name, host, root);
        if let Err(e) = self.registrar.register(&route).await {
            warn!(project = %project_name, error = %e, "failed to register proxy route");
        }
    }
}
