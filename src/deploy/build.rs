//! Per-type build, install and launch sequences.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

use super::command::{Step, run_required, run_step, spawn_detached};
use super::models::{DeploymentId, ProjectType};
use super::processes::{LaunchedProcess, ProcessRegistry};
use super::publish::ArtifactPublisher;
use crate::config::ShipyardConfig;
use crate::errors::{DeployError, DeployResult};

/// What a build produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Files to copy into the serving root.
    Publish(PathBuf),
    /// A long-lived process now listening on `port`.
    Launched { port: u16, url: String },
}

pub struct BuildOrchestrator {
    config: Arc<ShipyardConfig>,
    publisher: Arc<ArtifactPublisher>,
    processes: ProcessRegistry,
}

impl BuildOrchestrator {
    pub fn new(
        config: Arc<ShipyardConfig>,
        publisher: Arc<ArtifactPublisher>,
        processes: ProcessRegistry,
    ) -> Self {
        Self {
            config,
            publisher,
            processes,
        }
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    /// Build `project_dir` and make the result reachable. Returns the deploy URL.
    ///
    /// `working_dir` is the deployment's transient directory; it is scheduled
    /// for removal once published output has been copied out of it.
    pub async fn build(
        &self,
        project_dir: &Path,
        project_type: ProjectType,
        id: &DeploymentId,
        working_dir: &Path,
    ) -> DeployResult<String> {
        let artifact = self.prepare(project_dir, project_type, id).await?;
        self.finish(artifact, id, working_dir).await
    }

    /// Run the build and launch steps for `project_type`. Nothing is copied
    /// into the serving root yet.
    #[instrument(skip_all, fields(deployment_id = %id, project_type = %project_type))]
    pub async fn prepare(
        &self,
        project_dir: &Path,
        project_type: ProjectType,
        id: &DeploymentId,
    ) -> DeployResult<Artifact> {
        let dir = std::path::absolute(project_dir).map_err(|e| DeployError::io(project_dir, e))?;
        match project_type {
            ProjectType::Node => self.build_node(&dir, id).await,
            ProjectType::Go => self.build_go(&dir, id).await,
            ProjectType::Python => self.build_python(&dir, id).await,
            ProjectType::Static | ProjectType::Unknown => Ok(Artifact::Publish(dir)),
        }
    }

    /// Publish a prepared artifact if it needs publishing. Returns the deploy URL.
    pub async fn finish(
        &self,
        artifact: Artifact,
        id: &DeploymentId,
        working_dir: &Path,
    ) -> DeployResult<String> {
        match artifact {
            Artifact::Publish(source) => {
                let generation = self.publisher.publish_from(&source, id, working_dir).await?;
                Ok(self.config.project_url(generation.name()))
            }
            Artifact::Launched { url, .. } => Ok(url),
        }
    }

    async fn build_node(&self, dir: &Path, id: &DeploymentId) -> DeployResult<Artifact> {
        let limit = self.config.step_timeout();
        let npm = &self.config.build.npm_cmd;

        let serving_path = format!("/projects/{}", id.clean_name());
        let mut vite_base = None;
        if self.config.build.rewrite_homepage {
            match inject_homepage(dir, &serving_path).await {
                Ok(()) => info!(homepage = %serving_path, "set homepage in package.json"),
                Err(e) => warn!(error = %e, "could not set homepage in package.json"),
            }
            // Vite ignores `homepage`; its base comes from the command line.
            if depends_on_vite(dir).await {
                vite_base = Some(format!("--base={}/", serving_path));
            }
        }

        run_required(&Step::new(npm, &["install"]), dir, limit).await?;

        let build = match &vite_base {
            Some(base) => Step::new(npm, &["run", "build", "--", base.as_str()]),
            None => Step::new(npm, &["run", "build"]),
        };
        let out = run_step(&build, dir, limit).await?;
        if !out.success {
            warn!(
                step = %build.label,
                code = ?out.code,
                detail = %out.failure_detail(),
                "build exited nonzero, publishing whatever it produced"
            );
        }

        match super::layout::find_build_dir(dir) {
            Some(build_dir) => info!(build_dir, "found build output"),
            None => warn!("no build output directory, publishing project root"),
        }
        Ok(Artifact::Publish(dir.to_path_buf()))
    }

    async fn build_go(&self, dir: &Path, id: &DeploymentId) -> DeployResult<Artifact> {
        let limit = self.config.step_timeout();
        let go = &self.config.build.go_cmd;
        run_required(&Step::new(go, &["build", "-o", id.as_str()]), dir, limit).await?;

        let binary = dir.join(id.as_str());
        let port = ephemeral_port(self.config.processes.go_base_port);
        let launch = Step::new(&binary.to_string_lossy(), &[])
            .labelled(format!("./{}", id))
            .env("PORT", port.to_string());
        self.launch(&launch, dir, id, ProjectType::Go, port).await
    }

    async fn build_python(&self, dir: &Path, id: &DeploymentId) -> DeployResult<Artifact> {
        let limit = self.config.step_timeout();
        let python = &self.config.build.python_cmd;
        run_required(&Step::new(python, &["-m", "venv", "venv"]), dir, limit).await?;

        let pip = venv_bin(dir, "pip");
        let install = Step::new(&pip.to_string_lossy(), &["install", "-r", "requirements.txt"])
            .labelled("pip install -r requirements.txt");
        run_required(&install, dir, limit).await?;

        let interpreter = venv_bin(dir, "python");
        let port = ephemeral_port(self.config.processes.python_base_port);
        let launch = Step::new(&interpreter.to_string_lossy(), &["app.py"])
            .labelled("python app.py")
            .env("PORT", port.to_string());
        self.launch(&launch, dir, id, ProjectType::Python, port).await
    }

    async fn launch(
        &self,
        step: &Step,
        dir: &Path,
        id: &DeploymentId,
        kind: ProjectType,
        port: u16,
    ) -> DeployResult<Artifact> {
        let child = spawn_detached(step, dir)?;
        let process = LaunchedProcess {
            child,
            kind,
            port,
            started_at: Utc::now(),
        };
        self.processes.register(id.clone(), process).await;
        let url = format!("http://{}:{}", self.config.processes.host, port);
        info!(deployment_id = %id, port, url = %url, "process launched");
        Ok(Artifact::Launched { port, url })
    }
}

/// `base + (unix seconds mod 1000)`. Collisions are possible and only
/// reported by the process registry.
pub fn ephemeral_port(base: u16) -> u16 {
    ephemeral_port_at(base, Utc::now().timestamp())
}

fn ephemeral_port_at(base: u16, unix_secs: i64) -> u16 {
    base.saturating_add(unix_secs.rem_euclid(1000) as u16)
}

fn venv_bin(dir: &Path, tool: &str) -> PathBuf {
    if cfg!(windows) {
        dir.join("venv").join("Scripts").join(tool)
    } else {
        dir.join("venv").join("bin").join(tool)
    }
}

/// Set `homepage` in `package.json` so client routers build links under
/// the serving path.
pub async fn inject_homepage(dir: &Path, serving_path: &str) -> Result<()> {
    let path = dir.join("package.json");
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut pkg: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
    let obj = pkg
        .as_object_mut()
        .with_context(|| format!("{} is not a JSON object", path.display()))?;
    obj.insert(
        "homepage".to_string(),
        serde_json::Value::String(serving_path.to_string()),
    );
    let updated = serde_json::to_string_pretty(&pkg)?;
    tokio::fs::write(&path, updated)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Whether `package.json` in `dir` lists `vite` as a dependency.
pub async fn depends_on_vite(dir: &Path) -> bool {
    let Ok(raw) = tokio::fs::read_to_string(dir.join("package.json")).await else {
        return false;
    };
    let Ok(pkg) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return false;
    };
    ["dependencies", "devDependencies"]
        .iter()
        .any(|section| pkg.get(section).and_then(|deps| deps.get("vite")).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::cleanup::CleanupScheduler;
    use crate::deploy::store::ProjectStore;
    use std::fs;
    use std::time::Duration;

    fn orchestrator(serving: &Path, config: ShipyardConfig) -> BuildOrchestrator {
        let store = Arc::new(ProjectStore::open(serving).unwrap());
        let publisher = Arc::new(ArtifactPublisher::new(
            store,
            CleanupScheduler::new(),
            Duration::from_secs(3600),
        ));
        BuildOrchestrator::new(Arc::new(config), publisher, ProcessRegistry::new())
    }

    #[test]
    fn test_ephemeral_port() {
        assert_eq!(ephemeral_port_at(8000, 1_700_000_123), 8123);
        assert_eq!(ephemeral_port_at(5000, 999), 5999);
        assert_eq!(ephemeral_port_at(5000, 1000), 5000);
        let port = ephemeral_port(8000);
        assert!((8000..9000).contains(&port));
    }

    #[test]
    fn test_venv_bin_layout() {
        let bin = venv_bin(Path::new("/app"), "pip");
        if cfg!(windows) {
            assert!(bin.ends_with("venv/Scripts/pip"));
        } else {
            assert_eq!(bin, PathBuf::from("/app/venv/bin/pip"));
        }
    }

    #[tokio::test]
    async fn test_inject_homepage() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name":"demo","scripts":{"build":"vite build"}}"#,
        )
        .unwrap();
        inject_homepage(dir.path(), "/projects/demo").await.unwrap();

        let raw = fs::read_to_string(dir.path().join("package.json")).unwrap();
        let pkg: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(pkg["homepage"], "/projects/demo");
        assert_eq!(pkg["name"], "demo");
        assert_eq!(pkg["scripts"]["build"], "vite build");
    }

    #[tokio::test]
    async fn test_inject_homepage_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "not json").unwrap();
        assert!(inject_homepage(dir.path(), "/projects/demo").await.is_err());
        assert_eq!(
            fs::read_to_string(dir.path().join("package.json")).unwrap(),
            "not json"
        );
    }

    #[tokio::test]
    async fn test_static_publishes_without_subprocess() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("site-1700000000");
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("index.html"), "<h1>hi</h1>").unwrap();

        let orch = orchestrator(&tmp.path().join("serve"), ShipyardConfig::default());
        let id = DeploymentId::from("site-1700000000");
        let url = orch.build(&work, ProjectType::Static, &id, &work).await.unwrap();
        assert_eq!(url, "http://localhost:8000/projects/site");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_node_build_failure_is_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("app-1");
        fs::create_dir_all(work.join("dist")).unwrap();
        fs::write(work.join("package.json"), "{}").unwrap();
        fs::write(work.join("dist/index.html"), "<html>").unwrap();

        // A stand-in npm: install succeeds, build fails.
        let npm = tmp.path().join("fake-npm");
        fs::write(&npm, "#!/bin/sh\n[ \"$1\" = install ] && exit 0\nexit 1\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&npm, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = ShipyardConfig::default();
        config.build.npm_cmd = npm.to_string_lossy().into_owned();
        let orch = orchestrator(&tmp.path().join("serve"), config);

        let artifact = orch
            .prepare(&work, ProjectType::Node, &"app-1".into())
            .await
            .unwrap();
        assert!(matches!(artifact, Artifact::Publish(_)));
        let raw = fs::read_to_string(work.join("package.json")).unwrap();
        assert!(raw.contains("/projects/app"));
    }

    #[tokio::test]
    async fn test_depends_on_vite() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!depends_on_vite(dir.path()).await);
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies":{"react":"^18"},"devDependencies":{"vite":"^5"}}"#,
        )
        .unwrap();
        assert!(depends_on_vite(dir.path()).await);
        fs::write(dir.path().join("package.json"), r#"{"dependencies":{"react-scripts":"5"}}"#).unwrap();
        assert!(!depends_on_vite(dir.path()).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_vite_build_gets_serving_base() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("app-1");
        fs::create_dir_all(work.join("dist")).unwrap();
        fs::write(work.join("package.json"), r#"{"devDependencies":{"vite":"^5"}}"#).unwrap();
        fs::write(work.join("dist/index.html"), "<html>").unwrap();

        // Records every invocation's arguments.
        let npm = tmp.path().join("fake-npm");
        let log = tmp.path().join("npm-args");
        fs::write(&npm, format!("#!/bin/sh\necho \"$@\" >> '{}'\n", log.display())).unwrap();
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&npm, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = ShipyardConfig::default();
        config.build.npm_cmd = npm.to_string_lossy().into_owned();
        let orch = orchestrator(&tmp.path().join("serve"), config);
        orch.prepare(&work, ProjectType::Node, &"app-1".into())
            .await
            .unwrap();

        let calls = fs::read_to_string(&log).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(calls, vec!["install", "run build -- --base=/projects/app/"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_node_install_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("app-1");
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("package.json"), "{}").unwrap();

        let mut config = ShipyardConfig::default();
        config.build.npm_cmd = "false".to_string();
        let orch = orchestrator(&tmp.path().join("serve"), config);

        let err = orch
            .prepare(&work, ProjectType::Node, &"app-1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::BuildFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_go_compile_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("svc-1");
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("go.mod"), "module svc").unwrap();

        let mut config = ShipyardConfig::default();
        config.build.go_cmd = "false".to_string();
        let orch = orchestrator(&tmp.path().join("serve"), config);

        let err = orch
            .prepare(&work, ProjectType::Go, &"svc-1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::BuildFailed { .. }));
        assert!(orch.processes().is_empty().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_go_launch_registers_process() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("svc-1");
        fs::create_dir_all(&work).unwrap();

        // A stand-in toolchain that "compiles" a shell script into `-o`.
        let go = tmp.path().join("fake-go");
        fs::write(
            &go,
            "#!/bin/sh\nprintf '#!/bin/sh\\nexec sleep 30\\n' > \"$3\"\nchmod +x \"$3\"\n",
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&go, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = ShipyardConfig::default();
        config.build.go_cmd = go.to_string_lossy().into_owned();
        let orch = orchestrator(&tmp.path().join("serve"), config);

        let id = DeploymentId::from("svc-1");
        let artifact = orch.prepare(&work, ProjectType::Go, &id).await.unwrap();
        match artifact {
            Artifact::Launched { port, url } => {
                assert!((8000..9000).contains(&port));
                assert_eq!(url, format!("http://localhost:{}", port));
            }
            other => panic!("Expected Launched, got {:?}", other),
        }
        let list = orch.processes().list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].kind, ProjectType::Go);
        orch.processes().shutdown().await;
    }
}
