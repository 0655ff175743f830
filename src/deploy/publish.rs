//! Relocates build output into the permanent serving root.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use super::cleanup::CleanupScheduler;
use super::layout::{find_build_dir, is_skipped_dir};
use super::models::DeploymentId;
use super::store::{Generation, ProjectStore};
use crate::errors::{DeployError, DeployResult};

pub struct ArtifactPublisher {
    store: Arc<ProjectStore>,
    cleanup: CleanupScheduler,
    grace: Duration,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<ProjectStore>, cleanup: CleanupScheduler, grace: Duration) -> Self {
        Self {
            store,
            cleanup,
            grace,
        }
    }

    pub fn store(&self) -> &Arc<ProjectStore> {
        &self.store
    }

    /// Publish `source_dir` under the clean name of `id` and schedule removal
    /// of `source_dir`.
    pub async fn publish(&self, source_dir: &Path, id: &DeploymentId) -> DeployResult<Arc<Generation>> {
        self.publish_from(source_dir, id, source_dir).await
    }

    /// Publish `source_dir` under the clean name of `id`, then schedule
    /// removal of `working_dir` (which may be an ancestor of `source_dir`).
    ///
    /// The first build-output directory found is copied under its own name;
    /// otherwise the whole tree is copied, minus `node_modules` and `.git`.
    /// The new tree becomes visible to readers only once fully copied.
    #[instrument(skip_all, fields(deployment_id = %id))]
    pub async fn publish_from(
        &self,
        source_dir: &Path,
        id: &DeploymentId,
        working_dir: &Path,
    ) -> DeployResult<Arc<Generation>> {
        let name = id.clean_name();
        let staged = self.store.stage(&name)?;

        let (from, to) = match find_build_dir(source_dir) {
            Some(build_dir) => {
                debug!(project = %name, build_dir, "copying build output");
                (source_dir.join(build_dir), staged.root().join(build_dir))
            }
            None => {
                debug!(project = %name, "no build output directory, copying whole tree");
                (source_dir.to_path_buf(), staged.root().to_path_buf())
            }
        };

        let copied = tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(|e| DeployError::publish(source_dir, std::io::Error::other(e)))??;

        let generation = self.store.commit(staged);
        info!(
            project = %name,
            generation = generation.number(),
            files = copied,
            "published"
        );

        self.cleanup
            .schedule(&name, working_dir.to_path_buf(), self.grace);
        Ok(generation)
    }
}

/// Recursively copy `from` into `to`, skipping `node_modules` and `.git` at
/// every level. Symlinks are not followed or copied. Returns the number of
/// files copied.
pub fn copy_tree(from: &Path, to: &Path) -> DeployResult<usize> {
    let mut copied = 0;
    let walker = WalkDir::new(from)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir() && is_skipped_dir(&e.file_name().to_string_lossy()))
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| from.to_path_buf());
            DeployError::publish(path, e.into())
        })?;
        let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target: PathBuf = to.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| DeployError::publish(&target, e))?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target).map_err(|e| DeployError::publish(&target, e))?;
            copied += 1;
        } else {
            debug!(path = %entry.path().display(), "skipping non-regular file");
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn publisher(serving: &Path) -> ArtifactPublisher {
        let store = Arc::new(ProjectStore::open(serving).unwrap());
        ArtifactPublisher::new(store, CleanupScheduler::new(), Duration::from_secs(3600))
    }

    #[test]
    fn test_copy_tree_skips_dependency_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("index.html"), "<html>");
        write(&src.join("node_modules/react/index.js"), "x");
        write(&src.join(".git/HEAD"), "ref");
        write(&src.join("pages/node_modules/left-pad.js"), "x");
        write(&src.join("pages/about.html"), "about");

        let dst = tmp.path().join("dst");
        let copied = copy_tree(&src, &dst).unwrap();
        assert_eq!(copied, 2);
        assert!(dst.join("index.html").is_file());
        assert!(dst.join("pages/about.html").is_file());
        assert!(!dst.join("node_modules").exists());
        assert!(!dst.join(".git").exists());
        assert!(!dst.join("pages/node_modules").exists());
    }

    #[tokio::test]
    async fn test_publish_copies_build_dir_only() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work/demo-1700000000");
        write(&work.join("package.json"), "{}");
        write(&work.join("src/main.jsx"), "src");
        write(&work.join("dist/index.html"), "<html>");
        write(&work.join("dist/assets/index-XYZ.js"), "js");

        let publisher = publisher(&tmp.path().join("serve"));
        let id = DeploymentId::from("demo-1700000000");
        let generation = publisher.publish(&work, &id).await.unwrap();

        assert_eq!(generation.name(), "demo");
        assert!(generation.root().join("dist/index.html").is_file());
        assert!(generation.root().join("dist/assets/index-XYZ.js").is_file());
        assert!(!generation.root().join("src").exists());
        assert!(!generation.root().join("package.json").exists());
    }

    #[tokio::test]
    async fn test_publish_without_build_dir_copies_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("site-1");
        write(&work.join("index.html"), "<html>");
        write(&work.join("node_modules/x.js"), "x");

        let publisher = publisher(&tmp.path().join("serve"));
        let generation = publisher.publish(&work, &"site-1".into()).await.unwrap();
        assert!(generation.root().join("index.html").is_file());
        assert!(!generation.root().join("node_modules").exists());
    }

    #[tokio::test]
    async fn test_republish_replaces_files() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("demo-1");
        write(&a.join("dist/index.html"), "A");
        write(&a.join("dist/only-a.txt"), "A");
        let b = tmp.path().join("demo-2");
        write(&b.join("dist/index.html"), "B");

        let publisher = publisher(&tmp.path().join("serve"));
        publisher.publish(&a, &"demo-1".into()).await.unwrap();
        publisher.publish(&b, &"demo-2".into()).await.unwrap();

        let current = publisher.store().current("demo").unwrap();
        assert_eq!(fs::read_to_string(current.root().join("dist/index.html")).unwrap(), "B");
        assert!(!current.root().join("dist/only-a.txt").exists());
    }

    #[tokio::test]
    async fn test_publish_rejects_unsafe_name() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("w");
        write(&work.join("index.html"), "x");
        let publisher = publisher(&tmp.path().join("serve"));
        let err = publisher.publish(&work, &".hidden-1".into()).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidName(_)));
    }
}
