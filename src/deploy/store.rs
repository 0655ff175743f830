//! Generation-based storage for published projects.
//!
//! Each publish writes into a fresh `.generations/{name}-{generation}`
//! directory. Once the copy is complete the in-memory pointer for `name` is
//! swapped to the new generation in one step, so readers see either the old
//! tree or the new one, never a mix. A superseded generation is deleted when
//! the last reader holding it lets go.
//!
//! On unix `{serving_dir}/{name}` is kept as a symlink to the current
//! generation, giving external consumers a stable path.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, info, warn};

use super::models::is_valid_project_name;
use crate::errors::{DeployError, DeployResult};

/// Directory under the serving root that holds every generation.
pub const GENERATIONS_DIR: &str = ".generations";

/// Lock file held by the one process that owns a serving root.
pub const LOCK_FILE: &str = ".shipyard.lock";

/// One immutable published tree.
#[derive(Debug)]
pub struct Generation {
    name: String,
    number: u64,
    root: PathBuf,
    retired: AtomicBool,
}

impl Generation {
    /// Serving key (clean project name).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// Directory holding the published files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    fn keep(&self) {
        self.retired.store(false, Ordering::SeqCst);
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::SeqCst) {
            return;
        }
        let (name, number, root) = (self.name.clone(), self.number, std::mem::take(&mut self.root));
        // The last holder is often a request or publish task.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_generation_dir(&name, number, &root));
            }
            Err(_) => remove_generation_dir(&name, number, &root),
        }
    }
}

fn remove_generation_dir(name: &str, number: u64, root: &Path) {
    match std::fs::remove_dir_all(root) {
        Ok(()) => debug!(project = %name, generation = number, "removed superseded generation"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            project = %name,
            generation = number,
            error = %e,
            "failed to remove superseded generation"
        ),
    }
}

/// A generation being populated. It starts out retired, so dropping it
/// without committing removes the partial directory.
#[derive(Debug)]
pub struct StagedGeneration {
    generation: Arc<Generation>,
}

impl StagedGeneration {
    pub fn root(&self) -> &Path {
        self.generation.root()
    }

    pub fn number(&self) -> u64 {
        self.generation.number
    }
}

/// Name-addressed store of published projects.
#[derive(Debug)]
pub struct ProjectStore {
    serving_dir: PathBuf,
    generations_dir: PathBuf,
    current: RwLock<HashMap<String, Arc<Generation>>>,
    last_generation: AtomicU64,
    /// Exclusive lock on the serving root; `None` for read-only stores.
    _owner_lock: Option<File>,
}

impl ProjectStore {
    /// Open (creating if needed) the serving root and recover the newest
    /// generation of every project. Older generations and legacy plain
    /// directories are folded into the generation layout.
    ///
    /// The store takes an exclusive lock on the root for its lifetime; a
    /// second owner, in this process or another, gets [`DeployError::StoreLocked`].
    pub fn open(serving_dir: impl Into<PathBuf>) -> DeployResult<Self> {
        let serving_dir = serving_dir.into();
        let generations_dir = serving_dir.join(GENERATIONS_DIR);
        std::fs::create_dir_all(&generations_dir)
            .map_err(|e| DeployError::io(&generations_dir, e))?;
        let lock = lock_root(&serving_dir)?;

        let store = Self {
            serving_dir,
            generations_dir,
            current: RwLock::new(HashMap::new()),
            last_generation: AtomicU64::new(0),
            _owner_lock: Some(lock),
        };
        store.adopt_legacy_dirs()?;
        store.recover(true)?;
        Ok(store)
    }

    /// Load the newest generation of every project without modifying the
    /// serving root. For reading a root owned by a running server.
    pub fn inspect(serving_dir: impl Into<PathBuf>) -> DeployResult<Self> {
        let serving_dir = serving_dir.into();
        let generations_dir = serving_dir.join(GENERATIONS_DIR);
        let store = Self {
            serving_dir,
            generations_dir,
            current: RwLock::new(HashMap::new()),
            last_generation: AtomicU64::new(0),
            _owner_lock: None,
        };
        if store.generations_dir.is_dir() {
            store.recover(false)?;
        }
        Ok(store)
    }

    pub fn serving_dir(&self) -> &Path {
        &self.serving_dir
    }

    /// Stable path external consumers should use for `name`.
    pub fn public_path(&self, name: &str) -> PathBuf {
        self.serving_dir.join(name)
    }

    /// Current generation for `name`, held for the duration of a read.
    pub fn current(&self, name: &str) -> Option<Arc<Generation>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All current generations, sorted by name.
    pub fn list(&self) -> Vec<Arc<Generation>> {
        let mut all: Vec<Arc<Generation>> = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Create an empty directory for a new generation of `name`.
    pub fn stage(&self, name: &str) -> DeployResult<StagedGeneration> {
        if !is_valid_project_name(name) {
            return Err(DeployError::InvalidName(name.to_string()));
        }
        let number = self.allocate_generation();
        let root = self.generations_dir.join(format!("{}-{}", name, number));
        std::fs::create_dir_all(&root).map_err(|e| DeployError::publish(&root, e))?;
        debug!(project = %name, generation = number, "staged generation");
        Ok(StagedGeneration {
            generation: Arc::new(Generation {
                name: name.to_string(),
                number,
                root,
                retired: AtomicBool::new(true),
            }),
        })
    }

    /// Make a staged generation current. The previous generation is retired
    /// and deleted once no reader holds it. If a newer generation was
    /// committed concurrently, the staged one loses and is discarded.
    pub fn commit(&self, staged: StagedGeneration) -> Arc<Generation> {
        let generation = staged.generation;

        let previous = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = current.get(&generation.name)
                && existing.number > generation.number
            {
                warn!(
                    project = %generation.name,
                    generation = generation.number,
                    newer = existing.number,
                    "discarding generation superseded before commit"
                );
                return Arc::clone(existing);
            }
            generation.keep();
            self.point_link(&generation);
            current.insert(generation.name.clone(), Arc::clone(&generation))
        };

        if let Some(previous) = previous {
            previous.retire();
        }
        info!(project = %generation.name, generation = generation.number, "published generation is live");
        generation
    }

    fn allocate_generation(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let prev = self
            .last_generation
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_default();
        now.max(prev + 1)
    }

    #[cfg(unix)]
    fn point_link(&self, generation: &Generation) {
        let link = self.public_path(&generation.name);
        let tmp = self
            .serving_dir
            .join(format!(".{}.{}.link", generation.name, generation.number));
        let target = Path::new(GENERATIONS_DIR)
            .join(format!("{}-{}", generation.name, generation.number));

        let result = std::os::unix::fs::symlink(&target, &tmp)
            .and_then(|()| std::fs::rename(&tmp, &link));
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            warn!(link = %link.display(), error = %e, "failed to update project link");
        }
    }

    #[cfg(not(unix))]
    fn point_link(&self, _generation: &Generation) {}

    /// Move plain project directories left by older layouts into generations.
    fn adopt_legacy_dirs(&self) -> DeployResult<()> {
        let entries = std::fs::read_dir(&self.serving_dir)
            .map_err(|e| DeployError::io(&self.serving_dir, e))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if name.starts_with('.') {
                if file_type.is_symlink() {
                    let _ = std::fs::remove_file(entry.path());
                }
                continue;
            }
            if !file_type.is_dir() || !is_valid_project_name(&name) {
                continue;
            }
            let number = self.allocate_generation();
            let target = self.generations_dir.join(format!("{}-{}", name, number));
            std::fs::rename(entry.path(), &target).map_err(|e| DeployError::io(entry.path(), e))?;
            info!(project = %name, generation = number, "adopted legacy project directory");
        }
        Ok(())
    }

    /// Make the newest generation per project current. With `prune`, older
    /// generations are deleted and project links refreshed.
    fn recover(&self, prune: bool) -> DeployResult<()> {
        let entries = std::fs::read_dir(&self.generations_dir)
            .map_err(|e| DeployError::io(&self.generations_dir, e))?;

        let mut found: HashMap<String, Vec<(u64, PathBuf)>> = HashMap::new();
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            match parse_generation_dir(&dir_name) {
                Some((name, number)) => found
                    .entry(name.to_string())
                    .or_default()
                    .push((number, entry.path())),
                None => warn!(dir = %dir_name, "ignoring unrecognised generation directory"),
            }
        }

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        for (name, mut generations) in found {
            generations.sort_by_key(|(number, _)| *number);
            let Some((number, root)) = generations.pop() else {
                continue;
            };
            if prune {
                for (old, path) in generations {
                    debug!(project = %name, generation = old, "removing stale generation");
                    if let Err(e) = std::fs::remove_dir_all(&path) {
                        warn!(project = %name, error = %e, "failed to remove stale generation");
                    }
                }
            }
            self.last_generation.fetch_max(number, Ordering::SeqCst);
            let generation = Arc::new(Generation {
                name: name.clone(),
                number,
                root,
                retired: AtomicBool::new(false),
            });
            if prune {
                self.point_link(&generation);
            }
            current.insert(name, generation);
        }
        info!(projects = current.len(), "recovered published projects");
        Ok(())
    }
}

fn lock_root(serving_dir: &Path) -> DeployResult<File> {
    let path = serving_dir.join(LOCK_FILE);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| DeployError::io(&path, e))?;
    if file.try_lock_exclusive().is_err() {
        return Err(DeployError::StoreLocked {
            path: serving_dir.to_path_buf(),
        });
    }
    Ok(file)
}

fn parse_generation_dir(dir_name: &str) -> Option<(&str, u64)> {
    let (name, number) = dir_name.rsplit_once('-')?;
    if !is_valid_project_name(name) {
        return None;
    }
    Some((name, number.parse().ok()?))
}
