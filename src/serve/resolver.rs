//! Maps `/projects/{name}/{path}` requests onto published files.
//!
//! Static site generators disagree on output layout, so resolution walks a
//! chain of increasingly approximate matches:
//!
//! 1. `/index.html`: locate and rewrite the project's index page.
//! 2. `/src/*.jsx|tsx|css|svg`: hand out the built equivalent.
//! 3. The path under each build-output directory, then the project root.
//! 4. Hashed-filename recovery for well-known static extensions.
//! 5. Any file of the same kind in a well-known asset directory.
//! 6. SPA fallback: extensionless paths get the index page.
//! 7. Not found.
//!
//! Every lookup runs against one generation of the project, held for the
//! whole call, so a concurrent republish is never observed half-done.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::rewrite::{locate_entry_assets, pick_script, pick_with_extension, rewrite_index};
use crate::deploy::layout::{
    ASSET_SUBDIRS, BUILD_OUTPUT_DIRS, FALLBACK_ASSET_DIRS, find_build_dir, find_index_html,
    relative_slash_path, sorted_files,
};
use crate::deploy::models::{display_name, is_valid_project_name};
use crate::deploy::store::{Generation, ProjectStore};

/// Extensions eligible for hashed-filename recovery.
const HASHED_EXTENSIONS: [&str; 6] = ["js", "css", "png", "jpg", "svg", "ico"];

/// Image extensions matched verbatim by the last-resort asset scan.
const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "svg", "ico", "webp"];

/// Outcome of resolving one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A file served verbatim; `path` is used for the content type.
    Asset { path: PathBuf, body: Vec<u8> },
    /// A rewritten index page.
    Html(String),
    /// Nothing matched; carries the requested path.
    NotFound(String),
}

/// One entry of the published project listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub path: String,
    pub build_dir: String,
}

#[derive(Clone)]
pub struct AssetResolver {
    store: Arc<ProjectStore>,
}

impl AssetResolver {
    pub fn new(store: Arc<ProjectStore>) -> Self {
        Self { store }
    }

    /// Resolve `requested` (with or without a leading `/`) for `project`.
    /// Performs blocking filesystem reads.
    pub fn resolve(&self, project: &str, requested: &str) -> Resolved {
        let requested = normalize(requested);
        if !is_valid_project_name(project) {
            return Resolved::NotFound(requested);
        }
        let Some(rel) = safe_relative(&requested) else {
            debug!(project, path = %requested, "rejected unsafe path");
            return Resolved::NotFound(requested);
        };
        let Some(generation) = self.store.current(project) else {
            return Resolved::NotFound(requested);
        };
        let Ok(root) = generation.root().canonicalize() else {
            return Resolved::NotFound(requested);
        };

        let lookup = Lookup {
            project,
            root: &root,
            requested: &requested,
            rel: &rel,
        };
        let resolved = lookup.run();
        drop(generation);
        resolved
    }

    /// Published projects that have something to serve, sorted by name.
    pub fn list_projects(&self) -> Vec<ProjectSummary> {
        self.store.list().iter().filter_map(|g| summarize(g)).collect()
    }
}

fn summarize(generation: &Generation) -> Option<ProjectSummary> {
    let root = generation.root();
    let build_dir = match find_build_dir(root) {
        Some(dir) => dir.to_string(),
        None => {
            let index = find_index_html(root)?;
            relative_slash_path(root, index.parent()?)
        }
    };
    let id = generation.name().to_string();
    Some(ProjectSummary {
        name: display_name(&id),
        path: format!("/projects/{}", id),
        build_dir,
        id,
    })
}

fn normalize(requested: &str) -> String {
    match requested {
        "" | "/" => "/index.html".to_string(),
        p if p.starts_with('/') => p.to_string(),
        p => format!("/{}", p),
    }
}

/// The request path relative to a project root, or `None` if it contains
/// anything but plain components.
fn safe_relative(requested: &str) -> Option<PathBuf> {
    let trimmed = requested.trim_start_matches('/');
    if trimmed.contains('\\') || trimmed.contains('\0') {
        return None;
    }
    let mut rel = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(rel)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

struct Lookup<'a> {
    project: &'a str,
    root: &'a Path,
    requested: &'a str,
    rel: &'a Path,
}

impl Lookup<'_> {
    fn run(&self) -> Resolved {
        if self.requested == "/index.html"
            && let Some(html) = self.index_page()
        {
            return Resolved::Html(html);
        }

        if self.requested.starts_with("/src/")
            && let Some(found) = self.source_passthrough()
        {
            debug!(project = self.project, path = self.requested, "served built file for source path");
            return found;
        }

        if let Some(found) = self.direct() {
            return found;
        }

        if let Some(found) = self.hashed_recovery() {
            debug!(project = self.project, path = self.requested, "recovered hashed asset");
            return found;
        }

        if let Some(found) = self.asset_scan() {
            debug!(project = self.project, path = self.requested, "served asset by kind");
            return found;
        }

        let looks_like_route = self
            .rel
            .file_name()
            .map(|n| !n.to_string_lossy().contains('.'))
            .unwrap_or(true);
        if looks_like_route && let Some(html) = self.index_page() {
            debug!(project = self.project, path = self.requested, "spa fallback");
            return Resolved::Html(html);
        }

        Resolved::NotFound(self.requested.to_string())
    }

    /// Read `path` if it is a regular file inside the project root.
    fn serve(&self, path: &Path) -> Option<Resolved> {
        let canonical = path.canonicalize().ok()?;
        if !canonical.starts_with(self.root) || !canonical.is_file() {
            return None;
        }
        let body = std::fs::read(&canonical).ok()?;
        Some(Resolved::Asset {
            path: canonical,
            body,
        })
    }

    fn inside_root(&self, path: &Path) -> bool {
        path.canonicalize()
            .map(|p| p.starts_with(self.root))
            .unwrap_or(false)
    }

    fn index_page(&self) -> Option<String> {
        let index = find_index_html(self.root)?;
        if !self.inside_root(&index) {
            return None;
        }
        let bytes = std::fs::read(&index).ok()?;
        let html = String::from_utf8_lossy(&bytes);
        let index_dir = index.parent()?;
        let assets = locate_entry_assets(self.root, index_dir);
        let index_rel = relative_slash_path(self.root, index_dir);
        Some(rewrite_index(&html, self.project, &index_rel, &assets))
    }

    /// Asset directories in search order: next to the index page first,
    /// then under every build-output directory.
    fn asset_dirs(&self) -> Vec<PathBuf> {
        let mut bases: Vec<PathBuf> = Vec::new();
        if let Some(dir) = find_index_html(self.root).and_then(|i| i.parent().map(Path::to_path_buf)) {
            bases.push(dir);
        }
        bases.extend(BUILD_OUTPUT_DIRS.iter().map(|b| self.root.join(b)));

        let mut dirs: Vec<PathBuf> = Vec::new();
        for base in bases {
            for sub in ASSET_SUBDIRS {
                let dir = base.join(sub);
                if dir.is_dir() && !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        dirs
    }

    fn source_passthrough(&self) -> Option<Resolved> {
        match extension(self.rel)?.as_str() {
            "jsx" | "tsx" => self
                .asset_dirs()
                .iter()
                .find_map(|d| pick_script(d))
                .and_then(|p| self.serve(&p)),
            ext @ ("css" | "svg") => self
                .asset_dirs()
                .iter()
                .find_map(|d| pick_with_extension(d, ext))
                .and_then(|p| self.serve(&p)),
            _ => None,
        }
    }

    fn direct(&self) -> Option<Resolved> {
        BUILD_OUTPUT_DIRS
            .iter()
            .find_map(|b| self.serve(&self.root.join(b).join(self.rel)))
    }

    fn hashed_recovery(&self) -> Option<Resolved> {
        let ext = extension(self.rel)?;
        if !HASHED_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }
        let stem = self.rel.file_stem()?.to_string_lossy().into_owned();
        let mut prefixes = vec![stem.clone()];
        if let Some((head, _hash)) = stem.rsplit_once(['-', '.'])
            && !head.is_empty()
        {
            prefixes.push(head.to_string());
        }

        let parent = self.rel.parent().unwrap_or(Path::new(""));
        let mut dirs: Vec<PathBuf> = BUILD_OUTPUT_DIRS
            .iter()
            .map(|b| self.root.join(b).join(parent))
            .filter(|d| d.is_dir())
            .collect();
        for dir in self.asset_dirs() {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }

        let suffix = format!(".{}", ext);
        for prefix in &prefixes {
            for dir in &dirs {
                let found = sorted_files(dir).into_iter().find(|p| {
                    let name = p.file_name().map(|n| n.to_string_lossy().to_ascii_lowercase());
                    name.is_some_and(|n| n.starts_with(&prefix.to_ascii_lowercase()) && n.ends_with(&suffix))
                });
                if let Some(resolved) = found.and_then(|p| self.serve(&p)) {
                    return Some(resolved);
                }
            }
        }
        None
    }

    fn asset_scan(&self) -> Option<Resolved> {
        let target = match extension(self.rel)?.as_str() {
            "js" | "jsx" => "js".to_string(),
            "css" => "css".to_string(),
            ext if IMAGE_EXTENSIONS.contains(&ext) => ext.to_string(),
            _ => return None,
        };
        FALLBACK_ASSET_DIRS
            .iter()
            .map(|d| self.root.join(d))
            .filter(|d| d.is_dir())
            .find_map(|d| pick_with_extension(&d, &target))
            .and_then(|p| self.serve(&p))
    }
}
