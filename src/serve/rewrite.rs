//! Points dev-mode entry references in `index.html` at built bundles.
//!
//! A copied `index.html` often still references `/src/main.jsx` and
//! `/src/index.css`. Those are replaced with the hashed files found next to
//! it, prefixed with the project's serving path. Built pages that point at
//! root-absolute bundle directories (`/assets/...` from Vite,
//! `/static/...` from CRA) are re-rooted under the project as well.

use std::path::{Path, PathBuf};

use crate::deploy::layout::{ASSET_SUBDIRS, relative_slash_path, sorted_files};

/// Dev-mode script entry points replaced with the JS bundle.
const SCRIPT_ENTRIES: [&str; 4] = ["/src/main.jsx", "src/main.jsx", "/src/main.tsx", "src/main.tsx"];

/// Dev-mode stylesheet entry points replaced with the CSS bundle.
const STYLE_ENTRIES: [&str; 2] = ["/src/index.css", "src/index.css"];

const MODULE_SRC_PREFIX: &str = r#"type="module" src="/src/"#;

/// Bundle directories that build tools reference from the site root.
const ROOT_BUNDLE_DIRS: [&str; 3] = ["/assets/", "/static/", "/_next/"];

/// A built file, relative to the published project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltFile {
    /// Directory holding the file, relative to the project root with
    /// forward slashes (empty for the root).
    pub dir: String,
    pub file: String,
    pub path: PathBuf,
}

/// Bundles found next to an `index.html`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryAssets {
    pub script: Option<BuiltFile>,
    pub style: Option<BuiltFile>,
}

impl EntryAssets {
    pub fn is_empty(&self) -> bool {
        self.script.is_none() && self.style.is_none()
    }
}

/// Find the JS and CSS bundles in the asset subdirectories of `index_dir`.
pub fn locate_entry_assets(project_root: &Path, index_dir: &Path) -> EntryAssets {
    let dirs: Vec<PathBuf> = ASSET_SUBDIRS
        .iter()
        .map(|sub| index_dir.join(sub))
        .filter(|d| d.is_dir())
        .collect();

    EntryAssets {
        script: dirs
            .iter()
            .find_map(|d| pick_script(d).map(|p| built_file(project_root, d, p))),
        style: dirs
            .iter()
            .find_map(|d| pick_with_extension(d, "css").map(|p| built_file(project_root, d, p))),
    }
}

/// The entry bundle in `dir`: an `index-*` or `main-*` script if present,
/// otherwise the first script by name.
pub fn pick_script(dir: &Path) -> Option<PathBuf> {
    let scripts: Vec<PathBuf> = sorted_files(dir)
        .into_iter()
        .filter(|p| has_extension(p, "js"))
        .collect();
    scripts
        .iter()
        .find(|p| {
            let name = file_name(p);
            name.starts_with("index-") || name.starts_with("main-")
        })
        .or_else(|| scripts.first())
        .cloned()
}

/// First file in `dir` (by name) with extension `ext`.
pub fn pick_with_extension(dir: &Path, ext: &str) -> Option<PathBuf> {
    sorted_files(dir).into_iter().find(|p| has_extension(p, ext))
}

fn built_file(project_root: &Path, dir: &Path, path: PathBuf) -> BuiltFile {
    BuiltFile {
        dir: relative_slash_path(project_root, dir),
        file: file_name(&path),
        path,
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `/projects/{project}/{segments...}` without empty segments or doubled slashes.
pub fn serving_url(project: &str, segments: &[&str]) -> String {
    let mut url = format!("/projects/{}", project);
    for segment in segments {
        let segment = segment.trim_matches('/');
        if !segment.is_empty() {
            url.push('/');
            url.push_str(segment);
        }
    }
    url
}

/// Rewrite entry references in `html` for `project`. `index_dir` is the
/// page's directory relative to the project root (empty for the root).
pub fn rewrite_index(html: &str, project: &str, index_dir: &str, assets: &EntryAssets) -> String {
    let mut out = html.to_string();

    let base = serving_url(project, &[index_dir]);
    for dir in ROOT_BUNDLE_DIRS {
        for attr in ["src", "href"] {
            out = out.replace(
                &format!(r#"{}="{}"#, attr, dir),
                &format!(r#"{}="{}{}"#, attr, base, dir),
            );
        }
    }

    if let Some(script) = &assets.script {
        let url = serving_url(project, &[&script.dir, &script.file]);
        for entry in SCRIPT_ENTRIES {
            out = out.replace(entry, &url);
        }
        let module_prefix = format!(
            r#"type="module" src="{}/"#,
            serving_url(project, &[&script.dir])
        );
        out = out.replace(MODULE_SRC_PREFIX, &module_prefix);
    }

    if let Some(style) = &assets.style {
        let url = serving_url(project, &[&style.dir, &style.file]);
        for entry in STYLE_ENTRIES {
            out = out.replace(entry, &url);
        }
    }

    out
}
