//! Where build artifacts live.
//!
//! The publisher and the resolver both search these lists; neither keeps a
//! private copy.

use std::path::{Path, PathBuf};

/// Conventional build-output directories, in search order. The empty entry
/// stands for the project root itself.
pub const BUILD_OUTPUT_DIRS: [&str; 6] = ["dist", "build", "public", "out", "_site", ""];

/// Asset subdirectories relative to the directory holding `index.html`.
pub const ASSET_SUBDIRS: [&str; 6] = [
    "assets",
    "static/js",
    "static/css",
    "static",
    "_next/static/chunks",
    "_next",
];

/// Well-known asset directories relative to a published project root,
/// scanned as a last resort.
pub const FALLBACK_ASSET_DIRS: [&str; 3] = ["dist/assets", "build/static", "out/_next"];

/// Directories never copied, classified or searched.
pub const SKIPPED_DIRS: [&str; 2] = ["node_modules", ".git"];

pub fn is_skipped_dir(name: &str) -> bool {
    SKIPPED_DIRS.contains(&name)
}

/// Named build-output directories, without the project-root entry.
pub fn named_output_dirs() -> impl Iterator<Item = &'static str> {
    BUILD_OUTPUT_DIRS.iter().copied().filter(|d| !d.is_empty())
}

/// First named build-output directory that exists under `root`.
pub fn find_build_dir(root: &Path) -> Option<&'static str> {
    named_output_dirs().find(|dir| root.join(dir).is_dir())
}

/// Immediate subdirectories of `dir`, sorted by name, excluding skipped ones.
pub fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| !is_skipped_dir(&e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

/// Regular files directly inside `dir`, sorted by name.
pub fn sorted_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    files.sort();
    files
}

/// Locate `index.html` under `root`: the root itself, each named build-output
/// directory, then one level of nested subdirectories (their root, then their
/// build-output directories).
pub fn find_index_html(root: &Path) -> Option<PathBuf> {
    let direct = std::iter::once(root.join("index.html"))
        .chain(named_output_dirs().map(|d| root.join(d).join("index.html")));
    for candidate in direct {
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    for nested in sorted_subdirs(root) {
        let candidates = std::iter::once(nested.join("index.html"))
            .chain(named_output_dirs().map(|d| nested.join(d).join("index.html")));
        for candidate in candidates {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

/// Path of `path` relative to `root` using forward slashes, empty for the root.
pub fn relative_slash_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}
