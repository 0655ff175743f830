//! Project type detection from marker files.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::models::ProjectType;

/// Directories skipped when descending one level below the repository root.
const NON_PROJECT_DIRS: [&str; 4] = ["node_modules", ".git", "venv", ".github"];

/// Marker-file check for a single directory, honouring type priority.
pub fn detect(dir: &Path) -> Option<ProjectType> {
    ProjectType::MARKERS
        .iter()
        .find(|(_, marker)| dir.join(marker).is_file())
        .map(|(ty, _)| *ty)
}

/// Decide what kind of project lives under `root`.
///
/// The root is checked first; failing that, each immediate subdirectory is
/// checked in name order. Nothing deeper is inspected. When no marker is
/// found the root is returned with [`ProjectType::Unknown`].
pub fn classify(root: &Path) -> (PathBuf, ProjectType) {
    if let Some(ty) = detect(root) {
        debug!(dir = %root.display(), project_type = %ty, "classified project root");
        return (root.to_path_buf(), ty);
    }

    let Ok(entries) = std::fs::read_dir(root) else {
        warn!(dir = %root.display(), "cannot read directory for classification");
        return (root.to_path_buf(), ProjectType::Unknown);
    };

    let mut subdirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| !NON_PROJECT_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        .map(|e| e.path())
        .collect();
    subdirs.sort();

    for subdir in subdirs {
        if let Some(ty) = detect(&subdir) {
            debug!(dir = %subdir.display(), project_type = %ty, "classified nested project");
            return (subdir, ty);
        }
    }

    warn!(dir = %root.display(), "classification inconclusive, falling back to static publish");
    (root.to_path_buf(), ProjectType::Unknown)
}
