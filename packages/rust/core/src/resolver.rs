//! Project boundary resolution.
//!
//! Ascends from the input document's directory to the nearest ancestor
//! holding a marker file. The repository root and the project root are
//! resolved independently and may coincide.

use std::path::{Path, PathBuf};

use tracing::debug;

use docforge_shared::{CompilationRequest, DocForgeError, MarkersConfig, ProjectContext, Result};

/// Find the nearest ancestor of `start` (inclusive) that contains `marker`.
pub fn find_root(start: &Path, marker: &str) -> Result<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(marker).exists())
        .map(Path::to_path_buf)
        .ok_or_else(|| DocForgeError::RootNotFound {
            marker: marker.to_string(),
            start: start.to_path_buf(),
        })
}

/// Resolve both roots for a request.
///
/// An explicit config file replaces the project-root ascent entirely: its
/// directory becomes the project root.
pub fn resolve_project(
    request: &CompilationRequest,
    markers: &MarkersConfig,
) -> Result<ProjectContext> {
    let start = request.input_dir();
    let repository_root = find_root(start, &markers.repository)?;

    let (project_root, config_path) = match &request.config {
        Some(config) => {
            if !config.is_file() {
                return Err(DocForgeError::config(format!(
                    "config file {} does not exist",
                    config.display()
                )));
            }
            let dir = config.parent().unwrap_or(Path::new("/")).to_path_buf();
            (dir, config.clone())
        }
        None => {
            let root = find_root(start, &markers.project)?;
            let config = root.join(&markers.project);
            (root, config)
        }
    };

    debug!(
        repository_root = %repository_root.display(),
        project_root = %project_root.display(),
        config = %config_path.display(),
        "resolved project context"
    );

    Ok(ProjectContext {
        repository_root,
        project_root,
        config_path,
    })
}
