//! Scoped ownership of a run's transient resources.
//!
//! A [`CleanupRegistry`] is acquired at the start of every pipeline run. It
//! owns a fresh temporary directory and the list of intermediate files the
//! run creates. Release happens exactly once: explicitly at the end of the
//! run, or from `Drop` when the run returns early, fails, or its future is
//! dropped on interruption.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use docforge_shared::{DocForgeError, Result};

/// Prefix for per-run temporary directories.
const TEMP_PREFIX: &str = "docforge-";

/// Transient resources of one pipeline run.
#[derive(Debug)]
pub struct CleanupRegistry {
    temp_dir: Option<TempDir>,
    workdir: PathBuf,
    files: Vec<PathBuf>,
    released: bool,
}

impl CleanupRegistry {
    /// Create the run's temporary directory under `temp_root` (or the system
    /// temp dir) and start tracking.
    pub fn acquire(temp_root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);

        let temp_dir = match temp_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| DocForgeError::io(root, e))?;
                builder.tempdir_in(root).map_err(|e| DocForgeError::io(root, e))?
            }
            None => builder
                .tempdir()
                .map_err(|e| DocForgeError::io(std::env::temp_dir(), e))?,
        };

        let workdir = temp_dir.path().to_path_buf();
        debug!(workdir = %workdir.display(), "acquired temporary directory");

        Ok(Self {
            temp_dir: Some(temp_dir),
            workdir,
            files: Vec::new(),
            released: false,
        })
    }

    /// The run's temporary working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Track a file for removal. Registering a path that never gets created
    /// is fine.
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.files.contains(&path) {
            debug!(path = %path.display(), "registered for cleanup");
            self.files.push(path);
        }
    }

    /// Remove every tracked file and the temporary directory. Missing entries
    /// are ignored. Subsequent calls do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        for path in self.files.drain(..) {
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match removed {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove"),
            }
        }

        if let Some(dir) = self.temp_dir.take() {
            match dir.close() {
                Ok(()) => debug!(workdir = %self.workdir.display(), "removed temporary directory"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(workdir = %self.workdir.display(), error = %e, "failed to remove temporary directory")
                }
            }
        }
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        self.release();
    }
}
