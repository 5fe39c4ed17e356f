//! Per-request scratch directory.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// A directory exclusively owned by one request.
///
/// Dropping the workspace removes the directory and everything in it, so a
/// request future that is dropped mid-pipeline still cleans up. [`close`]
/// does the same explicitly and reports the outcome.
///
/// [`close`]: Workspace::close
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh directory under `root` for `request_id`.
    pub async fn create(root: &Path, request_id: Uuid) -> PipelineResult<Self> {
        tokio::fs::create_dir_all(root).await.map_err(|e| {
            PipelineError::Workspace(format!("cannot create {}: {e}", root.display()))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("forest-{request_id}-"))
            .tempdir_in(root)
            .map_err(|e| {
                PipelineError::Workspace(format!("cannot create workspace in {}: {e}", root.display()))
            })?;
        let path = dir.path().to_path_buf();
        debug!(workspace = %path.display(), "Created workspace");

        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of an artifact inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Write a text artifact and return its path.
    pub async fn write_text(&self, name: &str, contents: &str) -> PipelineResult<PathBuf> {
        let path = self.file(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| PipelineError::Workspace(format!("cannot write {name}: {e}")))?;
        Ok(path)
    }

    /// Read an artifact into memory.
    pub async fn read(&self, path: &Path) -> PipelineResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::Workspace(format!("cannot read {}: {e}", path.display())))
    }

    /// Remove the directory.
    ///
    /// A failure is logged and returned as `WorkspaceCleanupFailed`; callers
    /// never surface it to the client.
    pub async fn close(mut self) -> PipelineResult<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        let path = self.path.clone();

        let result = tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));

        match result {
            Ok(()) => {
                debug!(workspace = %path.display(), "Removed workspace");
                Ok(())
            }
            Err(reason) => {
                warn!(workspace = %path.display(), error = %reason, "Workspace cleanup failed");
                Err(PipelineError::WorkspaceCleanupFailed(reason))
            }
        }
    }
}
