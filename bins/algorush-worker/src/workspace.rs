/// Workspace Manager - One ephemeral directory per execution attempt
///
/// Every attempt gets `<root>/run-<uuid>`, created empty. File I/O goes
/// through `tokio::fs`; the directory itself is removed synchronously when the
/// `Workspace` is closed or dropped, so it is gone on normal return, error,
/// panic and cancellation alike.
use crate::error::{GradeError, Result};
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh, uniquely named, empty directory.
    pub fn allocate(&self) -> Result<Workspace> {
        fs::create_dir_all(&self.root).map_err(|source| GradeError::Workspace {
            path: self.root.clone(),
            source,
        })?;

        let id = Uuid::new_v4();
        let dir = self.root.join(format!("run-{}", id));
        // create_dir, not create_dir_all: an existing directory is an error
        fs::create_dir(&dir).map_err(|source| GradeError::Workspace {
            path: dir.clone(),
            source,
        })?;

        debug!(workspace = %dir.display(), "Allocated workspace");
        Ok(Workspace {
            id,
            dir,
            removed: AtomicBool::new(false),
        })
    }

    /// Run `f` inside a fresh workspace and delete it before returning,
    /// whatever `f` returns. Dropping the returned future mid-flight also
    /// deletes it.
    pub async fn with_workspace<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Workspace>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let workspace = Arc::new(self.allocate()?);
        let outcome = f(Arc::clone(&workspace)).await;
        workspace.close();
        outcome
    }
}

/// A live workspace directory. Deleted on `close` or drop.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    dir: PathBuf,
    removed: AtomicBool,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub async fn write_file(&self, name: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.file(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| GradeError::Workspace {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.file(name);
        tokio::fs::read(&path)
            .await
            .map_err(|source| GradeError::Workspace { path, source })
    }

    /// Write an executable file (used to place a prebuilt artifact).
    pub async fn write_executable(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.write_file(name, contents).await?;
        set_executable(&path)
            .await
            .map_err(|source| GradeError::Workspace {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Delete the directory now. Idempotent.
    pub fn close(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(workspace = %self.dir.display(), "Removed workspace"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                workspace = %self.dir.display(),
                error = %e,
                "Failed to remove workspace"
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
