use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use uuid::Uuid;

/// Per-request scratch files live directly under one root directory
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root directory if it is missing
    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Reserves `<root>/<uuid>.<extension>` for a new upload. Nothing is
    /// written to disk until the caller persists the upload.
    pub fn allocate(&self, extension: &str) -> ScratchGuard {
        let id = Uuid::new_v4();
        let input = self.root.join(format!("{}.{}", id, extension));
        ScratchGuard {
            root: self.root.clone(),
            id,
            files: vec![input],
            released: false,
        }
    }
}

/// Owns the scratch files of one request and removes them exactly once:
/// either through [`ScratchGuard::cleanup`] or, when dropped, from a detached
/// background task.
#[derive(Debug)]
pub struct ScratchGuard {
    root: PathBuf,
    id: Uuid,
    files: Vec<PathBuf>,
    released: bool,
}

impl ScratchGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn input(&self) -> &Path {
        &self.files[0]
    }

    /// Registers a converter output; its containing directory is removed with it
    /// unless that directory is the scratch root itself
    pub fn track_output(&mut self, path: &Path) {
        self.files.push(path.to_path_buf());
    }

    /// Removes everything now and waits for it
    pub async fn cleanup(mut self) {
        self.released = true;
        let root = std::mem::take(&mut self.root);
        let files = std::mem::take(&mut self.files);
        if let Err(e) = tokio::task::spawn_blocking(move || remove_paths(&root, &files)).await {
            tracing::debug!("Scratch cleanup task failed: {}", e);
        }
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let root = std::mem::take(&mut self.root);
        let files = std::mem::take(&mut self.files);
        match Handle::try_current() {
            Ok(handle) => {
                // Fire and forget; nobody waits on the result
                handle.spawn_blocking(move || remove_paths(&root, &files));
            }
            Err(_) => remove_paths(&root, &files),
        }
    }
}

/// Best-effort removal. Errors are logged and otherwise ignored.
fn remove_paths(root: &Path, files: &[PathBuf]) {
    let mut dirs: Vec<&Path> = Vec::new();

    for file in files {
        if let Err(e) = std::fs::remove_file(file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("Could not remove {}: {}", file.display(), e);
            }
        }

        if let Some(parent) = file.parent() {
            if parent != root && parent.starts_with(root) && !dirs.contains(&parent) {
                dirs.push(parent);
            }
        }
    }

    for dir in dirs {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("Could not remove {}: {}", dir.display(), e);
            }
        }
    }

    tracing::debug!("🧹 Removed {} scratch file(s)", files.len());
}
