/// Execution Workspaces
///
/// Every local execution owns one uniquely named directory under a process-wide
/// temp root. The root is created once and lives for the whole process; each
/// workspace is created, written and deleted by the execution that owns it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};
use uuid::Uuid;

static TEMP_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Initialize the process-wide temp root (idempotent).
///
/// The first successful call fixes the root for the process; later calls return
/// the already-initialized path regardless of their argument.
pub fn init_temp_root(path: &Path) -> io::Result<&'static Path> {
    if let Some(root) = TEMP_ROOT.get() {
        return Ok(root.as_path());
    }

    fs::create_dir_all(path)?;
    // Docker bind mounts need absolute host paths
    let absolute = fs::canonicalize(path)?;

    Ok(TEMP_ROOT.get_or_init(|| absolute).as_path())
}

pub fn temp_root() -> Option<&'static Path> {
    TEMP_ROOT.get().map(PathBuf::as_path)
}

/// Workspace guard - guarantees directory removal on drop
/// Removal failures are logged, never propagated.
/// Async callers go through `prepare`/`remove` so the filesystem work runs on
/// the blocking pool; `Drop` only covers early returns and cancellation.
#[derive(Debug)]
pub struct Workspace {
    execution_id: Uuid,
    dir: PathBuf,
}

impl Workspace {
    /// Allocate a fresh `<root>/<uuid>` directory
    pub fn create(root: &Path) -> io::Result<Self> {
        let execution_id = Uuid::new_v4();
        let dir = root.join(execution_id.to_string());

        // create_dir (not create_dir_all): a collision must fail, never share
        fs::create_dir(&dir)?;
        debug!(execution_id = %execution_id, dir = %dir.display(), "Workspace created");

        Ok(Self { execution_id, dir })
    }

    /// Allocate a workspace and write `files` into it on the blocking pool
    pub async fn prepare(root: &'static Path, files: Vec<(String, String)>) -> io::Result<Self> {
        tokio::task::spawn_blocking(move || {
            let ws = Self::create(root)?;
            for (name, contents) in &files {
                ws.write_file(name, contents)?;
            }
            Ok(ws)
        })
        .await
        .map_err(io::Error::other)?
    }

    /// Delete the directory on the blocking pool
    pub async fn remove(self) {
        let execution_id = self.execution_id;
        if let Err(e) = tokio::task::spawn_blocking(move || drop(self)).await {
            warn!(execution_id = %execution_id, error = %e, "Workspace cleanup task failed");
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn write_file(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.dir.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dir.join(name).exists()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(execution_id = %self.execution_id, "Workspace removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                execution_id = %self.execution_id,
                dir = %self.dir.display(),
                error = %e,
                "Failed to cleanup workspace"
            ),
        }
    }
}
