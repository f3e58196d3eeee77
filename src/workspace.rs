//! Workspace discovery and on-disk layout.
//!
//! All durable state lives under a `.mehrhof/` directory at the repository
//! root. Every mutation of that state goes through [`atomic_write`] so a
//! crash or interrupt can never leave a half-written file behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Name of the data directory at the repository root.
pub const DATA_DIR: &str = ".mehrhof";

/// Name of the global active-task pointer file.
pub const ACTIVE_TASK_FILE: &str = ".active_task";

/// Error type for workspace operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("no .mehrhof workspace found in {} or any parent directory", .0.display())]
    NotFound(PathBuf),

    #[error("workspace already initialized at {}", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_yaml::Error),
}

/// A discovered workspace: the repository root plus its data directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Repository root (the directory containing `.mehrhof/`)
    root: PathBuf,
    /// The `.mehrhof/` data directory
    data_dir: PathBuf,
}

impl Workspace {
    /// Discover the workspace by walking up from `start` until a `.mehrhof`
    /// directory is found.
    pub fn discover(start: &Path) -> Result<Self, WorkspaceError> {
        let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
        let mut dir = start.as_path();
        loop {
            let candidate = dir.join(DATA_DIR);
            if candidate.is_dir() {
                return Ok(Self { root: dir.to_path_buf(), data_dir: candidate });
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => return Err(WorkspaceError::NotFound(start)),
            }
        }
    }

    /// Initialize a new workspace at `root`, creating the data directory
    /// scaffolding.
    pub fn init(root: &Path) -> Result<Self, WorkspaceError> {
        let data_dir = root.join(DATA_DIR);
        if data_dir.exists() {
            return Err(WorkspaceError::AlreadyInitialized(data_dir));
        }

        fs::create_dir_all(data_dir.join("work"))?;
        fs::create_dir_all(data_dir.join("locks"))?;
        fs::create_dir_all(data_dir.join("plugins"))?;

        tracing::info!("initialized workspace at {}", data_dir.display());
        Ok(Self { root: root.to_path_buf(), data_dir })
    }

    /// Open the workspace rooted exactly at `root` (no upward search).
    pub fn open(root: &Path) -> Result<Self, WorkspaceError> {
        let data_dir = root.join(DATA_DIR);
        if !data_dir.is_dir() {
            return Err(WorkspaceError::NotFound(root.to_path_buf()));
        }
        Ok(Self { root: root.to_path_buf(), data_dir })
    }

    /// Repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `.mehrhof/` data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the config file.
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.yaml")
    }

    /// Path of the per-task lock directory.
    pub fn locks_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    /// Path of the per-task work directory.
    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("work")
    }

    /// Path of the project-local plugin directory.
    pub fn plugins_dir(&self) -> PathBuf {
        self.data_dir.join("plugins")
    }

    /// Path of the worktree mapping file.
    pub fn worktrees_path(&self) -> PathBuf {
        self.data_dir.join("worktrees.yaml")
    }

    /// Path of the global active-task pointer.
    pub fn active_task_path(&self) -> PathBuf {
        self.data_dir.join(ACTIVE_TASK_FILE)
    }
}

/// Atomically replace the file at `path` with `content`.
///
/// Writes to a temporary file in the same directory, fsyncs it, then renames
/// over the destination so readers observe either the old or the new content,
/// never a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically write a value serialized as YAML.
pub fn atomic_write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), WorkspaceError> {
    let content = serde_yaml::to_string(value)?;
    atomic_write(path, content.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_and_discover() {
        let temp = tempdir().unwrap();
        Workspace::init(temp.path()).unwrap();

        let nested = temp.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        let ws = Workspace::discover(&nested).unwrap();
        assert!(ws.data_dir().ends_with(DATA_DIR));
        assert!(ws.locks_dir().is_dir());
    }

    #[test]
    fn test_discover_without_workspace() {
        let temp = tempdir().unwrap();
        assert!(matches!(Workspace::discover(temp.path()), Err(WorkspaceError::NotFound(_))));
    }

    #[test]
    fn test_init_twice_fails() {
        let temp = tempdir().unwrap();
        Workspace::init(temp.path()).unwrap();
        assert!(matches!(
            Workspace::init(temp.path()),
            Err(WorkspaceError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.yaml");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }
}
