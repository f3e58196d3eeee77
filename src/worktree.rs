//! Worktree registry: maps working directories to tasks.
//!
//! Commands auto-detect "the current task" from the caller's location: a
//! caller inside a registered worktree resolves to that worktree's task,
//! while a caller in the main checkout falls back to the repository's single
//! global `.active_task` pointer.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workspace::{atomic_write, atomic_write_yaml, Workspace};

/// Error type for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("directory {} is already mapped to task {}", .0.display(), .1)]
    DirectoryTaken(PathBuf, Uuid),

    #[error("task {0} already has a registered worktree")]
    TaskTaken(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid registry state: {0}")]
    Serde(#[from] serde_yaml::Error),
}

/// One worktree-to-task mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeMapping {
    /// Absolute path of the worktree root
    pub directory: PathBuf,
    /// Task developed in that worktree
    pub task_id: Uuid,
    /// Branch checked out in that worktree
    pub branch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    mappings: Vec<WorktreeMapping>,
}

/// Registry of worktree mappings plus the global active-task pointer.
#[derive(Debug, Clone)]
pub struct WorktreeRegistry {
    registry_path: PathBuf,
    active_task_path: PathBuf,
}

impl WorktreeRegistry {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            registry_path: workspace.worktrees_path(),
            active_task_path: workspace.active_task_path(),
        }
    }

    fn read(&self) -> Result<RegistryFile, RegistryError> {
        if !self.registry_path.exists() {
            return Ok(RegistryFile::default());
        }
        let content = fs::read_to_string(&self.registry_path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    fn write(&self, file: &RegistryFile) -> Result<(), RegistryError> {
        atomic_write_yaml(&self.registry_path, file).map_err(|e| match e {
            crate::workspace::WorkspaceError::Io(io) => RegistryError::Io(io),
            crate::workspace::WorkspaceError::Serde(s) => RegistryError::Serde(s),
            other => RegistryError::Io(std::io::Error::other(other.to_string())),
        })
    }

    /// Resolve the task owning the most specific registered ancestor of
    /// `cwd`, falling back to the global active-task pointer.
    ///
    /// Returns `None` when neither matches (no active task).
    pub fn resolve(&self, cwd: &Path) -> Result<Option<Uuid>, RegistryError> {
        let cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
        let file = self.read()?;

        let best = file
            .mappings
            .iter()
            .filter(|m| cwd.starts_with(&m.directory))
            .max_by_key(|m| m.directory.components().count());
        if let Some(mapping) = best {
            return Ok(Some(mapping.task_id));
        }

        Ok(self.active_task())
    }

    /// Register a worktree mapping for a task.
    ///
    /// Invariant: at most one task per directory, and at most one directory
    /// per task.
    pub fn register(&self, directory: &Path, task_id: Uuid, branch: &str) -> Result<(), RegistryError> {
        let directory = directory.canonicalize().unwrap_or_else(|_| directory.to_path_buf());
        let mut file = self.read()?;

        if let Some(existing) = file.mappings.iter().find(|m| m.directory == directory) {
            return Err(RegistryError::DirectoryTaken(directory, existing.task_id));
        }
        if file.mappings.iter().any(|m| m.task_id == task_id) {
            return Err(RegistryError::TaskTaken(task_id));
        }

        file.mappings.push(WorktreeMapping {
            directory,
            task_id,
            branch: branch.to_string(),
        });
        self.write(&file)
    }

    /// Remove the mapping for a task, if any. Returns the removed mapping.
    pub fn unregister(&self, task_id: Uuid) -> Result<Option<WorktreeMapping>, RegistryError> {
        let mut file = self.read()?;
        let index = file.mappings.iter().position(|m| m.task_id == task_id);
        let removed = index.map(|i| file.mappings.remove(i));
        if removed.is_some() {
            self.write(&file)?;
        }
        Ok(removed)
    }

    /// The mapping registered for a task, if any.
    pub fn mapping(&self, task_id: Uuid) -> Result<Option<WorktreeMapping>, RegistryError> {
        Ok(self.read()?.mappings.into_iter().find(|m| m.task_id == task_id))
    }

    /// All registered mappings.
    pub fn mappings(&self) -> Result<Vec<WorktreeMapping>, RegistryError> {
        Ok(self.read()?.mappings)
    }

    /// The global active-task pointer, if set and well-formed.
    pub fn active_task(&self) -> Option<Uuid> {
        let content = fs::read_to_string(&self.active_task_path).ok()?;
        content.trim().parse().ok()
    }

    /// Point the global active-task pointer at a task.
    pub fn set_active_task(&self, task_id: Uuid) -> Result<(), RegistryError> {
        atomic_write(&self.active_task_path, task_id.to_string().as_bytes())?;
        Ok(())
    }

    /// Clear the global active-task pointer if it points at `task_id`.
    pub fn clear_active_task(&self, task_id: Uuid) {
        if self.active_task() == Some(task_id) {
            let _ = fs::remove_file(&self.active_task_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry() -> (tempfile::TempDir, WorktreeRegistry) {
        let temp = tempdir().unwrap();
        let workspace = Workspace::init(temp.path()).unwrap();
        (temp, WorktreeRegistry::new(&workspace))
    }

    #[test]
    fn test_resolve_under_registered_worktree() {
        let (temp, registry) = registry();
        let id = Uuid::new_v4();

        let wt = temp.path().join("worktrees/t1");
        fs::create_dir_all(wt.join("src/deep")).unwrap();
        registry.register(&wt, id, "task/t1").unwrap();

        assert_eq!(registry.resolve(&wt.join("src/deep")).unwrap(), Some(id));
        assert_eq!(registry.resolve(&wt).unwrap(), Some(id));
    }

    #[test]
    fn test_resolve_prefers_most_specific_ancestor() {
        let (temp, registry) = registry();
        let outer = Uuid::new_v4();
        let inner = Uuid::new_v4();

        let outer_dir = temp.path().join("a");
        let inner_dir = temp.path().join("a/nested");
        fs::create_dir_all(&inner_dir).unwrap();
        registry.register(&outer_dir, outer, "task/outer").unwrap();
        registry.register(&inner_dir, inner, "task/inner").unwrap();

        assert_eq!(registry.resolve(&inner_dir).unwrap(), Some(inner));
        assert_eq!(registry.resolve(&outer_dir).unwrap(), Some(outer));
    }

    #[test]
    fn test_resolve_falls_back_to_active_task() {
        let (temp, registry) = registry();
        let id = Uuid::new_v4();

        assert_eq!(registry.resolve(temp.path()).unwrap(), None);

        registry.set_active_task(id).unwrap();
        assert_eq!(registry.resolve(temp.path()).unwrap(), Some(id));

        registry.clear_active_task(id);
        assert_eq!(registry.resolve(temp.path()).unwrap(), None);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let (temp, registry) = registry();
        let dir = temp.path().join("wt");
        fs::create_dir_all(&dir).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        registry.register(&dir, a, "task/a").unwrap();
        assert!(matches!(
            registry.register(&dir, b, "task/b"),
            Err(RegistryError::DirectoryTaken(..))
        ));

        let other = temp.path().join("wt2");
        fs::create_dir_all(&other).unwrap();
        assert!(matches!(registry.register(&other, a, "task/a"), Err(RegistryError::TaskTaken(_))));
    }

    #[test]
    fn test_unregister() {
        let (temp, registry) = registry();
        let id = Uuid::new_v4();
        let dir = temp.path().join("wt");
        fs::create_dir_all(&dir).unwrap();

        registry.register(&dir, id, "task/x").unwrap();
        let removed = registry.unregister(id).unwrap().unwrap();
        assert_eq!(removed.task_id, id);
        assert_eq!(registry.resolve(&dir).unwrap(), None);
        assert!(registry.unregister(id).unwrap().is_none());
    }
}
