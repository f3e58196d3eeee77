//! Durable task state under `work/<task-id>/`.
//!
//! Layout per task:
//!
//! ```text
//! work/<task-id>/work.yaml                        # Task record
//! work/<task-id>/specifications/specification-N.md
//! work/<task-id>/reviews/review-N.txt
//! work/<task-id>/sessions/<timestamp>.yaml
//! ```
//!
//! Specifications and reviews are append-only numbered artifacts; the task
//! record is replaced atomically on every mutation.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::{SessionRecord, Task};
use crate::workspace::{atomic_write, atomic_write_yaml};

/// Error type for task store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid task state: {0}")]
    Serde(#[from] serde_yaml::Error),
}

/// Durable representation of task state.
///
/// All mutations are atomic (write-temp, fsync, rename); concurrent readers
/// observe either the previous or the new state.
#[derive(Debug, Clone)]
pub struct TaskStore {
    work_dir: PathBuf,
}

impl TaskStore {
    /// Create a store rooted at the workspace's `work/` directory.
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }

    /// Directory holding one task's artifacts.
    pub fn task_dir(&self, id: Uuid) -> PathBuf {
        self.work_dir.join(id.to_string())
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.task_dir(id).join("work.yaml")
    }

    /// Persist a task record, creating the task directory on first save.
    pub fn save(&self, task: &Task) -> Result<(), StoreError> {
        let dir = self.task_dir(task.id);
        fs::create_dir_all(&dir)?;
        atomic_write_yaml(&self.record_path(task.id), task).map_err(|e| match e {
            crate::workspace::WorkspaceError::Io(io) => StoreError::Io(io),
            crate::workspace::WorkspaceError::Serde(s) => StoreError::Serde(s),
            other => StoreError::Io(std::io::Error::other(other.to_string())),
        })?;
        Ok(())
    }

    /// Load a task record.
    pub fn load(&self, id: Uuid) -> Result<Task, StoreError> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id));
        }
        let content = fs::read_to_string(&path)?;
        let task = serde_yaml::from_str(&content)?;
        Ok(task)
    }

    /// Whether a task record exists.
    pub fn exists(&self, id: Uuid) -> bool {
        self.record_path(id).exists()
    }

    /// List all task ids present in the store.
    pub fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut ids = Vec::new();
        if !self.work_dir.exists() {
            return Ok(ids);
        }
        for entry in fs::read_dir(&self.work_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Ok(id) = entry.file_name().to_string_lossy().parse::<Uuid>() {
                if self.exists(id) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove a task and all of its artifacts.
    pub fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let dir = self.task_dir(id);
        if !dir.exists() {
            return Err(StoreError::NotFound(id));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Specifications (append-only, numbered)
    // ------------------------------------------------------------------

    fn specifications_dir(&self, id: Uuid) -> PathBuf {
        self.task_dir(id).join("specifications")
    }

    /// Append a new numbered specification and return its sequence number.
    pub fn add_specification(&self, id: Uuid, content: &str) -> Result<u32, StoreError> {
        let dir = self.specifications_dir(id);
        fs::create_dir_all(&dir)?;
        let n = next_sequence(&dir, "specification-", ".md")?;
        atomic_write(&dir.join(format!("specification-{n}.md")), content.as_bytes())?;
        Ok(n)
    }

    /// Number of specifications recorded for a task.
    pub fn specification_count(&self, id: Uuid) -> Result<u32, StoreError> {
        count_artifacts(&self.specifications_dir(id), "specification-", ".md")
    }

    /// Read one specification by sequence number.
    pub fn read_specification(&self, id: Uuid, n: u32) -> Result<String, StoreError> {
        let path = self.specifications_dir(id).join(format!("specification-{n}.md"));
        Ok(fs::read_to_string(path)?)
    }

    // ------------------------------------------------------------------
    // Reviews (append-only, numbered; verdict on the first line)
    // ------------------------------------------------------------------

    fn reviews_dir(&self, id: Uuid) -> PathBuf {
        self.task_dir(id).join("reviews")
    }

    /// Append a new numbered review and return its sequence number.
    pub fn add_review(&self, id: Uuid, content: &str) -> Result<u32, StoreError> {
        let dir = self.reviews_dir(id);
        fs::create_dir_all(&dir)?;
        let n = next_sequence(&dir, "review-", ".txt")?;
        atomic_write(&dir.join(format!("review-{n}.txt")), content.as_bytes())?;
        Ok(n)
    }

    /// Number of reviews recorded for a task.
    pub fn review_count(&self, id: Uuid) -> Result<u32, StoreError> {
        count_artifacts(&self.reviews_dir(id), "review-", ".txt")
    }

    /// Read the most recent review, if any.
    pub fn latest_review(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let n = self.review_count(id)?;
        if n == 0 {
            return Ok(None);
        }
        let path = self.reviews_dir(id).join(format!("review-{n}.txt"));
        Ok(Some(fs::read_to_string(path)?))
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    fn sessions_dir(&self, id: Uuid) -> PathBuf {
        self.task_dir(id).join("sessions")
    }

    /// Append a session record named by its timestamp.
    pub fn add_session(&self, id: Uuid, record: &SessionRecord) -> Result<(), StoreError> {
        let dir = self.sessions_dir(id);
        fs::create_dir_all(&dir)?;
        let name = format!("{}.yaml", record.timestamp.format("%Y%m%dT%H%M%S%.3f"));
        atomic_write_yaml(&dir.join(name), record).map_err(|e| match e {
            crate::workspace::WorkspaceError::Io(io) => StoreError::Io(io),
            crate::workspace::WorkspaceError::Serde(s) => StoreError::Serde(s),
            other => StoreError::Io(std::io::Error::other(other.to_string())),
        })?;
        Ok(())
    }

    /// Session records for a task, oldest first.
    pub fn sessions(&self, id: Uuid) -> Result<Vec<SessionRecord>, StoreError> {
        let dir = self.sessions_dir(id);
        let mut names: Vec<PathBuf> = Vec::new();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                names.push(entry?.path());
            }
        }
        names.sort();
        let mut records = Vec::new();
        for path in names {
            let content = fs::read_to_string(&path)?;
            records.push(serde_yaml::from_str(&content)?);
        }
        Ok(records)
    }
}

/// Next sequence number for a numbered artifact directory (1-based).
fn next_sequence(dir: &Path, prefix: &str, suffix: &str) -> Result<u32, StoreError> {
    Ok(count_artifacts(dir, prefix, suffix)? + 1)
}

/// Highest sequence number present for a numbered artifact directory.
fn count_artifacts(dir: &Path, prefix: &str, suffix: &str) -> Result<u32, StoreError> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut max = 0u32;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(rest) = name.strip_prefix(prefix).and_then(|r| r.strip_suffix(suffix)) {
            if let Ok(n) = rest.parse::<u32>() {
                max = max.max(n);
            }
        }
    }
    Ok(max)
}
